use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kube-scaler")]
#[command(about = "GeneralScaler workload autoscaler controller")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity and permissions
    Check,

    /// List GeneralScaler objects across all namespaces
    List,

    /// Manage the GeneralScaler CRD
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },

    /// Start the autoscaler control loop
    Run {
        /// Seconds between reconcile ticks
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,

        /// Port for the /metrics, /healthz and /readyz endpoints
        #[arg(long, default_value_t = 9090)]
        metrics_port: u16,
    },
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print the CRD YAML to stdout
    Generate,

    /// Install the CRD into the connected cluster
    Install,
}
