use anyhow::Context;
use kube::api::ListParams;
use kube::{Api, Client};

use kube_scaler::crd::GeneralScaler;

pub async fn run() -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes cluster. Is your kubeconfig valid?")?;

    let scalers: Api<GeneralScaler> = Api::all(client);

    let scaler_list = scalers
        .list(&ListParams::default())
        .await
        .context("Failed to list GeneralScalers. Is the CRD installed?")?;

    let mut rows: Vec<(String, String, String, String, String)> = scaler_list
        .into_iter()
        .map(|s| {
            let namespace = s.metadata.namespace.unwrap_or_default();
            let name = s.metadata.name.unwrap_or_default();
            let target = s.spec.target_name().unwrap_or("<none>").to_string();
            let policy = s.spec.policy().kind().to_string();
            let replicas = s
                .status
                .as_ref()
                .and_then(|st| st.current_replicas)
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string());
            (namespace, name, target, policy, replicas)
        })
        .collect();

    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    println!(
        "{:<20} {:<40} {:<30} {:<8} {:<10}",
        "NAMESPACE", "NAME", "TARGET", "POLICY", "REPLICAS"
    );
    println!("{}", "-".repeat(108));

    for (namespace, name, target, policy, replicas) in &rows {
        println!(
            "{:<20} {:<40} {:<30} {:<8} {:<10}",
            namespace, name, target, policy, replicas
        );
    }

    println!("\nTotal: {} scalers", rows.len());

    Ok(())
}
