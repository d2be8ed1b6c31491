use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::SecondsFormat;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use prometheus::{Encoder, Histogram, IntCounter, IntGauge, IntGaugeVec, Registry, TextEncoder};
use tokio::signal;
use tokio::sync::{Mutex, broadcast};
use tokio::time::sleep;
use tracing::{error, info, warn};

use kube_scaler::crd::{
    GeneralScaler, GeneralScalerStatus, REASON_COOLDOWN_ACTIVE, REASON_SCALING_APPLIED,
};
use kube_scaler::plugins::PluginRegistry;
use kube_scaler::policy::{self, ReplicaBounds};
use kube_scaler::safety::{SafetyManager, ScaleDirection};

/* ============================= CONFIG ============================= */

const FIELD_MANAGER: &str = "kube-scaler-controller";
const TICK_ERROR_BACKOFF: Duration = Duration::from_secs(10);

/* ============================= PROMETHEUS ============================= */

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static TICKS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "generalscaler_ticks_total",
        "Total reconcile ticks of the control loop",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

static RECONCILE_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "generalscaler_reconcile_total",
        "Total per-scaler reconcile invocations",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

static RECONCILE_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "generalscaler_reconcile_errors_total",
        "Total per-scaler reconcile errors",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

static SCALE_OPERATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "generalscaler_scale_operations_total",
        "Total scale mutations issued to targets",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

static SCALERS_SEEN: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new(
        "generalscaler_scalers_seen",
        "GeneralScaler objects listed in the last tick",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

static DESIRED_REPLICAS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        prometheus::Opts::new(
            "generalscaler_desired_replicas",
            "Replica count last requested per scaler",
        ),
        &["namespace", "scaler"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

static TICK_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(prometheus::HistogramOpts::new(
        "generalscaler_tick_duration_seconds",
        "Duration of each reconcile tick in seconds",
    ))
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

/* ============================= STATE ============================= */

pub(crate) struct ControllerState {
    pub(crate) ready: bool,
}

/* ============================= CONTEXT ============================= */

struct ControllerContext {
    client: Client,
    plugins: PluginRegistry,
    safety: SafetyManager,
}

/* ============================= ENTRY ============================= */

pub async fn run(interval_secs: u64, metrics_port: u16) -> Result<()> {
    println!("Starting GeneralScaler controller...\n");

    let client = Client::try_default()
        .await
        .context("Failed to load kubeconfig")?;

    // Verify actual cluster connectivity before starting the loop
    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {}. Is the cluster running?", e);
        }
    }

    let ctx = Arc::new(ControllerContext {
        client,
        plugins: PluginRegistry::new(),
        safety: SafetyManager::new(),
    });

    // Force-init Prometheus metrics so they appear on /metrics
    LazyLock::force(&TICKS_TOTAL);
    LazyLock::force(&RECONCILE_TOTAL);
    LazyLock::force(&RECONCILE_ERRORS);
    LazyLock::force(&SCALE_OPERATIONS_TOTAL);
    LazyLock::force(&SCALERS_SEEN);
    LazyLock::force(&DESIRED_REPLICAS);
    LazyLock::force(&TICK_DURATION);

    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    let interval = Duration::from_secs(interval_secs);

    println!("  CRD watch ................... GeneralScaler.autoscaling.example.com/v1alpha1");
    println!("  Metric plugins .............. {}", ctx.plugins.names().join(", "));
    println!("  Tick interval ............... {}s", interval.as_secs());
    println!("  Metrics server .............. http://{addr}");
    println!();
    println!("  Available endpoints:");
    println!("    GET /healthz .............. Liveness probe (always 200 OK)");
    println!("    GET /readyz ............... Readiness probe (503 until first tick, then 200)");
    println!("    GET /metrics .............. Prometheus metrics scrape endpoint");
    println!();
    println!("Controller running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    info!(interval_secs, "controller_started");

    let controller_state = Arc::new(Mutex::new(ControllerState { ready: false }));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_state = controller_state.clone();
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle =
        tokio::spawn(async move { start_metrics_server(http_state, http_shutdown, addr).await });

    let loop_ctx = ctx.clone();
    let loop_state = controller_state.clone();
    let loop_shutdown = shutdown_tx.subscribe();
    let loop_handle =
        tokio::spawn(async move { control_loop(loop_ctx, loop_state, loop_shutdown, interval).await });

    signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    println!("\n{}", "=".repeat(70));
    println!("Shutdown signal received. Stopping controller...");
    println!("{}", "=".repeat(70));

    let _ = shutdown_tx.send(());
    let _ = loop_handle.await?;
    let _ = http_handle.await?;

    info!("controller_stopped");
    println!("Controller stopped.");

    Ok(())
}

/* ============================= CONTROL LOOP ============================= */

/// Tick forever: list every scaler, reconcile all of them concurrently,
/// then sleep until the next tick. A listing failure backs off 10 s and
/// keeps going; only the shutdown signal ends the loop.
async fn control_loop(
    ctx: Arc<ControllerContext>,
    state: Arc<Mutex<ControllerState>>,
    mut shutdown: broadcast::Receiver<()>,
    interval: Duration,
) -> Result<()> {
    loop {
        let sleep_for = match run_tick(&ctx, &state).await {
            Ok(count) => {
                info!(scalers = count, "tick_complete");
                interval
            }
            Err(e) => {
                error!(error = %e, "tick_failed");
                eprintln!("[ERROR] Tick failed: {e}");
                TICK_ERROR_BACKOFF
            }
        };

        tokio::select! {
            _ = shutdown.recv() => {
                info!("control_loop_stopped");
                return Ok(());
            }
            _ = sleep(sleep_for) => {}
        }
    }
}

/// One tick: cluster-wide listing, then a concurrent fan-out with a
/// barrier before returning. Per-scaler failures are contained inside
/// `reconcile_scaler` and never reach the tick.
async fn run_tick(ctx: &Arc<ControllerContext>, state: &Arc<Mutex<ControllerState>>) -> Result<usize> {
    TICKS_TOTAL.inc();
    let _timer = TICK_DURATION.start_timer();

    let scalers: Api<GeneralScaler> = Api::all(ctx.client.clone());
    let scaler_list = scalers
        .list(&Default::default())
        .await
        .context("Failed to list GeneralScalers")?;

    let count = scaler_list.items.len();
    SCALERS_SEEN.set(count as i64);

    info!(scalers = count, "tick_started");
    println!(
        "[{}] Reconciling {} GeneralScaler(s)",
        chrono::Utc::now().format("%H:%M:%S"),
        count
    );

    let tasks = scaler_list.items.iter().map(|scaler| {
        let ctx = ctx.clone();
        async move { reconcile_scaler(&ctx, scaler).await }
    });
    futures::future::join_all(tasks).await;

    let mut s = state.lock().await;
    if !s.ready {
        s.ready = true;
    }

    Ok(count)
}

/* ============================= RECONCILE ============================= */

/// Per-scaler pipeline: read target, collect samples, compute desired,
/// gate through cooldown and rate limits, mutate, update status.
///
/// All failures are logged and swallowed here so one scaler can never
/// block another.
async fn reconcile_scaler(ctx: &ControllerContext, scaler: &GeneralScaler) {
    RECONCILE_TOTAL.inc();

    let name = scaler.name_any();
    let namespace = scaler.namespace().unwrap_or_else(|| "default".to_string());
    let key = format!("{namespace}/{name}");
    let spec = &scaler.spec;

    info!(scaler = %key, "reconcile_start");

    // ── Resolve the target reference ──
    let Some(target_name) = spec.target_name() else {
        RECONCILE_ERRORS.inc();
        error!(scaler = %key, "missing_target_ref");
        return;
    };

    // ── Read the target's current replica count ──
    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
    let deployment = match deployments.get(target_name).await {
        Ok(d) => d,
        Err(kube::Error::Api(err)) if err.code == 404 => {
            RECONCILE_ERRORS.inc();
            error!(scaler = %key, target = %target_name, "target_not_found");
            return;
        }
        Err(e) => {
            RECONCILE_ERRORS.inc();
            error!(scaler = %key, target = %target_name, error = %e, "target_read_failed");
            return;
        }
    };

    let current = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);

    // ── Collect metric samples ──
    let samples = ctx.plugins.collect_samples(&spec.metrics, &key);
    if samples.is_empty() {
        warn!(scaler = %key, "no_metric_samples");
        return;
    }

    // ── Compute the desired replica count ──
    let bounds = ReplicaBounds::from_spec(spec);
    let desired = policy::calculate_desired_replicas(current, &samples, &spec.policy(), &bounds);

    info!(
        scaler = %key,
        target = %target_name,
        samples = ?samples,
        current,
        desired,
        "policy_evaluated"
    );

    // ── No-op fast path ──
    if desired == current {
        update_status(ctx, &namespace, &name, target_name, current, REASON_SCALING_APPLIED).await;
        return;
    }

    // ── Cooldown gate ──
    let direction = ScaleDirection::between(current, desired);
    let safety_cfg = spec.safety();

    if !ctx.safety.can_scale(&key, &safety_cfg, direction) {
        info!(
            scaler = %key,
            direction = direction.as_str(),
            "scale_blocked_by_cooldown"
        );
        update_status(ctx, &namespace, &name, target_name, current, REASON_COOLDOWN_ACTIVE).await;
        return;
    }

    // ── Rate limit, then mutate only on an actual change ──
    let limited = ctx.safety.apply_rate_limits(current, desired, &safety_cfg);

    if limited != current {
        let patch = serde_json::json!({ "spec": { "replicas": limited } });

        if let Err(e) = deployments
            .patch(target_name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
        {
            RECONCILE_ERRORS.inc();
            error!(scaler = %key, target = %target_name, error = %e, "scale_patch_failed");
            return;
        }

        ctx.safety.record_scale_operation(&key);
        SCALE_OPERATIONS_TOTAL.inc();

        info!(
            scaler = %key,
            target = %target_name,
            from = current,
            to = limited,
            "target_scaled"
        );
        println!(
            "[{}] {key}: scaled {target_name} {current} -> {limited}",
            chrono::Utc::now().format("%H:%M:%S")
        );
    }

    DESIRED_REPLICAS
        .with_label_values(&[&namespace, &name])
        .set(limited as i64);

    update_status(ctx, &namespace, &name, target_name, limited, REASON_SCALING_APPLIED).await;
}

/* ============================= STATUS ============================= */

/// Patch the scaler's status subresource. Failures are warnings only; the
/// scale mutation, if any, already happened and is the source of truth.
async fn update_status(
    ctx: &ControllerContext,
    namespace: &str,
    name: &str,
    target_name: &str,
    replicas: i32,
    reason: &str,
) {
    let now = chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let message = format!("Target {target_name} currently at {replicas} replicas");
    let status = GeneralScalerStatus::ready(replicas, reason, message, now);

    let scalers: Api<GeneralScaler> = Api::namespaced(ctx.client.clone(), namespace);
    let status_patch = serde_json::json!({ "status": status });

    if let Err(e) = scalers
        .patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await
    {
        warn!(scaler = %format!("{namespace}/{name}"), error = %e, "status_update_failed");
    }
}

/* ============================= HTTP SERVER ============================= */

pub(crate) fn build_router(state: Arc<Mutex<ControllerState>>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route(
            "/readyz",
            get({
                let state = state.clone();
                move || ready_handler(state.clone())
            }),
        )
}

async fn start_metrics_server(
    state: Arc<Mutex<ControllerState>>,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server on {addr}"))?;

    info!(addr = %addr, "metrics_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

async fn ready_handler(state: Arc<Mutex<ControllerState>>) -> impl IntoResponse {
    let state = state.lock().await;
    if state.ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "metrics encoding error".to_string(),
            ),
        },
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding error".to_string(),
        ),
    }
}

/* ============================= TESTS ============================= */
