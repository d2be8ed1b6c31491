#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kube_scaler::crd::{GeneralScalerSpec, MetricSource, PolicySpec, SafetySpec, TargetRef};
use kube_scaler::safety::Clock;

/// Deterministic clock for cooldown tests: set the wall time explicitly.
pub struct ManualClock {
    secs: AtomicU64,
}

impl ManualClock {
    pub fn at(secs: u64) -> Arc<Self> {
        Arc::new(Self {
            secs: AtomicU64::new(secs),
        })
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

pub fn cost_policy(max_cost: f64) -> PolicySpec {
    PolicySpec {
        kind: Some("cost".to_string()),
        slo_target: None,
        max_cost_per_replica: Some(max_cost),
    }
}

pub fn slo_policy(target: f64) -> PolicySpec {
    PolicySpec {
        kind: Some("slo".to_string()),
        slo_target: Some(target),
        max_cost_per_replica: None,
    }
}

pub fn safety_spec(max_rate: i32, up: &str, down: &str) -> SafetySpec {
    SafetySpec {
        max_scale_rate: Some(max_rate),
        scale_up_cooldown: Some(up.to_string()),
        scale_down_cooldown: Some(down.to_string()),
    }
}

pub fn metric_source(plugin: &str, key: &str, value: &str) -> MetricSource {
    let mut config = BTreeMap::new();
    config.insert(
        key.to_string(),
        serde_json::Value::String(value.to_string()),
    );
    MetricSource {
        plugin: plugin.to_string(),
        config,
    }
}

/// Scaler spec with the default 1..10 bounds and the given pieces wired in.
pub fn make_scaler_spec(
    target: &str,
    metrics: Vec<MetricSource>,
    policy: PolicySpec,
    safety: SafetySpec,
) -> GeneralScalerSpec {
    GeneralScalerSpec {
        target_ref: Some(TargetRef {
            name: Some(target.to_string()),
        }),
        min_replicas: Some(1),
        max_replicas: Some(10),
        metrics,
        policy: Some(policy),
        safety: Some(safety),
    }
}
