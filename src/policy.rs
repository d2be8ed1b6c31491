use tracing::{info, warn};

use crate::crd::{GeneralScalerSpec, PolicySpec};

/* ============================= BOUNDS ============================= */

/// Replica bounds carried from the scaler spec into the policy arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaBounds {
    pub min: i32,
    pub max: i32,
}

impl ReplicaBounds {
    pub fn from_spec(spec: &GeneralScalerSpec) -> Self {
        Self {
            min: spec.min_replicas(),
            max: spec.max_replicas(),
        }
    }

    pub fn clamp(&self, raw: i32) -> i32 {
        raw.clamp(self.min, self.max)
    }
}

/* ============================= POLICY VARIANTS ============================= */

/// A resolved scaling policy with its parameters.
///
/// Resolution from the free-form spec happens once per reconcile; an
/// unrecognised policy type resolves to `None` and the caller keeps the
/// current replica count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalingPolicy {
    Slo { target: f64 },
    Cost { max_cost: f64 },
}

impl ScalingPolicy {
    pub fn from_spec(spec: &PolicySpec) -> Option<Self> {
        match spec.kind() {
            "slo" => Some(Self::Slo {
                target: spec.slo_target(),
            }),
            "cost" => Some(Self::Cost {
                max_cost: spec.max_cost_per_replica(),
            }),
            _ => None,
        }
    }

    /// Map (current replicas, aggregated samples) to a desired count.
    pub fn desired_replicas(&self, current: i32, samples: &[f64], bounds: &ReplicaBounds) -> i32 {
        let m = mean(samples);

        match *self {
            Self::Slo { target } => slo_desired(current, m, target, bounds),
            Self::Cost { max_cost } => cost_desired(current, m, max_cost, bounds),
        }
    }
}

/* ============================= AGGREGATION ============================= */

/// Arithmetic mean of the samples; 0 when none survived collection.
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/* ============================= SLO POLICY ============================= */

fn slo_desired(current: i32, m: f64, target: f64, bounds: &ReplicaBounds) -> i32 {
    let ratio = if target > 0.0 { m / target } else { 1.0 };
    let raw = (current as f64 * ratio).floor() as i32;

    info!(
        current,
        metric = m,
        target,
        ratio,
        raw,
        "slo_policy_evaluated"
    );

    bounds.clamp(raw)
}

/* ============================= COST POLICY ============================= */

fn cost_desired(current: i32, m: f64, max_cost: f64, bounds: &ReplicaBounds) -> i32 {
    let cost_per_replica = if current > 0 { m / current as f64 } else { 0.0 };

    if cost_per_replica > max_cost {
        // Over budget: ceiling of load / budget, capped by the upper bound.
        let desired = (m / max_cost).ceil() as i32;
        let capped = desired.min(bounds.max);

        info!(
            current,
            metric = m,
            cost_per_replica,
            desired,
            capped,
            "cost_policy_scale_up"
        );

        capped
    } else if cost_per_replica < 0.5 * max_cost {
        // Under half budget: shrink toward 80% utilisation of the budget.
        // The upper bound is deliberately not applied on this branch.
        let desired = (m / (0.8 * max_cost)).floor() as i32;
        let floored = desired.max(bounds.min);

        info!(
            current,
            metric = m,
            cost_per_replica,
            desired,
            floored,
            "cost_policy_scale_down"
        );

        floored
    } else {
        current
    }
}

/* ============================= ENGINE ============================= */

/// Compute the desired replica count for one scaler.
///
/// Samples are unitless; their meaning is encoded by the scaler config.
/// An unknown policy type logs a warning and keeps the current count.
pub fn calculate_desired_replicas(
    current: i32,
    samples: &[f64],
    policy: &PolicySpec,
    bounds: &ReplicaBounds,
) -> i32 {
    match ScalingPolicy::from_spec(policy) {
        Some(resolved) => resolved.desired_replicas(current, samples, bounds),
        None => {
            warn!(policy = %policy.kind(), "unknown_policy_type");
            current
        }
    }
}

/* ============================= TESTS ============================= */
