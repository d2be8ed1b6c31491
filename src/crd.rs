use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/* ============================= CONDITION REASONS ============================= */

/// Condition reason set on a successful reconcile (including no-op ticks).
pub const REASON_SCALING_APPLIED: &str = "ScalingApplied";

/// Condition reason set when a scale decision was blocked by a cooldown.
pub const REASON_COOLDOWN_ACTIVE: &str = "CooldownActive";

/* ============================= SPEC TYPES ============================= */

/// Reference to the workload whose replica count this scaler controls.
///
/// The target is resolved in the scaler's own namespace.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    /// Name of the target Deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One metric source descriptor.
///
/// `plugin` selects a registered metric plugin by name; `config` is passed
/// through to the plugin verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricSource {
    pub plugin: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, serde_json::Value>,
}

/// Scaling policy configuration.
///
/// `type` selects the policy ("slo" or "cost"); the remaining fields are
/// parameters for whichever policy is selected.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Steady-state target for the aggregated metric (slo policy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slo_target: Option<f64>,

    /// Maximum tolerated metric load per replica (cost policy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_replica: Option<f64>,
}

impl PolicySpec {
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("slo")
    }

    pub fn slo_target(&self) -> f64 {
        self.slo_target.unwrap_or(80.0)
    }

    pub fn max_cost_per_replica(&self) -> f64 {
        self.max_cost_per_replica.unwrap_or(5.0)
    }
}

/// Safety rails applied to every scale decision.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SafetySpec {
    /// Maximum replica delta per mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scale_rate: Option<i32>,

    /// Minimum interval between scale-up mutations (e.g. "5m").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up_cooldown: Option<String>,

    /// Minimum interval between scale-down mutations (e.g. "5m").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_cooldown: Option<String>,
}

impl SafetySpec {
    pub fn max_scale_rate(&self) -> i32 {
        self.max_scale_rate.unwrap_or(2)
    }

    pub fn scale_up_cooldown(&self) -> &str {
        self.scale_up_cooldown.as_deref().unwrap_or("5m")
    }

    pub fn scale_down_cooldown(&self) -> &str {
        self.scale_down_cooldown.as_deref().unwrap_or("5m")
    }
}

/* ============================= SPEC ============================= */

/// GeneralScaler declares one autoscaling policy over one target workload.
///
/// The controller reconciles each scaler every tick: it collects metric
/// samples from the configured plugins, computes a desired replica count
/// with the configured policy, gates the decision through cooldowns and
/// rate limits, and patches the target's replica count.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "autoscaling.example.com",
    version = "v1alpha1",
    kind = "GeneralScaler",
    plural = "generalscalers",
    status = "GeneralScalerStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GeneralScalerSpec {
    /// The workload whose replicas are controlled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<TargetRef>,

    /// Lower replica bound (default 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,

    /// Upper replica bound (default 10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,

    /// Ordered metric source descriptors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricSource>,

    /// Scaling policy; defaults to slo with its default target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicySpec>,

    /// Cooldown and rate-limit configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetySpec>,
}

impl GeneralScalerSpec {
    /// Target Deployment name, if set.
    pub fn target_name(&self) -> Option<&str> {
        self.target_ref.as_ref().and_then(|t| t.name.as_deref())
    }

    /// Lower bound, floored at 1.
    pub fn min_replicas(&self) -> i32 {
        self.min_replicas.unwrap_or(1).max(1)
    }

    /// Upper bound, never below the lower bound.
    pub fn max_replicas(&self) -> i32 {
        self.max_replicas.unwrap_or(10).max(self.min_replicas())
    }

    pub fn policy(&self) -> PolicySpec {
        self.policy.clone().unwrap_or_default()
    }

    pub fn safety(&self) -> SafetySpec {
        self.safety.clone().unwrap_or_default()
    }
}

/* ============================= STATUS ============================= */

/// A single status condition, mirroring the usual Kubernetes condition shape.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalerCondition {
    #[serde(rename = "type")]
    pub kind: String,

    pub status: String,

    pub last_transition_time: String,

    pub reason: String,

    pub message: String,
}

/// GeneralScalerStatus reports the last observed reconcile outcome.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeneralScalerStatus {
    /// Replica count requested of the target at the last reconcile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_replicas: Option<i32>,

    /// RFC 3339 UTC timestamp of the last reconcile (trailing `Z`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_time: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ScalerCondition>,
}

impl GeneralScalerStatus {
    /// Build the single-condition Ready status the reconciler writes.
    pub fn ready(current_replicas: i32, reason: &str, message: String, now: String) -> Self {
        Self {
            current_replicas: Some(current_replicas),
            last_scale_time: Some(now.clone()),
            conditions: vec![ScalerCondition {
                kind: "Ready".to_string(),
                status: "True".to_string(),
                last_transition_time: now,
                reason: reason.to_string(),
                message,
            }],
        }
    }
}

/* ============================= TESTS ============================= */
