use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::crd::MetricSource;

/* ============================= PLUGIN CONTRACT ============================= */

/// A metric plugin turns a free-form configuration map into one sample.
///
/// Plugins are registered once at process start and looked up by name per
/// metric source. A plugin either returns a finite non-negative sample or
/// fails; a failure omits the sample and never aborts the reconcile.
pub trait MetricPlugin: Send + Sync {
    fn fetch(&self, config: &BTreeMap<String, Value>) -> Result<f64>;
}

fn config_str<'a>(config: &'a BTreeMap<String, Value>, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

/* ============================= PROMETHEUS ============================= */

/// Prometheus-backed metric source.
///
/// The query layer is stubbed: the sample is keyed off the query text so
/// that the rest of the pipeline can be exercised without a live backend.
/// Swapping in a real HTTP client changes nothing outside this impl.
pub struct PrometheusPlugin;

impl MetricPlugin for PrometheusPlugin {
    fn fetch(&self, config: &BTreeMap<String, Value>) -> Result<f64> {
        let query = config_str(config, "query").unwrap_or("");
        debug!(query = %query, "prometheus_query");

        let sample = if query.contains("cpu") {
            75.0
        } else if query.contains("memory") {
            65.0
        } else if query.contains("http_request") {
            150.0
        } else {
            50.0
        };

        Ok(sample)
    }
}

/* ============================= REDIS ============================= */

/// Redis queue-depth metric source.
///
/// Stubbed like the Prometheus plugin: reads its connection config and
/// returns a fixed depth.
pub struct RedisPlugin;

impl MetricPlugin for RedisPlugin {
    fn fetch(&self, config: &BTreeMap<String, Value>) -> Result<f64> {
        let host = config_str(config, "host").unwrap_or("redis-service");
        let queue_name = config_str(config, "queueName").unwrap_or("default");
        debug!(host = %host, queue = %queue_name, "redis_queue_check");

        Ok(10.0)
    }
}

/* ============================= REGISTRY ============================= */

/// The set of metric plugins available to the controller, keyed by name.
///
/// Fixed at construction; scalers select plugins by the `plugin` field of
/// each metric source.
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Box<dyn MetricPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        let mut plugins: HashMap<&'static str, Box<dyn MetricPlugin>> = HashMap::new();
        plugins.insert("prometheus", Box::new(PrometheusPlugin));
        plugins.insert("redis", Box::new(RedisPlugin));
        Self { plugins }
    }

    pub fn get(&self, name: &str) -> Option<&dyn MetricPlugin> {
        self.plugins.get(name).map(|plugin| plugin.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.plugins.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Collect one sample per metric source, in source order.
    ///
    /// Unknown plugin names and per-plugin failures are logged and skipped;
    /// the surviving samples are returned.
    pub fn collect_samples(&self, sources: &[MetricSource], scaler: &str) -> Vec<f64> {
        let mut samples = Vec::with_capacity(sources.len());

        for source in sources {
            match self.get(&source.plugin) {
                Some(plugin) => match plugin.fetch(&source.config) {
                    Ok(sample) => samples.push(sample),
                    Err(e) => {
                        error!(
                            plugin = %source.plugin,
                            scaler = %scaler,
                            error = %e,
                            "metric_plugin_failed"
                        );
                    }
                },
                None => {
                    warn!(plugin = %source.plugin, scaler = %scaler, "unknown_metric_plugin");
                }
            }
        }

        samples
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/* ============================= TESTS ============================= */
