//! Prometheus metrics infrastructure

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;

/// Prometheus metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder
    #[serde(default)]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

/// Prometheus metrics handle
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Renders the metrics in the Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Initialize Prometheus metrics
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            gauge!("entity_cache_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
            tracing::info!("Prometheus metrics initialized");

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

/// Record a facade lookup
pub fn record_cache_lookup(cache: &str, hit: bool) {
    let labels = [("cache", cache.to_string())];

    if hit {
        counter!("cache_hits_total", &labels).increment(1);
    } else {
        counter!("cache_misses_total", &labels).increment(1);
    }
}

/// Record a facade write; `kind` is one of added, deleted, updated, cleared
pub fn record_cache_write(cache: &str, kind: &'static str, count: u64) {
    let labels = [("cache", cache.to_string())];

    match kind {
        "added" => counter!("cache_added_total", &labels).increment(count),
        "deleted" => counter!("cache_deleted_total", &labels).increment(count),
        "updated" => counter!("cache_updated_total", &labels).increment(count),
        _ => counter!("cache_cleared_total", &labels).increment(count),
    }
}

/// Record a fetch-wrapper invocation
pub fn record_fetch(cache: &str, duration: Duration, success: bool) {
    let labels = [
        ("cache", cache.to_string()),
        ("status", if success { "success" } else { "error" }.to_string()),
    ];

    counter!("cache_fetches_total", &labels).increment(1);
    histogram!("cache_fetch_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Record a model operation
pub fn record_operation(model: &str, operation: &str, duration: Duration, success: bool) {
    let labels = [
        ("model", model.to_string()),
        ("operation", operation.to_string()),
        ("status", if success { "success" } else { "error" }.to_string()),
    ];

    counter!("model_operations_total", &labels).increment(1);
    histogram!("model_operation_duration_seconds", &labels).record(duration.as_secs_f64());

    if !success {
        counter!("model_operation_errors_total", &labels).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_install_nothing() {
        assert!(init_metrics(&MetricsConfig::default()).is_none());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_cache_lookup("test", true);
        record_cache_write("test", "added", 2);
        record_fetch("test", Duration::from_millis(3), false);
        record_operation("Group", "find_many", Duration::from_millis(1), true);
    }
}
