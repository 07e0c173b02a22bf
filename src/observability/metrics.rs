use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

const NAMESPACE: &str = "bifrost";

/// Central registry for all Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Sync engine metrics
	pub sync_runs_total: IntCounter,
	pub sync_failures_total: IntCounter,
	pub sync_duration_seconds: Histogram,
	pub changes_pulled_total: IntCounter,
	pub changes_pushed_total: IntCounter,

	// Store metrics
	pub changes_applied_total: IntCounter,

	// Transport metrics, labelled by route
	pub http_requests_total: IntCounterVec,
}

fn counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
	IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))
}

impl MetricsRegistry {
	pub fn try_new() -> prometheus::Result<Self> {
		let registry = Registry::new();

		let sync_runs_total = counter("sync_runs_total", "Total sync cycles started")?;
		let sync_failures_total = counter("sync_failures_total", "Total sync cycles that failed")?;
		let sync_duration_seconds = Histogram::with_opts(
			HistogramOpts::new("sync_duration_seconds", "Duration of sync cycles in seconds")
				.namespace(NAMESPACE)
				.buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
		)?;
		let changes_pulled_total =
			counter("changes_pulled_total", "Changes pulled from remote stores")?;
		let changes_pushed_total =
			counter("changes_pushed_total", "Changes pushed to remote stores")?;
		let changes_applied_total = counter(
			"changes_applied_total",
			"Incoming changes that altered local state",
		)?;
		let http_requests_total = IntCounterVec::new(
			Opts::new("http_requests_total", "HTTP requests served by the sync store endpoint")
				.namespace(NAMESPACE),
			&["route"],
		)?;

		registry.register(Box::new(sync_runs_total.clone()))?;
		registry.register(Box::new(sync_failures_total.clone()))?;
		registry.register(Box::new(sync_duration_seconds.clone()))?;
		registry.register(Box::new(changes_pulled_total.clone()))?;
		registry.register(Box::new(changes_pushed_total.clone()))?;
		registry.register(Box::new(changes_applied_total.clone()))?;
		registry.register(Box::new(http_requests_total.clone()))?;

		Ok(Self {
			registry,
			sync_runs_total,
			sync_failures_total,
			sync_duration_seconds,
			changes_pulled_total,
			changes_pushed_total,
			changes_applied_total,
			http_requests_total,
		})
	}

	pub fn new() -> Self {
		// Metric names and buckets above are static and always valid
		Self::try_new().expect("metric definitions are valid")
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

impl Default for MetricsRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Initialize a shared metrics registry
pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::try_new()?))
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn metrics_registry_creation() {
		let registry = super::MetricsRegistry::new();
		registry.sync_runs_total.inc();
		assert!(registry.encode().contains("bifrost_sync_runs_total 1"));
	}

	#[test]
	fn metrics_are_namespaced_once() {
		let registry = super::MetricsRegistry::new();
		registry.http_requests_total.with_label_values(&["changes"]).inc();
		let text = registry.encode();
		assert!(text.contains("bifrost_http_requests_total{route=\"changes\"} 1"));
		assert!(!text.contains("bifrost_bifrost_"));
	}
}
