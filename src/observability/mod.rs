pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{MetricsRegistry, init_metrics};

use std::sync::Arc;

/// Observability state shared by the engine and the HTTP endpoint
pub struct ObservabilityState {
	pub metrics: Arc<MetricsRegistry>,
}

impl ObservabilityState {
	pub fn new() -> Self {
		Self {
			metrics: Arc::new(MetricsRegistry::new()),
		}
	}
}

impl Default for ObservabilityState {
	fn default() -> Self {
		Self::new()
	}
}

/// Initialize logging and the metrics registry
pub fn init_observability(log_level: &str) -> anyhow::Result<ObservabilityState> {
	init_logging(log_level)?;
	let metrics = init_metrics()?;

	log::info!("Observability initialized: logging at {}, metrics enabled", log_level);

	Ok(ObservabilityState { metrics })
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn observability_state_creation() {
		let state = super::ObservabilityState::new();
		assert!(!state.metrics.encode().is_empty());
	}
}
