use std::sync::Arc;

use crate::observability::MetricsRegistry;
use crate::sync::VersionedChangesSyncStore;

/// Largest request body the endpoint buffers, unless configured otherwise.
/// A pushed change set carries the whole unsynced history of a replica.
pub const DEFAULT_BODY_LIMIT: usize = 256 * 1024 * 1024;

/// Application state passed to handlers via Axum's `State` extractor.
///
/// Holds the store the endpoint serves and the metrics registry it reports
/// into. Nothing is global, so several endpoints can run in one process.
#[derive(Clone)]
pub struct AppState {
	pub name: String,
	pub store: Arc<dyn VersionedChangesSyncStore>,
	pub metrics: Arc<MetricsRegistry>,
	pub body_limit: usize,
}

impl AppState {
	pub fn new(
		name: impl Into<String>,
		store: Arc<dyn VersionedChangesSyncStore>,
		metrics: Arc<MetricsRegistry>,
	) -> Self {
		Self {
			name: name.into(),
			store,
			metrics,
			body_limit: DEFAULT_BODY_LIMIT,
		}
	}

	pub fn with_body_limit(mut self, body_limit: usize) -> Self {
		self.body_limit = body_limit;
		self
	}

	pub(crate) fn count_request(&self, route: &str) {
		self.metrics.http_requests_total.with_label_values(&[route]).inc();
	}
}
