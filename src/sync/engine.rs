use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use tokio::time::{MissedTickBehavior, interval};

use crate::observability::MetricsRegistry;
use crate::sync::error::SyncError;
use crate::sync::store::VersionedChangesSyncStore;
use crate::sync::types::{ChangesQuery, SyncResult};

/// Pull-then-push replication between a local store and one remote.
pub struct SyncEngine {
	name: String,
	local: Arc<dyn VersionedChangesSyncStore>,
	remote: Option<Arc<dyn VersionedChangesSyncStore>>,
	metrics: Option<Arc<MetricsRegistry>>,
}

impl SyncEngine {
	pub fn new(
		name: impl Into<String>,
		local: Arc<dyn VersionedChangesSyncStore>,
		remote: Option<Arc<dyn VersionedChangesSyncStore>>,
	) -> Self {
		Self {
			name: name.into(),
			local,
			remote,
			metrics: None,
		}
	}

	pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
		self.metrics = Some(metrics);
		self
	}

	/// Pull everything the remote has that did not originate here, then push
	/// everything originated here the remote has not seen.
	///
	/// Watermarks only move inside a completed `apply_changes`, so a failed
	/// sync can simply be run again.
	pub async fn sync(&self) -> Result<SyncResult, SyncError> {
		let remote = self.remote.as_ref().ok_or_else(|| {
			SyncError::Configuration(format!("sync engine '{}' has no remote store", self.name))
		})?;

		if let Some(metrics) = &self.metrics {
			metrics.sync_runs_total.inc();
		}
		let started = Instant::now();
		let result = self.sync_with(remote.as_ref()).await;

		if let Some(metrics) = &self.metrics {
			metrics
				.sync_duration_seconds
				.observe(started.elapsed().as_secs_f64());
			match &result {
				Ok(r) => {
					metrics.changes_pulled_total.inc_by(r.n_pulled_changes as u64);
					metrics.changes_pushed_total.inc_by(r.n_pushed_changes as u64);
				}
				Err(_) => metrics.sync_failures_total.inc(),
			}
		}
		result
	}

	async fn sync_with(&self, remote: &dyn VersionedChangesSyncStore) -> Result<SyncResult, SyncError> {
		let local_id = self.local.get_site_id().await?;
		let remote_id = remote.get_site_id().await?;

		// Pull
		let watermark = self.local.get_last_received_version(&remote_id).await?;
		let pulled = remote
			.get_changes(&ChangesQuery::not_from_site(watermark, local_id))
			.await?;
		self.local.apply_changes(&pulled).await?;
		debug!(
			"[{}] pulled {} changes from {} since {} (now at {})",
			self.name,
			pulled.len(),
			remote_id,
			watermark,
			pulled.version
		);

		// Push
		let remote_watermark = remote.get_last_received_version(&local_id).await?;
		let pushed = self
			.local
			.get_changes(&ChangesQuery::from_site(remote_watermark, local_id))
			.await?;
		remote.apply_changes(&pushed).await?;
		debug!(
			"[{}] pushed {} changes to {} since {}",
			self.name,
			pushed.len(),
			remote_id,
			remote_watermark
		);

		Ok(SyncResult {
			n_pulled_changes: pulled.len(),
			n_pushed_changes: pushed.len(),
		})
	}

	/// Run [`SyncEngine::sync`] every `period` until `shutdown` resolves.
	///
	/// A failed cycle is logged; the next tick starts a fresh sync.
	pub async fn run_periodic<F>(&self, period: Duration, shutdown: F) -> Result<(), SyncError>
	where
		F: Future<Output = ()>,
	{
		if period.is_zero() {
			return Err(SyncError::Configuration(format!(
				"sync engine '{}' needs a non-zero sync period",
				self.name
			)));
		}
		info!("[{}] periodic sync every {:?}", self.name, period);
		let mut tick = interval(period);
		tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
		tokio::pin!(shutdown);

		loop {
			tokio::select! {
				_ = &mut shutdown => {
					info!("[{}] periodic sync stopped", self.name);
					return Ok(());
				}
				_ = tick.tick() => {
					match self.sync().await {
						Ok(result) => info!(
							"[{}] sync completed: pulled {}, pushed {}",
							self.name, result.n_pulled_changes, result.n_pushed_changes
						),
						Err(e) => error!("[{}] sync failed: {}", self.name, e),
					}
				}
			}
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::storage::{ChangeLog, LocalWrite};
	use crate::sync::changelog::ChangeLogSyncStore;
	use crate::sync::types::Tables;

	async fn store() -> Arc<ChangeLogSyncStore> {
		let store = ChangeLogSyncStore::new(ChangeLog::open_in_memory().await.unwrap());
		store
			.setup_table_change_tracking(&Tables::new(["todo_list"]))
			.await
			.unwrap();
		Arc::new(store)
	}

	#[tokio::test]
	async fn test_sync_without_remote_is_configuration_error() {
		let engine = SyncEngine::new("lonely", store().await, None);
		assert!(matches!(engine.sync().await, Err(SyncError::Configuration(_))));
	}

	#[tokio::test]
	async fn test_sync_records_metrics() {
		let spoke = store().await;
		let hub = store().await;
		spoke
			.change_log()
			.commit(&[LocalWrite::upsert("todo_list", "l1", [("title", "t")])])
			.await
			.unwrap();

		let metrics = Arc::new(MetricsRegistry::new());
		let engine = SyncEngine::new("spoke", spoke, Some(hub as Arc<dyn VersionedChangesSyncStore>))
			.with_metrics(metrics.clone());

		let result = engine.sync().await.unwrap();
		assert_eq!(result.n_pushed_changes, 1);
		assert_eq!(engine.sync().await.unwrap(), SyncResult::default());

		assert_eq!(metrics.sync_runs_total.get(), 2);
		assert_eq!(metrics.changes_pushed_total.get(), 1);
		assert_eq!(metrics.sync_failures_total.get(), 0);
	}

	#[tokio::test]
	async fn test_run_periodic_stops_on_shutdown() {
		let spoke = store().await;
		let hub = store().await;
		let engine = SyncEngine::new("spoke", spoke, Some(hub as Arc<dyn VersionedChangesSyncStore>));

		let shutdown = tokio::time::sleep(Duration::from_millis(50));
		tokio::time::timeout(
			Duration::from_secs(5),
			engine.run_periodic(Duration::from_millis(10), shutdown),
		)
		.await
		.unwrap()
		.unwrap();
	}

	#[tokio::test]
	async fn test_run_periodic_rejects_zero_period() {
		let spoke = store().await;
		let hub = store().await;
		let engine = SyncEngine::new("spoke", spoke, Some(hub as Arc<dyn VersionedChangesSyncStore>));

		let shutdown = tokio::time::sleep(Duration::from_millis(10));
		let result = engine.run_periodic(Duration::ZERO, shutdown).await;
		assert!(matches!(result, Err(SyncError::Configuration(_))));
	}
}
