use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::observability::MetricsRegistry;
use crate::storage::{ChangeLog, StorageError};
use crate::sync::error::SyncError;
use crate::sync::store::VersionedChangesSyncStore;
use crate::sync::types::{ChangeSet, ChangesQuery, DbVersion, SiteId, Tables};

/// [`VersionedChangesSyncStore`] over a local [`ChangeLog`].
#[derive(Clone)]
pub struct ChangeLogSyncStore {
	log: ChangeLog,
	metrics: Option<Arc<MetricsRegistry>>,
}

impl ChangeLogSyncStore {
	pub fn new(log: ChangeLog) -> Self {
		Self { log, metrics: None }
	}

	/// Count applied changes in `metrics`.
	pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
		self.metrics = Some(metrics);
		self
	}

	pub fn change_log(&self) -> &ChangeLog {
		&self.log
	}

	pub async fn get_current_version(&self) -> Result<DbVersion, SyncError> {
		Ok(self.log.db_version().await?)
	}
}

#[async_trait]
impl VersionedChangesSyncStore for ChangeLogSyncStore {
	async fn setup_table_change_tracking(&self, tables: &Tables) -> Result<(), SyncError> {
		self.log.enable_tracking(&tables.table_names).await?;
		Ok(())
	}

	async fn get_site_id(&self) -> Result<SiteId, SyncError> {
		Ok(self.log.site_id())
	}

	async fn get_last_received_version(&self, peer: &SiteId) -> Result<DbVersion, SyncError> {
		Ok(self.log.last_received_version(peer).await?)
	}

	async fn get_changes(&self, query: &ChangesQuery) -> Result<ChangeSet, SyncError> {
		let filter = query.site_filter()?;
		let (changes, version) = self.log.changes(query.since_version, filter).await?;
		debug!(
			"Read {} changes since {} ({:?}), current version {}",
			changes.len(),
			query.since_version,
			filter,
			version
		);
		Ok(ChangeSet {
			changes,
			version,
			from_site_id: self.log.site_id(),
		})
	}

	async fn apply_changes(&self, set: &ChangeSet) -> Result<(), SyncError> {
		let applied = self.log.merge(set).await.map_err(|e| match e {
			StorageError::UntrackedTable(_) | StorageError::UnsupportedValue(_) => {
				SyncError::Merge(e.to_string())
			}
			other => SyncError::Storage(other),
		})?;
		if let Some(metrics) = &self.metrics {
			metrics.changes_applied_total.inc_by(applied as u64);
		}
		Ok(())
	}

	async fn ping(&self) -> Result<(), SyncError> {
		self.log.db_version().await?;
		Ok(())
	}
}
