use async_trait::async_trait;

use crate::sync::error::SyncError;
use crate::sync::types::{ChangeSet, ChangesQuery, DbVersion, SiteId, Tables};

/// The capability every sync endpoint exposes, whether it lives in this
/// process or behind HTTP. [`crate::sync::SyncEngine`] drives two of these.
#[async_trait]
pub trait VersionedChangesSyncStore: Send + Sync {
	/// Enable change tracking for the given tables. Idempotent.
	async fn setup_table_change_tracking(&self, tables: &Tables) -> Result<(), SyncError>;

	/// Stable identifier of the replica behind this store.
	async fn get_site_id(&self) -> Result<SiteId, SyncError>;

	/// Highest version received from `peer`, or `-1` if it never synced.
	async fn get_last_received_version(&self, peer: &SiteId) -> Result<DbVersion, SyncError>;

	/// Changes newer than `query.since_version`, filtered by origin site.
	async fn get_changes(&self, query: &ChangesQuery) -> Result<ChangeSet, SyncError>;

	/// Merge `set` and advance the watermark of `set.from_site_id`, all or
	/// nothing.
	async fn apply_changes(&self, set: &ChangeSet) -> Result<(), SyncError>;

	/// Cheap liveness check of whatever backs the store.
	async fn ping(&self) -> Result<(), SyncError> {
		self.get_site_id().await.map(|_| ())
	}
}
