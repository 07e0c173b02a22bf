pub mod changelog;
pub mod engine;
pub mod error;
pub mod merge;
pub mod store;
pub mod types;

pub use changelog::ChangeLogSyncStore;
pub use engine::SyncEngine;
pub use error::SyncError;
pub use store::VersionedChangesSyncStore;
pub use types::{
	Change, ChangeSet, ChangesQuery, DbVersion, NEVER_SYNCED, SiteFilter, SiteId, SyncResult,
	Tables,
};
