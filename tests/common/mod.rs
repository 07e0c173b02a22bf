/// Common test utilities and helpers for integration tests.
use std::sync::Arc;

use vanopticon_bifrost::storage::ChangeLog;
use vanopticon_bifrost::sync::{
	ChangeLogSyncStore, SiteId, SyncEngine, Tables, VersionedChangesSyncStore,
};
use vanopticon_bifrost::todo::TodoStore;

/// A replica: its change log, the todo store writing to it and an engine
/// syncing it with a remote.
#[allow(dead_code)]
pub struct Replica {
	pub store: Arc<ChangeLogSyncStore>,
	pub todos: TodoStore,
	pub engine: SyncEngine,
}

#[allow(dead_code)]
impl Replica {
	pub fn site_id(&self) -> SiteId {
		self.store.change_log().site_id()
	}
}

/// In-memory change log store with the todo tables tracked.
pub async fn new_store() -> Arc<ChangeLogSyncStore> {
	let log = ChangeLog::open_in_memory()
		.await
		.expect("in-memory change log");
	let store = ChangeLogSyncStore::new(log);
	store
		.setup_table_change_tracking(&Tables::new(TodoStore::get_tables()))
		.await
		.expect("tracking setup");
	Arc::new(store)
}

/// A replica syncing against `remote`.
#[allow(dead_code)]
pub async fn new_replica(name: &str, remote: Arc<dyn VersionedChangesSyncStore>) -> Replica {
	replica_with(name, Some(remote)).await
}

/// A replica with no remote configured.
#[allow(dead_code)]
pub async fn new_unconnected_replica(name: &str) -> Replica {
	replica_with(name, None).await
}

async fn replica_with(name: &str, remote: Option<Arc<dyn VersionedChangesSyncStore>>) -> Replica {
	let store = new_store().await;
	let todos = TodoStore::new(store.change_log().clone());
	let engine = SyncEngine::new(name, store.clone(), remote);
	Replica {
		store,
		todos,
		engine,
	}
}
