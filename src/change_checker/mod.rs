//! Detect when the persisted copy of an in-memory entity diverges from it.
//!
//! Callers hand over a shared entity plus two functions: one that fetches
//! the persisted version and one that is told about the difference. The
//! checker only holds a weak reference, so an entity nobody else keeps
//! alive silently drops out of the registry.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::future::BoxFuture;
use log::debug;
use tokio::sync::RwLock;

/// Fetches the persisted version of an entity; `None` when it no longer exists.
pub type RetrieveFn<E> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Option<E>>> + Send + Sync>;

/// Receives the persisted version whenever it differs from the in-memory one.
pub type OnChangeFn<E> = Arc<dyn Fn(Option<E>) -> anyhow::Result<()> + Send + Sync>;

struct Tracked<E> {
	entity: Weak<RwLock<E>>,
	retrieve: RetrieveFn<E>,
	on_change: OnChangeFn<E>,
}

impl<E> Clone for Tracked<E> {
	fn clone(&self) -> Self {
		Self {
			entity: self.entity.clone(),
			retrieve: Arc::clone(&self.retrieve),
			on_change: Arc::clone(&self.on_change),
		}
	}
}

pub struct EntityChangeChecker<E, K> {
	tracked: Mutex<HashMap<K, Tracked<E>>>,
}

impl<E, K> Default for EntityChangeChecker<E, K>
where
	K: Eq + Hash,
{
	fn default() -> Self {
		Self {
			tracked: Mutex::new(HashMap::new()),
		}
	}
}

impl<E, K> EntityChangeChecker<E, K>
where
	E: PartialEq + Clone + Send + Sync + 'static,
	K: Eq + Hash + Clone + std::fmt::Debug,
{
	pub fn new() -> Self {
		Self::default()
	}

	/// Lock the registry and drop entries whose entity is gone.
	fn registry(&self) -> MutexGuard<'_, HashMap<K, Tracked<E>>> {
		// A panic elsewhere cannot leave the map itself inconsistent
		let mut tracked = self.tracked.lock().unwrap_or_else(|p| p.into_inner());
		tracked.retain(|key, t| {
			let alive = t.entity.strong_count() > 0;
			if !alive {
				debug!("Entity {:?} dropped, no longer tracked", key);
			}
			alive
		});
		tracked
	}

	/// Track `entity` under `id_fn(entity)`, replacing any earlier registration
	/// for the same key.
	pub async fn track<I, R, Fut, C>(&self, entity: &Arc<RwLock<E>>, id_fn: I, retrieve: R, on_change: C)
	where
		I: FnOnce(&E) -> K,
		R: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<Option<E>>> + Send + 'static,
		C: Fn(Option<E>) -> anyhow::Result<()> + Send + Sync + 'static,
	{
		let key = id_fn(&*entity.read().await);
		let retrieve: RetrieveFn<E> =
			Arc::new(move || Box::pin(retrieve()) as BoxFuture<'static, anyhow::Result<Option<E>>>);
		let entry = Tracked {
			entity: Arc::downgrade(entity),
			retrieve,
			on_change: Arc::new(on_change),
		};
		self.registry().insert(key, entry);
	}

	/// Compare every live entity with its persisted version and report the
	/// ones that differ. Stops at the first error.
	pub async fn check_all(&self) -> anyhow::Result<()> {
		let snapshot: Vec<(K, Tracked<E>)> = self
			.registry()
			.iter()
			.map(|(k, t)| (k.clone(), t.clone()))
			.collect();

		for (key, tracked) in snapshot {
			// Dropped since the snapshot was taken
			let Some(entity) = tracked.entity.upgrade() else {
				continue;
			};
			let current = (tracked.retrieve)().await?;
			let changed = {
				let ours = entity.read().await;
				current.as_ref() != Some(&*ours)
			};
			if changed {
				debug!("Entity {:?} changed in storage", key);
				(tracked.on_change)(current)?;
			}
		}
		Ok(())
	}

	pub fn len(&self) -> usize {
		self.registry().len()
	}

	pub fn is_empty(&self) -> bool {
		self.registry().is_empty()
	}

	pub fn is_tracked(&self, key: &K) -> bool {
		self.registry().contains_key(key)
	}
}
