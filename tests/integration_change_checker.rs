#![cfg(feature = "integration-tests")]

use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use vanopticon_bifrost::change_checker::EntityChangeChecker;
use vanopticon_bifrost::storage::ChangeLog;
use vanopticon_bifrost::todo::{TodoItem, TodoList, TodoStore};

/// A tracked list is reported only while it differs from what is stored,
/// and disappears from the checker once the caller drops it.
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_on_change_hook() -> Result<(), Box<dyn std::error::Error>> {
	let store = TodoStore::new(ChangeLog::open_in_memory().await?);
	store.setup().await?;
	let list_id = "todolist_1";

	let mut list = TodoList::new(list_id, "title_1");
	list.todos.push(TodoItem::new("item_1", "item_content_1"));
	store.save(&list).await?;

	let loaded = store.load(list_id).await?.ok_or("list not saved")?;
	assert_eq!(loaded.title, "title_1");
	assert_eq!(loaded.todos, vec![TodoItem::new("item_1", "item_content_1")]);
	let entity = Arc::new(RwLock::new(loaded));

	let updates: Arc<Mutex<Vec<Option<TodoList>>>> = Arc::new(Mutex::new(Vec::new()));
	let checker: EntityChangeChecker<TodoList, String> = EntityChangeChecker::new();

	let retrieve_store = store.clone();
	let sink = updates.clone();
	checker
		.track(
			&entity,
			|l| l.list_id.clone(),
			move || {
				let store = retrieve_store.clone();
				async move { store.load(list_id).await.map_err(anyhow::Error::from) }
			},
			move |current| {
				sink.lock().unwrap().push(current);
				Ok(())
			},
		)
		.await;

	checker.check_all().await?;
	assert!(updates.lock().unwrap().is_empty());

	entity.write().await.title = "updated_title".to_string();
	checker.check_all().await?;
	{
		let seen = updates.lock().unwrap();
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0].as_ref().map(|l| l.title.as_str()), Some("title_1"));
	}

	let snapshot = entity.read().await.clone();
	store.save(&snapshot).await?;
	updates.lock().unwrap().clear();
	checker.check_all().await?;
	assert!(updates.lock().unwrap().is_empty());

	assert_eq!(checker.len(), 1);
	assert!(checker.is_tracked(&list_id.to_string()));
	drop(entity);
	assert_eq!(checker.len(), 0);
	assert!(!checker.is_tracked(&list_id.to_string()));

	Ok(())
}
