//! Todo lists persisted in a [`ChangeLog`], one tracked table per entity kind.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::storage::{ChangeLog, LocalWrite, Record, StorageError};
use crate::sync::DbVersion;
use crate::value::Value;

pub const TODO_LIST_TABLE: &str = "todo_list";
pub const TODO_ITEM_TABLE: &str = "todo_item";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
	pub item_id: String,
	pub content: String,
}

impl TodoItem {
	pub fn new(item_id: impl Into<String>, content: impl Into<String>) -> Self {
		Self {
			item_id: item_id.into(),
			content: content.into(),
		}
	}
}

/// A list owns its items: saving a list removes items no longer in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoList {
	pub list_id: String,
	pub title: String,
	/// Ordered by `item_id` when loaded.
	pub todos: Vec<TodoItem>,
}

impl TodoList {
	pub fn new(list_id: impl Into<String>, title: impl Into<String>) -> Self {
		Self {
			list_id: list_id.into(),
			title: title.into(),
			todos: Vec::new(),
		}
	}
}

fn text(record: &Record, column: &str) -> String {
	record
		.get(column)
		.and_then(Value::as_str)
		.unwrap_or_default()
		.to_string()
}

#[derive(Clone)]
pub struct TodoStore {
	log: ChangeLog,
}

impl TodoStore {
	pub fn new(log: ChangeLog) -> Self {
		Self { log }
	}

	/// Tables the store writes to; these must be tracked before saving.
	pub fn get_tables() -> Vec<String> {
		vec![TODO_ITEM_TABLE.to_string(), TODO_LIST_TABLE.to_string()]
	}

	pub async fn setup(&self) -> Result<(), StorageError> {
		self.log.enable_tracking(&Self::get_tables()).await
	}

	pub fn change_log(&self) -> &ChangeLog {
		&self.log
	}

	/// Save `list` and its items in one commit, deleting items that were
	/// dropped from it. Which items are dropped is decided inside that
	/// commit. Returns the commit version, if anything changed.
	pub async fn save(&self, list: &TodoList) -> Result<Option<DbVersion>, StorageError> {
		let mut writes = vec![LocalWrite::upsert(
			TODO_LIST_TABLE,
			list.list_id.as_str(),
			[("title", list.title.as_str())],
		)];
		for item in &list.todos {
			writes.push(LocalWrite::upsert(
				TODO_ITEM_TABLE,
				item.item_id.as_str(),
				[
					("content", item.content.as_str()),
					("list_id", list.list_id.as_str()),
				],
			));
		}

		writes.push(LocalWrite::delete_orphans(
			TODO_ITEM_TABLE,
			"list_id",
			list.list_id.as_str(),
			list.todos.iter().map(|i| i.item_id.as_str()),
		));

		let version = self.log.commit(&writes).await?;
		debug!("Saved todo list {} ({:?})", list.list_id, version);
		Ok(version)
	}

	pub async fn load(&self, list_id: &str) -> Result<Option<TodoList>, StorageError> {
		let Some(record) = self
			.log
			.read_row(TODO_LIST_TABLE, &Value::from(list_id))
			.await?
		else {
			return Ok(None);
		};

		let todos = self
			.log
			.scan(TODO_ITEM_TABLE)
			.await?
			.into_iter()
			.filter(|(_, item)| text(item, "list_id") == list_id)
			.filter_map(|(pk, item)| {
				pk.as_str()
					.map(|id| TodoItem::new(id, text(&item, "content")))
			})
			.collect();

		Ok(Some(TodoList {
			list_id: list_id.to_string(),
			title: text(&record, "title"),
			todos,
		}))
	}
}
