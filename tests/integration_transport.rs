#![cfg(feature = "integration-tests")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;

use vanopticon_bifrost::observability::MetricsRegistry;
use vanopticon_bifrost::state::AppState;
use vanopticon_bifrost::storage::{ChangeLog, LocalWrite};
use vanopticon_bifrost::sync::{
	ChangeLogSyncStore, NEVER_SYNCED, SyncResult, Tables, VersionedChangesSyncStore,
};
use vanopticon_bifrost::todo::{TodoItem, TodoList, TodoStore};
use vanopticon_bifrost::transport::{HttpSyncStoreClient, SyncStoreServer};
use vanopticon_bifrost::value::Value;

use common::new_replica;

/// Serve `app` on a loopback port for the rest of the test.
async fn start_stub(app: Router) -> Result<String, Box<dyn std::error::Error>> {
	let listener = TcpListener::bind("127.0.0.1:0").await?;
	let addr = listener.local_addr()?;
	tokio::spawn(async move {
		let _ = axum::serve(listener, app).await;
	});
	Ok(format!("http://{}", addr))
}

const TIMEOUT: Duration = Duration::from_secs(5);

/// Hub served over loopback HTTP; tables are set up through the endpoint.
async fn start_hub(metrics: Arc<MetricsRegistry>) -> Result<(SyncStoreServer, Arc<HttpSyncStoreClient>), Box<dyn std::error::Error>> {
	let log = ChangeLog::open_in_memory().await?;
	let state = AppState::new("hub", Arc::new(ChangeLogSyncStore::new(log)), metrics);
	let server = SyncStoreServer::start("127.0.0.1:0", state).await?;
	let client = Arc::new(HttpSyncStoreClient::new(&server.base_url(), TIMEOUT)?);
	client
		.setup_table_change_tracking(&Tables::new(TodoStore::get_tables()))
		.await?;
	Ok((server, client))
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_sync_through_http_hub() -> Result<(), Box<dyn std::error::Error>> {
	let (server, hub) = start_hub(Arc::new(MetricsRegistry::new())).await?;
	let s1 = new_replica("s1", hub.clone()).await;
	let s2 = new_replica("s2", hub.clone()).await;

	let mut list = TodoList::new("todolist_1", "title_1");
	s1.todos.save(&list).await?;
	assert_eq!(
		s1.engine.sync().await?,
		SyncResult {
			n_pulled_changes: 0,
			n_pushed_changes: 1
		}
	);
	assert_eq!(
		s2.engine.sync().await?,
		SyncResult {
			n_pulled_changes: 1,
			n_pushed_changes: 0
		}
	);

	list.todos.push(TodoItem::new("item_1", "content"));
	s1.todos.save(&list).await?;
	s1.engine.sync().await?;
	s2.engine.sync().await?;

	assert_eq!(s2.todos.load("todolist_1").await?, Some(list));
	assert_eq!(
		s1.engine.sync().await?,
		SyncResult::default(),
		"idempotent over HTTP too"
	);

	server.stop().await;
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_value_tags_survive_http() -> Result<(), Box<dyn std::error::Error>> {
	let (server, hub) = start_hub(Arc::new(MetricsRegistry::new())).await?;
	let s1 = new_replica("s1", hub.clone()).await;
	let s2 = new_replica("s2", hub.clone()).await;

	let pk = Value::Bytes(vec![0x00, 0xff, 0x10]);
	s1.store
		.change_log()
		.commit(&[LocalWrite::upsert(
			"todo_item",
			pk.clone(),
			[
				// Looks like hex, must stay text
				("content", Value::from("00ff10")),
				("list_id", Value::None),
				("blob", Value::Bytes(b"raw".to_vec())),
			],
		)])
		.await?;
	s1.engine.sync().await?;
	s2.engine.sync().await?;

	let row = s2
		.store
		.change_log()
		.read_row("todo_item", &pk)
		.await?
		.ok_or("row missing on s2")?;
	assert_eq!(row["content"], Value::String("00ff10".to_string()));
	assert_eq!(row["list_id"], Value::None);
	assert_eq!(row["blob"], Value::Bytes(b"raw".to_vec()));

	server.stop().await;
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_stopped_server_is_transport_error() -> Result<(), Box<dyn std::error::Error>> {
	let (server, hub) = start_hub(Arc::new(MetricsRegistry::new())).await?;
	let spoke = new_replica("spoke", hub.clone()).await;
	spoke.engine.sync().await?;

	server.stop().await;

	let err = spoke.engine.sync().await.unwrap_err();
	assert!(err.is_transport(), "unexpected error: {}", err);
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_endpoint_index_health_and_metrics() -> Result<(), Box<dyn std::error::Error>> {
	let metrics = Arc::new(MetricsRegistry::new());
	let (server, hub) = start_hub(metrics.clone()).await?;
	hub.ping().await?;

	let http = reqwest::Client::new();
	let index = http.get(server.base_url()).send().await?.text().await?;
	assert_eq!(index, "syncstore: hub");

	let text = http
		.get(format!("{}/metrics", server.base_url()))
		.send()
		.await?
		.text()
		.await?;
	assert!(text.contains("bifrost_http_requests_total{route=\"setup-table-change-tracking\"} 1"));
	assert!(text.contains("bifrost_http_requests_total{route=\"health\"} 1"));

	server.stop().await;
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_large_push_over_http() -> Result<(), Box<dyn std::error::Error>> {
	let (server, hub) = start_hub(Arc::new(MetricsRegistry::new())).await?;
	let s1 = new_replica("s1", hub.clone()).await;
	let s2 = new_replica("s2", hub.clone()).await;

	// Well past axum's default 2 MB request limit
	let mut list = TodoList::new("todolist_1", "big");
	list.todos.push(TodoItem::new("item_1", "x".repeat(3 * 1024 * 1024)));
	s1.todos.save(&list).await?;

	let pushed = s1.engine.sync().await?;
	assert_eq!(pushed.n_pushed_changes, 3);
	s2.engine.sync().await?;
	assert_eq!(s2.todos.load("todolist_1").await?, Some(list));

	server.stop().await;
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_push_beyond_body_limit_is_transport_error() -> Result<(), Box<dyn std::error::Error>> {
	let log = ChangeLog::open_in_memory().await?;
	let state = AppState::new("hub", Arc::new(ChangeLogSyncStore::new(log)), Arc::new(MetricsRegistry::new()))
		.with_body_limit(64 * 1024);
	let server = SyncStoreServer::start("127.0.0.1:0", state).await?;
	let hub = Arc::new(HttpSyncStoreClient::new(&server.base_url(), TIMEOUT)?);
	hub.setup_table_change_tracking(&Tables::new(TodoStore::get_tables()))
		.await?;

	let spoke = new_replica("spoke", hub.clone()).await;
	let mut list = TodoList::new("todolist_1", "big");
	list.todos.push(TodoItem::new("item_1", "x".repeat(128 * 1024)));
	spoke.todos.save(&list).await?;

	// 413, or a reset if the hub hangs up before the body is sent
	let err = spoke.engine.sync().await.unwrap_err();
	assert!(err.is_transport(), "unexpected error: {}", err);

	server.stop().await;
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_rejected_push_is_transport_error() -> Result<(), Box<dyn std::error::Error>> {
	// Hub without any tracked table
	let log = ChangeLog::open_in_memory().await?;
	let state = AppState::new("hub", Arc::new(ChangeLogSyncStore::new(log)), Arc::new(MetricsRegistry::new()));
	let server = SyncStoreServer::start("127.0.0.1:0", state).await?;
	let hub = Arc::new(HttpSyncStoreClient::new(&server.base_url(), TIMEOUT)?);

	let spoke = new_replica("spoke", hub.clone()).await;
	spoke.todos.save(&TodoList::new("todolist_1", "title_1")).await?;

	let err = spoke.engine.sync().await.unwrap_err();
	assert!(err.is_transport(), "unexpected error: {}", err);
	assert!(err.to_string().contains("422"), "unexpected error: {}", err);

	// Nothing reached the hub, so the next push starts from scratch
	let site = spoke.site_id();
	assert_eq!(hub.get_last_received_version(&site).await?, NEVER_SYNCED);

	server.stop().await;
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_malformed_payload_is_transport_error() -> Result<(), Box<dyn std::error::Error>> {
	let app = Router::new().route("/site-id", get(|| async { "not json" }));
	let base_url = start_stub(app).await?;
	let client = HttpSyncStoreClient::new(&base_url, TIMEOUT)?;

	let err = client.get_site_id().await.unwrap_err();
	assert!(err.is_transport(), "unexpected error: {}", err);
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_slow_remote_is_transport_error() -> Result<(), Box<dyn std::error::Error>> {
	let app = Router::new().route(
		"/site-id",
		get(|| async {
			tokio::time::sleep(Duration::from_secs(5)).await;
			"{}"
		}),
	);
	let base_url = start_stub(app).await?;
	let client = HttpSyncStoreClient::new(&base_url, Duration::from_millis(200))?;

	let err = client.get_site_id().await.unwrap_err();
	assert!(err.is_transport(), "unexpected error: {}", err);
	assert!(err.to_string().contains("timed out"), "unexpected error: {}", err);
	Ok(())
}
