use std::net::SocketAddr;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info, warn};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::health::{metrics_handler, store_health};
use crate::state::AppState;
use crate::sync::{ChangeSet, ChangesQuery, SyncError, Tables};
use crate::transport::messages::{
	ErrorBody, LastReceivedVersionRequest, LastReceivedVersionResponse, SiteInfo,
};

/// Error response of the endpoint: status plus `{"error": msg}`.
pub struct ApiError {
	status: StatusCode,
	message: String,
}

impl ApiError {
	fn new(status: StatusCode, message: impl Into<String>) -> Self {
		Self {
			status,
			message: message.into(),
		}
	}
}

impl From<SyncError> for ApiError {
	fn from(e: SyncError) -> Self {
		let status = match &e {
			SyncError::Configuration(_) => StatusCode::BAD_REQUEST,
			SyncError::Merge(_) => StatusCode::UNPROCESSABLE_ENTITY,
			SyncError::Transport(_) => StatusCode::BAD_GATEWAY,
			SyncError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
		};
		Self {
			status,
			message: e.to_string(),
		}
	}
}

impl From<QueryRejection> for ApiError {
	fn from(e: QueryRejection) -> Self {
		Self::new(e.status(), e.body_text())
	}
}

// Keeps the rejection's status, e.g. 413 for an oversized body
impl From<JsonRejection> for ApiError {
	fn from(e: JsonRejection) -> Self {
		Self::new(e.status(), e.body_text())
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		if self.status.is_server_error() {
			error!("Request failed: {}", self.message);
		} else {
			warn!("Request rejected: {}", self.message);
		}
		(self.status, Json(ErrorBody { error: self.message })).into_response()
	}
}

async fn index(State(state): State<AppState>) -> String {
	state.count_request("index");
	format!("syncstore: {}", state.name)
}

async fn setup_table_change_tracking(
	State(state): State<AppState>,
	body: Result<Json<Tables>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
	state.count_request("setup-table-change-tracking");
	let Json(tables) = body?;
	state.store.setup_table_change_tracking(&tables).await?;
	Ok(StatusCode::NO_CONTENT)
}

async fn site_id(State(state): State<AppState>) -> Result<Json<SiteInfo>, ApiError> {
	state.count_request("site-id");
	let site_id = state.store.get_site_id().await?;
	Ok(Json(SiteInfo { site_id }))
}

async fn last_received_version(
	State(state): State<AppState>,
	query: Result<Query<LastReceivedVersionRequest>, QueryRejection>,
) -> Result<Json<LastReceivedVersionResponse>, ApiError> {
	state.count_request("last-received-version");
	let Query(req) = query?;
	let version = state.store.get_last_received_version(&req.from_site_id).await?;
	Ok(Json(LastReceivedVersionResponse { version }))
}

async fn get_changes(
	State(state): State<AppState>,
	query: Result<Query<ChangesQuery>, QueryRejection>,
) -> Result<Json<ChangeSet>, ApiError> {
	state.count_request("changes");
	let Query(query) = query?;
	let set = state.store.get_changes(&query).await?;
	Ok(Json(set))
}

async fn apply_changes(
	State(state): State<AppState>,
	body: Result<Json<ChangeSet>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
	state.count_request("changes");
	let Json(set) = body?;
	state.store.apply_changes(&set).await?;
	Ok(StatusCode::NO_CONTENT)
}

/// Routes of the sync store endpoint.
pub fn router(state: AppState) -> Router {
	let body_limit = state.body_limit;
	Router::new()
		.route("/", get(index))
		.route(
			"/setup-table-change-tracking",
			axum::routing::post(setup_table_change_tracking),
		)
		.route("/site-id", get(site_id))
		.route("/last-received-version", get(last_received_version))
		.route("/changes", get(get_changes).post(apply_changes))
		.route("/health", get(store_health))
		.route("/metrics", get(metrics_handler))
		.layer(DefaultBodyLimit::max(body_limit))
		.with_state(state)
}

/// A running sync store endpoint. Stop it with [`SyncStoreServer::stop`].
pub struct SyncStoreServer {
	local_addr: SocketAddr,
	shutdown: Option<oneshot::Sender<()>>,
	handle: JoinHandle<()>,
}

impl SyncStoreServer {
	/// Bind `addr` and start serving `state.store` in the background.
	/// Bind to port 0 to let the OS pick a free port.
	pub async fn start(addr: impl ToSocketAddrs, state: AppState) -> std::io::Result<Self> {
		let listener = TcpListener::bind(addr).await?;
		let local_addr = listener.local_addr()?;
		let name = state.name.clone();
		let app = router(state);

		let (tx, rx) = oneshot::channel::<()>();
		let handle = tokio::spawn(async move {
			let server = axum::serve(listener, app).with_graceful_shutdown(async {
				let _ = rx.await;
			});
			if let Err(e) = server.await {
				error!("Sync store endpoint '{}' failed: {}", name, e);
			}
		});

		info!("Sync store endpoint listening on http://{}", local_addr);
		Ok(Self {
			local_addr,
			shutdown: Some(tx),
			handle,
		})
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn base_url(&self) -> String {
		format!("http://{}", self.local_addr)
	}

	/// Stop accepting connections and wait for in-flight requests.
	pub async fn stop(mut self) {
		if let Some(tx) = self.shutdown.take() {
			let _ = tx.send(());
		}
		if let Err(e) = (&mut self.handle).await {
			error!("Sync store endpoint task failed: {}", e);
		}
		info!("Sync store endpoint on {} stopped", self.local_addr);
	}
}
