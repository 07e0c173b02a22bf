use axum::{extract::State, http::StatusCode, response::IntoResponse};

/// Store health endpoint: returns 200 OK when the served store answers a
/// ping, otherwise returns 503 Service Unavailable.
pub async fn store_health(State(state): State<crate::state::AppState>) -> impl IntoResponse {
	state.count_request("health");
	match state.store.ping().await {
		Ok(()) => (StatusCode::OK, "OK").into_response(),
		Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("store error: {}", e)).into_response(),
	}
}

/// Prometheus metrics endpoint: returns metrics in Prometheus text format
pub async fn metrics_handler(State(state): State<crate::state::AppState>) -> impl IntoResponse {
	let metrics_text = state.metrics.encode();
	(StatusCode::OK, metrics_text).into_response()
}
