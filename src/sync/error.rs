use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by sync stores and the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
	/// Missing remote or malformed query. Never retried.
	#[error("configuration error: {0}")]
	Configuration(String),

	/// Network failure, timeout, non-success status or malformed payload.
	#[error("transport error: {0}")]
	Transport(String),

	/// The storage engine rejected an incoming change; nothing was applied.
	#[error("merge error: {0}")]
	Merge(String),

	#[error("storage error: {0}")]
	Storage(#[from] StorageError),
}

impl SyncError {
	pub fn is_transport(&self) -> bool {
		matches!(self, SyncError::Transport(_))
	}
}

impl From<reqwest::Error> for SyncError {
	fn from(e: reqwest::Error) -> Self {
		if e.is_timeout() {
			SyncError::Transport(format!("request timed out: {}", e))
		} else if e.is_decode() {
			SyncError::Transport(format!("malformed response payload: {}", e))
		} else {
			SyncError::Transport(e.to_string())
		}
	}
}
