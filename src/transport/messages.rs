//! JSON bodies exchanged by the sync store endpoint and its client.
//!
//! `Tables`, `ChangesQuery` and `ChangeSet` travel as-is; the types here
//! cover the remaining request and response shapes.

use serde::{Deserialize, Serialize};

use crate::sync::{DbVersion, SiteId};

/// Response of `GET /site-id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
	pub site_id: SiteId,
}

/// Query of `GET /last-received-version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastReceivedVersionRequest {
	pub from_site_id: SiteId,
}

/// Response of `GET /last-received-version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastReceivedVersionResponse {
	pub version: DbVersion,
}

/// Body of every non-success response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
	pub error: String,
}
