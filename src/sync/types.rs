use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sync::error::SyncError;
use crate::value::Value;

/// Site-local, monotonically increasing commit counter. `-1` means
/// "nothing received yet".
pub type DbVersion = i64;

/// Version reported for a peer that has never been synced.
pub const NEVER_SYNCED: DbVersion = -1;

/// Column id of the row sentinel, which carries delete/resurrect events.
pub const SENTINEL_CID: &str = "-1";

/// Length in bytes of a site identifier.
pub const SITE_ID_LEN: usize = 16;

/// Identifier of one writable replica, hex encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SiteId([u8; SITE_ID_LEN]);

impl SiteId {
	/// Generate a fresh identifier for a new replica.
	pub fn generate() -> Self {
		Self(*uuid::Uuid::new_v4().as_bytes())
	}

	pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidSiteId> {
		let arr: [u8; SITE_ID_LEN] = bytes
			.try_into()
			.map_err(|_| InvalidSiteId(format!("expected {} bytes, got {}", SITE_ID_LEN, bytes.len())))?;
		Ok(Self(arr))
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn to_hex(&self) -> String {
		hex::encode(self.0)
	}
}

impl fmt::Display for SiteId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl fmt::Debug for SiteId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SiteId({})", self.to_hex())
	}
}

impl FromStr for SiteId {
	type Err = InvalidSiteId;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = hex::decode(s).map_err(|e| InvalidSiteId(format!("{}: {}", s, e)))?;
		Self::from_bytes(&bytes)
	}
}

impl TryFrom<String> for SiteId {
	type Error = InvalidSiteId;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		s.parse()
	}
}

impl From<SiteId> for String {
	fn from(id: SiteId) -> Self {
		id.to_hex()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid site id: {0}")]
pub struct InvalidSiteId(pub String);

/// A single column-level mutation, one row of the change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
	/// Tracked table the row belongs to.
	pub table: String,
	/// Primary key of the row.
	pub pk: Value,
	/// Column id, or [`SENTINEL_CID`] for row lifecycle events.
	pub cid: String,
	/// New column value (always `None` for sentinels).
	pub val: Value,
	/// Per-column write counter, used for last-write-wins.
	pub col_version: i64,
	/// Version under which the producing site committed this change.
	pub db_version: DbVersion,
	/// Site that originally made the change.
	pub site_id: SiteId,
	/// Causal length of the row: odd while alive, even once deleted.
	pub cl: i64,
	/// Position of the change within its commit.
	pub seq: i64,
}

impl Change {
	pub fn is_sentinel(&self) -> bool {
		self.cid == SENTINEL_CID
	}
}

/// Everything a site can show for its own history as of `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
	pub changes: Vec<Change>,
	/// Version of the producing site at the time the set was read.
	pub version: DbVersion,
	/// Site that produced the set (not necessarily the origin of each change).
	pub from_site_id: SiteId,
}

impl ChangeSet {
	pub fn len(&self) -> usize {
		self.changes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.changes.is_empty()
	}
}

fn default_since_version() -> DbVersion {
	NEVER_SYNCED
}

/// Selects the changes a site should hand out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesQuery {
	/// Exclusive lower bound on `db_version`; `-1` returns all history.
	#[serde(default = "default_since_version")]
	pub since_version: DbVersion,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub from_site_id: Option<SiteId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub not_from_site_id: Option<SiteId>,
}

impl Default for ChangesQuery {
	fn default() -> Self {
		Self {
			since_version: NEVER_SYNCED,
			from_site_id: None,
			not_from_site_id: None,
		}
	}
}

impl ChangesQuery {
	/// Changes originated at `site` since `since_version`.
	pub fn from_site(since_version: DbVersion, site: SiteId) -> Self {
		Self {
			since_version,
			from_site_id: Some(site),
			not_from_site_id: None,
		}
	}

	/// Changes originated anywhere except `site` since `since_version`.
	pub fn not_from_site(since_version: DbVersion, site: SiteId) -> Self {
		Self {
			since_version,
			from_site_id: None,
			not_from_site_id: Some(site),
		}
	}

	/// Resolve the origin filter. Exactly one of the two site ids must be set.
	pub fn site_filter(&self) -> Result<SiteFilter, SyncError> {
		match (self.from_site_id, self.not_from_site_id) {
			(Some(site), None) => Ok(SiteFilter::Only(site)),
			(None, Some(site)) => Ok(SiteFilter::Except(site)),
			(Some(_), Some(_)) => Err(SyncError::Configuration(
				"changes query sets both from_site_id and not_from_site_id".to_string(),
			)),
			(None, None) => Err(SyncError::Configuration(
				"changes query must set exactly one of from_site_id and not_from_site_id"
					.to_string(),
			)),
		}
	}
}

/// Origin filter of a [`ChangesQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteFilter {
	Only(SiteId),
	Except(SiteId),
}

/// Tables to enable change tracking for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tables {
	pub table_names: Vec<String>,
}

impl Tables {
	pub fn new<I, S>(names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			table_names: names.into_iter().map(Into::into).collect(),
		}
	}
}

/// Outcome of one pull-then-push cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
	pub n_pulled_changes: usize,
	pub n_pushed_changes: usize,
}
