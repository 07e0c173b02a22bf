use serde::{Deserialize, Serialize};

use crate::sync::types::{Change, SiteId};

/// Version of one clock cell: a per-column write counter plus the site that
/// wrote it. Ordering is total, so every replica picks the same winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStamp {
	/// Per-column write counter.
	pub col_version: i64,
	/// Origin site of the write.
	pub site_id: SiteId,
}

impl VersionStamp {
	pub fn new(col_version: i64, site_id: SiteId) -> Self {
		Self {
			col_version,
			site_id,
		}
	}

	/// Returns true if `self` wins over `other`.
	pub fn is_newer_than(&self, other: &VersionStamp) -> bool {
		if self.col_version != other.col_version {
			self.col_version > other.col_version
		} else {
			// Tie-break on site id for deterministic ordering
			self.site_id > other.site_id
		}
	}
}

/// Returns true when the causal length marks a live row.
pub fn is_alive(cl: i64) -> bool {
	cl % 2 == 1
}

/// What the change log should do with one incoming change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
	/// Stale, or already present.
	Ignore,
	/// Overwrite the cell with the incoming change.
	Apply,
	/// The change belongs to a newer row lifecycle: move the row to `cl`,
	/// drop every column cell of the old lifecycle, then store the change.
	Reset { cl: i64 },
}

/// Local state of the row and cell an incoming change targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCell {
	/// Causal length of the row, `0` when the row was never seen.
	pub row_cl: i64,
	/// Current stamp of the targeted cell, if any.
	pub stamp: Option<VersionStamp>,
}

/// Decide how an incoming change merges into local state.
///
/// Row lifecycle is decided by causal length first: a higher `cl` always
/// wins, a lower one is stale. Within one lifecycle, column cells follow
/// last-writer-wins on [`VersionStamp`].
pub fn resolve(local: &LocalCell, incoming: &Change) -> Resolution {
	if incoming.cl < local.row_cl {
		return Resolution::Ignore;
	}

	if incoming.is_sentinel() {
		return if incoming.cl > local.row_cl {
			Resolution::Reset { cl: incoming.cl }
		} else {
			Resolution::Ignore
		};
	}

	// Column values never belong to a deleted lifecycle
	if !is_alive(incoming.cl) {
		return Resolution::Ignore;
	}

	if incoming.cl > local.row_cl {
		return Resolution::Reset { cl: incoming.cl };
	}

	let theirs = VersionStamp::new(incoming.col_version, incoming.site_id);
	match local.stamp {
		None => Resolution::Apply,
		Some(ours) if theirs.is_newer_than(&ours) => Resolution::Apply,
		Some(_) => Resolution::Ignore,
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::sync::types::SENTINEL_CID;
	use crate::value::Value;

	fn site(n: u8) -> SiteId {
		SiteId::from_bytes(&[n; 16]).unwrap()
	}

	fn change(cid: &str, col_version: i64, site_id: SiteId, cl: i64) -> Change {
		Change {
			table: "todo_list".to_string(),
			pk: Value::from("list_1"),
			cid: cid.to_string(),
			val: Value::from("v"),
			col_version,
			db_version: 1,
			site_id,
			cl,
			seq: 0,
		}
	}

	#[test]
	fn test_version_stamp_comparison() {
		let v1 = VersionStamp::new(1, site(1));
		let v2 = VersionStamp::new(2, site(1));
		let v3 = VersionStamp::new(2, site(2));

		assert!(v2.is_newer_than(&v1));
		assert!(!v1.is_newer_than(&v2));
		// Tie-break by site id
		assert!(v3.is_newer_than(&v2));
		assert!(!v2.is_newer_than(&v3));
		assert!(!v2.is_newer_than(&v2));
	}

	#[test]
	fn test_unknown_row_is_created() {
		let local = LocalCell::default();
		let res = resolve(&local, &change("title", 1, site(1), 1));
		assert_eq!(res, Resolution::Reset { cl: 1 });
	}

	#[test]
	fn test_lww_on_same_lifecycle() {
		let local = LocalCell {
			row_cl: 1,
			stamp: Some(VersionStamp::new(2, site(5))),
		};
		assert_eq!(resolve(&local, &change("title", 3, site(1), 1)), Resolution::Apply);
		assert_eq!(resolve(&local, &change("title", 1, site(9), 1)), Resolution::Ignore);
		assert_eq!(resolve(&local, &change("title", 2, site(9), 1)), Resolution::Apply);
		assert_eq!(resolve(&local, &change("title", 2, site(1), 1)), Resolution::Ignore);
	}

	#[test]
	fn test_reapplying_same_change_is_noop() {
		let local = LocalCell {
			row_cl: 1,
			stamp: Some(VersionStamp::new(2, site(5))),
		};
		assert_eq!(resolve(&local, &change("title", 2, site(5), 1)), Resolution::Ignore);
	}

	#[test]
	fn test_delete_wins_over_older_lifecycle() {
		let local = LocalCell {
			row_cl: 1,
			stamp: None,
		};
		let res = resolve(&local, &change(SENTINEL_CID, 2, site(1), 2));
		assert_eq!(res, Resolution::Reset { cl: 2 });
	}

	#[test]
	fn test_update_to_deleted_row_is_ignored() {
		let local = LocalCell {
			row_cl: 2,
			stamp: None,
		};
		assert_eq!(resolve(&local, &change("content", 7, site(9), 1)), Resolution::Ignore);
	}

	#[test]
	fn test_resurrection_resets_row() {
		let local = LocalCell {
			row_cl: 2,
			stamp: None,
		};
		assert_eq!(
			resolve(&local, &change("content", 1, site(1), 3)),
			Resolution::Reset { cl: 3 }
		);
	}

	#[test]
	fn test_duplicate_sentinel_is_ignored() {
		let local = LocalCell {
			row_cl: 2,
			stamp: None,
		};
		assert_eq!(resolve(&local, &change(SENTINEL_CID, 2, site(1), 2)), Resolution::Ignore);
	}
}
