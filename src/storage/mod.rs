//! SQLite-backed change-tracking engine.
//!
//! Every tracked table is stored as clock cells: one row per
//! `(table, pk, column)` holding the winning value and its version, plus a
//! per-row causal length in `bifrost_rows`. Local writes go through
//! [`ChangeLog::commit`], remote changes through [`ChangeLog::merge`]; both
//! run in a single transaction and stamp what they record with one new
//! `db_version`.

pub mod schema;

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use log::{debug, info};
use sqlx::query::Query;
use sqlx::sqlite::{
	SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
	SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite};
use thiserror::Error;

use crate::sync::merge::{self, LocalCell, Resolution, VersionStamp};
use crate::sync::types::{
	Change, ChangeSet, DbVersion, InvalidSiteId, SENTINEL_CID, SiteFilter, SiteId,
};
use crate::value::Value;

/// How long a writer waits for the database lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool size for file-backed databases.
const MAX_CONNECTIONS: u32 = 8;

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("table '{0}' is not tracked")]
	UntrackedTable(String),

	#[error("invalid table name '{0}'")]
	InvalidTableName(String),

	#[error("invalid column name '{0}'")]
	InvalidColumnName(String),

	#[error("unsupported stored value type '{0}'")]
	UnsupportedValue(String),

	#[error(transparent)]
	SiteId(#[from] InvalidSiteId),
}

/// Column values of one row, keyed by column id.
pub type Record = BTreeMap<String, Value>;

/// A local write, recorded as changes originated at this site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalWrite {
	/// Insert the row or update the given columns.
	Upsert {
		table: String,
		pk: Value,
		columns: Record,
	},
	/// Delete the row.
	Delete { table: String, pk: Value },
	/// Delete every live row of `table` whose `column` holds `value`,
	/// except the rows keyed in `keep`. Matched inside the commit, so rows
	/// written earlier in the same batch or merged just before are seen.
	DeleteOrphans {
		table: String,
		column: String,
		value: Value,
		keep: Vec<Value>,
	},
}

impl LocalWrite {
	pub fn upsert<I, K, V>(table: impl Into<String>, pk: impl Into<Value>, columns: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<Value>,
	{
		LocalWrite::Upsert {
			table: table.into(),
			pk: pk.into(),
			columns: columns
				.into_iter()
				.map(|(k, v)| (k.into(), v.into()))
				.collect(),
		}
	}

	pub fn delete(table: impl Into<String>, pk: impl Into<Value>) -> Self {
		LocalWrite::Delete {
			table: table.into(),
			pk: pk.into(),
		}
	}

	pub fn delete_orphans<I, P>(
		table: impl Into<String>,
		column: impl Into<String>,
		value: impl Into<Value>,
		keep: I,
	) -> Self
	where
		I: IntoIterator<Item = P>,
		P: Into<Value>,
	{
		LocalWrite::DeleteOrphans {
			table: table.into(),
			column: column.into(),
			value: value.into(),
			keep: keep.into_iter().map(Into::into).collect(),
		}
	}

	fn table(&self) -> &str {
		match self {
			LocalWrite::Upsert { table, .. }
			| LocalWrite::Delete { table, .. }
			| LocalWrite::DeleteOrphans { table, .. } => table,
		}
	}
}

/// Change log of one replica.
#[derive(Clone)]
pub struct ChangeLog {
	pool: SqlitePool,
	site_id: SiteId,
}

impl ChangeLog {
	/// Open (or create) a file-backed change log, e.g. `sqlite://replica.db`.
	pub async fn open(database_url: &str) -> Result<Self, StorageError> {
		let options = SqliteConnectOptions::from_str(database_url)?
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.busy_timeout(BUSY_TIMEOUT);
		let pool = SqlitePoolOptions::new()
			.max_connections(MAX_CONNECTIONS)
			.connect_with(options)
			.await?;
		Self::from_pool(pool).await
	}

	/// Open a private in-memory change log. The pool keeps its single
	/// connection alive for the lifetime of the value.
	pub async fn open_in_memory() -> Result<Self, StorageError> {
		let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.min_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
			.connect_with(options)
			.await?;
		Self::from_pool(pool).await
	}

	/// Create the schema if needed and load (or assign) the site id.
	pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
		let mut tx = pool.begin().await?;
		for stmt in schema::STATEMENTS {
			sqlx::query(stmt).execute(&mut *tx).await?;
		}
		sqlx::query("INSERT OR IGNORE INTO bifrost_site (id, site_id, db_version) VALUES (0, ?, 0)")
			.bind(SiteId::generate().as_bytes().to_vec())
			.execute(&mut *tx)
			.await?;
		let site_bytes: Vec<u8> =
			sqlx::query_scalar("SELECT site_id FROM bifrost_site WHERE id = 0")
				.fetch_one(&mut *tx)
				.await?;
		tx.commit().await?;

		let site_id = SiteId::from_bytes(&site_bytes)?;
		info!("Change log ready for site {}", site_id);
		Ok(Self { pool, site_id })
	}

	pub fn site_id(&self) -> SiteId {
		self.site_id
	}

	/// Highest version assigned locally, including merged changes.
	pub async fn db_version(&self) -> Result<DbVersion, StorageError> {
		let mut conn = self.pool.acquire().await?;
		current_db_version(&mut conn).await
	}

	/// Enable change tracking for `tables`. Idempotent.
	pub async fn enable_tracking(&self, tables: &[String]) -> Result<(), StorageError> {
		for name in tables {
			validate_table_name(name)?;
		}
		let mut tx = self.pool.begin().await?;
		for name in tables {
			sqlx::query("INSERT OR IGNORE INTO bifrost_tracked_tables (name) VALUES (?)")
				.bind(name)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;
		debug!("Change tracking enabled for {:?}", tables);
		Ok(())
	}

	pub async fn tracked_tables(&self) -> Result<Vec<String>, StorageError> {
		let names = sqlx::query_scalar("SELECT name FROM bifrost_tracked_tables ORDER BY name")
			.fetch_all(&self.pool)
			.await?;
		Ok(names)
	}

	/// Watermark for `peer`, initialized to `-1` on first contact.
	pub async fn last_received_version(&self, peer: &SiteId) -> Result<DbVersion, StorageError> {
		let mut tx = self.pool.begin().await?;
		sqlx::query(
			r#"
			INSERT INTO bifrost_tracked_peers (site_id, version, tag, event)
			VALUES (?, -1, 0, 0)
			ON CONFLICT (site_id, tag, event) DO NOTHING
			"#,
		)
		.bind(peer.as_bytes().to_vec())
		.execute(&mut *tx)
		.await?;
		let version: i64 = sqlx::query_scalar(
			"SELECT version FROM bifrost_tracked_peers WHERE site_id = ? AND tag = 0 AND event = 0",
		)
		.bind(peer.as_bytes().to_vec())
		.fetch_one(&mut *tx)
		.await?;
		tx.commit().await?;
		Ok(version)
	}

	/// Changes with `db_version > since_version` matching `filter`, together
	/// with the current version, both read from one snapshot.
	pub async fn changes(
		&self,
		since_version: DbVersion,
		filter: SiteFilter,
	) -> Result<(Vec<Change>, DbVersion), StorageError> {
		let (op, site) = match filter {
			SiteFilter::Only(site) => ("=", site),
			SiteFilter::Except(site) => ("!=", site),
		};
		let sql = format!(
			r#"
			SELECT tbl, typeof(pk) AS pk_type, pk, cid, typeof(val) AS val_type, val,
			       col_version, db_version, site_id, cl, seq
			FROM bifrost_clock
			WHERE db_version > ? AND site_id {} ?
			ORDER BY db_version, seq
			"#,
			op
		);

		let mut tx = self.pool.begin().await?;
		let rows = sqlx::query(&sql)
			.bind(since_version)
			.bind(site.as_bytes().to_vec())
			.fetch_all(&mut *tx)
			.await?;
		let version = current_db_version(&mut tx).await?;
		tx.commit().await?;

		let changes = rows
			.iter()
			.map(change_from_row)
			.collect::<Result<Vec<_>, _>>()?;
		Ok((changes, version))
	}

	/// Merge a remote change set and advance the watermark of its producer,
	/// atomically. Returns the number of changes that altered local state.
	pub async fn merge(&self, set: &ChangeSet) -> Result<usize, StorageError> {
		let mut tx = self.pool.begin().await?;

		// Writing first takes the database write lock for the whole transaction
		sqlx::query(
			r#"
			INSERT INTO bifrost_tracked_peers (site_id, version, tag, event)
			VALUES (?, ?, 0, 0)
			ON CONFLICT (site_id, tag, event) DO UPDATE SET version = MAX(version, excluded.version)
			"#,
		)
		.bind(set.from_site_id.as_bytes().to_vec())
		.bind(set.version)
		.execute(&mut *tx)
		.await?;

		let mut version: Option<DbVersion> = None;
		let mut seq = 0;
		for change in &set.changes {
			ensure_tracked(&mut tx, &change.table).await?;

			let local = local_cell(&mut tx, &change.table, &change.pk, &change.cid).await?;
			let resolution = merge::resolve(&local, change);
			if resolution == Resolution::Ignore {
				continue;
			}

			let db_version = match version {
				Some(v) => v,
				None => {
					let v = next_db_version(&mut tx).await?;
					version = Some(v);
					v
				}
			};

			if let Resolution::Reset { cl } = resolution {
				start_lifecycle(&mut tx, &change.table, &change.pk, cl).await?;
			}
			let stored = Change {
				db_version,
				seq,
				..change.clone()
			};
			upsert_cell(&mut tx, &stored).await?;
			seq += 1;
		}

		tx.commit().await?;
		debug!(
			"Merged {} of {} changes from {} (peer version {})",
			seq,
			set.changes.len(),
			set.from_site_id,
			set.version
		);
		Ok(seq as usize)
	}

	/// Record local writes as one commit. Columns whose value is unchanged
	/// record nothing; returns the new version, or `None` when nothing changed.
	pub async fn commit(&self, writes: &[LocalWrite]) -> Result<Option<DbVersion>, StorageError> {
		let mut tx = self.pool.begin().await?;
		let version = next_db_version(&mut tx).await?;
		let mut seq = 0;

		for write in writes {
			ensure_tracked(&mut tx, write.table()).await?;
			match write {
				LocalWrite::Upsert { table, pk, columns } => {
					for cid in columns.keys() {
						validate_column_name(cid)?;
					}

					let mut row_cl = row_cl(&mut tx, table, pk).await?;
					if !merge::is_alive(row_cl) {
						let resurrected = row_cl > 0;
						row_cl += 1;
						start_lifecycle(&mut tx, table, pk, row_cl).await?;
						// Deleted-then-recreated rows and key-only rows need an explicit
						// lifecycle event, otherwise peers never learn of them.
						if resurrected || columns.is_empty() {
							let sentinel = self.sentinel(table, pk, row_cl, version, seq);
							upsert_cell(&mut tx, &sentinel).await?;
							seq += 1;
						}
					}

					for (cid, val) in columns {
						let current = local_cell(&mut tx, table, pk, cid).await?;
						let col_version = match current.stamp {
							Some(stamp) => {
								if cell_value(&mut tx, table, pk, cid).await?.as_ref() == Some(val) {
									continue;
								}
								stamp.col_version + 1
							}
							None => 1,
						};
						let change = Change {
							table: table.clone(),
							pk: pk.clone(),
							cid: cid.clone(),
							val: val.clone(),
							col_version,
							db_version: version,
							site_id: self.site_id,
							cl: row_cl,
							seq,
						};
						upsert_cell(&mut tx, &change).await?;
						seq += 1;
					}
				}
				LocalWrite::Delete { table, pk } => {
					self.delete_row(&mut tx, table, pk, version, &mut seq).await?;
				}
				LocalWrite::DeleteOrphans {
					table,
					column,
					value,
					keep,
				} => {
					validate_column_name(column)?;
					for pk in rows_with_value(&mut tx, table, column, value).await? {
						if !keep.contains(&pk) {
							self.delete_row(&mut tx, table, &pk, version, &mut seq).await?;
						}
					}
				}
			}
		}

		if seq == 0 {
			tx.rollback().await?;
			return Ok(None);
		}
		tx.commit().await?;
		debug!("Committed {} local changes at version {}", seq, version);
		Ok(Some(version))
	}

	/// Current column values of a live row.
	pub async fn read_row(&self, table: &str, pk: &Value) -> Result<Option<Record>, StorageError> {
		let mut conn = self.pool.acquire().await?;
		if !merge::is_alive(row_cl(&mut conn, table, pk).await?) {
			return Ok(None);
		}
		let rows = bind_value(
			sqlx::query(
				r#"
				SELECT cid, typeof(val) AS val_type, val
				FROM bifrost_clock
				WHERE tbl = ? AND pk = ? AND cid != '-1'
				"#,
			)
			.bind(table),
			pk,
		)
		.fetch_all(&mut *conn)
		.await?;

		let mut record = Record::new();
		for row in &rows {
			record.insert(row.try_get("cid")?, decode_value(row, "val_type", "val")?);
		}
		Ok(Some(record))
	}

	/// All live rows of `table`, ordered by primary key.
	pub async fn scan(&self, table: &str) -> Result<BTreeMap<Value, Record>, StorageError> {
		let rows = sqlx::query(
			r#"
			SELECT typeof(r.pk) AS pk_type, r.pk AS pk, c.cid AS cid,
			       typeof(c.val) AS val_type, c.val AS val
			FROM bifrost_rows r
			LEFT JOIN bifrost_clock c ON c.tbl = r.tbl AND c.pk = r.pk AND c.cid != '-1'
			WHERE r.tbl = ? AND r.cl % 2 = 1
			"#,
		)
		.bind(table)
		.fetch_all(&self.pool)
		.await?;

		let mut out: BTreeMap<Value, Record> = BTreeMap::new();
		for row in &rows {
			let pk = decode_value(row, "pk_type", "pk")?;
			let record = out.entry(pk).or_default();
			if let Some(cid) = row.try_get::<Option<String>, _>("cid")? {
				record.insert(cid, decode_value(row, "val_type", "val")?);
			}
		}
		Ok(out)
	}

	/// Record the deletion of a live row; deleting a dead row is a no-op.
	async fn delete_row(
		&self,
		conn: &mut SqliteConnection,
		table: &str,
		pk: &Value,
		version: DbVersion,
		seq: &mut i64,
	) -> Result<(), StorageError> {
		let cl = row_cl(conn, table, pk).await?;
		if !merge::is_alive(cl) {
			return Ok(());
		}
		start_lifecycle(conn, table, pk, cl + 1).await?;
		let sentinel = self.sentinel(table, pk, cl + 1, version, *seq);
		upsert_cell(conn, &sentinel).await?;
		*seq += 1;
		Ok(())
	}

	fn sentinel(&self, table: &str, pk: &Value, cl: i64, db_version: DbVersion, seq: i64) -> Change {
		Change {
			table: table.to_string(),
			pk: pk.clone(),
			cid: SENTINEL_CID.to_string(),
			val: Value::None,
			col_version: cl,
			db_version,
			site_id: self.site_id,
			cl,
			seq,
		}
	}
}

fn validate_table_name(name: &str) -> Result<(), StorageError> {
	if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
		return Err(StorageError::InvalidTableName(name.to_string()));
	}
	Ok(())
}

fn validate_column_name(cid: &str) -> Result<(), StorageError> {
	if cid.is_empty() || cid == SENTINEL_CID {
		return Err(StorageError::InvalidColumnName(cid.to_string()));
	}
	Ok(())
}

fn bind_value<'q>(
	query: Query<'q, Sqlite, SqliteArguments<'q>>,
	value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
	match value {
		Value::None => query.bind(None::<String>),
		Value::String(s) => query.bind(s.clone()),
		Value::Bytes(b) => query.bind(b.clone()),
	}
}

/// Decode a dynamically typed column using the `typeof()` selected next to it.
fn decode_value(row: &SqliteRow, type_column: &str, column: &str) -> Result<Value, StorageError> {
	let ty: String = row.try_get(type_column)?;
	match ty.as_str() {
		"null" => Ok(Value::None),
		"text" => Ok(Value::String(row.try_get(column)?)),
		"blob" => Ok(Value::Bytes(row.try_get(column)?)),
		other => Err(StorageError::UnsupportedValue(other.to_string())),
	}
}

fn change_from_row(row: &SqliteRow) -> Result<Change, StorageError> {
	let site_bytes: Vec<u8> = row.try_get("site_id")?;
	Ok(Change {
		table: row.try_get("tbl")?,
		pk: decode_value(row, "pk_type", "pk")?,
		cid: row.try_get("cid")?,
		val: decode_value(row, "val_type", "val")?,
		col_version: row.try_get("col_version")?,
		db_version: row.try_get("db_version")?,
		site_id: SiteId::from_bytes(&site_bytes)?,
		cl: row.try_get("cl")?,
		seq: row.try_get("seq")?,
	})
}

async fn current_db_version(conn: &mut SqliteConnection) -> Result<DbVersion, StorageError> {
	let version = sqlx::query_scalar("SELECT db_version FROM bifrost_site WHERE id = 0")
		.fetch_one(&mut *conn)
		.await?;
	Ok(version)
}

async fn next_db_version(conn: &mut SqliteConnection) -> Result<DbVersion, StorageError> {
	sqlx::query("UPDATE bifrost_site SET db_version = db_version + 1 WHERE id = 0")
		.execute(&mut *conn)
		.await?;
	current_db_version(conn).await
}

async fn ensure_tracked(conn: &mut SqliteConnection, table: &str) -> Result<(), StorageError> {
	let tracked: Option<i64> =
		sqlx::query_scalar("SELECT 1 FROM bifrost_tracked_tables WHERE name = ?")
			.bind(table)
			.fetch_optional(&mut *conn)
			.await?;
	match tracked {
		Some(_) => Ok(()),
		None => Err(StorageError::UntrackedTable(table.to_string())),
	}
}

async fn row_cl(conn: &mut SqliteConnection, table: &str, pk: &Value) -> Result<i64, StorageError> {
	let row = bind_value(
		sqlx::query("SELECT cl FROM bifrost_rows WHERE tbl = ? AND pk = ?").bind(table),
		pk,
	)
	.fetch_optional(&mut *conn)
	.await?;
	match row {
		Some(row) => Ok(row.try_get("cl")?),
		None => Ok(0),
	}
}

async fn local_cell(
	conn: &mut SqliteConnection,
	table: &str,
	pk: &Value,
	cid: &str,
) -> Result<LocalCell, StorageError> {
	let row_cl = row_cl(conn, table, pk).await?;
	let row = bind_value(
		sqlx::query("SELECT col_version, site_id FROM bifrost_clock WHERE tbl = ? AND pk = ? AND cid = ?")
			.bind(table),
		pk,
	)
	.bind(cid)
	.fetch_optional(&mut *conn)
	.await?;

	let stamp = match row {
		Some(row) => {
			let site_bytes: Vec<u8> = row.try_get("site_id")?;
			Some(VersionStamp::new(
				row.try_get("col_version")?,
				SiteId::from_bytes(&site_bytes)?,
			))
		}
		None => None,
	};
	Ok(LocalCell { row_cl, stamp })
}

async fn cell_value(
	conn: &mut SqliteConnection,
	table: &str,
	pk: &Value,
	cid: &str,
) -> Result<Option<Value>, StorageError> {
	let row = bind_value(
		sqlx::query(
			"SELECT typeof(val) AS val_type, val FROM bifrost_clock WHERE tbl = ? AND pk = ? AND cid = ?",
		)
		.bind(table),
		pk,
	)
	.bind(cid)
	.fetch_optional(&mut *conn)
	.await?;
	row.map(|r| decode_value(&r, "val_type", "val")).transpose()
}

/// Keys of the live rows of `table` whose `cid` cell holds `value`.
async fn rows_with_value(
	conn: &mut SqliteConnection,
	table: &str,
	cid: &str,
	value: &Value,
) -> Result<Vec<Value>, StorageError> {
	let query = sqlx::query(
		r#"
		SELECT typeof(c.pk) AS pk_type, c.pk AS pk
		FROM bifrost_clock c
		JOIN bifrost_rows r ON r.tbl = c.tbl AND r.pk = c.pk
		WHERE c.tbl = ? AND c.cid = ? AND c.val IS ? AND r.cl % 2 = 1
		"#,
	)
	.bind(table)
	.bind(cid);
	let rows = bind_value(query, value).fetch_all(&mut *conn).await?;
	rows.iter()
		.map(|row| decode_value(row, "pk_type", "pk"))
		.collect()
}

/// Move a row to causal length `cl` and drop the column cells of its
/// previous lifecycle.
async fn start_lifecycle(
	conn: &mut SqliteConnection,
	table: &str,
	pk: &Value,
	cl: i64,
) -> Result<(), StorageError> {
	bind_value(
		sqlx::query(
			r#"
			INSERT INTO bifrost_rows (tbl, pk, cl) VALUES (?, ?, ?)
			ON CONFLICT (tbl, pk) DO UPDATE SET cl = excluded.cl
			"#,
		)
		.bind(table),
		pk,
	)
	.bind(cl)
	.execute(&mut *conn)
	.await?;

	bind_value(
		sqlx::query("DELETE FROM bifrost_clock WHERE tbl = ? AND pk = ? AND cid != '-1'").bind(table),
		pk,
	)
	.execute(&mut *conn)
	.await?;
	Ok(())
}

async fn upsert_cell(conn: &mut SqliteConnection, change: &Change) -> Result<(), StorageError> {
	let query = bind_value(
		sqlx::query(
			r#"
			INSERT INTO bifrost_clock (tbl, pk, cid, val, col_version, db_version, site_id, cl, seq)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT (tbl, pk, cid) DO UPDATE SET
				val = excluded.val,
				col_version = excluded.col_version,
				db_version = excluded.db_version,
				site_id = excluded.site_id,
				cl = excluded.cl,
				seq = excluded.seq
			"#,
		)
		.bind(change.table.clone()),
		&change.pk,
	)
	.bind(change.cid.clone());

	bind_value(query, &change.val)
		.bind(change.col_version)
		.bind(change.db_version)
		.bind(change.site_id.as_bytes().to_vec())
		.bind(change.cl)
		.bind(change.seq)
		.execute(&mut *conn)
		.await?;
	Ok(())
}
