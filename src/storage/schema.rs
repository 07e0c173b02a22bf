//! DDL for the change log.
//!
//! `pk` and `val` are declared without a type so SQLite keeps the storage
//! class of whatever was bound (TEXT vs BLOB), which the value codec relies on.

pub const STATEMENTS: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS bifrost_site (
		id INTEGER PRIMARY KEY CHECK (id = 0),
		site_id BLOB NOT NULL,
		db_version INTEGER NOT NULL DEFAULT 0
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS bifrost_tracked_tables (
		name TEXT PRIMARY KEY
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS bifrost_rows (
		tbl TEXT NOT NULL,
		pk NOT NULL,
		cl INTEGER NOT NULL,
		PRIMARY KEY (tbl, pk)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS bifrost_clock (
		tbl TEXT NOT NULL,
		pk NOT NULL,
		cid TEXT NOT NULL,
		val,
		col_version INTEGER NOT NULL,
		db_version INTEGER NOT NULL,
		site_id BLOB NOT NULL,
		cl INTEGER NOT NULL,
		seq INTEGER NOT NULL,
		PRIMARY KEY (tbl, pk, cid)
	)
	"#,
	"CREATE INDEX IF NOT EXISTS bifrost_clock_db_version ON bifrost_clock (db_version, seq)",
	r#"
	CREATE TABLE IF NOT EXISTS bifrost_tracked_peers (
		site_id BLOB NOT NULL,
		version INTEGER NOT NULL,
		tag INTEGER NOT NULL DEFAULT 0,
		event INTEGER NOT NULL DEFAULT 0,
		PRIMARY KEY (site_id, tag, event)
	)
	"#,
];
