use hostname;
use log::Level;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::state::DEFAULT_BODY_LIMIT;

/// Runtime configuration for a Bifrost replica.
///
/// Values are loaded from (in order): the `/etc/vanopticon/bifrost.json` file,
/// the user config folders (optional), and environment variables prefixed
/// with `BFR_` (e.g. `BFR_PORT`). Command line flags override all of these.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	/// Name reported by the endpoint index and used in log lines.
	pub name: String,
	pub host: String,
	pub port: u16,
	/// SQLite database holding the replica, e.g. `sqlite://bifrost.db`.
	pub database_url: String,
	/// Hub to sync with; `None` for a hub itself.
	pub remote_url: Option<Url>,
	pub request_timeout_secs: u64,
	/// Keep syncing every N seconds; `None` syncs once.
	pub sync_interval_secs: Option<u64>,
	/// Largest request body the endpoint accepts, in bytes.
	pub max_body_bytes: usize,
	pub tracked_tables: Vec<String>,
	pub log_level: Level,
}

impl Default for Settings {
	fn default() -> Self {
		let name = hostname::get()
			.ok()
			.and_then(|s| s.into_string().ok())
			.unwrap_or_else(|| "bifrost".to_string());

		Self {
			name,
			host: "127.0.0.1".to_string(),
			port: 7370,
			database_url: "sqlite://bifrost.db".to_string(),
			remote_url: None,
			request_timeout_secs: 10,
			sync_interval_secs: None,
			max_body_bytes: DEFAULT_BODY_LIMIT,
			tracked_tables: Vec::new(),
			log_level: Level::Info,
		}
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),

	#[error("invalid value for {key}: {reason}")]
	Invalid { key: &'static str, reason: String },
}

fn env_override(key: &str) -> Option<String> {
	std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_override<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, SettingsError>
where
	T::Err: std::fmt::Display,
{
	value.parse::<T>().map_err(|e| SettingsError::Invalid {
		key,
		reason: e.to_string(),
	})
}

pub fn load() -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/vanopticon/bifrost.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("vanopticon").join("bifrost.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}
	if let Some(folder) = dirs::config_local_dir() {
		let local_config_path = folder.join("vanopticon").join("bifrost.json");
		builder = builder.add_source(config::File::from(local_config_path).required(false));
	}

	builder = builder.add_source(
		config::Environment::with_prefix("BFR")
			.separator("__")
			.try_parsing(true)
			.list_separator(",")
			.with_list_parse_key("tracked_tables"),
	);

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Direct variables win over whatever the layered sources produced.
	if let Some(n) = env_override("BFR_NAME") {
		s.name = n;
	}
	if let Some(h) = env_override("BFR_HOST") {
		s.host = h;
	}
	if let Some(p) = env_override("BFR_PORT") {
		s.port = parse_override("BFR_PORT", &p)?;
	}
	if let Some(db) = env_override("BFR_DATABASE_URL") {
		s.database_url = db;
	}
	if let Some(r) = env_override("BFR_REMOTE_URL") {
		s.remote_url = Some(parse_override("BFR_REMOTE_URL", &r)?);
	}
	if let Some(t) = env_override("BFR_REQUEST_TIMEOUT_SECS") {
		s.request_timeout_secs = parse_override("BFR_REQUEST_TIMEOUT_SECS", &t)?;
	}
	if let Some(i) = env_override("BFR_SYNC_INTERVAL_SECS") {
		s.sync_interval_secs = Some(parse_override("BFR_SYNC_INTERVAL_SECS", &i)?);
	}
	if let Some(b) = env_override("BFR_MAX_BODY_BYTES") {
		s.max_body_bytes = parse_override("BFR_MAX_BODY_BYTES", &b)?;
	}
	if let Some(t) = env_override("BFR_TRACKED_TABLES") {
		s.tracked_tables = t
			.split(',')
			.map(str::trim)
			.filter(|t| !t.is_empty())
			.map(String::from)
			.collect();
	}
	if let Some(l) = env_override("BFR_LOG_LEVEL") {
		s.log_level = parse_override("BFR_LOG_LEVEL", &l)?;
	}

	if s.sync_interval_secs == Some(0) {
		return Err(SettingsError::Invalid {
			key: "sync_interval_secs",
			reason: "must be at least 1".to_string(),
		});
	}

	Ok(s)
}
