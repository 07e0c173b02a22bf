use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use url::Url;
use vanopticon_bifrost::{config, engine, observability, open_store, serve};

#[derive(Parser)]
#[command(name = "bifrost", about = "Bifrost - replica synchronization hub and client")]
struct Cli {
	/// SQLite database of this replica (overrides BFR_DATABASE_URL)
	#[arg(long, global = true)]
	database_url: Option<String>,
	/// Name used in logs and the endpoint index (overrides BFR_NAME)
	#[arg(long, global = true)]
	name: Option<String>,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Serve this replica as a sync hub
	Serve {
		#[arg(long)]
		host: Option<String>,
		#[arg(long)]
		port: Option<u16>,
	},
	/// Sync this replica with a hub
	Sync {
		/// Hub base URL (overrides BFR_REMOTE_URL)
		#[arg(long)]
		remote: Option<Url>,
		/// Keep syncing every N seconds until interrupted (overrides BFR_SYNC_INTERVAL_SECS)
		#[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
		interval: Option<u64>,
	},
	/// Print the site id of this replica
	SiteId,
	/// Enable change tracking for the given tables
	Track {
		#[arg(required = true)]
		tables: Vec<String>,
	},
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		log::error!("Failed to listen for ctrl-c: {}", e);
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let mut settings = config::load().context("failed to load configuration")?;
	if let Some(db) = cli.database_url {
		settings.database_url = db;
	}
	if let Some(name) = cli.name {
		settings.name = name;
	}

	let obs = observability::init_observability(settings.log_level.as_str())?;

	match cli.command {
		Commands::Serve { host, port } => {
			if let Some(h) = host {
				settings.host = h;
			}
			if let Some(p) = port {
				settings.port = p;
			}
			serve(&settings, obs.metrics, shutdown_signal()).await?;
		}
		Commands::Sync { remote, interval } => {
			if remote.is_some() {
				settings.remote_url = remote;
			}
			let engine = engine(&settings, obs.metrics).await?;
			match interval.or(settings.sync_interval_secs) {
				Some(secs) => {
					engine
						.run_periodic(Duration::from_secs(secs), shutdown_signal())
						.await?
				}
				None => {
					let result = engine.sync().await?;
					println!(
						"pulled {} changes, pushed {} changes",
						result.n_pulled_changes, result.n_pushed_changes
					);
				}
			}
		}
		Commands::SiteId => {
			let store = open_store(&settings, obs.metrics).await?;
			println!("{}", store.change_log().site_id());
		}
		Commands::Track { tables } => {
			settings.tracked_tables.extend(tables);
			let store = open_store(&settings, obs.metrics).await?;
			println!(
				"tracking: {}",
				store.change_log().tracked_tables().await?.join(", ")
			);
		}
	}

	Ok(())
}
