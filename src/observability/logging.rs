use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// Initialize colored, timestamped logging to stdout.
///
/// `level` accepts the usual `log` level names (`error` .. `trace`, `off`).
pub fn init_logging(level: &str) -> anyhow::Result<()> {
	let level: LevelFilter = level
		.parse()
		.map_err(|_| anyhow::anyhow!("invalid log level '{}'", level))?;

	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::Cyan)
		.trace(Color::BrightBlack);

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} {:<5} [{}] {}",
				chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level)
		// sqlx logs every statement at info
		.level_for("sqlx", LevelFilter::Warn)
		.chain(std::io::stdout())
		.apply()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn logging_initialization() {
		// Only one logger per process; a second call must fail cleanly.
		// Installed switched off so other tests stay quiet.
		let _ = super::init_logging("off");
		assert!(super::init_logging("info").is_err());
	}

	#[test]
	fn rejects_unknown_level() {
		assert!(super::init_logging("loud").is_err());
	}
}
