use std::path::Path;

use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
	filter::LevelFilter,
	fmt::{self, Layer},
	prelude::*,
	EnvFilter,
};

pub mod device;
pub mod registry;
pub mod sync;
pub mod version;

pub use hearth_config::RuntimeFlags;

#[cfg(debug_assertions)]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::DEBUG;

#[cfg(not(debug_assertions))]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::INFO;

/// Initializes the tracing subscriber with a console layer and a daily
/// rolling file layer under `<data_dir>/logs`.
///
/// The returned guard must be kept alive for the lifetime of the process,
/// otherwise buffered log lines are lost on shutdown.
pub fn init_logging(data_dir: impl AsRef<Path>) -> WorkerGuard {
	let (non_blocking, guard) =
		tracing_appender::non_blocking(rolling::daily(data_dir.as_ref().join("logs"), "log"));

	tracing_subscriber::registry()
		.with(
			EnvFilter::from_default_env()
				.add_directive("warn".parse().expect("Error invalid tracing directive!"))
				.add_directive(
					"hearth_core=debug"
						.parse()
						.expect("Error invalid tracing directive!"),
				),
		)
		.with(fmt::layer().with_filter(CONSOLE_LOG_FILTER))
		.with(
			Layer::default()
				.with_writer(non_blocking)
				.with_ansi(false)
				.with_filter(LevelFilter::DEBUG),
		)
		.init();

	guard
}
