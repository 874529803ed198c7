use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the stderr subscriber. `RUST_LOG` takes precedence over `verbosity`.
pub fn init_logging(verbosity: u8) {
	// 0: errors, plus harness warnings (boot timeouts, failed artifact saves)
	// 1 (-v): progress of the run
	// 2+ (-vv): every command, probe and protocol message
	let filter = match verbosity {
		0 => "error,mdrive=warn,mdrive_cli=warn",
		1 => "info,mdrive_runtime=warn",
		_ => "debug",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr.with_max_level(tracing::Level::TRACE))
		.with_target(verbosity > 1)
		.compact()
		.init();
}
