use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Config file used when neither `--config` nor `MDRIVE_CONFIG` is given.
pub const DEFAULT_CONFIG: &str = "mdrive.json";

#[derive(Parser, Debug)]
#[command(name = "mdrive")]
#[command(about = "End-to-end test runs on Android emulators, iOS simulators and attached devices")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Run configuration (JSON). Falls back to $MDRIVE_CONFIG, then ./mdrive.json
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Start a test run: clear the device registry, then run the test runner
	Run {
		/// Test runner command line, e.g. `mdrive run -- cargo test --test e2e`
		#[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
		command: Vec<String>,
	},

	/// Forget every device marked busy in the registry
	ResetRegistry,

	/// List the devices currently marked busy
	Registry,
}

impl Cli {
	/// The config path from the flag, the environment, or the default.
	pub fn config_path(&self) -> PathBuf {
		self.config
			.clone()
			.or_else(|| std::env::var_os(mdrive::CONFIG_ENV).map(PathBuf::from))
			.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
	}
}
