use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tabbridge")]
#[command(about = "Bridge a browser's tabs to an orchestration gateway and a local CDP relay")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the bridge against a browser's remote-debugging endpoint
	Run(RunArgs),

	/// Print the effective configuration as JSON
	CheckConfig(ConfigArgs),
}

/// Config file plus per-field overrides.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigArgs {
	/// JSON config file (camelCase keys); reloaded on SIGHUP
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Gateway WebSocket URL
	#[arg(long, value_name = "URL")]
	pub gateway_url: Option<String>,

	/// Bearer token sent in the gateway handshake
	#[arg(long, value_name = "TOKEN")]
	pub gateway_token: Option<String>,

	/// Port of the local CDP relay
	#[arg(long, value_name = "PORT")]
	pub relay_port: Option<u16>,

	/// Allow input, navigation and other state-changing commands
	#[arg(long)]
	pub write_access: bool,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
	#[command(flatten)]
	pub config: ConfigArgs,

	/// Browser remote-debugging port
	#[arg(long, default_value_t = 9222, value_name = "PORT")]
	pub cdp_port: u16,

	/// Seconds between keepalive checks of both links
	#[arg(long, default_value_t = 60, value_name = "SECS")]
	pub keepalive_secs: u64,
}
