mod cli;
mod commands;
mod devtools;
mod logging;
mod settings;
mod signals;

use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		eprintln!("Error: {err:#}");
		std::process::exit(1);
	}
}
