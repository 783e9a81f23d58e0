//! Subcommand implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tabbridge::{Bridge, BridgeHandle, Dialer, Notice, WebSocketDialer};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cli::{Cli, Commands, ConfigArgs, RunArgs};
use crate::devtools::{self, DevtoolsBrowser};
use crate::settings::{describe, effective_config};
use crate::signals::{HostSignal, Signals};

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Commands::Run(args) => run(args).await,
		Commands::CheckConfig(args) => check_config(&args),
	}
}

fn check_config(args: &ConfigArgs) -> Result<()> {
	let config = effective_config(args)?;
	let text = serde_json::to_string_pretty(&describe(&config)).context("Failed to render config")?;
	println!("{text}");
	Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
	let config = effective_config(&args.config)?;
	let version = devtools::discover(args.cdp_port).await?;
	info!(
		target = "tabbridge.cli",
		browser = version.browser.as_deref().unwrap_or("unknown"),
		endpoint = %version.web_socket_debugger_url,
		"found browser"
	);

	let dialer: Arc<dyn Dialer> = Arc::new(WebSocketDialer);
	let (browser, browser_events) =
		DevtoolsBrowser::connect(dialer.as_ref(), &version.web_socket_debugger_url).await?;
	let browser = Arc::new(browser);

	let mut signals = Signals::install()?;
	let (handle, notices) = Bridge::new(config, browser.clone(), browser, dialer).start(browser_events);
	tokio::spawn(log_notices(notices));

	supervise(&handle, &args, &mut signals).await;

	info!(target = "tabbridge.cli", "shutting down");
	handle.stop().await;
	Ok(())
}

/// Ticks keepalive and reacts to signals until asked to shut down.
async fn supervise(handle: &BridgeHandle, args: &RunArgs, signals: &mut Signals) {
	let mut keepalive = tokio::time::interval(Duration::from_secs(args.keepalive_secs.max(1)));
	keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
	// The first tick completes immediately; the bridge is already connecting.
	keepalive.tick().await;

	loop {
		tokio::select! {
			_ = keepalive.tick() => handle.keepalive(),
			signal = signals.next() => match signal {
				HostSignal::Reload => match effective_config(&args.config) {
					Ok(config) => handle.reconfigure(config),
					Err(err) => warn!(target = "tabbridge.cli", error = %format!("{err:#}"), "config reload failed"),
				},
				HostSignal::Shutdown => return,
			},
		}
	}
}

async fn log_notices(mut notices: mpsc::UnboundedReceiver<Notice>) {
	while let Some(notice) = notices.recv().await {
		match notice {
			Notice::Status(state) => info!(target = "tabbridge.cli", %state, "gateway status"),
			Notice::IncomingMessage(text) => println!("{text}"),
			Notice::Error(message) => warn!(target = "tabbridge.cli", "{message}"),
			Notice::TabStatus(status) => info!(
				target = "tabbridge.cli",
				status = ?status.status,
				title = %status.title,
				url = status.url.as_deref().unwrap_or(""),
				"tab status"
			),
		}
	}
}
