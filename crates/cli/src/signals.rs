//! Process signals the host reacts to.

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
	/// Reload the config file.
	Reload,
	Shutdown,
}

#[cfg(unix)]
pub struct Signals {
	hangup: tokio::signal::unix::Signal,
	terminate: tokio::signal::unix::Signal,
	interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
	pub fn install() -> Result<Self> {
		use anyhow::Context;
		use tokio::signal::unix::{SignalKind, signal};

		Ok(Self {
			hangup: signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?,
			terminate: signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
			interrupt: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
		})
	}

	pub async fn next(&mut self) -> HostSignal {
		tokio::select! {
			_ = self.hangup.recv() => HostSignal::Reload,
			_ = self.terminate.recv() => HostSignal::Shutdown,
			_ = self.interrupt.recv() => HostSignal::Shutdown,
		}
	}
}

#[cfg(not(unix))]
pub struct Signals;

#[cfg(not(unix))]
impl Signals {
	pub fn install() -> Result<Self> {
		Ok(Self)
	}

	pub async fn next(&mut self) -> HostSignal {
		let _ = tokio::signal::ctrl_c().await;
		HostSignal::Shutdown
	}
}
