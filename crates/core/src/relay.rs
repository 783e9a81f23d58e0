//! Data-plane link to the local automation relay.
//!
//! Connect attempts are deduplicated: while one is in flight every caller
//! awaits the same shared future. An attempt that does not open within
//! [`RELAY_CONNECT_TIMEOUT`] fails and schedules a reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tabbridge_protocol::{RelayInbound, RelayOutbound};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backoff::{Backoffs, LinkKind};
use crate::config::SharedConfig;
use crate::error::{Error, Result};
use crate::link::LinkEvent;
use crate::notice::LinkState;
use crate::transport::{Dialer, TransportParts};

pub const RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a shared connect attempt. Errors are rendered to text so the
/// outcome can be cloned to every waiter.
type ConnectAttempt = Shared<BoxFuture<'static, std::result::Result<(), String>>>;

#[derive(Default)]
struct RelayState {
	outbound: Option<mpsc::UnboundedSender<String>>,
	connecting: Option<ConnectAttempt>,
	generation: u64,
}

struct RelayInner {
	config: SharedConfig,
	dialer: Arc<dyn Dialer>,
	backoffs: Backoffs,
	events: mpsc::UnboundedSender<LinkEvent>,
	state: Mutex<RelayState>,
}

#[derive(Clone)]
pub struct RelayLink {
	inner: Arc<RelayInner>,
}

impl RelayLink {
	pub(crate) fn new(
		config: SharedConfig,
		dialer: Arc<dyn Dialer>,
		backoffs: Backoffs,
		events: mpsc::UnboundedSender<LinkEvent>,
	) -> Self {
		Self {
			inner: Arc::new(RelayInner {
				config,
				dialer,
				backoffs,
				events,
				state: Mutex::new(RelayState::default()),
			}),
		}
	}

	/// Opens the relay socket, or joins the attempt already in flight.
	/// Returns immediately when the socket is open.
	pub async fn connect(&self) -> Result<()> {
		let attempt = {
			let mut state = self.inner.state.lock();
			if state.outbound.is_some() {
				return Ok(());
			}
			match &state.connecting {
				Some(attempt) => attempt.clone(),
				None => {
					let task = tokio::spawn(self.clone().attempt());
					let attempt = async move {
						task.await
							.unwrap_or_else(|err| Err(format!("relay connect task failed: {err}")))
					}
					.boxed()
					.shared();
					state.connecting = Some(attempt.clone());
					attempt
				}
			}
		};
		attempt.await.map_err(Error::RelayConnect)
	}

	pub fn is_open(&self) -> bool {
		self.inner.state.lock().outbound.is_some()
	}

	pub fn state(&self) -> LinkState {
		let state = self.inner.state.lock();
		if state.outbound.is_some() {
			LinkState::Connected
		} else if state.connecting.is_some() {
			LinkState::Connecting
		} else {
			LinkState::Disconnected
		}
	}

	/// Sends a frame if the socket is open. Returns whether it was queued.
	pub fn send(&self, frame: &RelayOutbound) -> bool {
		let text = match frame.encode() {
			Ok(text) => text,
			Err(err) => {
				warn!(target = "tabbridge.relay", error = %err, "failed to encode relay frame");
				return false;
			}
		};
		let state = self.inner.state.lock();
		state
			.outbound
			.as_ref()
			.is_some_and(|outbound| outbound.send(text).is_ok())
	}

	pub(crate) fn shutdown(&self) {
		let mut state = self.inner.state.lock();
		state.generation += 1;
		state.outbound = None;
	}

	async fn attempt(self) -> std::result::Result<(), String> {
		let url = self.inner.config.read().relay_url();
		info!(target = "tabbridge.relay", url = %url, "connecting to relay");

		let dialed = match tokio::time::timeout(RELAY_CONNECT_TIMEOUT, self.inner.dialer.dial(&url)).await {
			Ok(result) => result,
			Err(_) => Err(Error::ConnectTimeout),
		};

		let mut state = self.inner.state.lock();
		state.connecting = None;

		let TransportParts { outbound, inbound } = match dialed {
			Ok(parts) if !self.inner.backoffs.is_stopped() => parts,
			Ok(_) => return Err(Error::Stopped.to_string()),
			Err(err) => {
				drop(state);
				warn!(target = "tabbridge.relay", error = %err, "relay connection failed");
				self.schedule_reconnect("connect-failed");
				return Err(err.to_string());
			}
		};

		state.generation += 1;
		let generation = state.generation;
		state.outbound = Some(outbound);
		drop(state);

		self.inner.backoffs.reset_all();
		info!(target = "tabbridge.relay", "relay connected");
		tokio::spawn(self.read_loop(generation, inbound));
		Ok(())
	}

	async fn read_loop(self, generation: u64, mut inbound: mpsc::UnboundedReceiver<String>) {
		while let Some(text) = inbound.recv().await {
			match RelayInbound::decode(&text) {
				Ok(RelayInbound::Ping) => {
					self.send(&RelayOutbound::Pong);
				}
				Ok(RelayInbound::Ignored) => {
					debug!(target = "tabbridge.relay", "ignoring relay frame without method or id");
				}
				Ok(frame) => {
					let _ = self.inner.events.send(LinkEvent::Relay(frame));
				}
				Err(err) => {
					debug!(target = "tabbridge.relay", error = %err, "dropping malformed relay frame");
				}
			}
		}

		let current = {
			let mut state = self.inner.state.lock();
			let current = state.generation == generation;
			if current {
				state.outbound = None;
			}
			current
		};
		if current {
			info!(target = "tabbridge.relay", "relay disconnected");
			let _ = self.inner.events.send(LinkEvent::RelayDisconnected);
			self.schedule_reconnect("closed");
		}
	}

	fn schedule_reconnect(&self, reason: &'static str) {
		let link = self.clone();
		self.inner.backoffs.schedule(LinkKind::Relay, reason, move || async move {
			if let Err(err) = link.connect().await {
				debug!(target = "tabbridge.relay", error = %err, "relay auto-connect failed");
			}
		});
	}
}
