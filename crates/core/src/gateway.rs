//! Control-plane link to the orchestration gateway.
//!
//! [`GatewayLink::connect`] tears down the previous socket and starts a new
//! generation; frames and close notifications from older generations are
//! ignored. [`GatewayLink::ensure_connected`], used by keepalive and the
//! reconnect timer, never starts a second attempt while one is in flight. Status becomes `connecting` on dial and `connected` only once the
//! handshake is acknowledged.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tabbridge_protocol::{
	ChatSendParams, ClientInfo, ConnectParams, GatewayFrame, RequestFrame, ResponseFrame,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::backoff::{Backoffs, LinkKind};
use crate::config::SharedConfig;
use crate::error::{Error, Result};
use crate::link::LinkEvent;
use crate::notice::{LinkState, Notice, Notifier};
use crate::transport::{Dialer, TransportParts};

/// Version reported in the handshake's client identity.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A dial that has not produced a socket by then counts as failed.
pub const GATEWAY_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct GatewayState {
	status: LinkState,
	session_key: Option<String>,
	/// Present while the socket is open.
	outbound: Option<mpsc::UnboundedSender<String>>,
	generation: u64,
}

struct GatewayInner {
	config: SharedConfig,
	dialer: Arc<dyn Dialer>,
	backoffs: Backoffs,
	events: mpsc::UnboundedSender<LinkEvent>,
	notices: Notifier,
	state: Mutex<GatewayState>,
	chat_seq: AtomicU64,
}

#[derive(Clone)]
pub struct GatewayLink {
	inner: Arc<GatewayInner>,
}

impl GatewayLink {
	pub(crate) fn new(
		config: SharedConfig,
		dialer: Arc<dyn Dialer>,
		backoffs: Backoffs,
		events: mpsc::UnboundedSender<LinkEvent>,
		notices: Notifier,
	) -> Self {
		Self {
			inner: Arc::new(GatewayInner {
				config,
				dialer,
				backoffs,
				events,
				notices,
				state: Mutex::new(GatewayState::default()),
				chat_seq: AtomicU64::new(0),
			}),
		}
	}

	/// Drops any current socket and dials again.
	pub fn connect(&self) {
		self.begin(true);
	}

	/// Dials unless the socket is open or an attempt is already in flight.
	pub fn ensure_connected(&self) {
		self.begin(false);
	}

	fn begin(&self, supersede: bool) {
		if self.inner.backoffs.is_stopped() {
			return;
		}
		let generation = {
			let mut state = self.inner.state.lock();
			let busy = state.outbound.is_some() || state.status == LinkState::Connecting;
			if busy && !supersede {
				debug!(target = "tabbridge.gateway", status = %state.status, "gateway connect already in progress");
				return;
			}
			state.generation += 1;
			state.outbound = None;
			state.session_key = None;
			state.status = LinkState::Connecting;
			state.generation
		};
		self.inner.notices.status(LinkState::Connecting);
		tokio::spawn(self.clone().run(generation));
	}

	pub fn is_open(&self) -> bool {
		self.inner.state.lock().outbound.is_some()
	}

	pub fn status(&self) -> LinkState {
		self.inner.state.lock().status
	}

	pub fn session_key(&self) -> Option<String> {
		self.inner.state.lock().session_key.clone()
	}

	/// Sends a chat message on the main session. Nothing is queued: without
	/// an open socket and a session key the call fails immediately.
	///
	/// Returns the idempotency key of the request.
	pub fn send_chat(&self, text: &str) -> Result<String> {
		let state = self.inner.state.lock();
		let outbound = state.outbound.as_ref().ok_or(Error::NotConnected)?;
		let session_key = state.session_key.clone().ok_or(Error::NoSession)?;

		let idempotency_key = self.next_idempotency_key();
		let request = RequestFrame::chat_send(&ChatSendParams {
			session_key,
			message: text.to_string(),
			idempotency_key: idempotency_key.clone(),
		})?;
		let frame = GatewayFrame::Req(request).encode()?;
		outbound.send(frame).map_err(|_| Error::NotConnected)?;

		debug!(target = "tabbridge.gateway", id = %idempotency_key, "chat message sent");
		Ok(idempotency_key)
	}

	/// Closes the socket for good. Pending reconnects are stopped through the
	/// shared [`Backoffs`].
	pub(crate) fn shutdown(&self) {
		let mut state = self.inner.state.lock();
		state.generation += 1;
		state.outbound = None;
		state.session_key = None;
		state.status = LinkState::Disconnected;
	}

	fn next_idempotency_key(&self) -> String {
		let millis = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|elapsed| elapsed.as_millis())
			.unwrap_or_default();
		let seq = self.inner.chat_seq.fetch_add(1, Ordering::Relaxed);
		format!("msg-{millis}-{seq}")
	}

	fn is_current(&self, generation: u64) -> bool {
		self.inner.state.lock().generation == generation
	}

	async fn run(self, generation: u64) {
		let (url, token) = {
			let config = self.inner.config.read();
			(config.gateway_url.clone(), config.gateway_token.clone())
		};
		info!(target = "tabbridge.gateway", url = %url, "connecting to gateway");

		let TransportParts {
			outbound,
			mut inbound,
		} = match tokio::time::timeout(GATEWAY_DIAL_TIMEOUT, self.inner.dialer.dial(&url)).await {
			Ok(Ok(parts)) => parts,
			Ok(Err(err)) => {
				error!(target = "tabbridge.gateway", error = %err, "gateway connection failed");
				self.disconnected(generation, "error");
				return;
			}
			Err(_) => {
				error!(target = "tabbridge.gateway", url = %url, "gateway dial timed out");
				self.disconnected(generation, "timeout");
				return;
			}
		};

		let handshake = RequestFrame::connect(&ConnectParams::new(ClientInfo::browser_ui(CLIENT_VERSION), &token))
			.and_then(|request| GatewayFrame::Req(request).encode());

		{
			let mut state = self.inner.state.lock();
			if state.generation != generation {
				return;
			}
			state.outbound = Some(outbound.clone());
		}

		info!(target = "tabbridge.gateway", "gateway socket open");
		self.inner.backoffs.reset_all();

		match handshake {
			Ok(frame) => {
				let _ = outbound.send(frame);
			}
			Err(err) => error!(target = "tabbridge.gateway", error = %err, "failed to encode handshake"),
		}
		drop(outbound);
		let _ = self.inner.events.send(LinkEvent::GatewayOpened);

		while let Some(text) = inbound.recv().await {
			if !self.is_current(generation) {
				return;
			}
			self.handle_frame(generation, &text);
		}

		info!(target = "tabbridge.gateway", "gateway socket closed");
		self.disconnected(generation, "close");
	}

	fn handle_frame(&self, generation: u64, text: &str) {
		let frame = match GatewayFrame::decode(text) {
			Ok(frame) => frame,
			Err(err) => {
				warn!(target = "tabbridge.gateway", error = %err, "dropping malformed gateway frame");
				return;
			}
		};

		match frame {
			GatewayFrame::Res(response) if response.is_handshake() => self.on_handshake(generation, &response),
			GatewayFrame::Res(response) => {
				if response.error.is_some() {
					let message = response.error_message().unwrap_or("Unknown error");
					error!(target = "tabbridge.gateway", id = %response.id, message, "gateway error");
					self.inner.notices.error(format!("Error: {message}"));
				}
			}
			GatewayFrame::Event(event) => {
				if let Some(text) = event.chat().and_then(|chat| chat.final_text()) {
					self.inner.notices.send(Notice::IncomingMessage(text));
				}
			}
			GatewayFrame::Req(_) | GatewayFrame::Unknown => {
				debug!(target = "tabbridge.gateway", "ignoring gateway frame");
			}
		}
	}

	fn on_handshake(&self, generation: u64, response: &ResponseFrame) {
		let Some(hello) = response.hello() else {
			let message = response.error_message().unwrap_or("Unknown error");
			error!(target = "tabbridge.gateway", message, "handshake failed");
			self.inner.notices.error(format!("Handshake failed: {message}"));
			return;
		};

		let session_key = hello.main_session_key().map(str::to_string);
		{
			let mut state = self.inner.state.lock();
			if state.generation != generation {
				return;
			}
			state.status = LinkState::Connected;
			state.session_key = session_key.clone();
		}
		info!(target = "tabbridge.gateway", "handshake successful");
		self.inner.notices.status(LinkState::Connected);

		match session_key {
			Some(key) => {
				info!(target = "tabbridge.gateway", session_key = %key, "session key acquired");
				let _ = self.inner.events.send(LinkEvent::SessionReady(key));
			}
			None => {
				warn!(target = "tabbridge.gateway", "no default session key in snapshot");
				self.inner.notices.error("Connected, but no active session found.");
			}
		}
	}

	fn disconnected(&self, generation: u64, reason: &'static str) {
		{
			let mut state = self.inner.state.lock();
			if state.generation != generation {
				return;
			}
			state.outbound = None;
			state.session_key = None;
			state.status = LinkState::Disconnected;
		}
		self.inner.notices.status(LinkState::Disconnected);

		let link = self.clone();
		self.inner
			.backoffs
			.schedule(LinkKind::Gateway, reason, move || async move { link.ensure_connected() });
	}
}
