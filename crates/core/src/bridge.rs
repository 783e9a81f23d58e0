//! The orchestrator.
//!
//! [`Bridge::start`] spawns one event loop that serializes link events and
//! browser events. Work that awaits the browser (attaching, routing a relay
//! command) runs in its own task so the loop keeps draining events.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::Backoffs;
use crate::config::LinkConfig;
use crate::context::Context;
use crate::error::Result;
use crate::gate::WriteAccessGate;
use crate::gateway::GatewayLink;
use crate::link::LinkEvent;
use crate::notice::{LinkState, Notice, Notifier, TabStatus};
use crate::registry::{SessionRegistry, TabAttachment, is_restricted_url};
use crate::relay::RelayLink;
use crate::router::CommandRouter;
use crate::surface::{AutomationSurface, BrowserEvent, TabHost, TabId};
use crate::transport::Dialer;

/// Delay before re-broadcasting tab status after a tab closes.
const TAB_REMOVED_STATUS_DELAY: Duration = Duration::from_millis(200);

/// Detach reason used when an attached tab navigates to a restricted page.
pub const RESTRICTED_NAVIGATION: &str = "restricted_navigation";

pub struct Bridge {
	ctx: Arc<Context>,
	backoffs: Backoffs,
	link_events: mpsc::UnboundedReceiver<LinkEvent>,
	notices: mpsc::UnboundedReceiver<Notice>,
}

impl Bridge {
	pub fn new(
		config: LinkConfig,
		surface: Arc<dyn AutomationSurface>,
		host: Arc<dyn TabHost>,
		dialer: Arc<dyn Dialer>,
	) -> Self {
		let write_access = config.write_access;
		let config = config.normalized().into_shared();
		let backoffs = Backoffs::new();
		let (events_tx, link_events) = mpsc::unbounded_channel();
		let (notifier, notices) = Notifier::channel();

		let gateway = GatewayLink::new(
			config.clone(),
			dialer.clone(),
			backoffs.clone(),
			events_tx.clone(),
			notifier.clone(),
		);
		let relay = RelayLink::new(config.clone(), dialer, backoffs.clone(), events_tx);

		let ctx = Arc::new(Context {
			config,
			registry: SessionRegistry::new(),
			gate: WriteAccessGate::new(write_access),
			surface,
			host,
			gateway,
			relay,
			notices: notifier,
		});

		Self {
			ctx,
			backoffs,
			link_events,
			notices,
		}
	}

	/// Starts the event loop and connects the gateway, which brings up the
	/// relay once its socket opens. Must be called inside a tokio runtime.
	pub fn start(
		self,
		browser_events: mpsc::UnboundedReceiver<BrowserEvent>,
	) -> (BridgeHandle, mpsc::UnboundedReceiver<Notice>) {
		let Bridge {
			ctx,
			backoffs,
			link_events,
			notices,
		} = self;
		let (stop_tx, stop_rx) = oneshot::channel();

		let event_loop = EventLoop {
			ctx: ctx.clone(),
			backoffs,
		};
		let task = tokio::spawn(event_loop.run(link_events, browser_events, stop_rx));

		info!(target = "tabbridge.bridge", "bridge started");
		ctx.gateway.connect();

		let handle = BridgeHandle {
			ctx,
			stop: Arc::new(Mutex::new(Some((stop_tx, task)))),
		};
		(handle, notices)
	}
}

/// Cheap, cloneable control surface of a running bridge.
#[derive(Clone)]
pub struct BridgeHandle {
	ctx: Arc<Context>,
	stop: Arc<Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>>,
}

impl BridgeHandle {
	/// Ends the event loop, drops both sockets and detaches every tab.
	/// Later calls are no-ops.
	pub async fn stop(&self) {
		let Some((stop_tx, task)) = self.stop.lock().take() else {
			return;
		};
		let _ = stop_tx.send(());
		if let Err(err) = task.await {
			warn!(target = "tabbridge.bridge", error = %err, "event loop ended abnormally");
		}
	}

	/// Sends a chat message; failures are also surfaced as an error notice.
	pub fn send_chat(&self, text: &str) -> Result<String> {
		self.ctx.gateway.send_chat(text).inspect_err(|err| {
			self.ctx.notices.error(err.to_string());
		})
	}

	/// Gateway link state.
	pub fn status(&self) -> LinkState {
		self.ctx.gateway.status()
	}

	pub fn relay_status(&self) -> LinkState {
		self.ctx.relay.state()
	}

	pub fn session_key(&self) -> Option<String> {
		self.ctx.gateway.session_key()
	}

	pub fn attachments(&self) -> Vec<TabAttachment> {
		self.ctx.registry.attachments()
	}

	pub fn config(&self) -> LinkConfig {
		self.ctx.config.read().clone()
	}

	/// Connects the relay and attaches to the active tab.
	pub async fn connect_current_tab(&self) -> Result<Option<TabAttachment>> {
		self.ctx.attach_active_tab().await
	}

	/// Broadcasts the active tab's status as a notice and returns it.
	pub async fn request_tab_status(&self) -> TabStatus {
		let status = self.ctx.tab_status().await;
		self.ctx.notices.send(Notice::TabStatus(status.clone()));
		status
	}

	/// Wake hook for the keepalive scheduler: revives whichever link is down.
	pub fn keepalive(&self) {
		self.ctx.gateway.ensure_connected();
		if !self.ctx.relay.is_open() {
			let relay = self.ctx.relay.clone();
			tokio::spawn(async move {
				if let Err(err) = relay.connect().await {
					debug!(target = "tabbridge.bridge", error = %err, "keepalive relay connect failed");
				}
			});
		}
	}

	/// Swaps the configuration, applies the write-access mode and reconnects
	/// the gateway.
	pub fn reconfigure(&self, config: LinkConfig) {
		let config = config.normalized();
		info!(
			target = "tabbridge.bridge",
			gateway_url = %config.gateway_url,
			relay_port = config.relay_port(),
			write_access = config.write_access,
			"configuration updated"
		);
		self.ctx.gate.set_enabled(config.write_access);
		*self.ctx.config.write() = config;
		self.ctx.gateway.connect();
	}
}

struct EventLoop {
	ctx: Arc<Context>,
	backoffs: Backoffs,
}

impl EventLoop {
	async fn run(
		self,
		mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
		mut browser_events: mpsc::UnboundedReceiver<BrowserEvent>,
		mut stop: oneshot::Receiver<()>,
	) {
		loop {
			tokio::select! {
				_ = &mut stop => break,
				Some(event) = link_events.recv() => self.on_link_event(event),
				Some(event) = browser_events.recv() => self.on_browser_event(event),
			}
		}
		self.shutdown().await;
	}

	async fn shutdown(&self) {
		self.backoffs.shutdown();
		self.ctx.gateway.shutdown();
		self.ctx.relay.shutdown();
		self.ctx.detach_all().await;
		info!(target = "tabbridge.bridge", "bridge stopped");
	}

	fn on_link_event(&self, event: LinkEvent) {
		match event {
			LinkEvent::GatewayOpened => {
				let relay = self.ctx.relay.clone();
				tokio::spawn(async move {
					if let Err(err) = relay.connect().await {
						warn!(target = "tabbridge.bridge", error = %err, "relay auto-connect failed");
					}
				});
			}
			LinkEvent::SessionReady(_) => {
				let ctx = self.ctx.clone();
				tokio::spawn(async move {
					if let Err(err) = ctx.attach_active_tab().await {
						warn!(target = "tabbridge.bridge", error = %err, "failed to attach active tab");
					}
				});
			}
			LinkEvent::Relay(frame) => {
				let ctx = self.ctx.clone();
				tokio::spawn(async move {
					if let Some(response) = CommandRouter::new(&ctx).handle(frame).await {
						if !ctx.relay.send(&response) {
							debug!(target = "tabbridge.bridge", "relay closed before response");
						}
					}
				});
			}
			LinkEvent::RelayDisconnected => {
				let ctx = self.ctx.clone();
				tokio::spawn(async move { ctx.detach_all().await });
			}
		}
	}

	fn on_browser_event(&self, event: BrowserEvent) {
		match event {
			BrowserEvent::Debugger {
				tab,
				child_session,
				method,
				params,
			} => {
				self.ctx
					.forwarder()
					.forward(tab, child_session.as_deref(), &method, params);
			}
			BrowserEvent::Detached { tab, reason } => {
				self.ctx.forwarder().announce_detached(tab, &reason);
			}
			BrowserEvent::TabActivated(tab) => {
				self.ctx.registry.set_active_tab(tab);
				let ctx = self.ctx.clone();
				tokio::spawn(async move {
					attach_if_relay_open(&ctx, tab).await;
					ctx.broadcast_tab_status().await;
				});
			}
			BrowserEvent::TabUpdated { tab, complete, active } => {
				let ctx = self.ctx.clone();
				tokio::spawn(async move {
					drop_if_restricted(&ctx, tab).await;
					if complete && active {
						attach_if_relay_open(&ctx, tab).await;
						ctx.broadcast_tab_status().await;
					}
				});
			}
			BrowserEvent::TabRemoved(tab) => {
				self.ctx.forwarder().announce_detached(tab, "tab_removed");
				let ctx = self.ctx.clone();
				tokio::spawn(async move {
					tokio::time::sleep(TAB_REMOVED_STATUS_DELAY).await;
					ctx.broadcast_tab_status().await;
				});
			}
		}
	}
}

async fn attach_if_relay_open(ctx: &Context, tab: TabId) {
	if !ctx.relay.is_open() {
		return;
	}
	if let Err(err) = ctx.attach_tab(tab).await {
		warn!(target = "tabbridge.bridge", tab, error = %err, "failed to attach tab");
	}
}

/// An attached tab that navigated to a restricted page is detached.
async fn drop_if_restricted(ctx: &Context, tab: TabId) {
	if ctx.registry.lookup_by_tab(tab).is_none() {
		return;
	}
	let Some(info) = ctx.host.tab(tab).await else {
		return;
	};
	if !is_restricted_url(&info.url) {
		return;
	}
	if ctx.forwarder().announce_detached(tab, RESTRICTED_NAVIGATION).is_some() {
		info!(target = "tabbridge.bridge", tab, url = %info.url, "detaching from restricted page");
		if let Err(err) = ctx.surface.detach(tab).await {
			debug!(target = "tabbridge.bridge", tab, error = %err, "detach failed");
		}
	}
}
