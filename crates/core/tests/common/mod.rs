#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tabbridge::{
	AutomationSurface, Bridge, BridgeHandle, BrowserEvent, Dialer, Error, LinkConfig, Notice,
	SurfaceError, TabHost, TabId, TabInfo, TransportParts,
};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

/// Server end of a connection opened through [`MemoryDialer`].
pub struct ServerConn {
	pub url: String,
	pub to_client: mpsc::UnboundedSender<String>,
	pub from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerConn {
	pub fn is_relay(&self) -> bool {
		self.url.ends_with("/extension")
	}

	pub fn send(&self, value: Value) {
		self.to_client
			.send(value.to_string())
			.expect("client side dropped");
	}

	pub async fn recv(&mut self) -> Value {
		let text = tokio::time::timeout(WAIT, self.from_client.recv())
			.await
			.expect("timed out waiting for a frame")
			.expect("client closed the connection");
		serde_json::from_str(&text).expect("client sent invalid JSON")
	}

	/// Skips events until the response for `id` arrives.
	pub async fn response(&mut self, id: u64) -> Value {
		loop {
			let frame = self.recv().await;
			if frame["id"] == id {
				return frame;
			}
		}
	}

	/// Skips frames until a forwarded event with the given inner method.
	pub async fn event(&mut self, method: &str) -> Value {
		loop {
			let frame = self.recv().await;
			if frame["method"] == "forwardCDPEvent" && frame["params"]["method"] == method {
				return frame;
			}
		}
	}
}

#[derive(Default)]
pub struct MemoryDialer {
	accepted: Mutex<Option<mpsc::UnboundedSender<ServerConn>>>,
	refused: Mutex<HashSet<String>>,
	dialed: Mutex<Vec<String>>,
}

impl MemoryDialer {
	pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerConn>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let dialer = Self {
			accepted: Mutex::new(Some(tx)),
			..Self::default()
		};
		(Arc::new(dialer), rx)
	}

	pub fn refuse(&self, url: &str) {
		self.refused.lock().insert(url.to_string());
	}

	pub fn dialed(&self) -> Vec<String> {
		self.dialed.lock().clone()
	}
}

#[async_trait]
impl Dialer for MemoryDialer {
	async fn dial(&self, url: &str) -> tabbridge::Result<TransportParts> {
		self.dialed.lock().push(url.to_string());
		if self.refused.lock().contains(url) {
			return Err(Error::Dial {
				url: url.to_string(),
				message: "connection refused".into(),
			});
		}

		let (outbound, from_client) = mpsc::unbounded_channel();
		let (to_client, inbound) = mpsc::unbounded_channel();
		if let Some(accepted) = self.accepted.lock().as_ref() {
			let _ = accepted.send(ServerConn {
				url: url.to_string(),
				to_client,
				from_client,
			});
		}
		Ok(TransportParts { outbound, inbound })
	}
}

/// A call observed by [`FakeBrowser`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
	Attach(TabId),
	Detach(TabId),
	Command { tab: TabId, method: String, params: Option<Value> },
	CreateTab { url: String, active: bool },
	CloseTab(TabId),
	ActivateTab(TabId),
	FocusWindow(TabId),
}

#[derive(Default)]
struct BrowserState {
	tabs: BTreeMap<TabId, TabInfo>,
	active: Option<TabId>,
	attached: HashSet<TabId>,
	/// Tabs another debugger already holds.
	foreign: HashSet<TabId>,
	calls: Vec<Call>,
	next_tab: TabId,
	attach_delay: Option<Duration>,
}

/// Records every call and answers like a well-behaved browser.
#[derive(Default)]
pub struct FakeBrowser {
	state: Mutex<BrowserState>,
}

impl FakeBrowser {
	pub fn new() -> Arc<Self> {
		let browser = Self::default();
		browser.state.lock().next_tab = 100;
		Arc::new(browser)
	}

	pub fn add_tab(&self, id: TabId, url: &str, title: &str) {
		self.state.lock().tabs.insert(
			id,
			TabInfo {
				id,
				url: url.to_string(),
				title: title.to_string(),
			},
		);
	}

	pub fn set_active(&self, id: TabId) {
		self.state.lock().active = Some(id);
	}

	pub fn navigate(&self, id: TabId, url: &str) {
		if let Some(tab) = self.state.lock().tabs.get_mut(&id) {
			tab.url = url.to_string();
		}
	}

	/// Makes every attach take `delay` before it completes.
	pub fn slow_attach(&self, delay: Duration) {
		self.state.lock().attach_delay = Some(delay);
	}

	pub fn hold_externally(&self, id: TabId) {
		self.state.lock().foreign.insert(id);
	}

	pub fn calls(&self) -> Vec<Call> {
		self.state.lock().calls.clone()
	}

	pub fn commands(&self, method: &str) -> Vec<(TabId, Option<Value>)> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::Command { tab, method: m, params } if m == method => Some((tab, params)),
				_ => None,
			})
			.collect()
	}

	pub fn count(&self, wanted: &Call) -> usize {
		self.calls().iter().filter(|call| *call == wanted).count()
	}

	pub fn is_attached(&self, id: TabId) -> bool {
		self.state.lock().attached.contains(&id)
	}
}

#[async_trait]
impl AutomationSurface for FakeBrowser {
	async fn attach(&self, tab: TabId) -> Result<(), SurfaceError> {
		let delay = {
			let mut state = self.state.lock();
			state.calls.push(Call::Attach(tab));
			state.attach_delay
		};
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let mut state = self.state.lock();
		if state.foreign.contains(&tab) || state.attached.contains(&tab) {
			return Err(SurfaceError::AlreadyAttached(tab));
		}
		if !state.tabs.contains_key(&tab) {
			return Err(SurfaceError::TabNotFound(tab));
		}
		state.attached.insert(tab);
		Ok(())
	}

	async fn detach(&self, tab: TabId) -> Result<(), SurfaceError> {
		let mut state = self.state.lock();
		state.calls.push(Call::Detach(tab));
		if state.attached.remove(&tab) {
			Ok(())
		} else {
			Err(SurfaceError::Other("Debugger is not attached".into()))
		}
	}

	async fn send_command(&self, tab: TabId, method: &str, params: Option<Value>) -> Result<Value, SurfaceError> {
		let mut state = self.state.lock();
		state.calls.push(Call::Command {
			tab,
			method: method.to_string(),
			params,
		});
		if !state.attached.contains(&tab) {
			return Err(SurfaceError::Command("Debugger is not attached".into()));
		}
		let url = state.tabs.get(&tab).map(|t| t.url.clone()).unwrap_or_default();
		Ok(match method {
			"Target.getTargetInfo" => json!({
				"targetInfo": {"targetId": format!("T{tab}"), "type": "page", "url": url}
			}),
			_ => json!({ "tab": tab, "method": method }),
		})
	}
}

#[async_trait]
impl TabHost for FakeBrowser {
	async fn tab(&self, tab: TabId) -> Option<TabInfo> {
		self.state.lock().tabs.get(&tab).cloned()
	}

	async fn active_tab(&self) -> Option<TabInfo> {
		let state = self.state.lock();
		state.active.and_then(|id| state.tabs.get(&id).cloned())
	}

	async fn create_tab(&self, url: &str, active: bool) -> Result<Option<TabId>, SurfaceError> {
		let mut state = self.state.lock();
		state.calls.push(Call::CreateTab {
			url: url.to_string(),
			active,
		});
		let id = state.next_tab;
		state.next_tab += 1;
		state.tabs.insert(
			id,
			TabInfo {
				id,
				url: url.to_string(),
				title: String::new(),
			},
		);
		Ok(Some(id))
	}

	async fn close_tab(&self, tab: TabId) -> Result<(), SurfaceError> {
		let mut state = self.state.lock();
		state.calls.push(Call::CloseTab(tab));
		state
			.tabs
			.remove(&tab)
			.map(|_| ())
			.ok_or(SurfaceError::TabNotFound(tab))
	}

	async fn activate_tab(&self, tab: TabId) -> Result<(), SurfaceError> {
		let mut state = self.state.lock();
		state.calls.push(Call::ActivateTab(tab));
		state.active = Some(tab);
		Ok(())
	}

	async fn focus_window(&self, tab: TabId) -> Result<(), SurfaceError> {
		self.state.lock().calls.push(Call::FocusWindow(tab));
		Ok(())
	}
}

/// A started bridge wired to fakes.
pub struct Harness {
	pub handle: BridgeHandle,
	pub notices: mpsc::UnboundedReceiver<Notice>,
	pub browser: Arc<FakeBrowser>,
	pub dialer: Arc<MemoryDialer>,
	pub events: mpsc::UnboundedSender<BrowserEvent>,
	conns: mpsc::UnboundedReceiver<ServerConn>,
	parked: Vec<ServerConn>,
}

impl Harness {
	/// Starts a bridge over a browser with tab 1 (https://example.com) active.
	pub fn start(config: LinkConfig) -> Self {
		let browser = FakeBrowser::new();
		browser.add_tab(1, "https://example.com/", "Example");
		browser.set_active(1);
		Self::start_with(config, browser)
	}

	pub fn start_with(config: LinkConfig, browser: Arc<FakeBrowser>) -> Self {
		let (dialer, conns) = MemoryDialer::new();
		let (events, browser_events) = mpsc::unbounded_channel();
		let bridge = Bridge::new(config, browser.clone(), browser.clone(), dialer.clone());
		let (handle, notices) = bridge.start(browser_events);
		Self {
			handle,
			notices,
			browser,
			dialer,
			events,
			conns,
			parked: Vec::new(),
		}
	}

	async fn accept_where(&mut self, relay: bool) -> ServerConn {
		if let Some(pos) = self.parked.iter().position(|conn| conn.is_relay() == relay) {
			return self.parked.remove(pos);
		}
		loop {
			let conn = tokio::time::timeout(WAIT, self.conns.recv())
				.await
				.expect("timed out waiting for a dial")
				.expect("dialer dropped");
			if conn.is_relay() == relay {
				return conn;
			}
			self.parked.push(conn);
		}
	}

	pub async fn accept_gateway(&mut self) -> ServerConn {
		self.accept_where(false).await
	}

	pub async fn accept_relay(&mut self) -> ServerConn {
		self.accept_where(true).await
	}

	/// Completes the handshake with `session_key` and waits for the resulting
	/// attachment of the active tab to be announced on the relay.
	pub async fn connect(&mut self, session_key: &str) -> (ServerConn, ServerConn) {
		let mut gateway = self.accept_gateway().await;
		let handshake = gateway.recv().await;
		assert_eq!(handshake["id"], "connect-1");

		let mut relay = self.accept_relay().await;
		gateway.send(json!({
			"type": "res",
			"id": "connect-1",
			"ok": true,
			"payload": {"type": "hello-ok", "snapshot": {"sessionDefaults": {"mainSessionKey": session_key}}}
		}));
		relay.event("Target.attachedToTarget").await;
		(gateway, relay)
	}

	pub async fn notice(&mut self) -> Notice {
		tokio::time::timeout(WAIT, self.notices.recv())
			.await
			.expect("timed out waiting for a notice")
			.expect("bridge dropped its notifier")
	}

	/// Waits for the first notice matching `pred`.
	pub async fn notice_where(&mut self, pred: impl Fn(&Notice) -> bool) -> Notice {
		loop {
			let notice = self.notice().await;
			if pred(&notice) {
				return notice;
			}
		}
	}

	pub fn emit(&self, event: BrowserEvent) {
		self.events.send(event).expect("bridge stopped");
	}
}

/// Polls `cond` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
	let deadline = tokio::time::Instant::now() + WAIT;
	while !cond() {
		assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}

pub fn forward_command(id: u64, method: &str, params: Value) -> Value {
	json!({
		"id": id,
		"method": "forwardCDPCommand",
		"params": {"method": method, "params": params}
	})
}
