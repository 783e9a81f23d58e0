//! A Chromium remote-debugging endpoint as the bridge's browser.
//!
//! Page targets are exposed as tabs with small integer ids. Attaching opens a
//! flattened session (`Target.attachToTarget`), so commands and events of
//! every attached tab share the one browser socket, tagged by session id.
//!
//! CDP has no browser-level notion of the focused tab: the active tab is the
//! last one activated or created in the foreground through this host, falling
//! back to the first known page.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tabbridge::{AutomationSurface, BrowserEvent, Dialer, SurfaceError, TabHost, TabId, TabInfo};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(1);

const CONNECTION_CLOSED: &str = "DevTools connection closed";

/// Reason reported when the browser ends a tab's session on its own.
const TARGET_CLOSED: &str = "target_closed";

/// `/json/version` subset.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
	#[serde(rename = "webSocketDebuggerUrl")]
	pub web_socket_debugger_url: String,
	#[serde(rename = "Browser", default)]
	pub browser: Option<String>,
}

/// Resolves the browser WebSocket from `/json/version` on `port`.
pub async fn discover(port: u16) -> Result<VersionInfo> {
	let client = reqwest::Client::builder()
		.timeout(DISCOVERY_TIMEOUT)
		.build()
		.context("Failed to create HTTP client")?;
	let mut last_error = "no response".to_string();

	for url in [
		format!("http://127.0.0.1:{port}/json/version"),
		format!("http://localhost:{port}/json/version"),
		format!("http://[::1]:{port}/json/version"),
	] {
		let response = match client.get(&url).send().await {
			Ok(response) => response,
			Err(err) => {
				last_error = err.to_string();
				continue;
			}
		};
		if !response.status().is_success() {
			last_error = format!("unexpected status {}", response.status());
			continue;
		}
		return response
			.json::<VersionInfo>()
			.await
			.with_context(|| format!("Failed to parse DevTools version from {url}"));
	}

	Err(anyhow!(
		"No DevTools endpoint on port {port}: {last_error} (start the browser with --remote-debugging-port={port})"
	))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
	target_id: String,
	#[serde(rename = "type")]
	kind: String,
	#[serde(default)]
	title: String,
	#[serde(default)]
	url: String,
}

impl TargetInfo {
	fn from_params(params: &Value) -> Option<Self> {
		serde_json::from_value(params.get("targetInfo")?.clone()).ok()
	}

	fn is_page(&self) -> bool {
		self.kind == "page"
	}
}

#[derive(Debug, Clone)]
struct Page {
	target_id: String,
	url: String,
	title: String,
}

/// Tab ids, their targets and their debugger sessions.
#[derive(Debug, Default)]
struct Tabs {
	pages: BTreeMap<TabId, Page>,
	by_target: HashMap<String, TabId>,
	sessions: HashMap<TabId, String>,
	session_tabs: HashMap<String, TabId>,
	/// Sessions of child targets auto-attached under a tab's session.
	child_sessions: HashMap<String, TabId>,
	last_tab: TabId,
	active: Option<TabId>,
}

impl Tabs {
	/// Registers or refreshes a page; the flag is true for new pages.
	fn upsert(&mut self, target_id: &str, url: &str, title: &str) -> (TabId, bool) {
		if let Some(&tab) = self.by_target.get(target_id) {
			if let Some(page) = self.pages.get_mut(&tab) {
				page.url = url.to_string();
				page.title = title.to_string();
			}
			return (tab, false);
		}
		self.last_tab += 1;
		let tab = self.last_tab;
		self.by_target.insert(target_id.to_string(), tab);
		self.pages.insert(
			tab,
			Page {
				target_id: target_id.to_string(),
				url: url.to_string(),
				title: title.to_string(),
			},
		);
		(tab, true)
	}

	fn remove(&mut self, target_id: &str) -> Option<TabId> {
		let tab = self.by_target.remove(target_id)?;
		self.pages.remove(&tab);
		self.forget_session(tab);
		if self.active == Some(tab) {
			self.active = None;
		}
		Some(tab)
	}

	fn forget_session(&mut self, tab: TabId) -> Option<String> {
		self.child_sessions.retain(|_, owner| *owner != tab);
		let session = self.sessions.remove(&tab)?;
		self.session_tabs.remove(&session);
		Some(session)
	}

	fn target_id(&self, tab: TabId) -> Option<String> {
		self.pages.get(&tab).map(|page| page.target_id.clone())
	}

	/// The tab a session belongs to, and the child session if it is not the
	/// tab's own.
	fn route(&self, session: &str) -> Option<(TabId, Option<String>)> {
		if let Some(&tab) = self.session_tabs.get(session) {
			return Some((tab, None));
		}
		self.child_sessions
			.get(session)
			.map(|&tab| (tab, Some(session.to_string())))
	}

	fn info(&self, tab: TabId) -> Option<TabInfo> {
		self.pages.get(&tab).map(|page| TabInfo {
			id: tab,
			url: page.url.clone(),
			title: page.title.clone(),
		})
	}
}

type CallResult = std::result::Result<Value, String>;

struct Inner {
	outbound: mpsc::UnboundedSender<String>,
	last_id: AtomicU64,
	callbacks: Mutex<HashMap<u64, oneshot::Sender<CallResult>>>,
	tabs: Mutex<Tabs>,
	events: mpsc::UnboundedSender<BrowserEvent>,
}

/// Browser connection implementing both [`AutomationSurface`] and [`TabHost`].
#[derive(Clone)]
pub struct DevtoolsBrowser {
	inner: Arc<Inner>,
}

impl DevtoolsBrowser {
	/// Opens the browser socket, enables target discovery and registers the
	/// open pages. Returns the browser and its event stream for the bridge.
	pub async fn connect(
		dialer: &dyn Dialer,
		ws_url: &str,
	) -> Result<(Self, mpsc::UnboundedReceiver<BrowserEvent>)> {
		let parts = dialer
			.dial(ws_url)
			.await
			.with_context(|| format!("Failed to open DevTools socket {ws_url}"))?;
		let (events, events_rx) = mpsc::unbounded_channel();

		let inner = Arc::new(Inner {
			outbound: parts.outbound,
			last_id: AtomicU64::new(0),
			callbacks: Mutex::new(HashMap::new()),
			tabs: Mutex::new(Tabs::default()),
			events,
		});
		tokio::spawn(read_loop(Arc::downgrade(&inner), parts.inbound));

		let browser = Self { inner };
		browser
			.call("Target.setDiscoverTargets", Some(json!({ "discover": true })), None)
			.await
			.map_err(|msg| anyhow!("Target.setDiscoverTargets failed: {msg}"))?;
		let targets = browser
			.call("Target.getTargets", None, None)
			.await
			.map_err(|msg| anyhow!("Target.getTargets failed: {msg}"))?;

		let infos: Vec<TargetInfo> = targets
			.get("targetInfos")
			.cloned()
			.map(serde_json::from_value::<Vec<TargetInfo>>)
			.transpose()
			.context("Malformed Target.getTargets result")?
			.unwrap_or_default();
		{
			let mut tabs = browser.inner.tabs.lock();
			for info in infos.iter().filter(|info| info.is_page()) {
				let (tab, _) = tabs.upsert(&info.target_id, &info.url, &info.title);
				tabs.active.get_or_insert(tab);
			}
			info!(target = "tabbridge.devtools", pages = tabs.pages.len(), "connected to browser");
		}

		Ok((browser, events_rx))
	}

	async fn call(&self, method: &str, params: Option<Value>, session: Option<&str>) -> CallResult {
		let id = self.inner.last_id.fetch_add(1, Ordering::Relaxed) + 1;
		let mut frame = json!({ "id": id, "method": method });
		if let Some(params) = params {
			frame["params"] = params;
		}
		if let Some(session) = session {
			frame["sessionId"] = json!(session);
		}

		let (tx, rx) = oneshot::channel();
		self.inner.callbacks.lock().insert(id, tx);
		if self.inner.outbound.send(frame.to_string()).is_err() {
			self.inner.callbacks.lock().remove(&id);
			return Err(CONNECTION_CLOSED.to_string());
		}
		rx.await.unwrap_or_else(|_| Err(CONNECTION_CLOSED.to_string()))
	}

	fn target_of(&self, tab: TabId) -> std::result::Result<String, SurfaceError> {
		self.inner.tabs.lock().target_id(tab).ok_or(SurfaceError::TabNotFound(tab))
	}

	fn session_of(&self, tab: TabId) -> std::result::Result<String, SurfaceError> {
		self.inner
			.tabs
			.lock()
			.sessions
			.get(&tab)
			.cloned()
			.ok_or_else(|| not_attached(tab))
	}
}

fn not_attached(tab: TabId) -> SurfaceError {
	SurfaceError::Other(format!("Debugger is not attached to the tab with id: {tab}."))
}

#[async_trait]
impl AutomationSurface for DevtoolsBrowser {
	async fn attach(&self, tab: TabId) -> std::result::Result<(), SurfaceError> {
		if self.inner.tabs.lock().sessions.contains_key(&tab) {
			return Ok(());
		}
		let target_id = self.target_of(tab)?;
		let result = self
			.call(
				"Target.attachToTarget",
				Some(json!({ "targetId": target_id, "flatten": true })),
				None,
			)
			.await
			.map_err(|msg| SurfaceError::classify(tab, msg))?;
		let session = result
			.get("sessionId")
			.and_then(Value::as_str)
			.ok_or_else(|| SurfaceError::Other("Target.attachToTarget returned no sessionId".into()))?;

		let mut tabs = self.inner.tabs.lock();
		tabs.sessions.insert(tab, session.to_string());
		tabs.session_tabs.insert(session.to_string(), tab);
		debug!(target = "tabbridge.devtools", tab, session, "debugger attached");
		Ok(())
	}

	async fn detach(&self, tab: TabId) -> std::result::Result<(), SurfaceError> {
		let session = self.inner.tabs.lock().forget_session(tab).ok_or_else(|| not_attached(tab))?;
		self.call("Target.detachFromTarget", Some(json!({ "sessionId": session })), None)
			.await
			.map(|_| ())
			.map_err(|msg| SurfaceError::classify(tab, msg))
	}

	async fn send_command(
		&self,
		tab: TabId,
		method: &str,
		params: Option<Value>,
	) -> std::result::Result<Value, SurfaceError> {
		let session = self.session_of(tab)?;
		self.call(method, params, Some(&session))
			.await
			.map_err(|msg| SurfaceError::classify(tab, msg))
	}
}

#[async_trait]
impl TabHost for DevtoolsBrowser {
	async fn tab(&self, tab: TabId) -> Option<TabInfo> {
		self.inner.tabs.lock().info(tab)
	}

	async fn active_tab(&self) -> Option<TabInfo> {
		let tabs = self.inner.tabs.lock();
		let tab = tabs
			.active
			.filter(|tab| tabs.pages.contains_key(tab))
			.or_else(|| tabs.pages.keys().next().copied())?;
		tabs.info(tab)
	}

	async fn create_tab(&self, url: &str, active: bool) -> std::result::Result<Option<TabId>, SurfaceError> {
		let result = self
			.call(
				"Target.createTarget",
				Some(json!({ "url": url, "background": !active })),
				None,
			)
			.await
			.map_err(SurfaceError::Other)?;
		let Some(target_id) = result.get("targetId").and_then(Value::as_str) else {
			return Ok(None);
		};

		let mut tabs = self.inner.tabs.lock();
		let tab = match tabs.by_target.get(target_id) {
			Some(&tab) => tab,
			None => tabs.upsert(target_id, url, "").0,
		};
		if active {
			tabs.active = Some(tab);
		}
		Ok(Some(tab))
	}

	async fn close_tab(&self, tab: TabId) -> std::result::Result<(), SurfaceError> {
		let target_id = self.target_of(tab)?;
		let result = self
			.call("Target.closeTarget", Some(json!({ "targetId": target_id })), None)
			.await
			.map_err(|msg| SurfaceError::classify(tab, msg))?;
		match result.get("success").and_then(Value::as_bool) {
			Some(false) => Err(SurfaceError::Other(format!("Browser refused to close tab {tab}"))),
			_ => Ok(()),
		}
	}

	async fn activate_tab(&self, tab: TabId) -> std::result::Result<(), SurfaceError> {
		let target_id = self.target_of(tab)?;
		self.call("Target.activateTarget", Some(json!({ "targetId": target_id })), None)
			.await
			.map_err(|msg| SurfaceError::classify(tab, msg))?;
		self.inner.tabs.lock().active = Some(tab);
		self.inner.emit(BrowserEvent::TabActivated(tab));
		Ok(())
	}
}

impl Inner {
	fn emit(&self, event: BrowserEvent) {
		if self.events.send(event).is_err() {
			debug!(target = "tabbridge.devtools", "browser event dropped, bridge gone");
		}
	}

	fn dispatch(&self, frame: Value) {
		if let Some(id) = frame.get("id").and_then(Value::as_u64) {
			let Some(callback) = self.callbacks.lock().remove(&id) else {
				debug!(target = "tabbridge.devtools", id, "response for unknown request");
				return;
			};
			let result = match frame.get("error") {
				Some(error) => Err(error
					.get("message")
					.and_then(Value::as_str)
					.unwrap_or("Unknown error")
					.to_string()),
				None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
			};
			let _ = callback.send(result);
			return;
		}

		let Some(method) = frame.get("method").and_then(Value::as_str) else {
			return;
		};
		let params = frame.get("params").cloned();
		match frame.get("sessionId").and_then(Value::as_str) {
			Some(session) => self.on_session_event(session, method, params),
			None => self.on_target_event(method, params.unwrap_or(Value::Null)),
		}
	}

	fn on_session_event(&self, session: &str, method: &str, params: Option<Value>) {
		let routed = {
			let mut tabs = self.tabs.lock();
			let routed = tabs.route(session);
			let child = params
				.as_ref()
				.and_then(|params| params.get("sessionId"))
				.and_then(Value::as_str);
			if let (Some((tab, _)), Some(child)) = (&routed, child) {
				match method {
					"Target.attachedToTarget" => {
						tabs.child_sessions.insert(child.to_string(), *tab);
					}
					"Target.detachedFromTarget" => {
						tabs.child_sessions.remove(child);
					}
					_ => {}
				}
			}
			routed
		};

		let Some((tab, child_session)) = routed else {
			debug!(target = "tabbridge.devtools", session, method, "event for unknown session");
			return;
		};
		self.emit(BrowserEvent::Debugger {
			tab,
			child_session,
			method: method.to_string(),
			params,
		});
	}

	fn on_target_event(&self, method: &str, params: Value) {
		match method {
			"Target.targetCreated" => {
				if let Some(info) = TargetInfo::from_params(&params).filter(TargetInfo::is_page) {
					let (tab, _) = self.tabs.lock().upsert(&info.target_id, &info.url, &info.title);
					debug!(target = "tabbridge.devtools", tab, url = %info.url, "page created");
				}
			}
			"Target.targetInfoChanged" => {
				let Some(info) = TargetInfo::from_params(&params).filter(TargetInfo::is_page) else {
					return;
				};
				let (tab, active) = {
					let mut tabs = self.tabs.lock();
					let (tab, _) = tabs.upsert(&info.target_id, &info.url, &info.title);
					(tab, tabs.active == Some(tab))
				};
				self.emit(BrowserEvent::TabUpdated {
					tab,
					complete: true,
					active,
				});
			}
			"Target.targetDestroyed" => {
				let Some(target_id) = params.get("targetId").and_then(Value::as_str) else {
					return;
				};
				if let Some(tab) = self.tabs.lock().remove(target_id) {
					self.emit(BrowserEvent::TabRemoved(tab));
				}
			}
			"Target.detachedFromTarget" => {
				let Some(session) = params.get("sessionId").and_then(Value::as_str) else {
					return;
				};
				let tab = {
					let mut tabs = self.tabs.lock();
					let tab = tabs.session_tabs.get(session).copied();
					if let Some(tab) = tab {
						tabs.forget_session(tab);
					}
					tab
				};
				if let Some(tab) = tab {
					info!(target = "tabbridge.devtools", tab, "browser ended debugger session");
					self.emit(BrowserEvent::Detached {
						tab,
						reason: TARGET_CLOSED.to_string(),
					});
				}
			}
			_ => {}
		}
	}
}

async fn read_loop(inner: Weak<Inner>, mut inbound: mpsc::UnboundedReceiver<String>) {
	while let Some(text) = inbound.recv().await {
		let Some(inner) = inner.upgrade() else {
			return;
		};
		match serde_json::from_str::<Value>(&text) {
			Ok(frame) => inner.dispatch(frame),
			Err(err) => warn!(target = "tabbridge.devtools", error = %err, "malformed DevTools frame"),
		}
	}
	if let Some(inner) = inner.upgrade() {
		inner.callbacks.lock().clear();
	}
	warn!(target = "tabbridge.devtools", "browser connection closed");
}
