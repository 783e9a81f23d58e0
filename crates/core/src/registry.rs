//! Tab ↔ session bookkeeping.
//!
//! The forward index maps each attached tab to its [`TabAttachment`]. The
//! sub-session index maps session ids of child targets (iframes, workers)
//! to the tab that owns them; those entries are routing hints only.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::surface::{AutomationSurface, SurfaceError, TabHost, TabId};

const SESSION_PREFIX: &str = "cb-tab-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabAttachment {
	pub tab: TabId,
	/// Locally minted, unique per attachment lifetime.
	pub session_id: String,
	pub target_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttachOutcome {
	/// A fresh attachment; `target_info` is the surface's target description.
	Attached {
		attachment: TabAttachment,
		target_info: Value,
	},
	Existing(TabAttachment),
	/// The page cannot be automated.
	Restricted,
	/// Someone else holds the debugger for this tab.
	AlreadyAttached,
}

impl AttachOutcome {
	pub fn into_attachment(self) -> Option<TabAttachment> {
		match self {
			AttachOutcome::Attached { attachment, .. } | AttachOutcome::Existing(attachment) => Some(attachment),
			AttachOutcome::Restricted | AttachOutcome::AlreadyAttached => None,
		}
	}
}

/// Pages the browser will not let a debugger touch.
pub fn is_restricted_url(url: &str) -> bool {
	url.starts_with("chrome://")
		|| url.starts_with("edge://")
		|| (url.starts_with("about:") && url != "about:blank")
		|| url.starts_with("chrome-extension://")
		|| url.starts_with("devtools://")
		|| url.contains("chromewebstore.google.com")
		|| url.contains("chrome.google.com/webstore")
}

#[derive(Debug)]
struct RegistryState {
	attachments: BTreeMap<TabId, TabAttachment>,
	sub_sessions: HashMap<String, TabId>,
	next_session: u64,
	active_tab: Option<TabId>,
	/// Bumped by [`SessionRegistry::clear_all`]; attaches that straddle a
	/// clear are rolled back.
	epoch: u64,
}

impl Default for RegistryState {
	fn default() -> Self {
		Self {
			attachments: BTreeMap::new(),
			sub_sessions: HashMap::new(),
			next_session: 1,
			active_tab: None,
			epoch: 0,
		}
	}
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
	state: Mutex<RegistryState>,
	/// Serializes attach sequences so a tab is never attached twice.
	attach_lock: tokio::sync::Mutex<()>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Attaches to `tab` unless it is already tracked.
	///
	/// Restricted pages and tabs held by another debugger are soft outcomes,
	/// not errors. On a fresh attach `Page.enable` is issued (failure
	/// ignored) and the target info is fetched.
	pub async fn attach(
		&self,
		tab: TabId,
		surface: &dyn AutomationSurface,
		host: &dyn TabHost,
	) -> Result<AttachOutcome> {
		let _guard = self.attach_lock.lock().await;

		let epoch = {
			let state = self.state.lock();
			if let Some(existing) = state.attachments.get(&tab) {
				return Ok(AttachOutcome::Existing(existing.clone()));
			}
			state.epoch
		};

		let url = host.tab(tab).await.map(|info| info.url).unwrap_or_default();
		if is_restricted_url(&url) {
			info!(target = "tabbridge.registry", tab, url = %url, "cannot attach to restricted URL");
			return Ok(AttachOutcome::Restricted);
		}

		let target_info = match attach_sequence(tab, surface).await {
			Ok(info) => info,
			Err(SurfaceError::AlreadyAttached(_)) => {
				warn!(target = "tabbridge.registry", tab, "tab is already attached but not tracked");
				return Ok(AttachOutcome::AlreadyAttached);
			}
			Err(SurfaceError::Restricted) => {
				info!(target = "tabbridge.registry", tab, "cannot attach to restricted URL");
				return Ok(AttachOutcome::Restricted);
			}
			Err(err) => {
				warn!(target = "tabbridge.registry", tab, error = %err, "failed to attach");
				return Err(err.into());
			}
		};

		let target_id = target_info
			.get("targetId")
			.and_then(Value::as_str)
			.unwrap_or_default()
			.trim()
			.to_string();

		let attachment = {
			let mut state = self.state.lock();
			(state.epoch == epoch).then(|| {
				let session_id = format!("{SESSION_PREFIX}{}", state.next_session);
				state.next_session += 1;
				let attachment = TabAttachment {
					tab,
					session_id,
					target_id,
				};
				state.attachments.insert(tab, attachment.clone());
				attachment
			})
		};
		let Some(attachment) = attachment else {
			warn!(target = "tabbridge.registry", tab, "sessions were reset during attach, rolling back");
			if let Err(err) = surface.detach(tab).await {
				debug!(target = "tabbridge.registry", tab, error = %err, "rollback detach failed");
			}
			return Err(Error::AttachCancelled);
		};

		info!(
			target = "tabbridge.registry",
			tab,
			session_id = %attachment.session_id,
			target_id = %attachment.target_id,
			"debugger attached"
		);
		Ok(AttachOutcome::Attached {
			attachment,
			target_info,
		})
	}

	/// Forgets `tab` and every sub-session hint pointing at it.
	pub fn detach(&self, tab: TabId) -> Option<TabAttachment> {
		let mut state = self.state.lock();
		state.sub_sessions.retain(|_, owner| *owner != tab);
		state.attachments.remove(&tab)
	}

	pub fn lookup_by_tab(&self, tab: TabId) -> Option<TabAttachment> {
		self.state.lock().attachments.get(&tab).cloned()
	}

	/// Resolves a session id through the forward index first, then the
	/// sub-session hints.
	pub fn lookup_by_session(&self, session_id: &str) -> Option<TabId> {
		let state = self.state.lock();
		state
			.attachments
			.values()
			.find(|attachment| attachment.session_id == session_id)
			.map(|attachment| attachment.tab)
			.or_else(|| state.sub_sessions.get(session_id).copied())
	}

	pub fn lookup_by_target(&self, target_id: &str) -> Option<TabId> {
		self.state
			.lock()
			.attachments
			.values()
			.find(|attachment| attachment.target_id == target_id)
			.map(|attachment| attachment.tab)
	}

	pub fn record_sub_session(&self, session_id: impl Into<String>, tab: TabId) {
		let session_id = session_id.into();
		debug!(target = "tabbridge.registry", tab, session_id = %session_id, "sub-session recorded");
		self.state.lock().sub_sessions.insert(session_id, tab);
	}

	pub fn remove_sub_session(&self, session_id: &str) {
		self.state.lock().sub_sessions.remove(session_id);
	}

	/// Drops everything and returns the tabs that were attached.
	pub fn clear_all(&self) -> Vec<TabId> {
		let mut state = self.state.lock();
		state.epoch += 1;
		state.sub_sessions.clear();
		std::mem::take(&mut state.attachments).into_keys().collect()
	}

	pub fn set_active_tab(&self, tab: TabId) {
		self.state.lock().active_tab = Some(tab);
	}

	pub fn active_tab(&self) -> Option<TabId> {
		self.state.lock().active_tab
	}

	/// The active tab if attached, else the lowest attached tab id.
	pub fn fallback_tab(&self) -> Option<TabId> {
		let state = self.state.lock();
		state
			.active_tab
			.filter(|tab| state.attachments.contains_key(tab))
			.or_else(|| state.attachments.keys().next().copied())
	}

	/// Resolves the tab for a routed command: session id, then target id,
	/// then [`Self::fallback_tab`].
	pub fn resolve(&self, session_id: Option<&str>, target_id: Option<&str>) -> Option<TabId> {
		session_id
			.and_then(|session| self.lookup_by_session(session))
			.or_else(|| target_id.and_then(|target| self.lookup_by_target(target)))
			.or_else(|| self.fallback_tab())
	}

	pub fn attachments(&self) -> Vec<TabAttachment> {
		self.state.lock().attachments.values().cloned().collect()
	}

	pub fn is_empty(&self) -> bool {
		self.state.lock().attachments.is_empty()
	}

	#[cfg(test)]
	fn insert(&self, tab: TabId, target_id: &str) -> TabAttachment {
		let mut state = self.state.lock();
		let attachment = TabAttachment {
			tab,
			session_id: format!("{SESSION_PREFIX}{}", state.next_session),
			target_id: target_id.to_string(),
		};
		state.next_session += 1;
		state.attachments.insert(tab, attachment.clone());
		attachment
	}
}

async fn attach_sequence(tab: TabId, surface: &dyn AutomationSurface) -> std::result::Result<Value, SurfaceError> {
	surface.attach(tab).await?;
	if let Err(err) = surface.send_command(tab, "Page.enable", None).await {
		debug!(target = "tabbridge.registry", tab, error = %err, "Page.enable failed");
	}
	let info = surface.get_target_info(tab).await?;
	Ok(info.get("targetInfo").cloned().unwrap_or(Value::Null))
}
