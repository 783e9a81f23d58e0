//! Collaborator interfaces for the browser.
//!
//! [`AutomationSurface`] exposes per-tab debugger primitives, [`TabHost`]
//! the tab/window chrome around them. Both report asynchronous happenings
//! as [`BrowserEvent`]s on the channel handed to [`crate::Bridge::start`].

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub type TabId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
	pub id: TabId,
	pub url: String,
	pub title: String,
}

/// Classified failures reported by the browser collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
	/// Another debugger client already owns the tab.
	#[error("Another debugger is already attached to the tab with id: {0}.")]
	AlreadyAttached(TabId),

	/// The browser refuses to debug this page.
	#[error("Cannot access a chrome:// URL")]
	Restricted,

	#[error("No tab with id: {0}.")]
	TabNotFound(TabId),

	/// The debugger rejected a command.
	#[error("{0}")]
	Command(String),

	#[error("{0}")]
	Other(String),
}

impl SurfaceError {
	/// Classifies a raw debugger error message for `tab`.
	pub fn classify(tab: TabId, message: impl Into<String>) -> Self {
		let message = message.into();
		if message.contains("Already attached") || message.contains("already attached") {
			SurfaceError::AlreadyAttached(tab)
		} else if message.contains("Cannot access a chrome:// URL") {
			SurfaceError::Restricted
		} else if message.contains("No tab with id") || message.contains("No target with given id") {
			SurfaceError::TabNotFound(tab)
		} else {
			SurfaceError::Command(message)
		}
	}
}

/// Per-tab debugger primitives.
#[async_trait]
pub trait AutomationSurface: Send + Sync + 'static {
	async fn attach(&self, tab: TabId) -> Result<(), SurfaceError>;

	async fn detach(&self, tab: TabId) -> Result<(), SurfaceError>;

	async fn send_command(
		&self,
		tab: TabId,
		method: &str,
		params: Option<Value>,
	) -> Result<Value, SurfaceError>;

	/// Returns `{targetInfo: {...}}` for the tab's own target.
	async fn get_target_info(&self, tab: TabId) -> Result<Value, SurfaceError> {
		self.send_command(tab, "Target.getTargetInfo", None).await
	}
}

/// Tab and window operations of the hosting browser.
#[async_trait]
pub trait TabHost: Send + Sync + 'static {
	async fn tab(&self, tab: TabId) -> Option<TabInfo>;

	/// The active tab of the last focused window.
	async fn active_tab(&self) -> Option<TabInfo>;

	/// Opens a tab. `Ok(None)` means the browser created nothing addressable.
	async fn create_tab(&self, url: &str, active: bool) -> Result<Option<TabId>, SurfaceError>;

	async fn close_tab(&self, tab: TabId) -> Result<(), SurfaceError>;

	async fn activate_tab(&self, tab: TabId) -> Result<(), SurfaceError>;

	async fn focus_window(&self, _tab: TabId) -> Result<(), SurfaceError> {
		Ok(())
	}
}

/// Something that happened in the browser.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserEvent {
	/// A debugger event from an attached tab. `child_session` is set when the
	/// event came from a child target (e.g. an out-of-process iframe).
	Debugger {
		tab: TabId,
		child_session: Option<String>,
		method: String,
		params: Option<Value>,
	},
	/// The debugger was detached from a tab by the browser or the user.
	Detached { tab: TabId, reason: String },
	TabActivated(TabId),
	TabUpdated {
		tab: TabId,
		complete: bool,
		active: bool,
	},
	TabRemoved(TabId),
}
