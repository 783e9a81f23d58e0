//! Notifications for the user-facing host.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
	#[default]
	Disconnected,
	Connecting,
	Connected,
}

impl fmt::Display for LinkState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			LinkState::Disconnected => "disconnected",
			LinkState::Connecting => "connecting",
			LinkState::Connected => "connected",
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabState {
	Connected,
	Restricted,
	Disconnected,
}

/// Automation status of the active tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabStatus {
	pub status: TabState,
	pub title: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
}

impl TabStatus {
	pub fn no_active_tab() -> Self {
		Self {
			status: TabState::Disconnected,
			title: "No active tab".to_string(),
			url: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
	/// Gateway link state changed.
	Status(LinkState),
	/// A complete chat message from the gateway.
	IncomingMessage(String),
	/// A user-visible error.
	Error(String),
	TabStatus(TabStatus),
}

/// Fire-and-forget sender for notices; a closed receiver is ignored.
#[derive(Debug, Clone)]
pub(crate) struct Notifier {
	tx: mpsc::UnboundedSender<Notice>,
}

impl Notifier {
	pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}

	pub(crate) fn send(&self, notice: Notice) {
		let _ = self.tx.send(notice);
	}

	pub(crate) fn status(&self, state: LinkState) {
		self.send(Notice::Status(state));
	}

	pub(crate) fn error(&self, message: impl Into<String>) {
		self.send(Notice::Error(message.into()));
	}
}
