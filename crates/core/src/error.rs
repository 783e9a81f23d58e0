//! Error types for the bridge core.

use thiserror::Error;

use crate::surface::SurfaceError;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the bridge.
///
/// Display strings of the policy, routing and chat variants are relayed
/// verbatim to peers and users.
#[derive(Debug, Error)]
pub enum Error {
	/// A write-sensitive command arrived while write access is off.
	#[error("Write actions are disabled (read-only mode). Enable write access in Settings.")]
	WriteAccessDisabled,

	/// No tracked tab could be resolved for a routed command.
	#[error("No attached tab for method {0}")]
	NoAttachedTab(String),

	/// A bare passthrough command arrived with no tracked tab.
	#[error("No target tab attached")]
	NoTargetTab,

	#[error("Not connected.")]
	NotConnected,

	#[error("No active session. Please reconnect.")]
	NoSession,

	#[error("Relay connect timeout")]
	ConnectTimeout,

	/// The transport could not open a socket.
	#[error("Failed to connect to {url}: {message}")]
	Dial { url: String, message: String },

	/// A (possibly shared) relay connect attempt failed.
	#[error("{0}")]
	RelayConnect(String),

	/// The registry was cleared (relay loss or stop) while the attach was in
	/// flight; the debugger was detached again.
	#[error("Attach cancelled: sessions were reset")]
	AttachCancelled,

	#[error("Failed to create tab")]
	CreateTab,

	/// The bridge was stopped while the operation was pending.
	#[error("Bridge stopped")]
	Stopped,

	#[error(transparent)]
	Surface(#[from] SurfaceError),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
