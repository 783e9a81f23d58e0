use tabbridge_protocol::RelayInbound;

/// Happenings on either link that the bridge loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LinkEvent {
	/// The gateway socket opened; the relay should follow.
	GatewayOpened,
	/// The handshake produced a main session key.
	SessionReady(String),
	/// A decoded relay frame needing a response.
	Relay(RelayInbound),
	/// The relay socket closed after having been open.
	RelayDisconnected,
}
