//! Pushes browser debugger events out to the relay.
//!
//! Forwarding is fire-and-forget: if the relay is down the event is dropped.

use serde_json::Value;
use tabbridge_protocol::ForwardEvent;
use tabbridge_protocol::relay::{TARGET_ATTACHED, TARGET_DETACHED};
use tracing::{debug, info};

use crate::registry::{SessionRegistry, TabAttachment};
use crate::relay::RelayLink;
use crate::surface::TabId;

pub struct EventForwarder<'a> {
	registry: &'a SessionRegistry,
	relay: &'a RelayLink,
}

impl<'a> EventForwarder<'a> {
	pub fn new(registry: &'a SessionRegistry, relay: &'a RelayLink) -> Self {
		Self { registry, relay }
	}

	/// Forwards a debugger event from `tab`, tagged with the child session if
	/// the event came from one, else with the tab's own session. Events for
	/// untracked tabs are dropped.
	pub fn forward(&self, tab: TabId, child_session: Option<&str>, method: &str, params: Option<Value>) -> bool {
		if !self.relay.is_open() {
			return false;
		}
		let Some(attachment) = self.registry.lookup_by_tab(tab) else {
			return false;
		};

		let sub_session = params
			.as_ref()
			.and_then(|p| p.get("sessionId"))
			.and_then(Value::as_str);
		match (method, sub_session) {
			(TARGET_ATTACHED, Some(session)) => self.registry.record_sub_session(session, tab),
			(TARGET_DETACHED, Some(session)) => self.registry.remove_sub_session(session),
			_ => {}
		}

		let session_id = child_session.unwrap_or(&attachment.session_id);
		if method.starts_with("Target.") || method.starts_with("Page.load") {
			debug!(target = "tabbridge.forwarder", method, session_id, "forwarding event");
		}

		self.relay.send(&ForwardEvent::cdp(session_id, method, params).into())
	}

	/// Announces a fresh attachment with a synthetic `Target.attachedToTarget`.
	pub fn announce_attached(&self, attachment: &TabAttachment, target_info: &Value) -> bool {
		self.relay
			.send(&ForwardEvent::attached(&attachment.session_id, target_info).into())
	}

	/// Drops `tab` from the registry and tells the relay its session is gone.
	pub fn announce_detached(&self, tab: TabId, reason: &str) -> Option<TabAttachment> {
		let attachment = self.registry.detach(tab)?;
		info!(
			target = "tabbridge.forwarder",
			tab,
			session_id = %attachment.session_id,
			reason,
			"debugger detached"
		);
		self.relay.send(
			&ForwardEvent::detached(&attachment.session_id, &attachment.target_id, reason).into(),
		);
		Some(attachment)
	}
}
