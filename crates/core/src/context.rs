use std::sync::Arc;

use tracing::debug;

use crate::config::SharedConfig;
use crate::error::Result;
use crate::forwarder::EventForwarder;
use crate::gate::WriteAccessGate;
use crate::gateway::GatewayLink;
use crate::notice::{Notice, Notifier, TabState, TabStatus};
use crate::registry::{AttachOutcome, SessionRegistry, TabAttachment, is_restricted_url};
use crate::relay::RelayLink;
use crate::surface::{AutomationSurface, TabHost, TabId};

/// Everything the bridge owns, shared by its event loop, routed commands
/// and the handle.
pub(crate) struct Context {
	pub config: SharedConfig,
	pub registry: SessionRegistry,
	pub gate: WriteAccessGate,
	pub surface: Arc<dyn AutomationSurface>,
	pub host: Arc<dyn TabHost>,
	pub gateway: GatewayLink,
	pub relay: RelayLink,
	pub notices: Notifier,
}

impl Context {
	pub fn forwarder(&self) -> EventForwarder<'_> {
		EventForwarder::new(&self.registry, &self.relay)
	}

	/// Attaches to `tab`, announcing fresh attachments to the relay.
	pub async fn attach_tab(&self, tab: TabId) -> Result<Option<TabAttachment>> {
		let outcome = self
			.registry
			.attach(tab, self.surface.as_ref(), self.host.as_ref())
			.await?;
		if let AttachOutcome::Attached {
			attachment,
			target_info,
		} = &outcome
		{
			self.forwarder().announce_attached(attachment, target_info);
		}
		Ok(outcome.into_attachment())
	}

	/// Connects the relay, then attaches to the active tab if there is one.
	pub async fn attach_active_tab(&self) -> Result<Option<TabAttachment>> {
		self.relay.connect().await?;
		match self.host.active_tab().await {
			Some(tab) => self.attach_tab(tab.id).await,
			None => {
				debug!(target = "tabbridge.bridge", "no active tab to attach");
				Ok(None)
			}
		}
	}

	/// Detaches the surface from every tracked tab and empties the registry.
	pub async fn detach_all(&self) {
		for tab in self.registry.clear_all() {
			if let Err(err) = self.surface.detach(tab).await {
				debug!(target = "tabbridge.bridge", tab, error = %err, "detach failed");
			}
		}
	}

	pub async fn tab_status(&self) -> TabStatus {
		let Some(tab) = self.host.active_tab().await else {
			return TabStatus::no_active_tab();
		};
		let status = if self.registry.lookup_by_tab(tab.id).is_some() {
			TabState::Connected
		} else if is_restricted_url(&tab.url) {
			TabState::Restricted
		} else {
			TabState::Disconnected
		};
		TabStatus {
			status,
			title: if tab.title.is_empty() {
				"Unknown Tab".to_string()
			} else {
				tab.title
			},
			url: Some(tab.url),
		}
	}

	pub async fn broadcast_tab_status(&self) {
		let status = self.tab_status().await;
		self.notices.send(Notice::TabStatus(status));
	}
}
