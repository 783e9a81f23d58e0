//! Routes inbound relay commands to a tab.
//!
//! Every command passes the write-access gate first. The target tab is
//! resolved by session id, then `params.targetId`, then the active or first
//! attached tab. A few `Target.*` methods are served by the tab host instead
//! of the debugger.

use std::time::Duration;

use serde_json::{Value, json};
use tabbridge_protocol::{CommandResponse, ForwardCommand, RelayInbound, RelayOutbound, RequestId};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::surface::{AutomationSurface, TabId};

/// Time a new tab gets to register before it is attached.
const TAB_REGISTER_DELAY: Duration = Duration::from_millis(100);

const BLANK_URL: &str = "about:blank";

/// Extra surface calls issued before dispatching a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensatingStep {
	/// Re-enabling a domain that is already enabled leaves stale state in the
	/// debugger, so the domain is disabled and allowed to settle first.
	DisableBeforeEnable {
		disable: &'static str,
		settle: Duration,
	},
}

impl CompensatingStep {
	pub fn for_method(method: &str) -> Option<Self> {
		match method {
			"Runtime.enable" => Some(CompensatingStep::DisableBeforeEnable {
				disable: "Runtime.disable",
				settle: Duration::from_millis(50),
			}),
			_ => None,
		}
	}

	/// Failures are swallowed; the real command still runs.
	pub async fn run(self, surface: &dyn AutomationSurface, tab: TabId) {
		match self {
			CompensatingStep::DisableBeforeEnable { disable, settle } => {
				match surface.send_command(tab, disable, None).await {
					Ok(_) => tokio::time::sleep(settle).await,
					Err(err) => debug!(target = "tabbridge.router", tab, method = disable, error = %err, "compensating step failed"),
				}
			}
		}
	}
}

/// `Target.*` methods served by the tab host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetMethod {
	Create,
	Close,
	Activate,
}

impl TargetMethod {
	fn parse(method: &str) -> Option<Self> {
		match method {
			"Target.createTarget" => Some(TargetMethod::Create),
			"Target.closeTarget" => Some(TargetMethod::Close),
			"Target.activateTarget" => Some(TargetMethod::Activate),
			_ => None,
		}
	}
}

pub struct CommandRouter<'a> {
	ctx: &'a Context,
}

impl<'a> CommandRouter<'a> {
	pub(crate) fn new(ctx: &'a Context) -> Self {
		Self { ctx }
	}

	/// Produces the response for a relay frame, if it needs one.
	pub async fn handle(&self, frame: RelayInbound) -> Option<RelayOutbound> {
		let response = match frame {
			RelayInbound::ForwardCommand { id, command } => respond(id, self.route(&command).await),
			RelayInbound::Attach { id } => respond(
				id,
				self.ctx
					.attach_active_tab()
					.await
					.map(|_| json!({ "attached": true })),
			),
			RelayInbound::Passthrough { id, method, params } => {
				respond(Some(id), self.passthrough(&method, params).await)
			}
			RelayInbound::Ping | RelayInbound::Ignored => return None,
		};
		Some(response.into())
	}

	/// Routes a `forwardCDPCommand`.
	pub async fn route(&self, command: &ForwardCommand) -> Result<Value> {
		let method = command.method.as_str();
		self.ctx.gate.check(method)?;

		let target_id = command.str_param("targetId");
		let tab = self
			.ctx
			.registry
			.resolve(command.session_id.as_deref(), target_id);

		match (TargetMethod::parse(method), tab) {
			(Some(TargetMethod::Create), _) => self.create_target(command).await,
			(_, None) => Err(Error::NoAttachedTab(method.to_string())),
			(Some(TargetMethod::Close), Some(tab)) => Ok(self.close_target(tab, target_id).await),
			(Some(TargetMethod::Activate), Some(tab)) => Ok(self.activate_target(tab, target_id).await),
			(None, Some(tab)) => self.dispatch(tab, method, command.params.clone()).await,
		}
	}

	/// A bare `{id, method, params}` frame, run on the active or first
	/// attached tab. Gated like forwarded commands.
	async fn passthrough(&self, method: &str, params: Option<Value>) -> Result<Value> {
		self.ctx.gate.check(method)?;
		let tab = self.ctx.registry.fallback_tab().ok_or(Error::NoTargetTab)?;
		Ok(self.ctx.surface.send_command(tab, method, params).await?)
	}

	async fn dispatch(&self, tab: TabId, method: &str, params: Option<Value>) -> Result<Value> {
		if let Some(step) = CompensatingStep::for_method(method) {
			step.run(self.ctx.surface.as_ref(), tab).await;
		}
		Ok(self.ctx.surface.send_command(tab, method, params).await?)
	}

	async fn create_target(&self, command: &ForwardCommand) -> Result<Value> {
		let url = command.str_param("url").unwrap_or(BLANK_URL);
		let tab = self
			.ctx
			.host
			.create_tab(url, false)
			.await?
			.ok_or(Error::CreateTab)?;

		tokio::time::sleep(TAB_REGISTER_DELAY).await;
		self.ctx.attach_tab(tab).await?;

		let target_id = self
			.ctx
			.registry
			.lookup_by_tab(tab)
			.map(|attachment| attachment.target_id)
			.unwrap_or_default();
		Ok(json!({ "targetId": target_id }))
	}

	/// An explicit target id must name a tracked tab; without one the routed
	/// tab is closed.
	fn explicit_or_routed(&self, routed: TabId, target_id: Option<&str>) -> Option<TabId> {
		match target_id.filter(|id| !id.is_empty()) {
			Some(target_id) => self.ctx.registry.lookup_by_target(target_id),
			None => Some(routed),
		}
	}

	async fn close_target(&self, routed: TabId, target_id: Option<&str>) -> Value {
		let Some(tab) = self.explicit_or_routed(routed, target_id) else {
			return json!({ "success": false });
		};
		let success = match self.ctx.host.close_tab(tab).await {
			Ok(()) => true,
			Err(err) => {
				warn!(target = "tabbridge.router", tab, error = %err, "failed to close tab");
				false
			}
		};
		json!({ "success": success })
	}

	async fn activate_target(&self, routed: TabId, target_id: Option<&str>) -> Value {
		let Some(tab) = self.explicit_or_routed(routed, target_id) else {
			return json!({});
		};
		if self.ctx.host.tab(tab).await.is_some() {
			if let Err(err) = self.ctx.host.focus_window(tab).await {
				debug!(target = "tabbridge.router", tab, error = %err, "focus window failed");
			}
			if let Err(err) = self.ctx.host.activate_tab(tab).await {
				debug!(target = "tabbridge.router", tab, error = %err, "activate tab failed");
			}
		}
		json!({})
	}
}

fn respond(id: Option<RequestId>, result: Result<Value>) -> CommandResponse {
	match result {
		Ok(value) => CommandResponse::success(id, value),
		Err(err) => CommandResponse::failure(id, err.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_runtime_enable_is_compensated() {
		assert_eq!(
			CompensatingStep::for_method("Runtime.enable"),
			Some(CompensatingStep::DisableBeforeEnable {
				disable: "Runtime.disable",
				settle: Duration::from_millis(50),
			})
		);
		assert_eq!(CompensatingStep::for_method("Page.enable"), None);
		assert_eq!(CompensatingStep::for_method("Runtime.evaluate"), None);
	}

	#[test]
	fn target_methods() {
		assert_eq!(TargetMethod::parse("Target.createTarget"), Some(TargetMethod::Create));
		assert_eq!(TargetMethod::parse("Target.closeTarget"), Some(TargetMethod::Close));
		assert_eq!(TargetMethod::parse("Target.activateTarget"), Some(TargetMethod::Activate));
		assert_eq!(TargetMethod::parse("Target.getTargets"), None);
	}

	#[test]
	fn errors_become_failure_responses() {
		let response = respond(Some(RequestId::from(4)), Err(Error::NoAttachedTab("DOM.getDocument".into())));
		assert_eq!(response.error.as_deref(), Some("No attached tab for method DOM.getDocument"));
		assert_eq!(response.result, None);
	}
}
