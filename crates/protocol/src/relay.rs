//! Data-plane frames exchanged with the local automation relay.
//!
//! Inbound frames are discriminated by their `method` field:
//!
//! - `ping`: keepalive, answered with `pong`
//! - `forwardCDPCommand`: a CDP command to run against a tracked tab
//! - `Browser.attach`: attach to the active tab
//! - anything else carrying an `id`: a bare CDP command for the active tab
//!
//! Outbound frames are command responses, `pong`, and `forwardCDPEvent`
//! notifications.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const METHOD_PING: &str = "ping";
pub const METHOD_PONG: &str = "pong";
pub const METHOD_FORWARD_COMMAND: &str = "forwardCDPCommand";
pub const METHOD_FORWARD_EVENT: &str = "forwardCDPEvent";
pub const METHOD_BROWSER_ATTACH: &str = "Browser.attach";

pub const TARGET_ATTACHED: &str = "Target.attachedToTarget";
pub const TARGET_DETACHED: &str = "Target.detachedFromTarget";

/// Caller-supplied correlation id, echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	/// Any JSON number, echoed back exactly as received.
	Number(serde_json::Number),
	Text(String),
}

impl From<u64> for RequestId {
	fn from(id: u64) -> Self {
		RequestId::Number(id.into())
	}
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RequestId::Number(n) => write!(f, "{n}"),
			RequestId::Text(s) => f.write_str(s),
		}
	}
}

/// A decoded inbound relay frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayInbound {
	Ping,
	ForwardCommand {
		id: Option<RequestId>,
		command: ForwardCommand,
	},
	Attach {
		id: Option<RequestId>,
	},
	Passthrough {
		id: RequestId,
		method: String,
		params: Option<Value>,
	},
	/// Frames with no method, or with a method but no id to answer.
	Ignored,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
	#[serde(default)]
	id: Option<RequestId>,
	#[serde(default)]
	method: Option<String>,
	#[serde(default)]
	params: Option<Value>,
}

impl RelayInbound {
	/// Decodes one text frame. Only malformed JSON is an error.
	pub fn decode(text: &str) -> serde_json::Result<Self> {
		let raw: RawFrame = serde_json::from_str(text)?;
		let frame = match raw.method.as_deref() {
			Some(METHOD_PING) => RelayInbound::Ping,
			Some(METHOD_FORWARD_COMMAND) => RelayInbound::ForwardCommand {
				id: raw.id,
				command: ForwardCommand::from_params(raw.params.as_ref().unwrap_or(&Value::Null)),
			},
			Some(METHOD_BROWSER_ATTACH) => RelayInbound::Attach { id: raw.id },
			Some(method) => match raw.id {
				Some(id) => RelayInbound::Passthrough {
					id,
					method: method.to_string(),
					params: raw.params.filter(|p| !p.is_null()),
				},
				None => RelayInbound::Ignored,
			},
			None => RelayInbound::Ignored,
		};
		Ok(frame)
	}
}

/// The `params` of a `forwardCDPCommand` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardCommand {
	#[serde(default)]
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

impl ForwardCommand {
	pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
		Self {
			method: method.into(),
			params,
			session_id: None,
		}
	}

	pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
		self.session_id = Some(session_id.into());
		self
	}

	/// Lenient extraction: a missing method becomes empty, a non-string
	/// session id is dropped.
	fn from_params(value: &Value) -> Self {
		Self {
			method: value
				.get("method")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.trim()
				.to_string(),
			params: value.get("params").filter(|p| !p.is_null()).cloned(),
			session_id: value
				.get("sessionId")
				.and_then(Value::as_str)
				.map(str::to_string),
		}
	}

	/// String parameter `key` of the command, if present.
	pub fn str_param(&self, key: &str) -> Option<&str> {
		self.params.as_ref()?.get(key)?.as_str()
	}
}

/// An outbound relay frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutbound {
	Pong,
	Response(CommandResponse),
	Event(ForwardEvent),
}

impl RelayOutbound {
	pub fn encode(&self) -> serde_json::Result<String> {
		match self {
			RelayOutbound::Pong => serde_json::to_string(&json!({ "method": METHOD_PONG })),
			RelayOutbound::Response(response) => serde_json::to_string(response),
			RelayOutbound::Event(event) => serde_json::to_string(event),
		}
	}
}

impl From<CommandResponse> for RelayOutbound {
	fn from(response: CommandResponse) -> Self {
		RelayOutbound::Response(response)
	}
}

impl From<ForwardEvent> for RelayOutbound {
	fn from(event: ForwardEvent) -> Self {
		RelayOutbound::Event(event)
	}
}

/// `{id, result}` or `{id, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<RequestId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl CommandResponse {
	pub fn success(id: Option<RequestId>, result: Value) -> Self {
		Self {
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn failure(id: Option<RequestId>, message: impl Into<String>) -> Self {
		Self {
			id,
			result: None,
			error: Some(message.into()),
		}
	}
}

/// `{method: "forwardCDPEvent", params: {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardEvent {
	pub method: String,
	pub params: EventParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventParams {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

impl ForwardEvent {
	fn wrap(params: EventParams) -> Self {
		Self {
			method: METHOD_FORWARD_EVENT.to_string(),
			params,
		}
	}

	/// A CDP event emitted by a tracked session.
	pub fn cdp(session_id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
		Self::wrap(EventParams {
			session_id: Some(session_id.into()),
			target_id: None,
			reason: None,
			method: method.into(),
			params,
		})
	}

	/// Synthetic `Target.attachedToTarget` announcing a new attachment.
	pub fn attached(session_id: &str, target_info: &Value) -> Self {
		let mut info = match target_info {
			Value::Object(map) => map.clone(),
			_ => serde_json::Map::new(),
		};
		info.insert("attached".to_string(), Value::Bool(true));

		Self::wrap(EventParams {
			session_id: None,
			target_id: None,
			reason: None,
			method: TARGET_ATTACHED.to_string(),
			params: Some(json!({
				"sessionId": session_id,
				"targetInfo": Value::Object(info),
				"waitingForDebugger": false,
			})),
		})
	}

	/// Synthetic `Target.detachedFromTarget` for a dropped attachment.
	pub fn detached(session_id: &str, target_id: &str, reason: &str) -> Self {
		Self::wrap(EventParams {
			session_id: Some(session_id.to_string()),
			target_id: Some(target_id.to_string()),
			reason: Some(reason.to_string()),
			method: TARGET_DETACHED.to_string(),
			params: None,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_ping() {
		assert_eq!(RelayInbound::decode(r#"{"method":"ping"}"#).unwrap(), RelayInbound::Ping);
	}

	#[test]
	fn decodes_forward_command() {
		let raw = r#"{"id":7,"method":"forwardCDPCommand","params":{"method":" Page.navigate ","params":{"url":"https://example.com"},"sessionId":"cb-tab-1"}}"#;
		let RelayInbound::ForwardCommand { id, command } = RelayInbound::decode(raw).unwrap() else {
			panic!("Expected ForwardCommand");
		};
		assert_eq!(id, Some(RequestId::from(7)));
		assert_eq!(command.method, "Page.navigate");
		assert_eq!(command.session_id.as_deref(), Some("cb-tab-1"));
		assert_eq!(command.str_param("url"), Some("https://example.com"));
	}

	#[test]
	fn non_string_session_id_is_dropped() {
		let raw = r#"{"id":"a","method":"forwardCDPCommand","params":{"method":"DOM.getDocument","sessionId":5}}"#;
		let RelayInbound::ForwardCommand { id, command } = RelayInbound::decode(raw).unwrap() else {
			panic!("Expected ForwardCommand");
		};
		assert_eq!(id, Some(RequestId::Text("a".into())));
		assert_eq!(command.session_id, None);
		assert_eq!(command.params, None);
	}

	#[test]
	fn negative_and_fractional_ids_echo_back() {
		for (raw_id, expected) in [("-3", json!(-3)), ("1.5", json!(1.5))] {
			let raw = format!(r#"{{"id":{raw_id},"method":"forwardCDPCommand","params":{{"method":"DOM.getDocument"}}}}"#);
			let RelayInbound::ForwardCommand { id, .. } = RelayInbound::decode(&raw).unwrap() else {
				panic!("Expected ForwardCommand");
			};
			let encoded = RelayOutbound::from(CommandResponse::success(id, json!({}))).encode().unwrap();
			let value: Value = serde_json::from_str(&encoded).unwrap();
			assert_eq!(value["id"], expected);
		}
	}

	#[test]
	fn decodes_attach_and_passthrough() {
		assert_eq!(
			RelayInbound::decode(r#"{"id":1,"method":"Browser.attach"}"#).unwrap(),
			RelayInbound::Attach {
				id: Some(RequestId::from(1))
			}
		);
		assert_eq!(
			RelayInbound::decode(r#"{"id":2,"method":"Page.getLayoutMetrics"}"#).unwrap(),
			RelayInbound::Passthrough {
				id: RequestId::from(2),
				method: "Page.getLayoutMetrics".into(),
				params: None,
			}
		);
	}

	#[test]
	fn method_without_id_is_ignored() {
		assert_eq!(
			RelayInbound::decode(r#"{"method":"Page.getLayoutMetrics"}"#).unwrap(),
			RelayInbound::Ignored
		);
		assert_eq!(RelayInbound::decode(r#"{"result":{}}"#).unwrap(), RelayInbound::Ignored);
	}

	#[test]
	fn malformed_json_is_an_error() {
		assert!(RelayInbound::decode("not json").is_err());
	}

	#[test]
	fn pong_and_responses_encode() {
		assert_eq!(RelayOutbound::Pong.encode().unwrap(), r#"{"method":"pong"}"#);

		let ok = RelayOutbound::from(CommandResponse::success(Some(RequestId::from(3)), json!({"x": 1})));
		assert_eq!(ok.encode().unwrap(), r#"{"id":3,"result":{"x":1}}"#);

		let err = RelayOutbound::from(CommandResponse::failure(Some(RequestId::from(4)), "nope"));
		assert_eq!(err.encode().unwrap(), r#"{"id":4,"error":"nope"}"#);
	}

	#[test]
	fn attached_event_marks_target_info() {
		let event = ForwardEvent::attached("cb-tab-1", &json!({"targetId": "T1", "type": "page"}));
		let value: Value = serde_json::from_str(&RelayOutbound::from(event).encode().unwrap()).unwrap();

		assert_eq!(value["method"], "forwardCDPEvent");
		assert_eq!(value["params"]["method"], "Target.attachedToTarget");
		assert!(value["params"].get("sessionId").is_none());
		assert_eq!(value["params"]["params"]["sessionId"], "cb-tab-1");
		assert_eq!(value["params"]["params"]["targetInfo"]["targetId"], "T1");
		assert_eq!(value["params"]["params"]["targetInfo"]["attached"], true);
		assert_eq!(value["params"]["params"]["waitingForDebugger"], false);
	}

	#[test]
	fn detached_event_carries_reason() {
		let event = ForwardEvent::detached("cb-tab-2", "T2", "tab_removed");
		let value = serde_json::to_value(&event).unwrap();
		assert_eq!(value["params"]["sessionId"], "cb-tab-2");
		assert_eq!(value["params"]["targetId"], "T2");
		assert_eq!(value["params"]["reason"], "tab_removed");
		assert_eq!(value["params"]["method"], "Target.detachedFromTarget");
	}
}
