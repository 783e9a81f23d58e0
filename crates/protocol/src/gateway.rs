//! Control-plane frames exchanged with the orchestration gateway.
//!
//! Every frame is a JSON object tagged by `type`:
//!
//! - `req`: `{type, id, method, params}` sent by the client
//! - `res`: `{type, id, ok, payload?, error?}` correlated by `id`
//! - `event`: `{type, event, payload}` pushed by the gateway

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version advertised as both bounds of the accepted range.
pub const PROTOCOL_VERSION: u32 = 3;

/// Correlation id of the handshake request.
pub const CONNECT_REQUEST_ID: &str = "connect-1";

pub const METHOD_CONNECT: &str = "connect";
pub const METHOD_CHAT_SEND: &str = "chat.send";
pub const EVENT_CHAT: &str = "chat";

/// `payload.type` of a successful handshake response.
pub const HELLO_OK: &str = "hello-ok";

/// Chat state of a complete (non-streaming) message.
pub const CHAT_STATE_FINAL: &str = "final";

/// A single gateway frame, decoded by its `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GatewayFrame {
	Req(RequestFrame),
	Res(ResponseFrame),
	Event(EventFrame),
	/// Frame types this client does not understand.
	#[serde(other)]
	Unknown,
}

impl GatewayFrame {
	/// Decodes one text frame.
	pub fn decode(text: &str) -> serde_json::Result<Self> {
		serde_json::from_str(text)
	}

	/// Encodes this frame as a JSON string.
	pub fn encode(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
	pub id: String,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

impl RequestFrame {
	/// Builds the versioned handshake request.
	pub fn connect(params: &ConnectParams) -> serde_json::Result<Self> {
		Ok(Self {
			id: CONNECT_REQUEST_ID.to_string(),
			method: METHOD_CONNECT.to_string(),
			params: serde_json::to_value(params)?,
		})
	}

	/// Builds a `chat.send` request. The idempotency key doubles as the request id.
	pub fn chat_send(params: &ChatSendParams) -> serde_json::Result<Self> {
		Ok(Self {
			id: params.idempotency_key.clone(),
			method: METHOD_CHAT_SEND.to_string(),
			params: serde_json::to_value(params)?,
		})
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
	pub id: String,
	#[serde(default)]
	pub ok: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payload: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorShape>,
}

impl ResponseFrame {
	pub fn is_handshake(&self) -> bool {
		self.id == CONNECT_REQUEST_ID
	}

	/// Returns the hello payload when this is a successful handshake response.
	pub fn hello(&self) -> Option<HelloPayload> {
		if !self.ok {
			return None;
		}
		let hello: HelloPayload = serde_json::from_value(self.payload.clone()?).ok()?;
		(hello.kind == HELLO_OK).then_some(hello)
	}

	/// Error message reported by the gateway, if any.
	pub fn error_message(&self) -> Option<&str> {
		self.error.as_ref().and_then(ErrorShape::message)
	}
}

/// Error body of a response. Gateways send an object with `message`; a bare
/// string is tolerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorShape {
	Text(String),
	Object {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		message: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		code: Option<Value>,
	},
}

impl ErrorShape {
	pub fn message(&self) -> Option<&str> {
		match self {
			ErrorShape::Text(text) => Some(text),
			ErrorShape::Object { message, .. } => message.as_deref(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
	pub event: String,
	#[serde(default)]
	pub payload: Value,
}

impl EventFrame {
	/// Decodes the payload of a `chat` event.
	pub fn chat(&self) -> Option<ChatEventPayload> {
		if self.event != EVENT_CHAT {
			return None;
		}
		serde_json::from_value(self.payload.clone()).ok()
	}
}

/// Identity the client presents during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
	pub id: String,
	pub version: String,
	pub platform: String,
	pub mode: String,
}

impl ClientInfo {
	/// Identity of a browser-hosted UI client.
	pub fn browser_ui(version: impl Into<String>) -> Self {
		Self {
			id: "gateway-client".to_string(),
			version: version.into(),
			platform: "browser".to_string(),
			mode: "ui".to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectAuth {
	pub token: String,
}

/// `params` of the `connect` handshake request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
	pub client: ClientInfo,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub auth: Option<ConnectAuth>,
	pub min_protocol: u32,
	pub max_protocol: u32,
}

impl ConnectParams {
	/// Handshake params for `client`; an empty token sends no `auth` block.
	pub fn new(client: ClientInfo, token: &str) -> Self {
		Self {
			client,
			auth: (!token.is_empty()).then(|| ConnectAuth {
				token: token.to_string(),
			}),
			min_protocol: PROTOCOL_VERSION,
			max_protocol: PROTOCOL_VERSION,
		}
	}
}

/// Payload of a successful handshake response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloPayload {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub snapshot: Option<Snapshot>,
}

impl HelloPayload {
	/// The default session key, ignoring empty and non-string values.
	pub fn main_session_key(&self) -> Option<&str> {
		self.snapshot
			.as_ref()?
			.session_defaults
			.as_ref()?
			.main_session_key
			.as_ref()?
			.as_str()
			.filter(|key| !key.is_empty())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
	#[serde(default)]
	pub session_defaults: Option<SessionDefaults>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDefaults {
	/// Kept raw: a malformed key must not fail the whole hello.
	#[serde(default)]
	pub main_session_key: Option<Value>,
}

/// `params` of a `chat.send` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendParams {
	pub session_key: String,
	pub message: String,
	pub idempotency_key: String,
}

/// Payload of a `chat` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEventPayload {
	#[serde(default)]
	pub message: Option<ChatMessage>,
	#[serde(default)]
	pub state: Option<String>,
}

impl ChatEventPayload {
	/// Text of a complete message. Streaming deltas and empty messages yield `None`.
	pub fn final_text(&self) -> Option<String> {
		if self.state.as_deref() != Some(CHAT_STATE_FINAL) {
			return None;
		}
		let text = self.message.as_ref()?.content.as_ref()?.text();
		(!text.is_empty()).then_some(text)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
	#[serde(default)]
	pub content: Option<ChatContent>,
}

/// Message content: a plain string or an ordered list of text fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
	Text(String),
	Fragments(Vec<ContentFragment>),
}

impl ChatContent {
	/// Concatenates fragments in order.
	pub fn text(&self) -> String {
		match self {
			ChatContent::Text(text) => text.clone(),
			ChatContent::Fragments(fragments) => fragments
				.iter()
				.filter_map(|fragment| fragment.text.as_deref())
				.collect(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentFragment {
	#[serde(default)]
	pub text: Option<String>,
}
