//! Link configuration.
//!
//! The on-disk shape is a camelCase JSON object:
//!
//! ```json
//! { "gatewayUrl": "ws://127.0.0.1:18789", "gatewayToken": "", "relayPort": 18792, "writeAccess": false }
//! ```
//!
//! Every field is optional. `relayPort` is read leniently: numbers and
//! numeric strings are accepted, anything outside 1..=65535 falls back to
//! [`DEFAULT_RELAY_PORT`].

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;

pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";
pub const DEFAULT_RELAY_PORT: u16 = 18792;

/// Path on the relay host that accepts browser-side connections.
pub const RELAY_PATH: &str = "/extension";

/// Config shared between the links and the bridge handle.
pub type SharedConfig = Arc<RwLock<LinkConfig>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkConfig {
	pub gateway_url: String,
	/// Bearer token for the gateway handshake. Empty means no `auth` block.
	pub gateway_token: String,
	#[serde(
		deserialize_with = "lenient_port",
		skip_serializing_if = "Option::is_none"
	)]
	pub relay_port: Option<u16>,
	pub write_access: bool,
}

impl Default for LinkConfig {
	fn default() -> Self {
		Self {
			gateway_url: DEFAULT_GATEWAY_URL.to_string(),
			gateway_token: String::new(),
			relay_port: None,
			write_access: false,
		}
	}
}

impl LinkConfig {
	/// Loads config from a JSON file. A missing file yields defaults.
	pub fn load(path: &Path) -> Result<Self> {
		match std::fs::read_to_string(path) {
			Ok(text) => Self::from_json(&text),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
			Err(err) => Err(err.into()),
		}
	}

	pub fn from_json(text: &str) -> Result<Self> {
		let config: LinkConfig = serde_json::from_str(text)?;
		Ok(config.normalized())
	}

	/// Replaces a blank gateway URL with the default.
	pub fn normalized(mut self) -> Self {
		if self.gateway_url.trim().is_empty() {
			self.gateway_url = DEFAULT_GATEWAY_URL.to_string();
		}
		self
	}

	pub fn relay_port(&self) -> u16 {
		self.relay_port.filter(|port| *port != 0).unwrap_or(DEFAULT_RELAY_PORT)
	}

	pub fn relay_url(&self) -> String {
		format!("ws://127.0.0.1:{}{RELAY_PATH}", self.relay_port())
	}

	pub fn into_shared(self) -> SharedConfig {
		Arc::new(RwLock::new(self))
	}
}

/// Accepts `18792`, `"18792"`, `" 18792abc"` (leading digits) and `18792.5`.
/// Anything else, including out-of-range values, maps to `None`.
fn lenient_port<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<Value>::deserialize(deserializer)?;
	Ok(value.as_ref().and_then(parse_port))
}

fn parse_port(value: &Value) -> Option<u16> {
	let number = match value {
		Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 1.0).map(|f| f as u64))?,
		Value::String(s) => {
			let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
			digits.parse::<u64>().ok()?
		}
		_ => return None,
	};
	u16::try_from(number).ok().filter(|port| *port != 0)
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn defaults_when_fields_missing() {
		let config = LinkConfig::from_json("{}").unwrap();
		assert_eq!(config, LinkConfig::default());
		assert_eq!(config.relay_port(), 18792);
		assert_eq!(config.relay_url(), "ws://127.0.0.1:18792/extension");
	}

	#[test]
	fn relay_port_is_lenient() {
		let port = |raw: &str| {
			LinkConfig::from_json(&format!(r#"{{"relayPort": {raw}}}"#))
				.unwrap()
				.relay_port()
		};
		assert_eq!(port("19000"), 19000);
		assert_eq!(port(r#""19001""#), 19001);
		assert_eq!(port(r#""19002abc""#), 19002);
		assert_eq!(port("0"), 18792);
		assert_eq!(port("-5"), 18792);
		assert_eq!(port("70000"), 18792);
		assert_eq!(port(r#""nope""#), 18792);
		assert_eq!(port("null"), 18792);
		assert_eq!(port("true"), 18792);
	}

	#[test]
	fn blank_gateway_url_falls_back() {
		let config = LinkConfig::from_json(r#"{"gatewayUrl": "  ", "writeAccess": true}"#).unwrap();
		assert_eq!(config.gateway_url, DEFAULT_GATEWAY_URL);
		assert!(config.write_access);
	}

	#[test]
	fn load_missing_file_yields_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let config = LinkConfig::load(&dir.path().join("absent.json")).unwrap();
		assert_eq!(config, LinkConfig::default());
	}

	#[test]
	fn load_reads_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"{{"gatewayUrl":"ws://gw.local:1","gatewayToken":"secret","relayPort":"20000"}}"#
		)
		.unwrap();

		let config = LinkConfig::load(file.path()).unwrap();
		assert_eq!(config.gateway_url, "ws://gw.local:1");
		assert_eq!(config.gateway_token, "secret");
		assert_eq!(config.relay_port(), 20000);
		assert!(!config.write_access);
	}

	#[test]
	fn load_rejects_garbage() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "not json").unwrap();
		assert!(matches!(
			LinkConfig::load(file.path()),
			Err(crate::Error::Json(_))
		));
	}
}
