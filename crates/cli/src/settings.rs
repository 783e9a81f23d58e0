//! Effective configuration: the config file, then command line overrides.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tabbridge::LinkConfig;

use crate::cli::ConfigArgs;

/// Loads the config file (if any) and applies the flag overrides on top.
/// Re-run on every reload so overrides survive a SIGHUP.
pub fn effective_config(args: &ConfigArgs) -> Result<LinkConfig> {
	let base = match &args.config {
		Some(path) => LinkConfig::load(path)
			.with_context(|| format!("Failed to load config from {}", path.display()))?,
		None => LinkConfig::default(),
	};
	Ok(apply_overrides(base, args))
}

fn apply_overrides(mut config: LinkConfig, args: &ConfigArgs) -> LinkConfig {
	if let Some(url) = &args.gateway_url {
		config.gateway_url = url.clone();
	}
	if let Some(token) = &args.gateway_token {
		config.gateway_token = token.clone();
	}
	if let Some(port) = args.relay_port.filter(|port| *port != 0) {
		config.relay_port = Some(port);
	}
	if args.write_access {
		config.write_access = true;
	}
	config.normalized()
}

/// `check-config` output. The token is masked.
pub fn describe(config: &LinkConfig) -> Value {
	let token = if config.gateway_token.is_empty() { "" } else { "***" };
	json!({
		"gatewayUrl": config.gateway_url,
		"gatewayToken": token,
		"relayPort": config.relay_port(),
		"relayUrl": config.relay_url(),
		"writeAccess": config.write_access,
	})
}

#[cfg(test)]
mod tests {
	use std::io::Write;
	use std::path::PathBuf;

	use tabbridge::{DEFAULT_GATEWAY_URL, DEFAULT_RELAY_PORT};

	use super::*;

	fn config_file(text: &str) -> tempfile::NamedTempFile {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(text.as_bytes()).unwrap();
		file
	}

	#[test]
	fn defaults_without_file_or_flags() {
		let config = effective_config(&ConfigArgs::default()).unwrap();
		assert_eq!(config, LinkConfig::default());
		assert_eq!(config.relay_port(), DEFAULT_RELAY_PORT);
	}

	#[test]
	fn flags_override_file() {
		let file = config_file(r#"{"gatewayUrl":"ws://file:1","gatewayToken":"from-file","relayPort":"19001"}"#);
		let args = ConfigArgs {
			config: Some(file.path().to_path_buf()),
			gateway_token: Some("from-flag".into()),
			write_access: true,
			..ConfigArgs::default()
		};

		let config = effective_config(&args).unwrap();
		assert_eq!(config.gateway_url, "ws://file:1");
		assert_eq!(config.gateway_token, "from-flag");
		assert_eq!(config.relay_port(), 19001);
		assert!(config.write_access);
	}

	#[test]
	fn write_access_flag_only_enables() {
		let file = config_file(r#"{"writeAccess":true}"#);
		let args = ConfigArgs {
			config: Some(file.path().to_path_buf()),
			..ConfigArgs::default()
		};
		assert!(effective_config(&args).unwrap().write_access);
	}

	#[test]
	fn blank_url_flag_falls_back_to_default() {
		let args = ConfigArgs {
			gateway_url: Some("  ".into()),
			..ConfigArgs::default()
		};
		assert_eq!(effective_config(&args).unwrap().gateway_url, DEFAULT_GATEWAY_URL);
	}

	#[test]
	fn missing_file_yields_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let args = ConfigArgs {
			config: Some(dir.path().join("absent.json")),
			..ConfigArgs::default()
		};
		assert_eq!(effective_config(&args).unwrap(), LinkConfig::default());
	}

	#[test]
	fn unparsable_file_names_the_path() {
		let file = config_file("{not json");
		let path: PathBuf = file.path().to_path_buf();
		let args = ConfigArgs {
			config: Some(path.clone()),
			..ConfigArgs::default()
		};

		let err = effective_config(&args).unwrap_err();
		assert!(err.to_string().contains(&path.display().to_string()));
	}

	#[test]
	fn describe_masks_token_and_resolves_port() {
		let config = LinkConfig {
			gateway_token: "secret".into(),
			..LinkConfig::default()
		};
		let value = describe(&config);
		assert_eq!(value["gatewayToken"], "***");
		assert_eq!(value["relayPort"], DEFAULT_RELAY_PORT);
		assert_eq!(value["relayUrl"], "ws://127.0.0.1:18792/extension");
		assert_eq!(value["writeAccess"], false);
	}
}
