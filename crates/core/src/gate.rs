//! Read-only / write-access policy.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// Method-name prefixes that can mutate page state or browser chrome.
pub const WRITE_METHOD_PREFIXES: &[&str] = &[
	"Input.",
	"Page.navigate",
	"Page.reload",
	"Runtime.evaluate",
	"Runtime.callFunctionOn",
	"DOM.set",
	"DOM.insert",
	"DOM.remove",
	"DOM.focus",
	"Target.createTarget",
	"Target.closeTarget",
	"Emulation.",
	"Network.set",
];

pub fn is_write_method(method: &str) -> bool {
	WRITE_METHOD_PREFIXES
		.iter()
		.any(|prefix| method.starts_with(prefix))
}

#[derive(Debug, Default)]
pub struct WriteAccessGate {
	enabled: AtomicBool,
}

impl WriteAccessGate {
	pub fn new(enabled: bool) -> Self {
		Self {
			enabled: AtomicBool::new(enabled),
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled.load(Ordering::SeqCst)
	}

	pub fn set_enabled(&self, enabled: bool) {
		self.enabled.store(enabled, Ordering::SeqCst);
	}

	/// Rejects write-sensitive methods while read-only.
	pub fn check(&self, method: &str) -> Result<()> {
		if !self.is_enabled() && is_write_method(method) {
			return Err(Error::WriteAccessDisabled);
		}
		Ok(())
	}
}
