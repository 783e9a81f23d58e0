//! In-memory dialer for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::transport::{Dialer, TransportParts};

/// Server end of a dialed connection.
pub(crate) struct ServerSide {
	pub url: String,
	pub to_client: mpsc::UnboundedSender<String>,
	pub from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerSide {
	pub fn send_json(&self, value: Value) {
		let _ = self.to_client.send(value.to_string());
	}

	pub async fn recv_json(&mut self) -> Value {
		let text = tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
			.await
			.expect("timed out waiting for client frame")
			.expect("client closed");
		serde_json::from_str(&text).expect("client sent invalid JSON")
	}
}

pub(crate) struct ChannelDialer {
	accepted: mpsc::UnboundedSender<ServerSide>,
	refuse: AtomicBool,
	delay: Mutex<Option<Duration>>,
	dials: AtomicUsize,
	dial_times: Mutex<Vec<Instant>>,
}

impl ChannelDialer {
	pub fn new() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
		let (accepted, rx) = mpsc::unbounded_channel();
		let dialer = Self {
			accepted,
			refuse: AtomicBool::new(false),
			delay: Mutex::new(None),
			dials: AtomicUsize::new(0),
			dial_times: Mutex::new(Vec::new()),
		};
		(std::sync::Arc::new(dialer), rx)
	}

	pub fn refuse(&self, refuse: bool) {
		self.refuse.store(refuse, Ordering::SeqCst);
	}

	pub fn set_delay(&self, delay: Option<Duration>) {
		*self.delay.lock() = delay;
	}

	pub fn dials(&self) -> usize {
		self.dials.load(Ordering::SeqCst)
	}

	pub fn dial_times(&self) -> Vec<Instant> {
		self.dial_times.lock().clone()
	}
}

#[async_trait]
impl Dialer for ChannelDialer {
	async fn dial(&self, url: &str) -> Result<TransportParts> {
		self.dials.fetch_add(1, Ordering::SeqCst);
		self.dial_times.lock().push(Instant::now());

		let delay = *self.delay.lock();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if self.refuse.load(Ordering::SeqCst) {
			return Err(Error::Dial {
				url: url.to_string(),
				message: "connection refused".to_string(),
			});
		}

		let (outbound, from_client) = mpsc::unbounded_channel();
		let (to_client, inbound) = mpsc::unbounded_channel();
		let _ = self.accepted.send(ServerSide {
			url: url.to_string(),
			to_client,
			from_client,
		});
		Ok(TransportParts { outbound, inbound })
	}
}
