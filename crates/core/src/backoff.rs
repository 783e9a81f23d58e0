//! Per-link reconnect backoff.
//!
//! Each link owns a [`Backoff`]. A failure arms at most one timer; when the
//! timer fires the delay grows by 1.6x (capped at 30s) and the link
//! reconnects. Any successful connection resets both links to 1s.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

pub const INITIAL_DELAY_MS: u64 = 1_000;
pub const MAX_DELAY_MS: u64 = 30_000;
const GROWTH: f64 = 1.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
	Gateway,
	Relay,
}

impl LinkKind {
	pub fn as_str(self) -> &'static str {
		match self {
			LinkKind::Gateway => "gateway",
			LinkKind::Relay => "relay",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
	current_delay_ms: u64,
	timer_active: bool,
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			current_delay_ms: INITIAL_DELAY_MS,
			timer_active: false,
		}
	}
}

impl Backoff {
	pub fn current_delay_ms(&self) -> u64 {
		self.current_delay_ms
	}

	pub fn timer_active(&self) -> bool {
		self.timer_active
	}

	/// Arms the reconnect timer. Returns the wait, or `None` if a timer is
	/// already pending.
	pub fn arm(&mut self) -> Option<Duration> {
		if self.timer_active {
			return None;
		}
		self.timer_active = true;
		Some(Duration::from_millis(self.current_delay_ms.min(MAX_DELAY_MS)))
	}

	/// Clears the timer and grows the delay for the next failure.
	pub fn fire(&mut self) {
		self.timer_active = false;
		let grown = (self.current_delay_ms as f64 * GROWTH).round() as u64;
		self.current_delay_ms = grown.min(MAX_DELAY_MS);
	}

	pub fn reset(&mut self) {
		self.current_delay_ms = INITIAL_DELAY_MS;
	}
}

#[derive(Debug, Default)]
struct BackoffState {
	gateway: Backoff,
	relay: Backoff,
	stopped: bool,
}

impl BackoffState {
	fn get_mut(&mut self, link: LinkKind) -> &mut Backoff {
		match link {
			LinkKind::Gateway => &mut self.gateway,
			LinkKind::Relay => &mut self.relay,
		}
	}
}

/// Backoff state of both links, shared so a success on one resets the other.
#[derive(Debug, Clone, Default)]
pub struct Backoffs {
	state: Arc<Mutex<BackoffState>>,
}

impl Backoffs {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot(&self, link: LinkKind) -> Backoff {
		self.state.lock().get_mut(link).clone()
	}

	pub fn reset_all(&self) {
		let mut state = self.state.lock();
		state.gateway.reset();
		state.relay.reset();
	}

	/// Stops all future reconnects. Pending timers fire into a no-op.
	pub fn shutdown(&self) {
		self.state.lock().stopped = true;
	}

	pub fn is_stopped(&self) -> bool {
		self.state.lock().stopped
	}

	/// Schedules `reconnect` after the link's current delay unless a timer
	/// is already pending for it. Returns whether a timer was armed.
	pub fn schedule<F, Fut>(&self, link: LinkKind, reason: &str, reconnect: F) -> bool
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let wait = {
			let mut state = self.state.lock();
			if state.stopped {
				return false;
			}
			match state.get_mut(link).arm() {
				Some(wait) => wait,
				None => return false,
			}
		};

		info!(
			target = "tabbridge.backoff",
			link = link.as_str(),
			wait_ms = wait.as_millis() as u64,
			reason,
			"scheduling reconnect"
		);

		let backoffs = self.clone();
		tokio::spawn(async move {
			tokio::time::sleep(wait).await;
			let stopped = {
				let mut state = backoffs.state.lock();
				state.get_mut(link).fire();
				state.stopped
			};
			if !stopped {
				reconnect().await;
			}
		});
		true
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[test]
	fn delay_grows_and_caps() {
		let mut backoff = Backoff::default();
		let mut seen = Vec::new();
		for _ in 0..10 {
			seen.push(backoff.arm().unwrap().as_millis() as u64);
			backoff.fire();
		}
		assert_eq!(
			seen,
			[1000, 1600, 2560, 4096, 6554, 10486, 16778, 26845, 30000, 30000]
		);
		assert!(seen.iter().all(|ms| (INITIAL_DELAY_MS..=MAX_DELAY_MS).contains(ms)));
	}

	#[test]
	fn only_one_timer_at_a_time() {
		let mut backoff = Backoff::default();
		assert!(backoff.arm().is_some());
		assert!(backoff.arm().is_none());
		backoff.fire();
		assert!(backoff.arm().is_some());
	}

	#[test]
	fn reset_all_touches_both_links() {
		let backoffs = Backoffs::new();
		{
			let mut state = backoffs.state.lock();
			state.gateway.fire();
			state.relay.fire();
			state.relay.fire();
		}
		assert_eq!(backoffs.snapshot(LinkKind::Relay).current_delay_ms(), 2560);

		backoffs.reset_all();
		assert_eq!(backoffs.snapshot(LinkKind::Gateway).current_delay_ms(), 1000);
		assert_eq!(backoffs.snapshot(LinkKind::Relay).current_delay_ms(), 1000);
	}

	#[tokio::test(start_paused = true)]
	async fn schedule_fires_once_after_delay() {
		let backoffs = Backoffs::new();
		let fired = Arc::new(AtomicUsize::new(0));

		for _ in 0..3 {
			let fired = Arc::clone(&fired);
			backoffs.schedule(LinkKind::Relay, "test", move || async move {
				fired.fetch_add(1, Ordering::SeqCst);
			});
		}

		tokio::time::sleep(Duration::from_millis(999)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 0);
		assert!(backoffs.snapshot(LinkKind::Relay).timer_active());

		tokio::time::sleep(Duration::from_millis(2)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 1);

		let relay = backoffs.snapshot(LinkKind::Relay);
		assert!(!relay.timer_active());
		assert_eq!(relay.current_delay_ms(), 1600);
		assert_eq!(backoffs.snapshot(LinkKind::Gateway), Backoff::default());
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_suppresses_reconnect() {
		let backoffs = Backoffs::new();
		let fired = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&fired);
		assert!(backoffs.schedule(LinkKind::Gateway, "test", move || async move {
			counter.fetch_add(1, Ordering::SeqCst);
		}));

		backoffs.shutdown();
		tokio::time::sleep(Duration::from_secs(2)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 0);
		assert!(!backoffs.schedule(LinkKind::Gateway, "test", || async {}));
	}
}
