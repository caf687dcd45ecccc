#![forbid(unsafe_code)]

use tokio::sync::mpsc;
use tracing::debug;

/// Configuration for a hub's client fan-out.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
	/// Maximum number of queued items per display client.
	pub subscriber_queue_capacity: usize,

	pub debug_logs: bool,
}

impl Default for FanoutConfig {
	fn default() -> Self {
		Self {
			subscriber_queue_capacity: 256,
			debug_logs: false,
		}
	}
}

/// Outbound item types that can carry a lag marker.
pub trait LagMarker {
	fn lagged(dropped: u64) -> Self;
}

/// Fan-out to the display clients of one hub.
///
/// Owned by the hub's actor task, so no locking is involved. Delivery uses
/// `try_send`: a full client queue drops the item and records a pending lag
/// marker that is delivered with the next successful send.
#[derive(Debug)]
pub struct Fanout<T> {
	name: &'static str,
	cfg: FanoutConfig,
	subscribers: Vec<Subscriber<T>>,
}

#[derive(Debug)]
struct Subscriber<T> {
	tx: mpsc::Sender<T>,
	pending_lag: u64,
}

impl<T: Clone + LagMarker> Fanout<T> {
	pub fn new(name: &'static str, cfg: FanoutConfig) -> Self {
		Self {
			name,
			cfg,
			subscribers: Vec::new(),
		}
	}

	/// Register a client. `initial` is queued for this client only, ahead of
	/// any later broadcast.
	pub fn subscribe(&mut self, initial: Vec<T>) -> mpsc::Receiver<T> {
		let capacity = self.cfg.subscriber_queue_capacity.max(initial.len()).max(1);
		let (tx, rx) = mpsc::channel(capacity);

		for item in initial {
			let _ = tx.try_send(item);
		}

		self.prune_closed();
		self.subscribers.push(Subscriber { tx, pending_lag: 0 });

		if self.cfg.debug_logs {
			debug!(hub = self.name, subs = self.subscribers.len(), "fanout: subscribed");
		}

		rx
	}

	/// Broadcast to every connected client; returns how many received it.
	pub fn publish(&mut self, item: T) -> usize {
		self.prune_closed();

		let mut delivered = 0usize;
		let mut dropped_total: u64 = 0;

		for sub in self.subscribers.iter_mut() {
			match sub.tx.try_send(item.clone()) {
				Ok(()) => {
					delivered += 1;
					if sub.pending_lag > 0 && sub.tx.try_send(T::lagged(sub.pending_lag)).is_ok() {
						sub.pending_lag = 0;
					}
				}
				Err(mpsc::error::TrySendError::Full(_)) => {
					dropped_total += 1;
					sub.pending_lag = sub.pending_lag.saturating_add(1);
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		if dropped_total > 0 {
			metrics::counter!("chatrelay_fanout_dropped_total", "hub" => self.name).increment(dropped_total);
			if self.cfg.debug_logs {
				debug!(
					hub = self.name,
					dropped = dropped_total,
					"fanout: dropped due to full subscriber queues"
				);
			}
		}

		delivered
	}

	/// Number of clients still connected.
	pub fn subscriber_count(&self) -> usize {
		self.subscribers.iter().filter(|s| !s.tx.is_closed()).count()
	}

	fn prune_closed(&mut self) {
		self.subscribers.retain(|s| !s.tx.is_closed());
	}
}
