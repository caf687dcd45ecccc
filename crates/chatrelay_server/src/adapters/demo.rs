#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use chatrelay_domain::{IncomingChatEvent, Platform};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adapters::{
	ChatSource, SourceControl, SourceControlRx, SourceEvent, SourceEventTx, new_session_id, status, status_error,
};

const DEMO_USERS: [(&str, &str); 3] = [("demo_alice", "#ff7f50"), ("demo_bob", "#1e90ff"), ("demo_carol", "#9acd32")];

/// Development source that emits synthetic chat while enabled.
pub struct DemoSource {
	platform: Platform,
	emit_interval: Duration,
}

impl DemoSource {
	pub fn new(platform: Platform) -> Self {
		Self {
			platform,
			emit_interval: Duration::from_millis(1_500),
		}
	}

	pub fn with_emit_interval(mut self, interval: Duration) -> Self {
		self.emit_interval = interval;
		self
	}

	fn make_event(platform: Platform, channel: &str, n: u64) -> IncomingChatEvent {
		let (user, color) = DEMO_USERS[(n as usize) % DEMO_USERS.len()];
		let mut ev = IncomingChatEvent::new(platform, user, format!("demo message #{n} in {channel}"));
		ev.color = Some(color.to_string());
		ev
	}
}

#[async_trait]
impl ChatSource for DemoSource {
	fn platform(&self) -> Platform {
		self.platform
	}

	fn method(&self) -> &'static str {
		"demo"
	}

	async fn run(self: Box<Self>, mut control_rx: SourceControlRx, events_tx: SourceEventTx) -> anyhow::Result<()> {
		let platform = self.platform();
		let session_id = new_session_id();

		let mut channel: Option<String> = None;
		let mut tick: u64 = 0;

		let mut interval: Interval = tokio::time::interval(self.emit_interval);
		interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

		info!(%platform, %session_id, "demo source started");
		debug!(%platform, interval_ms = self.emit_interval.as_millis(), "demo source tick interval configured");

		loop {
			tokio::select! {
				_ = interval.tick() => {
					let Some(ch) = channel.as_deref() else {
						continue;
					};
					tick += 1;
					let ev = Self::make_event(platform, ch, tick);
					if events_tx.try_send(SourceEvent::Message(Box::new(ev))).is_err() {
						warn!(%platform, "demo source events channel full; dropping message");
					}
				}

				cmd = control_rx.recv() => {
					let Some(cmd) = cmd else {
						info!(%platform, "demo source control channel closed; shutting down");
						break;
					};

					match cmd {
						SourceControl::Configure(cfg) => {
							match (cfg.enabled, cfg.identifier(platform)) {
								(true, Some(ch)) => {
									channel = Some(ch.to_string());
									let _ = events_tx.try_send(status(platform, true, format!("demo streaming into {ch}")));
								}
								(true, None) => {
									channel = None;
									let _ = events_tx.try_send(status_error(platform, "demo source idle", "no channel configured"));
								}
								(false, _) => {
									channel = None;
									let _ = events_tx.try_send(status(platform, false, "demo source disabled"));
								}
							}
						}
						SourceControl::Shutdown => {
							info!(%platform, "demo source received Shutdown");
							break;
						}
					}
				}
			}
		}

		let _ = events_tx.try_send(status(platform, false, "demo source offline"));
		Ok(())
	}
}
