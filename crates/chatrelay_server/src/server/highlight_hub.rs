#![forbid(unsafe_code)]

use chatrelay_domain::{ChatEvent, HighlightSettings, IncomingChatEvent, RelayError, SettingsPatch};
use chatrelay_protocol::HighlightOutbound;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::server::fanout::{Fanout, FanoutConfig, LagMarker};
use crate::server::settings_store::{SettingsSync, SettingsUpdate};

impl LagMarker for HighlightOutbound {
	fn lagged(dropped: u64) -> Self {
		HighlightOutbound::Lagged { dropped }
	}
}

#[derive(Debug, Clone)]
pub struct HighlightHubConfig {
	pub command_channel_capacity: usize,
	pub fanout: FanoutConfig,
}

impl Default for HighlightHubConfig {
	fn default() -> Self {
		Self {
			command_channel_capacity: 1024,
			fanout: FanoutConfig::default(),
		}
	}
}

#[derive(Debug)]
pub enum HighlightCommand {
	Highlight(IncomingChatEvent),
	Clear,
	Subscribe(oneshot::Sender<mpsc::Receiver<HighlightOutbound>>),
	Current(oneshot::Sender<Option<ChatEvent>>),
	Settings(oneshot::Sender<HighlightSettings>),
}

/// Cloneable entry point to the highlight hub actor.
#[derive(Debug, Clone)]
pub struct HighlightHubHandle {
	tx: mpsc::Sender<HighlightCommand>,
}

impl HighlightHubHandle {
	/// Show `ev`, replacing whatever is showing. Never blocks.
	pub fn highlight(&self, ev: impl Into<IncomingChatEvent>) -> Result<(), RelayError> {
		self.try_command(HighlightCommand::Highlight(ev.into()))
	}

	/// Dismiss the current highlight, if any. Never blocks.
	pub fn clear(&self) -> Result<(), RelayError> {
		self.try_command(HighlightCommand::Clear)
	}

	/// Register a popout. The receiver starts with the highlight settings and,
	/// when one is showing, the current highlight.
	pub async fn subscribe(&self) -> Result<mpsc::Receiver<HighlightOutbound>, RelayError> {
		self.request(HighlightCommand::Subscribe).await
	}

	pub async fn current(&self) -> Result<Option<ChatEvent>, RelayError> {
		self.request(HighlightCommand::Current).await
	}

	pub async fn settings(&self) -> Result<HighlightSettings, RelayError> {
		self.request(HighlightCommand::Settings).await
	}

	fn try_command(&self, cmd: HighlightCommand) -> Result<(), RelayError> {
		self.tx.try_send(cmd).map_err(|e| {
			metrics::counter!("chatrelay_forward_failures_total", "peer" => "highlight").increment(1);
			RelayError::Transport(format!("highlight hub: {e}"))
		})
	}

	async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> HighlightCommand) -> Result<T, RelayError> {
		let (tx, rx) = oneshot::channel();
		self.tx
			.send(make(tx))
			.await
			.map_err(|_| RelayError::Transport("highlight hub stopped".to_string()))?;
		rx.await
			.map_err(|_| RelayError::Transport("highlight hub dropped request".to_string()))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HighlightState {
	Empty,
	Showing(ChatEvent),
}

struct HighlightHub {
	state: HighlightState,
	settings: HighlightSettings,
	/// Deadline of the single pending auto-dismiss, if any.
	dismiss_at: Option<Instant>,
	fanout: Fanout<HighlightOutbound>,
	sync: SettingsSync,
}

/// Start the highlight hub actor.
pub async fn spawn_highlight_hub(cfg: HighlightHubConfig, sync: SettingsSync) -> (HighlightHubHandle, JoinHandle<()>) {
	let updates = sync.subscribe();
	let settings = HighlightSettings::from(&sync.get().await);
	let (tx, rx) = mpsc::channel(cfg.command_channel_capacity.max(1));

	let hub = HighlightHub {
		state: HighlightState::Empty,
		settings,
		dismiss_at: None,
		fanout: Fanout::new("highlight", cfg.fanout),
		sync,
	};

	let join = tokio::spawn(hub.run(rx, updates));
	(HighlightHubHandle { tx }, join)
}

impl HighlightHub {
	async fn run(mut self, mut rx: mpsc::Receiver<HighlightCommand>, mut updates: broadcast::Receiver<SettingsUpdate>) {
		info!("highlight hub started");
		let mut updates_open = true;

		loop {
			let dismiss_at = self.dismiss_at;
			tokio::select! {
				biased;

				upd = updates.recv(), if updates_open => match upd {
					Ok(u) => self.apply_settings(&u.patch),
					Err(RecvError::Lagged(n)) => {
						warn!(skipped = n, "highlight hub lagged on settings updates; resyncing");
						let full = self.sync.get().await;
						self.apply_settings(&SettingsPatch::from(&full));
					}
					Err(RecvError::Closed) => updates_open = false,
				},

				_ = sleep_until_opt(dismiss_at) => self.expire(),

				cmd = rx.recv() => match cmd {
					Some(cmd) => self.handle(cmd),
					None => break,
				},
			}
		}

		info!("highlight hub stopped");
	}

	fn handle(&mut self, cmd: HighlightCommand) {
		match cmd {
			HighlightCommand::Highlight(ev) => self.show(ev),
			HighlightCommand::Clear => self.clear(),
			HighlightCommand::Subscribe(resp) => {
				let mut initial = vec![HighlightOutbound::Settings(self.settings.clone())];
				if let HighlightState::Showing(ev) = &self.state {
					initial.push(HighlightOutbound::HighlightMessage(ev.clone()));
				}
				let _ = resp.send(self.fanout.subscribe(initial));
			}
			HighlightCommand::Current(resp) => {
				let current = match &self.state {
					HighlightState::Showing(ev) => Some(ev.clone()),
					HighlightState::Empty => None,
				};
				let _ = resp.send(current);
			}
			HighlightCommand::Settings(resp) => {
				let _ = resp.send(self.settings.clone());
			}
		}
	}

	fn show(&mut self, incoming: IncomingChatEvent) {
		let ev = match incoming.normalize() {
			Ok(ev) => ev,
			Err(e) => {
				debug!(error = %e, "highlight rejected");
				metrics::counter!("chatrelay_highlight_rejected_total").increment(1);
				return;
			}
		};

		// Replacing the state also replaces the pending timer.
		self.dismiss_at = self.settings.highlight_timeout().map(|d| Instant::now() + d);
		self.state = HighlightState::Showing(ev.clone());

		debug!(id = %ev.id, timeout_ms = self.settings.highlight_timeout, "highlight showing");
		metrics::counter!("chatrelay_highlights_shown_total").increment(1);
		self.fanout.publish(HighlightOutbound::HighlightMessage(ev));
	}

	fn clear(&mut self) {
		self.dismiss_at = None;
		if self.state == HighlightState::Empty {
			return;
		}
		self.state = HighlightState::Empty;
		self.fanout.publish(HighlightOutbound::ClearHighlight);
	}

	fn expire(&mut self) {
		debug!("highlight auto-dismissed");
		metrics::counter!("chatrelay_highlights_expired_total").increment(1);
		self.clear();
	}

	fn apply_settings(&mut self, patch: &SettingsPatch) {
		let timeout_changed = self.settings.apply(patch);

		// A showing highlight restarts its timer against the new timeout.
		if patch.highlight_timeout.is_some() && matches!(self.state, HighlightState::Showing(_)) {
			self.dismiss_at = self.settings.highlight_timeout().map(|d| Instant::now() + d);
		}

		if patch.touches_highlight() {
			debug!(timeout_changed, timeout_ms = self.settings.highlight_timeout, "highlight settings applied");
			self.fanout.publish(HighlightOutbound::Settings(self.settings.clone()));
		}
	}
}

async fn sleep_until_opt(at: Option<Instant>) {
	match at {
		Some(at) => tokio::time::sleep_until(at).await,
		None => std::future::pending().await,
	}
}
