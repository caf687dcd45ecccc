#![forbid(unsafe_code)]

use std::sync::Arc;

use chatrelay_domain::{ChatSourceStatus, RelayError, Settings, SettingsPatch};
use chatrelay_protocol::{ApiResponse, DashboardOutbound};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::fanout::{Fanout, FanoutConfig, LagMarker};
use crate::server::settings_store::{SettingsSync, SettingsUpdate, SettingsUpdateError};
use crate::server::source_manager::SourceManager;

impl LagMarker for DashboardOutbound {
	fn lagged(dropped: u64) -> Self {
		DashboardOutbound::Lagged { dropped }
	}
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
	pub command_channel_capacity: usize,
	pub fanout: FanoutConfig,
}

impl Default for DashboardConfig {
	fn default() -> Self {
		Self {
			command_channel_capacity: 64,
			fanout: FanoutConfig::default(),
		}
	}
}

/// How an operation ended, independent of the transport reporting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
	Ok,
	/// The request was invalid; nothing changed.
	Rejected,
	/// The change is live but could not be made durable, or a peer failed.
	Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
	pub kind: OutcomeKind,
	pub body: ApiResponse,
}

impl Outcome {
	fn ok(body: ApiResponse) -> Self {
		Self {
			kind: OutcomeKind::Ok,
			body,
		}
	}
}

#[derive(Debug)]
enum DashboardCommand {
	Subscribe(oneshot::Sender<mpsc::Receiver<DashboardOutbound>>),
}

/// Request/response operations for the control surface plus the push
/// channel to dashboard clients.
#[derive(Debug, Clone)]
pub struct DashboardHandle {
	tx: mpsc::Sender<DashboardCommand>,
	settings: SettingsSync,
	sources: Arc<SourceManager>,
}

impl DashboardHandle {
	pub async fn get_settings(&self) -> Settings {
		self.settings.get().await
	}

	/// Merge a partial settings payload. Never surfaces a raw error: the
	/// outcome always carries a response body.
	pub async fn update_settings(&self, value: serde_json::Value) -> Outcome {
		match self.settings.update_json(value).await {
			Ok(settings) => Outcome::ok(ApiResponse::settings(settings)),
			Err(SettingsUpdateError::Validation(e)) => {
				debug!(error = %e, "dashboard settings update rejected");
				Outcome {
					kind: OutcomeKind::Rejected,
					body: ApiResponse::error(e.to_string()),
				}
			}
			Err(SettingsUpdateError::Persistence { error, settings }) => Outcome {
				kind: OutcomeKind::Failed,
				body: ApiResponse::error_with_settings(format!("settings not saved: {error}"), *settings),
			},
		}
	}

	pub async fn chat_source_status(&self) -> ChatSourceStatus {
		self.sources.status().await
	}

	pub async fn update_chat_sources(&self, value: serde_json::Value) -> Outcome {
		match self.sources.update_json(value).await {
			Ok(status) => Outcome::ok(ApiResponse::status(status)),
			Err(RelayError::Validation(e)) => {
				debug!(error = %e, "chat source update rejected");
				Outcome {
					kind: OutcomeKind::Rejected,
					body: ApiResponse::error(e.to_string()),
				}
			}
			Err(e) => {
				let mut body = ApiResponse::error(e.to_string());
				body.status = Some(self.sources.status().await);
				Outcome {
					kind: OutcomeKind::Failed,
					body,
				}
			}
		}
	}

	/// Register a dashboard client. The receiver starts with the current
	/// settings and source status.
	pub async fn subscribe(&self) -> Result<mpsc::Receiver<DashboardOutbound>, RelayError> {
		let (tx, rx) = oneshot::channel();
		self.tx
			.send(DashboardCommand::Subscribe(tx))
			.await
			.map_err(|_| RelayError::Transport("dashboard hub stopped".to_string()))?;
		rx.await
			.map_err(|_| RelayError::Transport("dashboard hub dropped request".to_string()))
	}
}

struct DashboardHub {
	settings: Settings,
	status: ChatSourceStatus,
	fanout: Fanout<DashboardOutbound>,
	sync: SettingsSync,
	sources: Arc<SourceManager>,
}

/// Start the dashboard hub actor.
pub async fn spawn_dashboard(
	cfg: DashboardConfig,
	sync: SettingsSync,
	sources: Arc<SourceManager>,
) -> (DashboardHandle, JoinHandle<()>) {
	let updates = sync.subscribe();
	let status_rx = sources.subscribe_status();
	let settings = sync.get().await;
	let status = sources.status().await;
	let (tx, rx) = mpsc::channel(cfg.command_channel_capacity.max(1));

	let hub = DashboardHub {
		settings,
		status,
		fanout: Fanout::new("dashboard", cfg.fanout),
		sync: sync.clone(),
		sources: sources.clone(),
	};

	let join = tokio::spawn(hub.run(rx, updates, status_rx));
	(
		DashboardHandle {
			tx,
			settings: sync,
			sources,
		},
		join,
	)
}

impl DashboardHub {
	async fn run(
		mut self,
		mut rx: mpsc::Receiver<DashboardCommand>,
		mut updates: broadcast::Receiver<SettingsUpdate>,
		mut status_rx: broadcast::Receiver<ChatSourceStatus>,
	) {
		info!("dashboard hub started");
		let mut updates_open = true;
		let mut status_open = true;

		loop {
			tokio::select! {
				biased;

				upd = updates.recv(), if updates_open => match upd {
					Ok(u) => self.apply_settings(&u.patch),
					Err(RecvError::Lagged(n)) => {
						warn!(skipped = n, "dashboard lagged on settings updates; resyncing");
						let full = self.sync.get().await;
						self.apply_settings(&SettingsPatch::from(&full));
					}
					Err(RecvError::Closed) => updates_open = false,
				},

				st = status_rx.recv(), if status_open => match st {
					Ok(st) => self.push_status(st),
					Err(RecvError::Lagged(n)) => {
						debug!(skipped = n, "dashboard lagged on source status; refetching");
						let st = self.sources.status().await;
						self.push_status(st);
					}
					Err(RecvError::Closed) => status_open = false,
				},

				cmd = rx.recv() => match cmd {
					Some(DashboardCommand::Subscribe(resp)) => {
						let initial = vec![
							DashboardOutbound::Settings(self.settings.clone()),
							DashboardOutbound::ChatSourceStatus(self.status.clone()),
						];
						let _ = resp.send(self.fanout.subscribe(initial));
					}
					None => break,
				},
			}
		}

		info!("dashboard hub stopped");
	}

	fn apply_settings(&mut self, patch: &SettingsPatch) {
		self.settings.apply(patch);
		self.fanout.publish(DashboardOutbound::SettingsUpdated(self.settings.clone()));
	}

	fn push_status(&mut self, status: ChatSourceStatus) {
		if status == self.status {
			return;
		}
		self.status = status;
		self.fanout.publish(DashboardOutbound::ChatSourceStatus(self.status.clone()));
	}
}
