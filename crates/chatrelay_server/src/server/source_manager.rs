#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chatrelay_domain::{ChatSourceConfig, ChatSourceStatus, Platform, RelayError, SourceConfig, SourceStatus};
use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::adapters::{ChatSource, SourceControl, SourceEvent, SourceEventRx, SourceReport};
use crate::server::chat_hub::ChatHubHandle;
use crate::util::fs::{read_json_if_exists, write_json_atomic};

pub const CHAT_SOURCES_FILE_NAME: &str = "chat-sources.json";

#[derive(Debug, Clone)]
pub struct SourceManagerConfig {
	pub control_channel_capacity: usize,
	pub source_events_channel_capacity: usize,
	pub status_broadcast_capacity: usize,
}

impl Default for SourceManagerConfig {
	fn default() -> Self {
		Self {
			control_channel_capacity: 64,
			source_events_channel_capacity: 1_024,
			status_broadcast_capacity: 64,
		}
	}
}

#[derive(Debug, Default)]
struct SourceState {
	/// Full configuration, credentials included. Only identification
	/// fields reach disk.
	config: ChatSourceConfig,
	status: ChatSourceStatus,
}

/// Owns the chat sources, their configuration and their observed status.
#[derive(Debug)]
pub struct SourceManager {
	state: Arc<RwLock<SourceState>>,
	control_by_platform: HashMap<Platform, mpsc::Sender<SourceControl>>,
	methods: HashMap<Platform, &'static str>,
	status_tx: broadcast::Sender<ChatSourceStatus>,
	store_path: PathBuf,
	shutdown_tx: watch::Sender<bool>,
}

impl SourceManager {
	/// Load persisted configuration, start every source and push the
	/// configuration to it.
	pub fn start(
		sources: Vec<Box<dyn ChatSource>>,
		chat: ChatHubHandle,
		store_path: impl Into<PathBuf>,
		cfg: SourceManagerConfig,
	) -> Self {
		let store_path = store_path.into();
		let config = load_config(&store_path);

		let (status_tx, _) = broadcast::channel(cfg.status_broadcast_capacity.max(1));
		let (shutdown_tx, shutdown_rx) = watch::channel(false);

		let mut methods = HashMap::new();
		let mut status = ChatSourceStatus::default();

		for (platform, entry) in config.entries() {
			status.0.insert(platform, status_for(entry, platform, "none"));
		}
		for source in &sources {
			let platform = source.platform();
			methods.insert(platform, source.method());
			status.0.entry(platform).or_default().method = source.method().to_string();
		}

		let state = Arc::new(RwLock::new(SourceState {
			config: config.clone(),
			status,
		}));

		let mut control_by_platform = HashMap::new();

		for source in sources {
			let platform = source.platform();

			let (control_tx, control_rx) = mpsc::channel::<SourceControl>(cfg.control_channel_capacity.max(1));
			let (events_tx, events_rx) = mpsc::channel::<SourceEvent>(cfg.source_events_channel_capacity.max(1));

			tokio::spawn(async move {
				if let Err(e) = source.run(control_rx, events_tx).await {
					warn!(%platform, error = %e, "chat source task exited with error");
				}
			});

			Self::spawn_source_forwarder(
				platform,
				events_rx,
				chat.clone(),
				state.clone(),
				status_tx.clone(),
				shutdown_rx.clone(),
			);

			if let Some(source_cfg) = config.get(platform)
				&& control_tx.try_send(SourceControl::Configure(source_cfg.clone())).is_err()
			{
				warn!(%platform, "failed to deliver initial source configuration");
			}

			control_by_platform.insert(platform, control_tx);
		}

		info!(sources = control_by_platform.len(), path = %store_path.display(), "source manager started");

		Self {
			state,
			control_by_platform,
			methods,
			status_tx,
			store_path,
			shutdown_tx,
		}
	}

	fn spawn_source_forwarder(
		platform: Platform,
		mut events_rx: SourceEventRx,
		chat: ChatHubHandle,
		state: Arc<RwLock<SourceState>>,
		status_tx: broadcast::Sender<ChatSourceStatus>,
		mut shutdown_rx: watch::Receiver<bool>,
	) {
		tokio::spawn(async move {
			loop {
				tokio::select! {
					ev = events_rx.recv() => {
						let Some(ev) = ev else {
							debug!(%platform, "source events channel closed; forwarder exiting");
							break;
						};

						match ev {
							SourceEvent::Message(msg) => {
								if let Err(e) = chat.try_ingest(*msg) {
									metrics::counter!("chatrelay_forward_failures_total", "peer" => "chat").increment(1);
									warn!(%platform, error = %e, "dropping source message");
								}
							}
							SourceEvent::Status(report) => {
								record_status_metrics(&report);
								debug!(
									%platform,
									connected = report.connected,
									detail = %report.detail,
									last_error = ?report.last_error,
									"source status"
								);

								let snapshot = {
									let mut st = state.write().await;
									let entry = st.status.0.entry(report.platform).or_default();
									entry.connected = report.connected;
									entry.last_error = report.last_error;
									st.status.clone()
								};
								let _ = status_tx.send(snapshot);
							}
						}
					}

					changed = shutdown_rx.changed() => {
						if changed.is_err() || *shutdown_rx.borrow() {
							info!(%platform, "source forwarder observed shutdown");
							break;
						}
					}
				}
			}
		});
	}

	/// Current status of every known source.
	pub async fn status(&self) -> ChatSourceStatus {
		self.state.read().await.status.clone()
	}

	/// Current configuration, credentials included.
	pub async fn config(&self) -> ChatSourceConfig {
		self.state.read().await.config.clone()
	}

	/// Subscribe to status snapshots, pushed after every change.
	pub fn subscribe_status(&self) -> broadcast::Receiver<ChatSourceStatus> {
		self.status_tx.subscribe()
	}

	/// Replace the configuration of each platform present in `update`.
	///
	/// Validation happens before anything changes. Omitted credentials keep
	/// their previous values. A persistence failure leaves the new
	/// configuration live and is reported as an error.
	pub async fn update(&self, update: ChatSourceConfig) -> Result<ChatSourceStatus, RelayError> {
		update.validate()?;

		let mut st = self.state.write().await;

		for (platform, cfg) in update.entries() {
			let mut next = cfg.clone();
			if let Some(prev) = st.config.get(platform) {
				next.inherit_credentials(prev);
			}

			let method = self.methods.get(&platform).copied().unwrap_or("none");
			let previous_connected = st.status.get(platform).is_some_and(|s| s.connected && next.enabled);
			let mut entry = status_for(&next, platform, method);
			entry.connected = previous_connected;
			st.status.0.insert(platform, entry);

			match self.control_by_platform.get(&platform) {
				Some(ctrl) => {
					if ctrl.try_send(SourceControl::Configure(next.clone())).is_err() {
						warn!(%platform, "source control channel unavailable; configuration not delivered");
					}
				}
				None => debug!(%platform, "no source registered for platform; configuration stored only"),
			}

			info!(%platform, enabled = next.enabled, channel = ?next.identifier(platform), "chat source configured");
			st.config.set(platform, next);
		}

		let persisted = write_json_atomic(&self.store_path, &st.config).await;
		let snapshot = st.status.clone();
		drop(st);

		let _ = self.status_tx.send(snapshot.clone());

		if let Err(e) = persisted {
			warn!(error = %e, path = %self.store_path.display(), "failed to persist chat source configuration");
			metrics::counter!("chatrelay_sources_persist_failures_total").increment(1);
			return Err(RelayError::Persistence(e.to_string()));
		}

		Ok(snapshot)
	}

	/// [`SourceManager::update`] for an untyped payload.
	pub async fn update_json(&self, value: serde_json::Value) -> Result<ChatSourceStatus, RelayError> {
		let update = ChatSourceConfig::from_json(value)?;
		self.update(update).await
	}

	/// Record that traffic for `platform` reached the relay.
	pub async fn note_activity(&self, platform: Platform) {
		{
			let st = self.state.read().await;
			match st.status.get(platform) {
				Some(s) if s.enabled && !s.connected => {}
				_ => return,
			}
		}

		let snapshot = {
			let mut st = self.state.write().await;
			let Some(entry) = st.status.0.get_mut(&platform) else {
				return;
			};
			if entry.connected {
				return;
			}
			entry.connected = true;
			entry.last_error = None;
			st.status.clone()
		};

		debug!(%platform, "source marked connected after observed traffic");
		let _ = self.status_tx.send(snapshot);
	}

	/// Stop forwarders and ask every source to shut down.
	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(true);

		for (platform, ctrl) in self.control_by_platform.iter() {
			let _ = ctrl.send(SourceControl::Shutdown).await;
			debug!(%platform, "sent source Shutdown");
		}
	}
}

fn status_for(cfg: &SourceConfig, platform: Platform, method: &str) -> SourceStatus {
	SourceStatus {
		enabled: cfg.enabled,
		connected: false,
		channel: cfg.identifier(platform).map(str::to_string),
		last_error: None,
		method: method.to_string(),
	}
}

fn record_status_metrics(report: &SourceReport) {
	let platform = report.platform.as_str();
	metrics::counter!("chatrelay_source_status_total", "platform" => platform).increment(1);
	metrics::gauge!("chatrelay_source_connected", "platform" => platform).set(if report.connected { 1.0 } else { 0.0 });
	if report.last_error.is_some() {
		metrics::counter!("chatrelay_source_status_errors_total", "platform" => platform).increment(1);
	}
}

fn load_config(path: &std::path::Path) -> ChatSourceConfig {
	match read_json_if_exists(path) {
		Ok(Some(v)) => match ChatSourceConfig::from_json(v) {
			Ok(cfg) => cfg,
			Err(e) => {
				warn!(error = %e, path = %path.display(), "persisted chat sources invalid; starting empty");
				ChatSourceConfig::default()
			}
		},
		Ok(None) => ChatSourceConfig::default(),
		Err(e) => {
			warn!(error = %e, path = %path.display(), "failed to read chat sources; starting empty");
			ChatSourceConfig::default()
		}
	}
}
