#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chatrelay_domain::{Settings, SettingsPatch, ValidationError};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::util::fs::{read_json_if_exists, write_json_atomic};

pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Error)]
pub enum SettingsUpdateError {
	#[error(transparent)]
	Validation(#[from] ValidationError),

	/// The update is live in memory but could not be written to disk.
	#[error("settings applied but not persisted: {error}")]
	Persistence {
		error: String,
		settings: Box<Settings>,
	},
}

/// Durable copy of the settings document.
#[derive(Debug)]
pub struct SettingsStore {
	path: PathBuf,
	current: Settings,
}

impl SettingsStore {
	/// Load from `path`. A missing file yields defaults; an unreadable or
	/// non-object file is logged and also yields defaults. Invalid fields
	/// fall back to their defaults individually.
	pub fn load(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		info!("loading settings from {}", path.display());

		let current = match read_json_if_exists(&path) {
			Ok(Some(v)) => match Settings::from_persisted(v) {
				Ok((settings, skipped)) => {
					if !skipped.is_empty() {
						warn!(?skipped, path = %path.display(), "ignoring invalid persisted settings fields");
					}
					settings
				}
				Err(e) => {
					warn!(error = %e, path = %path.display(), "persisted settings invalid; using defaults");
					Settings::default()
				}
			},
			Ok(None) => {
				info!("no settings file at {}; using defaults", path.display());
				Settings::default()
			}
			Err(e) => {
				warn!(error = %e, path = %path.display(), "failed to read settings; using defaults");
				Settings::default()
			}
		};

		Self { path, current }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn get(&self) -> &Settings {
		&self.current
	}

	/// Merge a validated patch and persist the full merged document.
	///
	/// On a write failure the in-memory value keeps the update.
	pub async fn update(&mut self, patch: &SettingsPatch) -> Result<Settings, SettingsUpdateError> {
		patch.validate()?;
		self.current.apply(patch);

		if let Err(e) = write_json_atomic(&self.path, &self.current).await {
			warn!(error = %e, path = %self.path.display(), "failed to persist settings");
			metrics::counter!("chatrelay_settings_persist_failures_total").increment(1);
			return Err(SettingsUpdateError::Persistence {
				error: e.to_string(),
				settings: Box::new(self.current.clone()),
			});
		}

		debug!(path = %self.path.display(), "settings persisted");
		Ok(self.current.clone())
	}
}

/// One accepted settings change, as fanned out to the hubs.
#[derive(Debug, Clone)]
pub struct SettingsUpdate {
	/// Monotonic per process.
	pub revision: u64,
	pub patch: SettingsPatch,
}

/// Single-writer front for the settings store plus the fan-out to hubs.
///
/// Updates are serialized by the store mutex, so every hub observes patches
/// in the same order they were accepted.
#[derive(Debug, Clone)]
pub struct SettingsSync {
	inner: Arc<Mutex<SyncInner>>,
	updates_tx: broadcast::Sender<SettingsUpdate>,
}

#[derive(Debug)]
struct SyncInner {
	store: SettingsStore,
	revision: u64,
}

impl SettingsSync {
	pub fn new(store: SettingsStore, fanout_capacity: usize) -> Self {
		let (updates_tx, _) = broadcast::channel(fanout_capacity.max(1));
		Self {
			inner: Arc::new(Mutex::new(SyncInner { store, revision: 0 })),
			updates_tx,
		}
	}

	/// Current merged settings.
	pub async fn get(&self) -> Settings {
		self.inner.lock().await.store.get().clone()
	}

	/// Subscribe to accepted patches. Subscribe before reading `get()` so no
	/// update falls between the two.
	pub fn subscribe(&self) -> broadcast::Receiver<SettingsUpdate> {
		self.updates_tx.subscribe()
	}

	/// Validate, merge, persist, then notify every hub.
	///
	/// A persistence failure still notifies: the in-memory value is authoritative.
	pub async fn update(&self, patch: SettingsPatch) -> Result<Settings, SettingsUpdateError> {
		patch.validate()?;

		let mut inner = self.inner.lock().await;
		let result = inner.store.update(&patch).await;
		inner.revision += 1;
		let revision = inner.revision;

		let receivers = self.updates_tx.send(SettingsUpdate { revision, patch }).unwrap_or(0);
		drop(inner);

		metrics::counter!("chatrelay_settings_updates_total").increment(1);
		debug!(revision, receivers, persisted = result.is_ok(), "settings update fanned out");
		result
	}

	/// [`SettingsSync::update`] for an untyped payload.
	pub async fn update_json(&self, value: serde_json::Value) -> Result<Settings, SettingsUpdateError> {
		let patch = SettingsPatch::from_json(value)?;
		self.update(patch).await
	}
}
