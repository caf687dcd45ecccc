#![forbid(unsafe_code)]

use async_trait::async_trait;
use chatrelay_domain::Platform;
use tracing::{debug, info};

use crate::adapters::{ChatSource, SourceControl, SourceControlRx, SourceEventTx, new_session_id, status};

/// Passive source for platforms scraped by the browser extension.
///
/// Messages arrive over the `chat` namespace rather than through this task;
/// it only tracks configuration and reports status. The source manager marks
/// it connected once traffic for the platform is observed.
pub struct ExtensionSource {
	platform: Platform,
}

impl ExtensionSource {
	pub fn new(platform: Platform) -> Self {
		Self { platform }
	}
}

#[async_trait]
impl ChatSource for ExtensionSource {
	fn platform(&self) -> Platform {
		self.platform
	}

	fn method(&self) -> &'static str {
		"extension"
	}

	async fn run(self: Box<Self>, mut control_rx: SourceControlRx, events_tx: SourceEventTx) -> anyhow::Result<()> {
		let platform = self.platform();
		let session_id = new_session_id();
		info!(%platform, %session_id, "extension source started");

		while let Some(cmd) = control_rx.recv().await {
			match cmd {
				SourceControl::Configure(cfg) => {
					let detail = match (cfg.enabled, cfg.identifier(platform)) {
						(true, Some(channel)) => format!("waiting for extension traffic from {channel}"),
						(true, None) => "enabled without a channel".to_string(),
						(false, _) => "disabled".to_string(),
					};
					debug!(%platform, enabled = cfg.enabled, %detail, "extension source configured");
					let _ = events_tx.try_send(status(platform, false, detail));
				}
				SourceControl::Shutdown => {
					info!(%platform, "extension source received Shutdown");
					break;
				}
			}
		}

		let _ = events_tx.try_send(status(platform, false, "extension source offline"));
		Ok(())
	}
}
