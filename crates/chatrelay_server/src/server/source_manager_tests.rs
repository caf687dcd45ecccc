#![forbid(unsafe_code)]

use std::time::Duration;

use chatrelay_domain::{ChatSourceStatus, Platform, RelayError, ValidationError};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::adapters::ChatSource;
use crate::adapters::demo::DemoSource;
use crate::adapters::extension::ExtensionSource;
use crate::server::chat_hub::{ChatHubConfig, ChatHubHandle, spawn_chat_hub};
use crate::server::highlight_hub::{HighlightHubConfig, spawn_highlight_hub};
use crate::server::settings_store::{SETTINGS_FILE_NAME, SettingsStore, SettingsSync};
use crate::server::source_manager::{CHAT_SOURCES_FILE_NAME, SourceManager, SourceManagerConfig};

async fn chat_hub(dir: &TempDir) -> ChatHubHandle {
	let sync = SettingsSync::new(SettingsStore::load(dir.path().join(SETTINGS_FILE_NAME)), 16);
	let (highlight, _) = spawn_highlight_hub(HighlightHubConfig::default(), sync.clone()).await;
	let (chat, _) = spawn_chat_hub(ChatHubConfig::default(), sync, highlight).await;
	chat
}

fn extension_sources() -> Vec<Box<dyn ChatSource>> {
	vec![
		Box::new(ExtensionSource::new(Platform::Twitch)),
		Box::new(ExtensionSource::new(Platform::YouTube)),
		Box::new(ExtensionSource::new(Platform::Kick)),
	]
}

async fn wait_for_status(
	rx: &mut broadcast::Receiver<ChatSourceStatus>,
	pred: impl Fn(&ChatSourceStatus) -> bool,
) -> ChatSourceStatus {
	timeout(Duration::from_secs(2), async {
		loop {
			let st = rx.recv().await.expect("status channel open");
			if pred(&st) {
				return st;
			}
		}
	})
	.await
	.expect("expected status within timeout")
}

#[tokio::test]
async fn enabling_twitch_without_channel_is_rejected_and_status_unchanged() {
	let dir = tempfile::tempdir().unwrap();
	let chat = chat_hub(&dir).await;
	let path = dir.path().join(CHAT_SOURCES_FILE_NAME);
	let mgr = SourceManager::start(extension_sources(), chat, &path, SourceManagerConfig::default());

	let before = mgr.status().await;
	let err = mgr
		.update_json(json!({ "twitch": { "enabled": true, "channelName": "" } }))
		.await
		.unwrap_err();

	match err {
		RelayError::Validation(ValidationError::MissingSourceField { platform, field }) => {
			assert_eq!(platform, Platform::Twitch);
			assert_eq!(field, "channelName");
		}
		other => panic!("expected MissingSourceField, got: {other:?}"),
	}
	assert_eq!(mgr.status().await, before);
	assert!(!path.exists());
}

#[tokio::test]
async fn update_reports_status_and_persists_without_credentials() {
	let dir = tempfile::tempdir().unwrap();
	let chat = chat_hub(&dir).await;
	let path = dir.path().join(CHAT_SOURCES_FILE_NAME);
	let mgr = SourceManager::start(extension_sources(), chat.clone(), &path, SourceManagerConfig::default());
	let mut status_rx = mgr.subscribe_status();

	let status = mgr
		.update_json(json!({
			"twitch": { "enabled": true, "channelName": "somestreamer", "oauthToken": "oauth:secret" },
			"youtube": { "enabled": true, "channelId": "UC123" }
		}))
		.await
		.unwrap();

	let twitch = status.get(Platform::Twitch).unwrap();
	assert!(twitch.enabled);
	assert_eq!(twitch.channel.as_deref(), Some("somestreamer"));
	assert_eq!(twitch.method, "extension");
	assert_eq!(status.get(Platform::YouTube).unwrap().channel.as_deref(), Some("UC123"));

	wait_for_status(&mut status_rx, |st| st.get(Platform::Twitch).is_some_and(|s| s.enabled)).await;

	let on_disk = std::fs::read_to_string(&path).unwrap();
	assert!(on_disk.contains("somestreamer"));
	assert!(!on_disk.contains("oauth:secret"));

	// Credentials survive an update that omits them.
	mgr.update_json(json!({ "twitch": { "enabled": true, "channelName": "other" } }))
		.await
		.unwrap();
	let cfg = mgr.config().await;
	let twitch = cfg.twitch.unwrap();
	assert_eq!(twitch.channel_name.as_deref(), Some("other"));
	assert_eq!(twitch.oauth_token.map(|t| t.expose().to_string()).as_deref(), Some("oauth:secret"));

	// A restart picks the persisted configuration back up.
	let restarted = SourceManager::start(extension_sources(), chat, &path, SourceManagerConfig::default());
	let st = restarted.status().await;
	assert_eq!(st.get(Platform::Twitch).unwrap().channel.as_deref(), Some("other"));
	assert!(st.get(Platform::YouTube).unwrap().enabled);
	assert!(!st.get(Platform::Kick).unwrap().enabled);
}

#[tokio::test]
async fn observed_traffic_marks_enabled_source_connected() {
	let dir = tempfile::tempdir().unwrap();
	let chat = chat_hub(&dir).await;
	let mgr = SourceManager::start(
		extension_sources(),
		chat,
		dir.path().join(CHAT_SOURCES_FILE_NAME),
		SourceManagerConfig::default(),
	);

	mgr.note_activity(Platform::Kick).await;
	assert!(!mgr.status().await.get(Platform::Kick).unwrap().connected);

	mgr.update_json(json!({ "kick": { "enabled": true, "channelName": "kicker" } }))
		.await
		.unwrap();
	mgr.note_activity(Platform::Kick).await;
	assert!(mgr.status().await.get(Platform::Kick).unwrap().connected);
}

#[tokio::test]
async fn demo_source_feeds_chat_hub_once_enabled() {
	let dir = tempfile::tempdir().unwrap();
	let chat = chat_hub(&dir).await;
	let sources: Vec<Box<dyn ChatSource>> =
		vec![Box::new(DemoSource::new(Platform::Twitch).with_emit_interval(Duration::from_millis(10)))];
	let mgr = SourceManager::start(
		sources,
		chat.clone(),
		dir.path().join(CHAT_SOURCES_FILE_NAME),
		SourceManagerConfig::default(),
	);
	let mut status_rx = mgr.subscribe_status();

	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(chat.snapshot().await.unwrap().is_empty(), "demo emitted while disabled");

	mgr.update_json(json!({ "twitch": { "enabled": true, "channelName": "demo" } }))
		.await
		.unwrap();

	let st = wait_for_status(&mut status_rx, |st| st.get(Platform::Twitch).is_some_and(|s| s.connected)).await;
	assert_eq!(st.get(Platform::Twitch).unwrap().method, "demo");

	let got = timeout(Duration::from_secs(2), async {
		loop {
			let items = chat.snapshot().await.unwrap();
			if !items.is_empty() {
				return items;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("demo messages reach history");
	assert!(got.iter().all(|e| e.platform == Platform::Twitch));
	assert!(got[0].content.contains("demo"));

	mgr.shutdown().await;
}
