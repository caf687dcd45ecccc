#![forbid(unsafe_code)]

use std::time::Duration;

use chatrelay_domain::{IncomingChatEvent, Platform, SettingsPatch};
use chatrelay_protocol::HighlightOutbound;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

use crate::server::highlight_hub::{HighlightHubConfig, HighlightHubHandle, spawn_highlight_hub};
use crate::server::settings_store::{SETTINGS_FILE_NAME, SettingsStore, SettingsSync};

async fn start(initial: SettingsPatch) -> (TempDir, SettingsSync, HighlightHubHandle) {
	let dir = tempfile::tempdir().unwrap();
	let sync = SettingsSync::new(SettingsStore::load(dir.path().join(SETTINGS_FILE_NAME)), 16);
	if !initial.is_empty() {
		sync.update(initial).await.unwrap();
	}
	let (hub, _join) = spawn_highlight_hub(HighlightHubConfig::default(), sync.clone()).await;
	(dir, sync, hub)
}

fn msg(content: &str) -> IncomingChatEvent {
	IncomingChatEvent::new(Platform::Twitch, "alice", content)
}

fn timeout_ms(ms: i64) -> SettingsPatch {
	SettingsPatch {
		highlight_timeout: Some(ms),
		..SettingsPatch::default()
	}
}

async fn subscribe_past_settings(hub: &HighlightHubHandle) -> mpsc::Receiver<HighlightOutbound> {
	let mut rx = hub.subscribe().await.unwrap();
	match rx.recv().await.unwrap() {
		HighlightOutbound::Settings(_) => {}
		other => panic!("expected Settings first, got: {other:?}"),
	}
	rx
}

fn shown_content(item: HighlightOutbound) -> String {
	match item {
		HighlightOutbound::HighlightMessage(ev) => ev.content,
		other => panic!("expected HighlightMessage, got: {other:?}"),
	}
}

#[tokio::test(start_paused = true)]
async fn second_highlight_replaces_first_and_restarts_timer() {
	let (_dir, _sync, hub) = start(timeout_ms(1_000)).await;
	let mut rx = subscribe_past_settings(&hub).await;

	hub.highlight(msg("first")).unwrap();
	assert_eq!(shown_content(rx.recv().await.unwrap()), "first");

	tokio::time::advance(Duration::from_millis(600)).await;
	let started = Instant::now();
	hub.highlight(msg("second")).unwrap();
	assert_eq!(shown_content(rx.recv().await.unwrap()), "second");
	assert_eq!(hub.current().await.unwrap().map(|e| e.content), Some("second".to_string()));

	// Only the second highlight's timer remains.
	assert!(matches!(rx.recv().await.unwrap(), HighlightOutbound::ClearHighlight));
	assert!(started.elapsed() >= Duration::from_millis(1_000));

	let extra = timeout(Duration::from_secs(30), rx.recv()).await;
	assert!(extra.is_err(), "unexpected extra emission: {extra:?}");
}

#[tokio::test(start_paused = true)]
async fn timeout_emits_exactly_one_clear() {
	let (_dir, _sync, hub) = start(SettingsPatch::default()).await;
	let mut rx = subscribe_past_settings(&hub).await;

	let started = Instant::now();
	hub.highlight(msg("hello")).unwrap();
	assert_eq!(shown_content(rx.recv().await.unwrap()), "hello");

	assert!(matches!(rx.recv().await.unwrap(), HighlightOutbound::ClearHighlight));
	assert!(started.elapsed() >= Duration::from_millis(10_000));
	assert!(hub.current().await.unwrap().is_none());

	let extra = timeout(Duration::from_secs(60), rx.recv()).await;
	assert!(extra.is_err(), "unexpected extra emission: {extra:?}");
}

#[tokio::test(start_paused = true)]
async fn clear_while_empty_emits_nothing() {
	let (_dir, _sync, hub) = start(SettingsPatch::default()).await;
	let mut rx = subscribe_past_settings(&hub).await;

	hub.clear().unwrap();
	assert!(hub.current().await.unwrap().is_none());

	let got = timeout(Duration::from_millis(100), rx.recv()).await;
	assert!(got.is_err(), "clear on empty state emitted: {got:?}");
}

#[tokio::test(start_paused = true)]
async fn explicit_clear_cancels_timer() {
	let (_dir, _sync, hub) = start(timeout_ms(500)).await;
	let mut rx = subscribe_past_settings(&hub).await;

	hub.highlight(msg("bye")).unwrap();
	shown_content(rx.recv().await.unwrap());
	hub.clear().unwrap();
	assert!(matches!(rx.recv().await.unwrap(), HighlightOutbound::ClearHighlight));

	let extra = timeout(Duration::from_secs(5), rx.recv()).await;
	assert!(extra.is_err(), "cancelled timer still fired: {extra:?}");
}

#[tokio::test(start_paused = true)]
async fn settings_change_reschedules_pending_dismiss() {
	let (_dir, sync, hub) = start(SettingsPatch::default()).await;
	let mut rx = subscribe_past_settings(&hub).await;

	hub.highlight(msg("watch this")).unwrap();
	shown_content(rx.recv().await.unwrap());

	tokio::time::advance(Duration::from_millis(100)).await;
	let changed_at = Instant::now();
	sync.update_json(json!({ "highlightTimeout": 500 })).await.unwrap();

	match rx.recv().await.unwrap() {
		HighlightOutbound::Settings(s) => assert_eq!(s.highlight_timeout, 500),
		other => panic!("expected Settings push, got: {other:?}"),
	}

	assert!(matches!(rx.recv().await.unwrap(), HighlightOutbound::ClearHighlight));
	let waited = changed_at.elapsed();
	assert!(waited >= Duration::from_millis(500), "cleared too early: {waited:?}");
	assert!(waited < Duration::from_millis(1_000), "cleared too late: {waited:?}");
	assert!(hub.current().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn non_positive_timeout_never_dismisses() {
	let (_dir, _sync, hub) = start(timeout_ms(0)).await;
	let mut rx = subscribe_past_settings(&hub).await;

	hub.highlight(msg("sticky")).unwrap();
	shown_content(rx.recv().await.unwrap());

	let got = timeout(Duration::from_secs(3_600), rx.recv()).await;
	assert!(got.is_err(), "highlight dismissed despite disabled timeout: {got:?}");
	assert!(hub.current().await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn late_joiner_sees_current_highlight() {
	let (_dir, _sync, hub) = start(timeout_ms(0)).await;
	hub.highlight(msg("already up")).unwrap();
	assert!(hub.current().await.unwrap().is_some());

	let mut rx = subscribe_past_settings(&hub).await;
	assert_eq!(shown_content(rx.recv().await.unwrap()), "already up");
}

#[tokio::test(start_paused = true)]
async fn invalid_highlight_is_ignored() {
	let (_dir, _sync, hub) = start(SettingsPatch::default()).await;
	let mut rx = subscribe_past_settings(&hub).await;

	hub.highlight(IncomingChatEvent {
		platform: Some("twitch".to_string()),
		content: Some("no user".to_string()),
		..IncomingChatEvent::default()
	})
	.unwrap();

	assert!(hub.current().await.unwrap().is_none());
	let got = timeout(Duration::from_millis(100), rx.recv()).await;
	assert!(got.is_err(), "invalid highlight emitted: {got:?}");
}

#[tokio::test(start_paused = true)]
async fn unrelated_settings_do_not_push_to_popouts() {
	let (_dir, sync, hub) = start(SettingsPatch::default()).await;
	let mut rx = subscribe_past_settings(&hub).await;

	sync.update_json(json!({ "messageLimit": 5 })).await.unwrap();
	assert_eq!(hub.settings().await.unwrap().highlight_timeout, 10_000);

	let got = timeout(Duration::from_millis(100), rx.recv()).await;
	assert!(got.is_err(), "unexpected push: {got:?}");
}
