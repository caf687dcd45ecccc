#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use chatrelay_domain::Platform;
use chatrelay_protocol::DEFAULT_MAX_FRAME_SIZE;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::ChatSource;
use crate::adapters::demo::DemoSource;
use crate::adapters::extension::ExtensionSource;
use crate::config::ServerConfig;
use crate::server::chat_hub::{ChatHubConfig, ChatHubHandle, spawn_chat_hub};
use crate::server::dashboard::{DashboardConfig, DashboardHandle, spawn_dashboard};
use crate::server::fanout::FanoutConfig;
use crate::server::highlight_hub::{HighlightHubConfig, HighlightHubHandle, spawn_highlight_hub};
use crate::server::http::{HealthState, HttpApiState, serve_http};
use crate::server::settings_store::{SETTINGS_FILE_NAME, SettingsStore, SettingsSync};
use crate::server::source_manager::{CHAT_SOURCES_FILE_NAME, SourceManager, SourceManagerConfig};
use crate::server::ws::{WsContext, serve_ws};

/// A running relay: hubs, sources and both listeners.
#[derive(Debug)]
pub struct Relay {
	pub ws_addr: SocketAddr,
	pub http_addr: SocketAddr,
	pub health: HealthState,
	pub settings: SettingsSync,
	pub chat: ChatHubHandle,
	pub highlight: HighlightHubHandle,
	pub dashboard: DashboardHandle,
	pub sources: Arc<SourceManager>,
	tasks: Vec<JoinHandle<()>>,
}

fn build_sources(cfg: &ServerConfig) -> Vec<Box<dyn ChatSource>> {
	let mut sources: Vec<Box<dyn ChatSource>> = Vec::new();

	if cfg.dev.enable_demo_source {
		info!(interval = ?cfg.dev.demo_interval, "starting demo source for twitch (enabled by config)");
		sources.push(Box::new(
			DemoSource::new(Platform::Twitch).with_emit_interval(cfg.dev.demo_interval),
		));
	} else {
		sources.push(Box::new(ExtensionSource::new(Platform::Twitch)));
	}
	sources.push(Box::new(ExtensionSource::new(Platform::YouTube)));
	sources.push(Box::new(ExtensionSource::new(Platform::Kick)));

	sources
}

/// Load persisted state, start every hub and source, then serve on the
/// given listeners. The relay is marked ready once both listeners run.
pub async fn start_relay(cfg: &ServerConfig, ws: TcpListener, http: TcpListener) -> anyhow::Result<Relay> {
	let ws_addr = ws.local_addr().context("ws listener local_addr")?;
	let http_addr = http.local_addr().context("http listener local_addr")?;

	let fanout = FanoutConfig {
		subscriber_queue_capacity: cfg.hubs.subscriber_queue_capacity,
		debug_logs: cfg.hubs.fanout_debug_logs,
	};

	let data_dir = &cfg.storage.data_dir;
	info!(data_dir = %data_dir.display(), "starting relay");

	let store = SettingsStore::load(data_dir.join(SETTINGS_FILE_NAME));
	let settings = SettingsSync::new(store, cfg.hubs.settings_fanout_capacity);

	let mut tasks = Vec::new();

	let (highlight, task) = spawn_highlight_hub(
		HighlightHubConfig {
			command_channel_capacity: cfg.hubs.command_channel_capacity,
			fanout: fanout.clone(),
		},
		settings.clone(),
	)
	.await;
	tasks.push(task);

	let (chat, task) = spawn_chat_hub(
		ChatHubConfig {
			command_channel_capacity: cfg.hubs.command_channel_capacity,
			fanout: fanout.clone(),
		},
		settings.clone(),
		highlight.clone(),
	)
	.await;
	tasks.push(task);

	let sources = Arc::new(SourceManager::start(
		build_sources(cfg),
		chat.clone(),
		data_dir.join(CHAT_SOURCES_FILE_NAME),
		SourceManagerConfig::default(),
	));

	let (dashboard, task) = spawn_dashboard(
		DashboardConfig {
			fanout,
			..DashboardConfig::default()
		},
		settings.clone(),
		Arc::clone(&sources),
	)
	.await;
	tasks.push(task);

	let ctx = WsContext {
		chat: chat.clone(),
		highlight: highlight.clone(),
		dashboard: dashboard.clone(),
		settings: settings.clone(),
		sources: Arc::clone(&sources),
		max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
	};
	tasks.push(tokio::spawn(async move {
		if let Err(e) = serve_ws(ws, ctx).await {
			warn!(error = %e, "websocket listener stopped");
		}
	}));

	let health = HealthState::new();
	let http_state = HttpApiState {
		dashboard: dashboard.clone(),
		health: health.clone(),
	};
	tasks.push(tokio::spawn(async move {
		if let Err(e) = serve_http(http, http_state).await {
			warn!(error = %e, "http listener stopped");
		}
	}));

	health.mark_ready();
	info!(%ws_addr, %http_addr, "relay ready");

	Ok(Relay {
		ws_addr,
		http_addr,
		health,
		settings,
		chat,
		highlight,
		dashboard,
		sources,
		tasks,
	})
}

impl Relay {
	/// Stop sources, then the listeners and hubs.
	pub async fn shutdown(self) {
		self.sources.shutdown().await;
		for task in self.tasks {
			task.abort();
		}
		info!("relay stopped");
	}
}
