#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_WS_BIND: &str = "127.0.0.1:18210";
pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:18211";

/// Default config path: `~/.chatrelay/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".chatrelay").join("config.toml"))
}

fn default_data_dir() -> PathBuf {
	match dirs::home_dir() {
		Some(home) => home.join(".chatrelay").join("data"),
		None => PathBuf::from(".chatrelay").join("data"),
	}
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub storage: StorageSettings,
	pub hubs: HubSettings,
	pub dev: DevSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// WebSocket listener (host:port).
	pub ws_bind: String,
	/// Settings/chat-source HTTP API and health probes (host:port).
	pub http_bind: String,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
	/// Directory holding `settings.json` and `chat-sources.json`.
	pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct HubSettings {
	pub subscriber_queue_capacity: usize,
	pub command_channel_capacity: usize,
	pub settings_fanout_capacity: usize,
	/// Log per-hub subscribe and drop events at debug level.
	pub fanout_debug_logs: bool,
}

#[derive(Debug, Clone)]
pub struct DevSettings {
	/// Replace the twitch extension source with a synthetic one.
	pub enable_demo_source: bool,
	pub demo_interval: Duration,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self::from_file(FileConfig::default())
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	storage: FileStorageSettings,

	#[serde(default)]
	hubs: FileHubSettings,

	#[serde(default)]
	dev: FileDevSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	ws_bind: Option<String>,
	http_bind: Option<String>,
	metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileStorageSettings {
	data_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileHubSettings {
	subscriber_queue_capacity: Option<usize>,
	command_channel_capacity: Option<usize>,
	settings_fanout_capacity: Option<usize>,
	fanout_debug_logs: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDevSettings {
	enable_demo_source: Option<bool>,
	demo_interval_ms: Option<u64>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		Self {
			server: ServerSettings {
				ws_bind: non_empty(file.server.ws_bind).unwrap_or_else(|| DEFAULT_WS_BIND.to_string()),
				http_bind: non_empty(file.server.http_bind).unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string()),
				metrics_bind: non_empty(file.server.metrics_bind),
			},
			storage: StorageSettings {
				data_dir: non_empty(file.storage.data_dir)
					.map(PathBuf::from)
					.unwrap_or_else(default_data_dir),
			},
			hubs: HubSettings {
				subscriber_queue_capacity: file.hubs.subscriber_queue_capacity.filter(|v| *v > 0).unwrap_or(256),
				command_channel_capacity: file.hubs.command_channel_capacity.filter(|v| *v > 0).unwrap_or(1_024),
				settings_fanout_capacity: file.hubs.settings_fanout_capacity.filter(|v| *v > 0).unwrap_or(64),
				fanout_debug_logs: file.hubs.fanout_debug_logs.unwrap_or(false),
			},
			dev: DevSettings {
				enable_demo_source: file.dev.enable_demo_source.unwrap_or(false),
				demo_interval: Duration::from_millis(file.dev.demo_interval_ms.filter(|v| *v > 0).unwrap_or(1_500)),
			},
		}
	}
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn env_string(key: &str) -> Option<String> {
	std::env::var(key).ok().and_then(|v| non_empty(Some(v)))
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Some(v) = env_string("CHATRELAY_WS_BIND") {
		cfg.server.ws_bind = v;
		info!("server config: ws_bind overridden by env");
	}

	if let Some(v) = env_string("CHATRELAY_HTTP_BIND") {
		cfg.server.http_bind = v;
		info!("server config: http_bind overridden by env");
	}

	if let Some(v) = env_string("CHATRELAY_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = env_string("CHATRELAY_DATA_DIR") {
		cfg.storage.data_dir = PathBuf::from(v);
		info!("server config: data_dir overridden by env");
	}

	for (key, slot) in [
		("CHATRELAY_SUBSCRIBER_QUEUE_CAPACITY", &mut cfg.hubs.subscriber_queue_capacity),
		("CHATRELAY_COMMAND_CHANNEL_CAPACITY", &mut cfg.hubs.command_channel_capacity),
		("CHATRELAY_SETTINGS_FANOUT_CAPACITY", &mut cfg.hubs.settings_fanout_capacity),
	] {
		if let Some(v) = env_string(key) {
			match v.parse::<usize>() {
				Ok(n) if n > 0 => {
					*slot = n;
					info!(key, value = n, "server config: hub capacity overridden by env");
				}
				_ => warn!(key, value = %v, "ignoring invalid capacity override"),
			}
		}
	}

	if let Some(v) = env_string("CHATRELAY_FANOUT_DEBUG_LOGS") {
		match parse_env_bool(&v) {
			Some(enabled) => {
				cfg.hubs.fanout_debug_logs = enabled;
				info!(enabled, "server config: fanout_debug_logs overridden by env");
			}
			None => warn!(value = %v, "ignoring invalid CHATRELAY_FANOUT_DEBUG_LOGS"),
		}
	}

	if let Some(v) = env_string("CHATRELAY_ENABLE_DEMO_SOURCE") {
		match parse_env_bool(&v) {
			Some(enabled) => {
				cfg.dev.enable_demo_source = enabled;
				info!(enabled, "server config: enable_demo_source overridden by env");
			}
			None => warn!(value = %v, "ignoring invalid CHATRELAY_ENABLE_DEMO_SOURCE"),
		}
	}

	if let Some(v) = env_string("CHATRELAY_DEMO_INTERVAL_MS")
		&& let Ok(ms) = v.parse::<u64>()
		&& ms > 0
	{
		cfg.dev.demo_interval = Duration::from_millis(ms);
		info!(ms, "server config: demo_interval overridden by env");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_file_uses_defaults() {
		let cfg: FileConfig = toml::from_str("").unwrap();
		let cfg = ServerConfig::from_file(cfg);
		assert_eq!(cfg.server.ws_bind, DEFAULT_WS_BIND);
		assert_eq!(cfg.server.http_bind, DEFAULT_HTTP_BIND);
		assert!(cfg.server.metrics_bind.is_none());
		assert_eq!(cfg.hubs.subscriber_queue_capacity, 256);
		assert!(!cfg.hubs.fanout_debug_logs);
		assert!(!cfg.dev.enable_demo_source);
		assert!(cfg.storage.data_dir.ends_with("data"));
	}

	#[test]
	fn file_values_are_read() {
		let cfg: FileConfig = toml::from_str(
			r#"
			[server]
			ws_bind = "0.0.0.0:9000"
			metrics_bind = "  "

			[storage]
			data_dir = "/var/lib/chatrelay"

			[hubs]
			subscriber_queue_capacity = 8
			command_channel_capacity = 0
			fanout_debug_logs = true

			[dev]
			enable_demo_source = true
			demo_interval_ms = 200
			"#,
		)
		.unwrap();
		let cfg = ServerConfig::from_file(cfg);
		assert_eq!(cfg.server.ws_bind, "0.0.0.0:9000");
		assert!(cfg.server.metrics_bind.is_none());
		assert_eq!(cfg.storage.data_dir, PathBuf::from("/var/lib/chatrelay"));
		assert_eq!(cfg.hubs.subscriber_queue_capacity, 8);
		assert_eq!(cfg.hubs.command_channel_capacity, 1_024);
		assert!(cfg.hubs.fanout_debug_logs);
		assert!(cfg.dev.enable_demo_source);
		assert_eq!(cfg.dev.demo_interval, Duration::from_millis(200));
	}

	#[test]
	fn missing_file_is_not_an_error() {
		let dir = tempfile::tempdir().unwrap();
		assert!(read_toml_if_exists(&dir.path().join("config.toml")).unwrap().is_none());
	}

	#[test]
	fn env_bool_parsing() {
		assert_eq!(parse_env_bool(" YES "), Some(true));
		assert_eq!(parse_env_bool("off"), Some(false));
		assert_eq!(parse_env_bool("maybe"), None);
	}
}
