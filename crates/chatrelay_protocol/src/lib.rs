#![forbid(unsafe_code)]

pub mod framing;

use core::fmt;
use core::str::FromStr;

use chatrelay_domain::{ChatEvent, ChatSourceStatus, HighlightSettings, IncomingChatEvent, Settings};
use serde::{Deserialize, Serialize};

pub use framing::{DEFAULT_MAX_FRAME_SIZE, FramingError, MAX_SERVER_FRAME_SIZE, decode_frame, encode_frame, encode_frame_default};

/// Publish/subscribe namespaces, one per hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
	Chat,
	Highlight,
	Dashboard,
}

impl Namespace {
	pub const fn as_str(self) -> &'static str {
		match self {
			Namespace::Chat => "chat",
			Namespace::Highlight => "highlight",
			Namespace::Dashboard => "dashboard",
		}
	}

	/// WebSocket request path for this namespace.
	pub const fn path(self) -> &'static str {
		match self {
			Namespace::Chat => "/chat",
			Namespace::Highlight => "/highlight",
			Namespace::Dashboard => "/dashboard",
		}
	}

	/// Resolve a request path (`/chat`, `/chat/`, `/chat?x=y`).
	pub fn from_path(path: &str) -> Option<Self> {
		let path = path.split(['?', '#']).next().unwrap_or("");
		let name = path.trim_matches('/');
		name.parse().ok()
	}
}

impl fmt::Display for Namespace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Namespace {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"chat" => Ok(Namespace::Chat),
			"highlight" => Ok(Namespace::Highlight),
			"dashboard" => Ok(Namespace::Dashboard),
			other => Err(format!("unknown namespace: {other}")),
		}
	}
}

/// Events accepted on the `chat` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ChatInbound {
	ChatMessage(IncomingChatEvent),
	/// Highlight the History entry with this id.
	HighlightMessage(String),
	ClearHighlight,
	GetSettings,
	/// Partial settings; validated by the settings store.
	SettingsUpdated(serde_json::Value),
}

/// Events emitted on the `chat` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ChatOutbound {
	Settings(Settings),
	ChatHistory(Vec<ChatEvent>),
	ChatMessage(ChatEvent),
	/// Full merged settings; clients reload on receipt.
	SettingsUpdated(Settings),
	Lagged { dropped: u64 },
}

/// Events accepted on the `highlight` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum HighlightInbound {
	HighlightMessage(IncomingChatEvent),
	ClearHighlight,
	GetSettings,
	SettingsUpdated(serde_json::Value),
}

/// Events emitted on the `highlight` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum HighlightOutbound {
	Settings(HighlightSettings),
	HighlightMessage(ChatEvent),
	ClearHighlight,
	Lagged { dropped: u64 },
}

/// Events accepted on the `dashboard` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum DashboardInbound {
	GetSettings,
	UpdateSettings(serde_json::Value),
	GetChatSources,
	UpdateChatSources(serde_json::Value),
}

/// Events emitted on the `dashboard` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum DashboardOutbound {
	Settings(Settings),
	SettingsUpdated(Settings),
	ChatSourceStatus(ChatSourceStatus),
	OperationResult(ApiResponse),
	Lagged { dropped: u64 },
}

/// Request/response body: `{success, settings|status|error}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub settings: Option<Settings>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<ChatSourceStatus>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl ApiResponse {
	pub fn settings(settings: Settings) -> Self {
		Self {
			success: true,
			settings: Some(settings),
			..Self::default()
		}
	}

	pub fn status(status: ChatSourceStatus) -> Self {
		Self {
			success: true,
			status: Some(status),
			..Self::default()
		}
	}

	pub fn error(msg: impl Into<String>) -> Self {
		Self {
			success: false,
			error: Some(msg.into()),
			..Self::default()
		}
	}

	/// Failure that still carries the authoritative in-memory settings.
	pub fn error_with_settings(msg: impl Into<String>, settings: Settings) -> Self {
		Self {
			settings: Some(settings),
			..Self::error(msg)
		}
	}
}

#[cfg(test)]
mod tests {
	use chatrelay_domain::Platform;
	use serde_json::json;

	use super::*;

	#[test]
	fn namespace_from_path() {
		assert_eq!(Namespace::from_path("/chat"), Some(Namespace::Chat));
		assert_eq!(Namespace::from_path("/highlight/"), Some(Namespace::Highlight));
		assert_eq!(Namespace::from_path("/dashboard?token=x"), Some(Namespace::Dashboard));
		assert_eq!(Namespace::from_path("/"), None);
		assert_eq!(Namespace::from_path("/metrics"), None);
	}

	#[test]
	fn unit_events_decode_with_or_without_data() {
		let a: ChatInbound = serde_json::from_value(json!({ "event": "clear-highlight" })).unwrap();
		assert_eq!(a, ChatInbound::ClearHighlight);
		let b: ChatInbound = serde_json::from_value(json!({ "event": "get-settings", "data": null })).unwrap();
		assert_eq!(b, ChatInbound::GetSettings);
	}

	#[test]
	fn chat_message_with_partial_fields_decodes() {
		let ev: ChatInbound = serde_json::from_value(json!({
			"event": "chat-message",
			"data": { "platform": "twitch", "username": "alice", "content": "hi" }
		}))
		.unwrap();
		match ev {
			ChatInbound::ChatMessage(m) => {
				let normalized = m.normalize().unwrap();
				assert_eq!(normalized.platform, Platform::Twitch);
			}
			other => panic!("unexpected event: {other:?}"),
		}
	}

	#[test]
	fn outbound_uses_kebab_case_event_names() {
		let v = serde_json::to_value(HighlightOutbound::ClearHighlight).unwrap();
		assert_eq!(v["event"], "clear-highlight");
		let v = serde_json::to_value(ChatOutbound::Lagged { dropped: 3 }).unwrap();
		assert_eq!(v["event"], "lagged");
		assert_eq!(v["data"]["dropped"], 3);
	}

	#[test]
	fn api_response_shapes() {
		let v = serde_json::to_value(ApiResponse::error("bad")).unwrap();
		assert_eq!(v, json!({ "success": false, "error": "bad" }));
		let v = serde_json::to_value(ApiResponse::settings(Settings::default())).unwrap();
		assert_eq!(v["success"], true);
		assert!(v["settings"]["obsView"].is_object());
	}
}
