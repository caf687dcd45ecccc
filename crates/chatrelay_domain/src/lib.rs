#![forbid(unsafe_code)]

pub mod settings;
pub mod sources;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use settings::{HighlightSettings, Settings, SettingsPatch, ViewSettings, ViewSettingsPatch};
pub use sources::{ChatSourceConfig, ChatSourceStatus, SecretString, SourceConfig, SourceStatus};

/// Chat platforms a message can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
	Twitch,
	YouTube,
	Kick,
	/// Any platform without dedicated handling.
	#[serde(other)]
	Other,
}

impl Platform {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Platform::Twitch => "twitch",
			Platform::YouTube => "youtube",
			Platform::Kick => "kick",
			Platform::Other => "other",
		}
	}
}

impl fmt::Display for Platform {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Platform {
	type Err = ValidationError;

	/// Unknown names map to `Other`; only blank input is an error.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ValidationError::MissingField("platform"));
		}

		Ok(match s.to_ascii_lowercase().as_str() {
			"twitch" => Platform::Twitch,
			"youtube" | "you_tube" | "yt" => Platform::YouTube,
			"kick" => Platform::Kick,
			_ => Platform::Other,
		})
	}
}

/// Boundary validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
	#[error("missing required field: {0}")]
	MissingField(&'static str),

	#[error("invalid payload: {0}")]
	InvalidPayload(String),

	#[error("{field} out of range: {detail}")]
	OutOfRange {
		field: &'static str,
		detail: String,
	},

	#[error("{platform}: {field} is required when the source is enabled")]
	MissingSourceField {
		platform: Platform,
		field: &'static str,
	},
}

/// Relay-level error taxonomy.
#[derive(Debug, Error)]
pub enum RelayError {
	#[error(transparent)]
	Validation(#[from] ValidationError),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("peer unavailable: {0}")]
	Transport(String),

	#[error("persistence failed: {0}")]
	Persistence(String),
}

/// One accepted chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
	pub id: String,
	pub platform: Platform,
	pub username: String,
	/// HTML-safe rich text as produced by the scraper.
	pub content: String,
	#[serde(default)]
	pub color: String,
	/// Badge image references in display order.
	#[serde(default)]
	pub badges: Vec<String>,
	/// RFC 3339 timestamp.
	pub timestamp: String,
}

/// Chat event as received from a producer; every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncomingChatEvent {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub platform: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub color: Option<String>,
	pub badges: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<String>,
}

impl IncomingChatEvent {
	/// Minimal event with the three mandatory fields.
	pub fn new(platform: Platform, username: impl Into<String>, content: impl Into<String>) -> Self {
		Self {
			platform: Some(platform.as_str().to_string()),
			username: Some(username.into()),
			content: Some(content.into()),
			..Self::default()
		}
	}

	/// Validate mandatory fields and assign `id`/`timestamp` when absent.
	pub fn normalize(self) -> Result<ChatEvent, ValidationError> {
		let platform = non_blank(self.platform).ok_or(ValidationError::MissingField("platform"))?;
		let platform = Platform::from_str(&platform)?;
		let username = non_blank(self.username).ok_or(ValidationError::MissingField("username"))?;
		let content = non_blank(self.content).ok_or(ValidationError::MissingField("content"))?;

		Ok(ChatEvent {
			id: non_blank(self.id).unwrap_or_else(new_message_id),
			platform,
			username,
			content,
			color: self.color.unwrap_or_default(),
			badges: self.badges,
			timestamp: non_blank(self.timestamp).unwrap_or_else(now_rfc3339),
		})
	}
}

impl From<ChatEvent> for IncomingChatEvent {
	fn from(ev: ChatEvent) -> Self {
		Self {
			id: Some(ev.id),
			platform: Some(ev.platform.as_str().to_string()),
			username: Some(ev.username),
			content: Some(ev.content),
			color: Some(ev.color),
			badges: ev.badges,
			timestamp: Some(ev.timestamp),
		}
	}
}

fn non_blank(v: Option<String>) -> Option<String> {
	v.filter(|s| !s.trim().is_empty())
}

/// Fresh process-unique message id.
pub fn new_message_id() -> String {
	uuid::Uuid::new_v4().to_string()
}

/// Current UTC time as an RFC 3339 string with millisecond precision.
pub fn now_rfc3339() -> String {
	chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
