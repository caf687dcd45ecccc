#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Platform, ValidationError};

/// Wrapper that redacts in logs and is never written to disk.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl<'de> Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Connection configuration for one platform.
///
/// Credentials are accepted on input but skipped on serialization, so the
/// persisted document only carries identification fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceConfig {
	pub enabled: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub channel_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub channel_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub live_url: Option<String>,
	#[serde(skip_serializing)]
	pub api_key: Option<SecretString>,
	#[serde(skip_serializing)]
	pub oauth_token: Option<SecretString>,
}

impl SourceConfig {
	/// Identifier the source connects with, if configured.
	pub fn identifier(&self, platform: Platform) -> Option<&str> {
		match platform {
			Platform::YouTube => non_blank(&self.channel_id).or_else(|| non_blank(&self.live_url)),
			_ => non_blank(&self.channel_name),
		}
	}

	/// Reject an enabled source without its required identifier.
	pub fn validate(&self, platform: Platform) -> Result<(), ValidationError> {
		if !self.enabled || self.identifier(platform).is_some() {
			return Ok(());
		}
		let field = match platform {
			Platform::YouTube => "channelId",
			_ => "channelName",
		};
		Err(ValidationError::MissingSourceField { platform, field })
	}

	/// Keep previously supplied credentials when an update omits them.
	pub fn inherit_credentials(&mut self, previous: &SourceConfig) {
		if self.api_key.is_none() {
			self.api_key = previous.api_key.clone();
		}
		if self.oauth_token.is_none() {
			self.oauth_token = previous.oauth_token.clone();
		}
	}
}

fn non_blank(v: &Option<String>) -> Option<&str> {
	v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Per-platform source configuration. Absent platforms are left untouched on update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSourceConfig {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub twitch: Option<SourceConfig>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub youtube: Option<SourceConfig>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub kick: Option<SourceConfig>,
}

impl ChatSourceConfig {
	/// Parse an untyped payload; it must be an object.
	pub fn from_json(value: serde_json::Value) -> Result<Self, ValidationError> {
		if !value.is_object() {
			return Err(ValidationError::InvalidPayload(
				"chat source payload must be a JSON object".to_string(),
			));
		}
		serde_json::from_value(value).map_err(|e| ValidationError::InvalidPayload(e.to_string()))
	}

	pub fn entries(&self) -> impl Iterator<Item = (Platform, &SourceConfig)> {
		[
			(Platform::Twitch, self.twitch.as_ref()),
			(Platform::YouTube, self.youtube.as_ref()),
			(Platform::Kick, self.kick.as_ref()),
		]
		.into_iter()
		.filter_map(|(p, c)| c.map(|c| (p, c)))
	}

	pub fn validate(&self) -> Result<(), ValidationError> {
		for (platform, cfg) in self.entries() {
			cfg.validate(platform)?;
		}
		Ok(())
	}

	pub fn get(&self, platform: Platform) -> Option<&SourceConfig> {
		match platform {
			Platform::Twitch => self.twitch.as_ref(),
			Platform::YouTube => self.youtube.as_ref(),
			Platform::Kick => self.kick.as_ref(),
			Platform::Other => None,
		}
	}

	pub fn set(&mut self, platform: Platform, cfg: SourceConfig) {
		match platform {
			Platform::Twitch => self.twitch = Some(cfg),
			Platform::YouTube => self.youtube = Some(cfg),
			Platform::Kick => self.kick = Some(cfg),
			Platform::Other => {}
		}
	}
}

/// Observed state of one source. Never client-settable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
	pub enabled: bool,
	pub connected: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub channel: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_error: Option<String>,
	/// Connection-method tag (e.g. `extension`, `demo`).
	pub method: String,
}

/// Status of every known source, keyed by platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatSourceStatus(pub BTreeMap<Platform, SourceStatus>);

impl ChatSourceStatus {
	pub fn get(&self, platform: Platform) -> Option<&SourceStatus> {
		self.0.get(&platform)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn enabling_twitch_without_channel_is_rejected() {
		let cfg = ChatSourceConfig::from_json(json!({ "twitch": { "enabled": true, "channelName": "" } })).unwrap();
		let err = cfg.validate().unwrap_err();
		assert_eq!(
			err,
			ValidationError::MissingSourceField {
				platform: Platform::Twitch,
				field: "channelName"
			}
		);
		assert!(err.to_string().contains("channelName"));
	}

	#[test]
	fn youtube_accepts_channel_id_or_live_url() {
		let by_url = ChatSourceConfig::from_json(json!({
			"youtube": { "enabled": true, "liveUrl": "https://youtube.com/watch?v=abc" }
		}))
		.unwrap();
		assert!(by_url.validate().is_ok());

		let neither = ChatSourceConfig::from_json(json!({ "youtube": { "enabled": true } })).unwrap();
		assert!(neither.validate().is_err());
	}

	#[test]
	fn disabled_source_needs_no_identifier() {
		let cfg = ChatSourceConfig::from_json(json!({ "kick": { "enabled": false } })).unwrap();
		assert!(cfg.validate().is_ok());
	}

	#[test]
	fn credentials_are_never_serialized() {
		let cfg = ChatSourceConfig::from_json(json!({
			"twitch": { "enabled": true, "channelName": "alice", "oauthToken": "oauth:secret" }
		}))
		.unwrap();
		assert_eq!(
			cfg.twitch.as_ref().and_then(|t| t.oauth_token.as_ref()).map(|s| s.expose()),
			Some("oauth:secret")
		);
		let out = serde_json::to_string(&cfg).unwrap();
		assert!(!out.contains("secret"));
		assert!(out.contains("alice"));
		assert!(!format!("{cfg:?}").contains("oauth:secret"));
	}

	#[test]
	fn status_serializes_keyed_by_platform() {
		let mut status = ChatSourceStatus::default();
		status.0.insert(
			Platform::YouTube,
			SourceStatus {
				enabled: true,
				connected: false,
				method: "extension".to_string(),
				..SourceStatus::default()
			},
		);
		let v = serde_json::to_value(&status).unwrap();
		assert_eq!(v["youtube"]["method"], "extension");
	}
}
