#![forbid(unsafe_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Display configuration shared by all hubs and display clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
	/// History bound.
	pub message_limit: usize,
	/// Auto-dismiss delay in milliseconds; `<= 0` disables auto-dismiss.
	pub highlight_timeout: i64,
	pub highlight_color: String,
	pub enable_sound: bool,
	/// Notification volume in `[0, 1]`.
	pub sound_volume: f64,
	pub obs_view: ViewSettings,
	pub streamer_view: ViewSettings,
}

/// Per display-surface visual configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSettings {
	pub font_size: u32,
	pub text_color: String,
	pub background_color: String,
	pub chat_width: u32,
	pub chat_height: u32,
	pub message_opacity: f64,
	pub message_border_radius: u32,
	pub message_padding: u32,
	pub enable_drop_shadow: bool,
	pub show_timestamps: bool,
	pub show_platforms: bool,
	pub show_message_background: bool,
	pub show_badges: bool,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			message_limit: 50,
			highlight_timeout: 10_000,
			highlight_color: "#ff0000".to_string(),
			enable_sound: true,
			sound_volume: 0.5,
			obs_view: ViewSettings::obs_default(),
			streamer_view: ViewSettings::streamer_default(),
		}
	}
}

impl ViewSettings {
	/// Transparent overlay tuned for OBS browser sources.
	pub fn obs_default() -> Self {
		Self {
			font_size: 16,
			text_color: "#ffffff".to_string(),
			background_color: "rgba(0, 0, 0, 0.5)".to_string(),
			chat_width: 400,
			chat_height: 600,
			message_opacity: 0.8,
			message_border_radius: 8,
			message_padding: 8,
			enable_drop_shadow: true,
			show_timestamps: false,
			show_platforms: true,
			show_message_background: true,
			show_badges: true,
		}
	}

	pub fn streamer_default() -> Self {
		Self {
			font_size: 14,
			text_color: "#efeff1".to_string(),
			background_color: "#18181b".to_string(),
			chat_width: 500,
			chat_height: 800,
			message_opacity: 1.0,
			message_border_radius: 4,
			message_padding: 6,
			enable_drop_shadow: false,
			show_timestamps: true,
			show_platforms: true,
			show_message_background: true,
			show_badges: true,
		}
	}

	/// Field-wise merge: provided values win, absent values are kept.
	pub fn apply(&mut self, patch: &ViewSettingsPatch) {
		set(&mut self.font_size, &patch.font_size);
		set(&mut self.text_color, &patch.text_color);
		set(&mut self.background_color, &patch.background_color);
		set(&mut self.chat_width, &patch.chat_width);
		set(&mut self.chat_height, &patch.chat_height);
		set(&mut self.message_opacity, &patch.message_opacity);
		set(&mut self.message_border_radius, &patch.message_border_radius);
		set(&mut self.message_padding, &patch.message_padding);
		set(&mut self.enable_drop_shadow, &patch.enable_drop_shadow);
		set(&mut self.show_timestamps, &patch.show_timestamps);
		set(&mut self.show_platforms, &patch.show_platforms);
		set(&mut self.show_message_background, &patch.show_message_background);
		set(&mut self.show_badges, &patch.show_badges);
	}
}

impl Settings {
	/// Deep merge of `patch` over `self`.
	///
	/// Precedence is patch over current value; nested view objects are merged
	/// field by field so a patch touching one view field keeps its siblings.
	pub fn apply(&mut self, patch: &SettingsPatch) {
		set(&mut self.message_limit, &patch.message_limit);
		set(&mut self.highlight_timeout, &patch.highlight_timeout);
		set(&mut self.highlight_color, &patch.highlight_color);
		set(&mut self.enable_sound, &patch.enable_sound);
		set(&mut self.sound_volume, &patch.sound_volume);
		if let Some(view) = &patch.obs_view {
			self.obs_view.apply(view);
		}
		if let Some(view) = &patch.streamer_view {
			self.streamer_view.apply(view);
		}
	}

	/// Non-mutating variant of [`Settings::apply`].
	pub fn merged(&self, patch: &SettingsPatch) -> Settings {
		let mut out = self.clone();
		out.apply(patch);
		out
	}

	/// Defaults with a persisted document layered on top, one field at a time.
	///
	/// Fields that fail to parse or validate are skipped and named in the
	/// returned list (`obsView.messageOpacity` style); the rest still apply.
	/// Only a non-object document is an error.
	pub fn from_persisted(value: serde_json::Value) -> Result<(Settings, Vec<String>), ValidationError> {
		let serde_json::Value::Object(map) = value else {
			return Err(ValidationError::InvalidPayload(
				"settings document must be a JSON object".to_string(),
			));
		};

		let mut settings = Settings::default();
		let mut skipped = Vec::new();
		for (key, v) in map {
			let fields: Vec<(String, serde_json::Value)> = match v {
				serde_json::Value::Object(view) if matches!(key.as_str(), "obsView" | "streamerView") => view
					.into_iter()
					.map(|(field, fv)| (format!("{key}.{field}"), serde_json::json!({ key.as_str(): { field: fv } })))
					.collect(),
				other => vec![(key.clone(), serde_json::json!({ key.as_str(): other }))],
			};

			for (name, single) in fields {
				match SettingsPatch::from_json(single) {
					Ok(patch) => settings.apply(&patch),
					Err(_) => skipped.push(name),
				}
			}
		}

		Ok((settings, skipped))
	}

	/// Auto-dismiss delay, `None` when disabled.
	pub fn highlight_timeout(&self) -> Option<Duration> {
		timeout_from_ms(self.highlight_timeout)
	}
}

fn set<T: Clone>(dst: &mut T, src: &Option<T>) {
	if let Some(v) = src {
		*dst = v.clone();
	}
}

pub(crate) fn timeout_from_ms(ms: i64) -> Option<Duration> {
	(ms > 0).then(|| Duration::from_millis(ms as u64))
}

/// Partial settings update. Unknown keys are ignored on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message_limit: Option<usize>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub highlight_timeout: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub highlight_color: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub enable_sound: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub sound_volume: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub obs_view: Option<ViewSettingsPatch>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub streamer_view: Option<ViewSettingsPatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewSettingsPatch {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub font_size: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text_color: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub background_color: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub chat_width: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub chat_height: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message_opacity: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message_border_radius: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message_padding: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub enable_drop_shadow: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub show_timestamps: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub show_platforms: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub show_message_background: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub show_badges: Option<bool>,
}

impl SettingsPatch {
	/// Parse and validate an untyped payload.
	pub fn from_json(value: serde_json::Value) -> Result<Self, ValidationError> {
		if !value.is_object() {
			return Err(ValidationError::InvalidPayload(
				"settings payload must be a JSON object".to_string(),
			));
		}
		let patch: SettingsPatch =
			serde_json::from_value(value).map_err(|e| ValidationError::InvalidPayload(e.to_string()))?;
		patch.validate()?;
		Ok(patch)
	}

	/// Range checks on the provided fields.
	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.message_limit == Some(0) {
			return Err(ValidationError::OutOfRange {
				field: "messageLimit",
				detail: "must be at least 1".to_string(),
			});
		}
		if let Some(v) = self.sound_volume {
			check_unit_interval("soundVolume", v)?;
		}
		for view in [&self.obs_view, &self.streamer_view].into_iter().flatten() {
			if let Some(v) = view.message_opacity {
				check_unit_interval("messageOpacity", v)?;
			}
		}
		Ok(())
	}

	pub fn is_empty(&self) -> bool {
		*self == SettingsPatch::default()
	}

	/// True when any field the highlight hub acts on is present.
	pub fn touches_highlight(&self) -> bool {
		self.highlight_timeout.is_some() || self.enable_sound.is_some() || self.sound_volume.is_some()
	}
}

fn check_unit_interval(field: &'static str, v: f64) -> Result<(), ValidationError> {
	if !(0.0..=1.0).contains(&v) {
		return Err(ValidationError::OutOfRange {
			field,
			detail: format!("{v} is outside [0, 1]"),
		});
	}
	Ok(())
}

impl From<&Settings> for SettingsPatch {
	fn from(s: &Settings) -> Self {
		Self {
			message_limit: Some(s.message_limit),
			highlight_timeout: Some(s.highlight_timeout),
			highlight_color: Some(s.highlight_color.clone()),
			enable_sound: Some(s.enable_sound),
			sound_volume: Some(s.sound_volume),
			obs_view: Some(ViewSettingsPatch::from(&s.obs_view)),
			streamer_view: Some(ViewSettingsPatch::from(&s.streamer_view)),
		}
	}
}

impl From<&ViewSettings> for ViewSettingsPatch {
	fn from(v: &ViewSettings) -> Self {
		Self {
			font_size: Some(v.font_size),
			text_color: Some(v.text_color.clone()),
			background_color: Some(v.background_color.clone()),
			chat_width: Some(v.chat_width),
			chat_height: Some(v.chat_height),
			message_opacity: Some(v.message_opacity),
			message_border_radius: Some(v.message_border_radius),
			message_padding: Some(v.message_padding),
			enable_drop_shadow: Some(v.enable_drop_shadow),
			show_timestamps: Some(v.show_timestamps),
			show_platforms: Some(v.show_platforms),
			show_message_background: Some(v.show_message_background),
			show_badges: Some(v.show_badges),
		}
	}
}

/// The subset of settings the highlight popout depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightSettings {
	pub highlight_timeout: i64,
	pub enable_sound: bool,
	pub sound_volume: f64,
}

impl Default for HighlightSettings {
	fn default() -> Self {
		HighlightSettings::from(&Settings::default())
	}
}

impl HighlightSettings {
	/// Merge the recognized fields; returns true when the timeout changed.
	pub fn apply(&mut self, patch: &SettingsPatch) -> bool {
		let before = self.highlight_timeout;
		set(&mut self.highlight_timeout, &patch.highlight_timeout);
		set(&mut self.enable_sound, &patch.enable_sound);
		set(&mut self.sound_volume, &patch.sound_volume);
		before != self.highlight_timeout
	}

	pub fn highlight_timeout(&self) -> Option<Duration> {
		timeout_from_ms(self.highlight_timeout)
	}
}

impl From<&Settings> for HighlightSettings {
	fn from(s: &Settings) -> Self {
		Self {
			highlight_timeout: s.highlight_timeout,
			enable_sound: s.enable_sound,
			sound_volume: s.sound_volume,
		}
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;
	use serde_json::json;

	use super::*;

	#[test]
	fn nested_patch_keeps_sibling_fields() {
		let mut s = Settings::default();
		let patch = SettingsPatch::from_json(json!({ "obsView": { "fontSize": 22 } })).unwrap();
		s.apply(&patch);

		assert_eq!(s.obs_view.font_size, 22);
		let mut expected = ViewSettings::obs_default();
		expected.font_size = 22;
		assert_eq!(s.obs_view, expected);
		assert_eq!(s.streamer_view, ViewSettings::streamer_default());
	}

	#[test]
	fn unknown_keys_are_ignored() {
		let patch = SettingsPatch::from_json(json!({ "messageLimit": 10, "theme": "dark" })).unwrap();
		assert_eq!(patch.message_limit, Some(10));
		let s = Settings::default().merged(&patch);
		assert_eq!(s.message_limit, 10);
		assert_eq!(s.highlight_color, Settings::default().highlight_color);
	}

	#[test]
	fn non_object_payload_is_rejected() {
		let err = SettingsPatch::from_json(json!([1, 2, 3])).unwrap_err();
		assert!(matches!(err, ValidationError::InvalidPayload(_)));
		assert!(SettingsPatch::from_json(json!("x")).is_err());
	}

	#[test]
	fn out_of_range_values_are_rejected() {
		assert!(SettingsPatch::from_json(json!({ "soundVolume": 1.5 })).is_err());
		assert!(SettingsPatch::from_json(json!({ "messageLimit": 0 })).is_err());
		assert!(SettingsPatch::from_json(json!({ "streamerView": { "messageOpacity": -0.1 } })).is_err());
		assert!(SettingsPatch::from_json(json!({ "messageLimit": "many" })).is_err());
	}

	#[test]
	fn defaults_fill_only_missing_keys() {
		let persisted = SettingsPatch::from_json(json!({
			"highlightTimeout": 3000,
			"streamerView": { "showBadges": false }
		}))
		.unwrap();
		let s = Settings::default().merged(&persisted);
		assert_eq!(s.highlight_timeout, 3000);
		assert!(!s.streamer_view.show_badges);
		assert_eq!(s.message_limit, Settings::default().message_limit);
		assert_eq!(s.streamer_view.font_size, ViewSettings::streamer_default().font_size);
	}

	#[test]
	fn persisted_document_skips_only_invalid_fields() {
		let (s, skipped) = Settings::from_persisted(json!({
			"soundVolume": 1.2,
			"messageLimit": 12,
			"highlightTimeout": "soon",
			"obsView": { "messageOpacity": 7, "fontSize": 30 },
			"theme": "dark"
		}))
		.unwrap();

		assert_eq!(s.message_limit, 12);
		assert_eq!(s.obs_view.font_size, 30);
		assert_eq!(s.sound_volume, Settings::default().sound_volume);
		assert_eq!(s.highlight_timeout, Settings::default().highlight_timeout);
		assert_eq!(s.obs_view.message_opacity, ViewSettings::obs_default().message_opacity);

		let mut skipped = skipped;
		skipped.sort();
		assert_eq!(skipped, vec!["highlightTimeout", "obsView.messageOpacity", "soundVolume"]);

		assert!(Settings::from_persisted(json!([1])).is_err());
	}

	#[test]
	fn settings_serialize_with_camel_case_keys() {
		let v = serde_json::to_value(Settings::default()).unwrap();
		assert!(v.get("messageLimit").is_some());
		assert!(v["obsView"].get("showMessageBackground").is_some());
	}

	#[test]
	fn highlight_subset_reports_timeout_changes() {
		let mut hs = HighlightSettings::default();
		assert!(!hs.apply(&SettingsPatch {
			enable_sound: Some(false),
			..SettingsPatch::default()
		}));
		assert!(!hs.enable_sound);
		assert!(hs.apply(&SettingsPatch {
			highlight_timeout: Some(500),
			..SettingsPatch::default()
		}));
		assert_eq!(hs.highlight_timeout(), Some(Duration::from_millis(500)));
		hs.apply(&SettingsPatch {
			highlight_timeout: Some(0),
			..SettingsPatch::default()
		});
		assert_eq!(hs.highlight_timeout(), None);
	}

	fn view_patch() -> impl Strategy<Value = ViewSettingsPatch> {
		(
			proptest::option::of(8u32..64),
			proptest::option::of(any::<bool>()),
			proptest::option::of(100u32..2000),
		)
			.prop_map(|(font_size, show_badges, chat_width)| ViewSettingsPatch {
				font_size,
				show_badges,
				chat_width,
				..ViewSettingsPatch::default()
			})
	}

	fn settings_patch() -> impl Strategy<Value = SettingsPatch> {
		(
			proptest::option::of(1usize..500),
			proptest::option::of(-1000i64..60_000),
			proptest::option::of(any::<bool>()),
			proptest::option::of(view_patch()),
			proptest::option::of(view_patch()),
		)
			.prop_map(
				|(message_limit, highlight_timeout, enable_sound, obs_view, streamer_view)| SettingsPatch {
					message_limit,
					highlight_timeout,
					enable_sound,
					obs_view,
					streamer_view,
					..SettingsPatch::default()
				},
			)
	}

	proptest! {
		#[test]
		fn applying_twice_equals_applying_once(p in settings_patch()) {
			let once = Settings::default().merged(&p);
			let twice = once.merged(&p);
			prop_assert_eq!(once, twice);
		}

		#[test]
		fn later_patch_wins_over_earlier(a in settings_patch(), b in settings_patch()) {
			let s = Settings::default().merged(&a).merged(&b);
			if let Some(limit) = b.message_limit {
				prop_assert_eq!(s.message_limit, limit);
			} else if let Some(limit) = a.message_limit {
				prop_assert_eq!(s.message_limit, limit);
			}
			if let Some(font) = b.obs_view.as_ref().and_then(|v| v.font_size) {
				prop_assert_eq!(s.obs_view.font_size, font);
			}
		}

		#[test]
		fn full_snapshot_patch_reproduces_settings(p in settings_patch()) {
			let s = Settings::default().merged(&p);
			let restored = Settings::default().merged(&SettingsPatch::from(&s));
			prop_assert_eq!(s, restored);
		}
	}
}
