use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::probe::{CaptureRequest, ProbeConfig};

/// The user's current pre-join choices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserChoices {
    pub display_name: String,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    /// Empty means the system default microphone.
    pub audio_device_id: String,
    /// Empty means the system default camera.
    pub video_device_id: String,
    /// Session only, never persisted.
    #[serde(skip)]
    pub effect: Option<EffectHandle>,
}

impl Default for UserChoices {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            audio_enabled: true,
            video_enabled: true,
            audio_device_id: String::new(),
            video_device_id: String::new(),
            effect: None,
        }
    }
}

impl UserChoices {
    /// The only hard gate on submission: a non-blank display name.
    pub fn is_valid(&self) -> bool {
        !self.display_name.trim().is_empty()
    }

    /// Capture configuration the preview should reflect.
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            audio: CaptureRequest::from_choice(self.audio_enabled, &self.audio_device_id),
            video: CaptureRequest::from_choice(self.video_enabled, &self.video_device_id),
        }
    }
}

/// A partial set of choices: one layer of the resolution stack.
///
/// This is also the on-disk shape of the preference store, hence the
/// camelCase keys and `username`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceLayer {
    #[serde(default, rename = "username", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_device_id: Option<String>,
}

impl ChoiceLayer {
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Fill every unset field of `self` from `lower`.
    fn over(self, lower: &ChoiceLayer) -> ChoiceLayer {
        ChoiceLayer {
            display_name: self.display_name.or_else(|| lower.display_name.clone()),
            audio_enabled: self.audio_enabled.or(lower.audio_enabled),
            video_enabled: self.video_enabled.or(lower.video_enabled),
            audio_device_id: self.audio_device_id.or_else(|| lower.audio_device_id.clone()),
            video_device_id: self.video_device_id.or_else(|| lower.video_device_id.clone()),
        }
    }
}

/// Merge the layers into a full snapshot.
///
/// Precedence: explicit override > persisted preference > caller default >
/// library default.
pub fn resolve_choices(
    overrides: &ChoiceLayer,
    persisted: &ChoiceLayer,
    defaults: &ChoiceLayer,
) -> UserChoices {
    let merged = overrides.clone().over(persisted).over(defaults);
    let base = UserChoices::default();
    UserChoices {
        display_name: merged.display_name.unwrap_or(base.display_name),
        audio_enabled: merged.audio_enabled.unwrap_or(base.audio_enabled),
        video_enabled: merged.video_enabled.unwrap_or(base.video_enabled),
        audio_device_id: merged.audio_device_id.unwrap_or(base.audio_device_id),
        video_device_id: merged.video_device_id.unwrap_or(base.video_device_id),
        effect: None,
    }
}

/// A video post-processor applied to the local camera track.
pub trait VideoProcessor: Send + Sync {
    fn name(&self) -> &str;
}

/// Opaque handle to the active video effect.
///
/// Two handles are equal only when they point at the same processor.
#[derive(Clone)]
pub struct EffectHandle(Arc<dyn VideoProcessor>);

impl EffectHandle {
    pub fn new(processor: impl VideoProcessor + 'static) -> Self {
        Self(Arc::new(processor))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }
}

impl PartialEq for EffectHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EffectHandle").field(&self.name()).finish()
    }
}

/// Gaussian background blur.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundBlur {
    pub radius: u8,
}

impl Default for BackgroundBlur {
    fn default() -> Self {
        Self { radius: 10 }
    }
}

impl VideoProcessor for BackgroundBlur {
    fn name(&self) -> &str {
        "background-blur"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> UserChoices {
        UserChoices {
            display_name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn validity_requires_non_blank_name() {
        assert!(named("Alice").is_valid());
        assert!(named("  Bob ").is_valid());
        assert!(!named("").is_valid());
        assert!(!named("   ").is_valid());
        assert!(!named("\t\n").is_valid());
    }

    #[test]
    fn device_state_never_affects_validity() {
        let choices = UserChoices {
            display_name: "Alice".into(),
            audio_enabled: false,
            video_enabled: false,
            audio_device_id: "gone".into(),
            video_device_id: String::new(),
            effect: Some(EffectHandle::new(BackgroundBlur::default())),
        };
        assert!(choices.is_valid());
    }

    #[test]
    fn library_defaults_apply_when_every_layer_is_empty() {
        let choices = resolve_choices(
            &ChoiceLayer::default(),
            &ChoiceLayer::default(),
            &ChoiceLayer::default(),
        );
        assert_eq!(choices, UserChoices::default());
        assert!(choices.audio_enabled);
        assert!(choices.video_enabled);
        assert!(!choices.is_valid());
    }

    #[test]
    fn persisted_beats_caller_default() {
        let defaults = ChoiceLayer::default().with_display_name("Alice");
        let persisted = ChoiceLayer {
            display_name: Some("Ally".into()),
            video_enabled: Some(false),
            ..Default::default()
        };
        let choices = resolve_choices(&ChoiceLayer::default(), &persisted, &defaults);
        assert_eq!(choices.display_name, "Ally");
        assert!(!choices.video_enabled);
        assert!(choices.audio_enabled);
    }

    #[test]
    fn override_beats_everything() {
        let defaults = ChoiceLayer {
            audio_device_id: Some("mic-default".into()),
            ..Default::default()
        };
        let persisted = ChoiceLayer {
            audio_device_id: Some("mic-stored".into()),
            audio_enabled: Some(true),
            ..Default::default()
        };
        let overrides = ChoiceLayer {
            audio_enabled: Some(false),
            ..Default::default()
        };
        let choices = resolve_choices(&overrides, &persisted, &defaults);
        assert!(!choices.audio_enabled);
        assert_eq!(choices.audio_device_id, "mic-stored");
    }

    #[test]
    fn layer_uses_preference_keys_on_disk() {
        let layer = ChoiceLayer {
            display_name: Some("Eve".into()),
            audio_device_id: Some("mic-1".into()),
            video_enabled: Some(false),
            ..Default::default()
        };
        let json = serde_json::to_value(&layer).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "username": "Eve",
                "audioDeviceId": "mic-1",
                "videoEnabled": false,
            })
        );
    }

    #[test]
    fn effect_handles_compare_by_identity() {
        let blur = EffectHandle::new(BackgroundBlur::default());
        let same = blur.clone();
        let other = EffectHandle::new(BackgroundBlur::default());
        assert_eq!(blur, same);
        assert_ne!(blur, other);
        assert_eq!(blur.name(), "background-blur");
    }

    #[test]
    fn disabled_kinds_do_not_request_capture() {
        let choices = UserChoices {
            display_name: "Alice".into(),
            audio_enabled: false,
            video_device_id: "cam-2".into(),
            ..Default::default()
        };
        let config = choices.probe_config();
        assert_eq!(config.audio, CaptureRequest::Disabled);
        assert_eq!(
            config.video,
            CaptureRequest::Enabled {
                device_id: "cam-2".into()
            }
        );
    }
}
