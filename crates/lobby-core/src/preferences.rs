use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::choices::ChoiceLayer;

const FILE_NAME: &str = "user-choices.json";

/// A single persisted field with its new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preference {
    AudioDeviceId(String),
    VideoDeviceId(String),
    AudioEnabled(bool),
    VideoEnabled(bool),
    Username(String),
}

impl Preference {
    fn apply(self, layer: &mut ChoiceLayer) {
        match self {
            Preference::AudioDeviceId(id) => layer.audio_device_id = Some(id),
            Preference::VideoDeviceId(id) => layer.video_device_id = Some(id),
            Preference::AudioEnabled(enabled) => layer.audio_enabled = Some(enabled),
            Preference::VideoEnabled(enabled) => layer.video_enabled = Some(enabled),
            Preference::Username(name) => layer.display_name = Some(name),
        }
    }
}

struct StoreState {
    stored: ChoiceLayer,
    file_path: Option<PathBuf>,
    degraded: bool,
}

/// Durable store of the user's last device and name choices.
///
/// Never fails towards its callers: when the backing file cannot be read or
/// written the store degrades for the rest of the process, `load` returns an
/// empty layer and `save` does nothing.
pub struct PreferenceStore {
    state: Mutex<StoreState>,
}

impl PreferenceStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join(FILE_NAME);
        let (stored, degraded) = Self::read(&file_path);
        Self {
            state: Mutex::new(StoreState {
                stored,
                file_path: Some(file_path),
                degraded,
            }),
        }
    }

    /// A store that neither loads nor saves.
    pub fn disabled() -> Self {
        Self {
            state: Mutex::new(StoreState {
                stored: ChoiceLayer::default(),
                file_path: None,
                degraded: false,
            }),
        }
    }

    pub fn load(&self) -> ChoiceLayer {
        let state = self.lock();
        if state.degraded {
            ChoiceLayer::default()
        } else {
            state.stored.clone()
        }
    }

    pub fn save(&self, preference: Preference) {
        let mut state = self.lock();
        let Some(path) = state.file_path.clone() else {
            return;
        };
        if state.degraded {
            tracing::debug!("preference store degraded, dropping {preference:?}");
            return;
        }
        preference.apply(&mut state.stored);
        if let Err(e) = Self::write(&path, &state.stored) {
            tracing::warn!("preference store unavailable, continuing in memory: {e}");
            state.degraded = true;
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.lock().degraded
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(path: &Path) -> (ChoiceLayer, bool) {
        match std::fs::read_to_string(path) {
            Ok(contents) => (serde_json::from_str(&contents).unwrap_or_default(), false),
            Err(e) if e.kind() == ErrorKind::NotFound => (ChoiceLayer::default(), false),
            Err(e) => {
                tracing::warn!("cannot read {}: {e}", path.display());
                (ChoiceLayer::default(), true)
            }
        }
    }

    fn write(path: &Path, stored: &ChoiceLayer) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(stored)?;
        std::fs::write(path, json)
    }
}
