use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::choices::ChoiceLayer;
use crate::controls::{ControlBarControls, Dialogs, Permissions, VisibleControls};
use crate::errors::LobbyError;
use crate::preferences::PreferenceStore;
use crate::session::SessionConfig;

const CONFIG_FILE: &str = "lobby.json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LobbyConfig {
    /// Write choices to the preference store. When false the store is
    /// in-memory only.
    pub persist_choices: bool,
    pub probe_timeout_ms: u64,
    /// Name suggested when nothing is persisted, e.g. from the account.
    pub display_name_default: Option<String>,
    pub feedback_url: Option<Url>,
    pub controls: ControlBarControls,
    pub supports_screen_share: bool,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            persist_choices: true,
            probe_timeout_ms: 10_000,
            display_name_default: None,
            feedback_url: None,
            controls: ControlBarControls::default(),
            supports_screen_share: true,
        }
    }
}

impl LobbyConfig {
    /// Read `lobby.json` from `data_dir`, falling back to defaults.
    pub fn load(data_dir: impl AsRef<Path>) -> Self {
        match Self::load_strict(data_dir) {
            Ok(config) => config,
            Err(LobbyError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!("using default lobby config: {e}");
                Self::default()
            }
        }
    }

    pub fn load_strict(data_dir: impl AsRef<Path>) -> Result<Self, LobbyError> {
        let contents = std::fs::read_to_string(data_dir.as_ref().join(CONFIG_FILE))?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|e| LobbyError::Config(e.to_string()))?;
        if config.probe_timeout_ms == 0 {
            return Err(LobbyError::Config("probe_timeout_ms must be positive".into()));
        }
        Ok(config)
    }

    pub fn save(&self, data_dir: impl AsRef<Path>) -> Result<(), LobbyError> {
        let dir = data_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let json =
            serde_json::to_string_pretty(self).map_err(|e| LobbyError::Config(e.to_string()))?;
        std::fs::write(dir.join(CONFIG_FILE), json)?;
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut defaults = ChoiceLayer::default();
        if let Some(name) = &self.display_name_default {
            defaults = defaults.with_display_name(name.clone());
        }
        SessionConfig {
            defaults,
            overrides: ChoiceLayer::default(),
            probe_timeout: self.probe_timeout(),
        }
    }

    pub fn preference_store(&self, data_dir: impl AsRef<Path>) -> PreferenceStore {
        if self.persist_choices {
            PreferenceStore::open(data_dir)
        } else {
            PreferenceStore::disabled()
        }
    }

    pub fn visible_controls(&self, permissions: Option<&Permissions>) -> VisibleControls {
        VisibleControls::resolve(&self.controls, permissions, self.supports_screen_share)
    }

    pub fn dialogs(&self) -> Dialogs {
        Dialogs::new(self.feedback_url.clone())
    }
}
