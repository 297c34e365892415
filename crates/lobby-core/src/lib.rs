//! Visio pre-join lobby core logic.
//!
//! Reconciles persisted device and name choices with live edits before a
//! participant enters a room. Pure Rust crate with no platform dependencies;
//! capture devices are reached through [`devices::DeviceEnvironment`].

pub mod choices;
pub mod config;
pub mod controls;
pub mod devices;
pub mod errors;
pub mod events;
pub mod gate;
pub mod preferences;
pub mod probe;
pub mod session;

pub use choices::{BackgroundBlur, ChoiceLayer, EffectHandle, UserChoices, VideoProcessor};
pub use config::LobbyConfig;
pub use controls::{ControlSurface, Dialogs, Permissions, VisibleControls};
pub use devices::{DeviceEnvironment, LocalTrack, MediaDeviceInfo, MemoryDevices};
pub use errors::{DeviceError, LobbyError};
pub use events::{LobbyEvent, LobbyEventListener};
pub use gate::{CommitOutcome, Phase};
pub use preferences::PreferenceStore;
pub use session::{ChoicesState, PreJoinHandle, PreJoinSession, SessionConfig};
