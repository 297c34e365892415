use std::sync::{Arc, RwLock};

use crate::choices::UserChoices;
use crate::errors::DeviceError;
use crate::gate::Phase;

/// Events emitted by the pre-join session to UI listeners.
#[derive(Debug, Clone)]
pub enum LobbyEvent {
    ChoicesChanged(UserChoices),
    ValidityChanged(bool),
    PhaseChanged(Phase),
    PreviewChanged(PreviewState),
    DeviceError(DeviceFailure),
    /// The snapshot was handed to the room-entry handler.
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// The capture source feeding this kind of track on the pre-join screen.
    pub fn source(self) -> TrackSource {
        match self {
            TrackKind::Audio => TrackSource::Microphone,
            TrackKind::Video => TrackSource::Camera,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenShare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
    Unknown,
}

/// Payload of the device error sink: which capture failed and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFailure {
    pub source: TrackSource,
    pub error: DeviceError,
}

/// Summary of a preview track attached to the pre-join screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    pub device_id: String,
    pub label: String,
}

/// What the preview area currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewState {
    pub audio: Option<TrackInfo>,
    pub video: Option<TrackInfo>,
    pub facing_mode: FacingMode,
    /// A probe has been requested and has not settled yet.
    pub pending: bool,
    pub show_placeholder: bool,
}

impl Default for PreviewState {
    fn default() -> Self {
        Self {
            audio: None,
            video: None,
            facing_mode: FacingMode::Unknown,
            pending: false,
            show_placeholder: true,
        }
    }
}

/// Trait for receiving events from the session.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait LobbyEventListener: Send + Sync {
    fn on_event(&self, event: LobbyEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn LobbyEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn LobbyEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn emit(&self, event: LobbyEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
