//! Capture devices and the tracks opened on them.
//!
//! A [`DeviceEnvironment`] is whatever the platform offers for enumerating
//! and opening microphones and cameras. Opening yields a [`LocalTrack`], an
//! owned handle that releases its device when stopped or dropped.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use uuid::Uuid;

use crate::errors::DeviceError;
use crate::events::{FacingMode, TrackInfo, TrackKind};

/// A capture device as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDeviceInfo {
    pub device_id: String,
    pub kind: TrackKind,
    pub label: String,
    /// Facing mode reported by the platform, if any.
    pub facing_mode: Option<FacingMode>,
}

impl MediaDeviceInfo {
    pub fn new(kind: TrackKind, device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            label: label.into(),
            facing_mode: None,
        }
    }

    pub fn facing(mut self, mode: FacingMode) -> Self {
        self.facing_mode = Some(mode);
        self
    }
}

/// Platform access to capture devices.
///
/// An empty `device_id` asks for the system default of that kind.
pub trait DeviceEnvironment: Send + Sync + 'static {
    fn enumerate(
        &self,
        kind: TrackKind,
    ) -> impl Future<Output = Result<Vec<MediaDeviceInfo>, DeviceError>> + Send;

    fn open(
        &self,
        kind: TrackKind,
        device_id: &str,
    ) -> impl Future<Output = Result<LocalTrack, DeviceError>> + Send;
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// A live capture track. The device is released exactly once, on [`stop`]
/// or on drop, whichever comes first.
///
/// [`stop`]: LocalTrack::stop
pub struct LocalTrack {
    id: Uuid,
    kind: TrackKind,
    device_id: String,
    label: String,
    facing_mode: Option<FacingMode>,
    release: Option<ReleaseFn>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            device_id: device_id.into(),
            label: label.into(),
            facing_mode: None,
            release: None,
        }
    }

    pub fn with_facing_mode(mut self, mode: Option<FacingMode>) -> Self {
        self.facing_mode = mode;
        self
    }

    /// Hook run when the device is released.
    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Reported facing mode, else a guess from the device label.
    pub fn facing_mode(&self) -> FacingMode {
        self.facing_mode
            .unwrap_or_else(|| facing_mode_from_label(&self.label))
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id.to_string(),
            kind: self.kind,
            device_id: self.device_id.clone(),
            label: self.label.clone(),
        }
    }

    pub fn stop(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::debug!("releasing {:?} track on {:?}", self.kind, self.device_id);
            release();
        }
    }
}

impl Drop for LocalTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("device_id", &self.device_id)
            .field("label", &self.label)
            .field("live", &self.release.is_some())
            .finish()
    }
}

/// Guess which way a camera faces from its label.
pub fn facing_mode_from_label(label: &str) -> FacingMode {
    let label = label.to_lowercase();
    if ["front", "user", "facetime"].iter().any(|k| label.contains(k)) {
        FacingMode::User
    } else if ["back", "rear", "environment"].iter().any(|k| label.contains(k)) {
        FacingMode::Environment
    } else {
        FacingMode::Unknown
    }
}

#[derive(Default)]
struct MemoryState {
    devices: Vec<MediaDeviceInfo>,
    failures: HashMap<String, DeviceError>,
    latency: HashMap<String, Duration>,
    hanging: HashSet<String>,
    opened: Vec<String>,
}

/// In-process device environment with scriptable failures and latency.
#[derive(Clone, Default)]
pub struct MemoryDevices {
    state: Arc<Mutex<MemoryState>>,
    active: Arc<AtomicUsize>,
}

impl MemoryDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// One default microphone and one front camera.
    pub fn with_defaults() -> Self {
        let devices = Self::new();
        devices.plug(MediaDeviceInfo::new(TrackKind::Audio, "mic-1", "Built-in Microphone"));
        devices.plug(
            MediaDeviceInfo::new(TrackKind::Video, "cam-1", "Front Camera")
                .facing(FacingMode::User),
        );
        devices
    }

    pub fn plug(&self, info: MediaDeviceInfo) {
        let mut state = self.lock();
        state.devices.retain(|d| d.device_id != info.device_id);
        state.devices.push(info);
    }

    pub fn unplug(&self, device_id: &str) {
        self.lock().devices.retain(|d| d.device_id != device_id);
    }

    /// Make every open of `device_id` fail with `error`.
    pub fn fail(&self, device_id: &str, error: DeviceError) {
        self.lock().failures.insert(device_id.to_string(), error);
    }

    pub fn recover(&self, device_id: &str) {
        let mut state = self.lock();
        state.failures.remove(device_id);
        state.hanging.remove(device_id);
    }

    pub fn set_latency(&self, device_id: &str, latency: Duration) {
        self.lock().latency.insert(device_id.to_string(), latency);
    }

    /// Make opens of `device_id` never complete.
    pub fn hang(&self, device_id: &str) {
        self.lock().hanging.insert(device_id.to_string());
    }

    /// Number of tracks currently holding a device.
    pub fn active_tracks(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Device ids that were successfully opened, in order.
    pub fn opened(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DeviceEnvironment for MemoryDevices {
    async fn enumerate(&self, kind: TrackKind) -> Result<Vec<MediaDeviceInfo>, DeviceError> {
        Ok(self
            .lock()
            .devices
            .iter()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect())
    }

    async fn open(&self, kind: TrackKind, device_id: &str) -> Result<LocalTrack, DeviceError> {
        let (info, failure, latency, hanging) = {
            let state = self.lock();
            let info = state
                .devices
                .iter()
                .find(|d| d.kind == kind && (device_id.is_empty() || d.device_id == device_id))
                .cloned();
            let Some(info) = info else {
                let wanted = if device_id.is_empty() { "default" } else { device_id };
                return Err(DeviceError::NotFound(wanted.to_string()));
            };
            let failure = state.failures.get(&info.device_id).cloned();
            let latency = state.latency.get(&info.device_id).copied();
            let hanging = state.hanging.contains(&info.device_id);
            (info, failure, latency, hanging)
        };

        if hanging {
            std::future::pending::<()>().await;
        }
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        self.lock().opened.push(info.device_id.clone());
        self.active.fetch_add(1, Ordering::SeqCst);
        let active = self.active.clone();
        Ok(LocalTrack::new(kind, info.device_id, info.label)
            .with_facing_mode(info.facing_mode)
            .on_release(move || {
                active.fetch_sub(1, Ordering::SeqCst);
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facing_mode_guessed_from_label() {
        assert_eq!(facing_mode_from_label("FaceTime HD Camera"), FacingMode::User);
        assert_eq!(facing_mode_from_label("Back Camera"), FacingMode::Environment);
        assert_eq!(
            facing_mode_from_label("camera2 0, facing environment"),
            FacingMode::Environment
        );
        assert_eq!(facing_mode_from_label("USB Webcam"), FacingMode::Unknown);
    }

    #[test]
    fn reported_facing_mode_wins_over_label() {
        let track = LocalTrack::new(TrackKind::Video, "cam", "Back Camera")
            .with_facing_mode(Some(FacingMode::User));
        assert_eq!(track.facing_mode(), FacingMode::User);
    }

    #[test]
    fn track_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let mut track = LocalTrack::new(TrackKind::Audio, "mic", "Mic").on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        track.stop();
        track.stop();
        drop(track);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_id_opens_first_device_of_kind() {
        let devices = MemoryDevices::with_defaults();
        let track = devices.open(TrackKind::Video, "").await.unwrap();
        assert_eq!(track.device_id(), "cam-1");
        assert_eq!(track.facing_mode(), FacingMode::User);
        assert_eq!(devices.active_tracks(), 1);
        drop(track);
        assert_eq!(devices.active_tracks(), 0);
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let devices = MemoryDevices::with_defaults();
        let err = devices.open(TrackKind::Audio, "mic-9").await.unwrap_err();
        assert_eq!(err, DeviceError::NotFound("mic-9".into()));

        let empty = MemoryDevices::new();
        let err = empty.open(TrackKind::Video, "").await.unwrap_err();
        assert_eq!(err, DeviceError::NotFound("default".into()));
    }

    #[tokio::test]
    async fn scripted_failure_and_recovery() {
        let devices = MemoryDevices::with_defaults();
        devices.fail("cam-1", DeviceError::Busy("cam-1".into()));
        assert_eq!(
            devices.open(TrackKind::Video, "").await.unwrap_err(),
            DeviceError::Busy("cam-1".into())
        );
        devices.recover("cam-1");
        assert!(devices.open(TrackKind::Video, "cam-1").await.is_ok());
    }

    #[tokio::test]
    async fn enumerate_filters_by_kind() {
        let devices = MemoryDevices::with_defaults();
        devices.plug(MediaDeviceInfo::new(TrackKind::Audio, "mic-2", "Headset"));
        let mics = devices.enumerate(TrackKind::Audio).await.unwrap();
        assert_eq!(mics.len(), 2);
        devices.unplug("mic-2");
        let mics = devices.enumerate(TrackKind::Audio).await.unwrap();
        assert_eq!(mics.len(), 1);
    }
}
