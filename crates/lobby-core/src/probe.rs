use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::devices::{DeviceEnvironment, LocalTrack};
use crate::errors::DeviceError;
use crate::events::{DeviceFailure, FacingMode, TrackKind};

/// What to capture for one media kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureRequest {
    Disabled,
    /// An empty `device_id` asks for the system default.
    Enabled { device_id: String },
}

impl CaptureRequest {
    pub fn from_choice(enabled: bool, device_id: &str) -> Self {
        if enabled {
            CaptureRequest::Enabled {
                device_id: device_id.to_string(),
            }
        } else {
            CaptureRequest::Disabled
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub audio: CaptureRequest,
    pub video: CaptureRequest,
}

/// Result of one probe run, tagged with the generation that requested it.
#[derive(Debug)]
pub struct ProbeOutcome {
    generation: u64,
    tracks: Vec<LocalTrack>,
    failures: Vec<DeviceFailure>,
}

/// Acquires preview tracks for the latest requested [`ProbeConfig`].
///
/// Every new config tears down the previous capture before acquisition of
/// the new one starts. Outcomes arrive on the channel returned by
/// [`DeviceProbe::new`] and must be fed back through [`DeviceProbe::settle`],
/// which drops anything requested by a superseded config.
pub struct DeviceProbe<E> {
    devices: Arc<E>,
    timeout: Duration,
    generation: u64,
    requested: Option<ProbeConfig>,
    active: Vec<LocalTrack>,
    in_flight: Option<JoinHandle<()>>,
    outcomes: mpsc::UnboundedSender<ProbeOutcome>,
}

impl<E: DeviceEnvironment> DeviceProbe<E> {
    pub fn new(
        devices: Arc<E>,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ProbeOutcome>) {
        let (outcomes, rx) = mpsc::unbounded_channel();
        let probe = Self {
            devices,
            timeout,
            generation: 0,
            requested: None,
            active: Vec::new(),
            in_flight: None,
            outcomes,
        };
        (probe, rx)
    }

    /// Request capture for `config`. Returns `false` when `config` is
    /// already the current request.
    pub fn start(&mut self, config: ProbeConfig) -> bool {
        if self.requested.as_ref() == Some(&config) {
            tracing::debug!("probe config unchanged, not restarting");
            return false;
        }

        self.release();
        self.generation += 1;
        self.requested = Some(config.clone());

        if config.audio == CaptureRequest::Disabled && config.video == CaptureRequest::Disabled {
            tracing::info!("probe {}: nothing to capture", self.generation);
            return true;
        }

        tracing::info!("probe {}: starting {config:?}", self.generation);
        let generation = self.generation;
        let devices = self.devices.clone();
        let timeout = self.timeout;
        let outcomes = self.outcomes.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let (audio, video) = join(
                acquire(&*devices, TrackKind::Audio, config.audio, timeout),
                acquire(&*devices, TrackKind::Video, config.video, timeout),
            )
            .await;

            let mut outcome = ProbeOutcome {
                generation,
                tracks: Vec::new(),
                failures: Vec::new(),
            };
            for (track, failures) in [audio, video] {
                outcome.tracks.extend(track);
                outcome.failures.extend(failures);
            }
            // A closed channel means the owner is gone; the tracks drop here.
            let _ = outcomes.send(outcome);
        }));
        true
    }

    /// Attach an outcome if it answers the current request.
    ///
    /// Returns the device failures to report, or `None` for a stale outcome,
    /// whose tracks are released immediately.
    pub fn settle(&mut self, outcome: ProbeOutcome) -> Option<Vec<DeviceFailure>> {
        if outcome.generation != self.generation {
            tracing::debug!(
                "discarding stale probe {} (current {})",
                outcome.generation,
                self.generation
            );
            return None;
        }
        self.in_flight = None;
        self.active = outcome.tracks;
        tracing::info!(
            "probe {} settled: {} track(s), {} failure(s)",
            self.generation,
            self.active.len(),
            outcome.failures.len()
        );
        Some(outcome.failures)
    }

    /// Release every device and forget the current request.
    pub fn stop(&mut self) {
        self.release();
        self.generation += 1;
        self.requested = None;
    }

    pub fn is_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn requested(&self) -> Option<&ProbeConfig> {
        self.requested.as_ref()
    }

    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.active.iter().find(|t| t.kind() == kind)
    }

    /// Facing mode of the active camera, `Unknown` without one.
    pub fn facing_mode(&self) -> FacingMode {
        self.track(TrackKind::Video)
            .map(LocalTrack::facing_mode)
            .unwrap_or(FacingMode::Unknown)
    }

    fn release(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
        self.active.clear();
    }
}

impl<E> Drop for DeviceProbe<E> {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

async fn open_within<E: DeviceEnvironment>(
    devices: &E,
    kind: TrackKind,
    device_id: &str,
    timeout: Duration,
) -> Result<LocalTrack, DeviceError> {
    tokio::time::timeout(timeout, devices.open(kind, device_id))
        .await
        .map_err(|_| DeviceError::Timeout(timeout.as_millis() as u64))?
}

/// Open one kind, falling back to the system default when a remembered
/// device has disappeared.
async fn acquire<E: DeviceEnvironment>(
    devices: &E,
    kind: TrackKind,
    request: CaptureRequest,
    timeout: Duration,
) -> (Option<LocalTrack>, Vec<DeviceFailure>) {
    let CaptureRequest::Enabled { device_id } = request else {
        return (None, Vec::new());
    };
    let failure = |error| DeviceFailure {
        source: kind.source(),
        error,
    };

    match open_within(devices, kind, &device_id, timeout).await {
        Ok(track) => (Some(track), Vec::new()),
        Err(DeviceError::NotFound(missing)) if !device_id.is_empty() => {
            tracing::warn!("{kind:?} device {missing} not found, using default");
            let mut failures = vec![failure(DeviceError::NotFound(missing))];
            match open_within(devices, kind, "", timeout).await {
                Ok(track) => (Some(track), failures),
                Err(e) => {
                    failures.push(failure(e));
                    (None, failures)
                }
            }
        }
        Err(e) => (None, vec![failure(e)]),
    }
}
