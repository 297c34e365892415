use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::choices::{ChoiceLayer, EffectHandle, UserChoices, resolve_choices};
use crate::devices::{DeviceEnvironment, LocalTrack, MediaDeviceInfo};
use crate::errors::{DeviceError, LobbyError};
use crate::events::{EventEmitter, LobbyEvent, PreviewState, TrackKind};
use crate::gate::{CommitOutcome, Phase, SubmissionGate};
use crate::preferences::{Preference, PreferenceStore};
use crate::probe::{DeviceProbe, ProbeOutcome};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// How a pre-join session seeds its snapshot.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Caller defaults, e.g. the authenticated user's full name.
    pub defaults: ChoiceLayer,
    /// Values that win over anything persisted.
    pub overrides: ChoiceLayer,
    pub probe_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            defaults: ChoiceLayer::default(),
            overrides: ChoiceLayer::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// The snapshot together with what the UI derives from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoicesState {
    pub choices: UserChoices,
    pub valid: bool,
    pub phase: Phase,
}

impl ChoicesState {
    /// Whether the join action should be enabled.
    pub fn can_submit(&self) -> bool {
        self.valid && self.phase == Phase::Editing
    }
}

#[derive(Debug)]
enum Edit {
    DisplayName(String),
    AudioEnabled(bool),
    VideoEnabled(bool),
    AudioDevice(String),
    VideoDevice(String),
    Effect(Option<EffectHandle>),
}

enum Command {
    Edit(Edit, oneshot::Sender<Result<ChoicesState, LobbyError>>),
    Commit(oneshot::Sender<CommitOutcome>),
    Snapshot(oneshot::Sender<ChoicesState>),
    Close(oneshot::Sender<()>),
}

/// Entry point for the pre-join screen.
pub struct PreJoinSession;

impl PreJoinSession {
    /// Seed the snapshot and start the session task.
    ///
    /// Must be called from within a tokio runtime. The session lives until
    /// [`PreJoinHandle::close`] is called or every handle is dropped.
    pub fn spawn<E: DeviceEnvironment>(
        config: SessionConfig,
        store: Arc<PreferenceStore>,
        devices: Arc<E>,
        emitter: EventEmitter,
        on_submit: impl FnOnce(UserChoices) + Send + 'static,
    ) -> PreJoinHandle<E> {
        let choices = resolve_choices(&config.overrides, &store.load(), &config.defaults);
        tracing::info!("pre-join session seeded: {choices:?}");

        let (probe, outcomes) = DeviceProbe::new(devices.clone(), config.probe_timeout);
        let (commands, rx) = mpsc::unbounded_channel();
        let (preview_tx, preview) = watch::channel(PreviewState::default());

        let mut actor = SessionActor {
            valid: choices.is_valid(),
            choices,
            gate: SubmissionGate::new(on_submit),
            probe,
            store,
            emitter,
            preview: preview_tx,
        };
        actor.emitter.emit(LobbyEvent::ChoicesChanged(actor.choices.clone()));
        actor.emitter.emit(LobbyEvent::ValidityChanged(actor.valid));
        actor.refresh_probe();
        tokio::spawn(actor.run(rx, outcomes));

        PreJoinHandle {
            commands,
            preview,
            devices,
        }
    }
}

/// Cloneable handle to a running pre-join session.
pub struct PreJoinHandle<E> {
    commands: mpsc::UnboundedSender<Command>,
    preview: watch::Receiver<PreviewState>,
    devices: Arc<E>,
}

impl<E> Clone for PreJoinHandle<E> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            preview: self.preview.clone(),
            devices: self.devices.clone(),
        }
    }
}

impl<E: DeviceEnvironment> PreJoinHandle<E> {
    pub async fn set_display_name(
        &self,
        name: impl Into<String>,
    ) -> Result<ChoicesState, LobbyError> {
        self.edit(Edit::DisplayName(name.into())).await
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<ChoicesState, LobbyError> {
        self.edit(Edit::AudioEnabled(enabled)).await
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<ChoicesState, LobbyError> {
        self.edit(Edit::VideoEnabled(enabled)).await
    }

    pub async fn set_audio_device(
        &self,
        device_id: impl Into<String>,
    ) -> Result<ChoicesState, LobbyError> {
        self.edit(Edit::AudioDevice(device_id.into())).await
    }

    pub async fn set_video_device(
        &self,
        device_id: impl Into<String>,
    ) -> Result<ChoicesState, LobbyError> {
        self.edit(Edit::VideoDevice(device_id.into())).await
    }

    /// Set or clear the video effect chosen in the effects dialog.
    pub async fn set_effect(
        &self,
        effect: Option<EffectHandle>,
    ) -> Result<ChoicesState, LobbyError> {
        self.edit(Edit::Effect(effect)).await
    }

    /// The explicit "join" action.
    pub async fn commit(&self) -> Result<CommitOutcome, LobbyError> {
        self.request(Command::Commit).await
    }

    pub async fn snapshot(&self) -> Result<ChoicesState, LobbyError> {
        self.request(Command::Snapshot).await
    }

    pub fn preview(&self) -> PreviewState {
        self.preview.borrow().clone()
    }

    /// Wait until the latest requested probe has settled.
    pub async fn settled_preview(&self) -> Result<PreviewState, LobbyError> {
        let mut preview = self.preview.clone();
        let state = preview
            .wait_for(|p| !p.pending)
            .await
            .map_err(|_| LobbyError::SessionClosed)?;
        Ok(state.clone())
    }

    /// Devices available for the device menu of `kind`.
    pub async fn devices(&self, kind: TrackKind) -> Result<Vec<MediaDeviceInfo>, DeviceError> {
        self.devices.enumerate(kind).await
    }

    /// Tear the session down, releasing every capture device.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn edit(&self, edit: Edit) -> Result<ChoicesState, LobbyError> {
        self.request(|reply| Command::Edit(edit, reply)).await?
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, LobbyError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| LobbyError::SessionClosed)?;
        rx.await.map_err(|_| LobbyError::SessionClosed)
    }
}

/// Owns the snapshot; every edit and probe result goes through here in order.
struct SessionActor<E> {
    choices: UserChoices,
    valid: bool,
    gate: SubmissionGate,
    probe: DeviceProbe<E>,
    store: Arc<PreferenceStore>,
    emitter: EventEmitter,
    preview: watch::Sender<PreviewState>,
}

impl<E: DeviceEnvironment> SessionActor<E> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<ProbeOutcome>,
    ) {
        let closed_by = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close(done)) => break Some(done),
                    Some(command) => self.handle(command),
                    None => break None,
                },
                Some(outcome) = outcomes.recv() => self.on_probe_outcome(outcome),
            }
        };

        self.probe.stop();
        self.publish_preview();
        tracing::info!("pre-join session closed");
        if let Some(done) = closed_by {
            let _ = done.send(());
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Edit(edit, reply) => {
                let _ = reply.send(self.apply(edit));
            }
            Command::Commit(reply) => {
                let _ = reply.send(self.commit());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.state());
            }
            Command::Close(_) => {}
        }
    }

    fn apply(&mut self, edit: Edit) -> Result<ChoicesState, LobbyError> {
        if self.gate.phase() != Phase::Editing {
            tracing::debug!("ignoring {edit:?} after submission");
            return Err(LobbyError::AlreadySubmitted);
        }

        let devices_changed = match edit {
            Edit::DisplayName(name) => {
                self.choices.display_name = name.clone();
                self.store.save(Preference::Username(name));
                false
            }
            Edit::AudioEnabled(enabled) => {
                self.choices.audio_enabled = enabled;
                self.store.save(Preference::AudioEnabled(enabled));
                true
            }
            Edit::VideoEnabled(enabled) => {
                self.choices.video_enabled = enabled;
                self.store.save(Preference::VideoEnabled(enabled));
                true
            }
            Edit::AudioDevice(device_id) => {
                self.choices.audio_device_id = device_id.clone();
                self.store.save(Preference::AudioDeviceId(device_id));
                true
            }
            Edit::VideoDevice(device_id) => {
                self.choices.video_device_id = device_id.clone();
                self.store.save(Preference::VideoDeviceId(device_id));
                true
            }
            Edit::Effect(effect) => {
                self.choices.effect = effect;
                false
            }
        };

        self.emitter.emit(LobbyEvent::ChoicesChanged(self.choices.clone()));
        self.revalidate();
        if devices_changed {
            self.refresh_probe();
        }
        Ok(self.state())
    }

    fn commit(&mut self) -> CommitOutcome {
        let emitter = self.emitter.clone();
        let outcome = self.gate.commit(&self.choices, |phase| {
            emitter.emit(LobbyEvent::PhaseChanged(phase));
        });
        if outcome == CommitOutcome::Submitted {
            // The room takes over the devices from here.
            self.probe.stop();
            self.publish_preview();
            self.emitter.emit(LobbyEvent::Submitted);
        }
        outcome
    }

    fn revalidate(&mut self) {
        let valid = self.choices.is_valid();
        if valid != self.valid {
            self.valid = valid;
            tracing::info!("choices valid: {valid}");
            self.emitter.emit(LobbyEvent::ValidityChanged(valid));
        }
    }

    fn refresh_probe(&mut self) {
        if self.probe.start(self.choices.probe_config()) {
            self.publish_preview();
        }
    }

    fn on_probe_outcome(&mut self, outcome: ProbeOutcome) {
        let Some(failures) = self.probe.settle(outcome) else {
            return;
        };
        for failure in failures {
            tracing::warn!("{:?} device error: {}", failure.source, failure.error);
            self.emitter.emit(LobbyEvent::DeviceError(failure));
        }
        self.publish_preview();
    }

    fn publish_preview(&mut self) {
        let video = self.probe.track(TrackKind::Video).map(LocalTrack::info);
        let state = PreviewState {
            audio: self.probe.track(TrackKind::Audio).map(LocalTrack::info),
            show_placeholder: video.is_none() || !self.choices.video_enabled,
            video,
            facing_mode: self.probe.facing_mode(),
            pending: self.probe.is_pending(),
        };
        if *self.preview.borrow() != state {
            self.preview.send_replace(state.clone());
            self.emitter.emit(LobbyEvent::PreviewChanged(state));
        }
    }

    fn state(&self) -> ChoicesState {
        ChoicesState {
            choices: self.choices.clone(),
            valid: self.valid,
            phase: self.gate.phase(),
        }
    }
}
