pub mod console;

use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use lobby_core::devices::DeviceEnvironment;
use lobby_core::events::{EventEmitter, TrackKind, TrackSource};
use lobby_core::{
    BackgroundBlur, ChoicesState, CommitOutcome, ControlSurface, EffectHandle, LobbyConfig,
    LobbyError, LobbyEvent, LobbyEventListener, MemoryDevices, PreJoinHandle, PreJoinSession,
    UserChoices, VisibleControls,
};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

use console::{ConsoleCommand, ParseError};

const DATA_DIR_ENV: &str = "VISIO_LOBBY_DATA_DIR";

#[derive(Debug, Error)]
pub enum DesktopError {
    #[error(transparent)]
    Lobby(#[from] LobbyError),
    #[error("stdin: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("lobby_core=info,lobby_desktop=info")
            }),
        )
        .init();
}

/// `$VISIO_LOBBY_DATA_DIR`, else the platform data dir.
pub fn data_dir() -> PathBuf {
    resolve_data_dir(std::env::var_os(DATA_DIR_ENV), dirs::data_dir())
}

fn resolve_data_dir(env_override: Option<OsString>, platform: Option<PathBuf>) -> PathBuf {
    match env_override {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => platform
            .unwrap_or_else(std::env::temp_dir)
            .join("visio-lobby"),
    }
}

/// Prints what the pre-join screen would surface as toasts.
struct ConsoleListener;

impl LobbyEventListener for ConsoleListener {
    fn on_event(&self, event: LobbyEvent) {
        match event {
            LobbyEvent::DeviceError(failure) => {
                println!("! {:?}: {}", failure.source, failure.error);
            }
            LobbyEvent::ValidityChanged(false) => println!("! a display name is required to join"),
            LobbyEvent::ValidityChanged(true) => println!("ready to join"),
            _ => {}
        }
    }
}

/// Whether the prompt keeps reading after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Drives a pre-join session from console commands.
pub struct Console<E: DeviceEnvironment> {
    handle: PreJoinHandle<E>,
    controls: ControlSurface<PreJoinHandle<E>>,
    submitted: oneshot::Receiver<UserChoices>,
}

impl<E: DeviceEnvironment> Console<E> {
    pub async fn start(
        config: &LobbyConfig,
        data_dir: PathBuf,
        devices: Arc<E>,
        emitter: EventEmitter,
    ) -> Result<Self, DesktopError> {
        let store = Arc::new(config.preference_store(&data_dir));
        let (tx, submitted) = oneshot::channel();
        let handle = PreJoinSession::spawn(
            config.session_config(),
            store,
            devices,
            emitter.clone(),
            move |choices| {
                let _ = tx.send(choices);
            },
        );
        let initial = handle.snapshot().await?;
        let controls = ControlSurface::new(
            handle.clone(),
            VisibleControls::prejoin(),
            emitter,
            &initial.choices,
        )
        .with_dialogs(config.dialogs());
        Ok(Self {
            handle,
            controls,
            submitted,
        })
    }

    /// Run one command, returning the text to print.
    pub async fn execute(
        &mut self,
        command: ConsoleCommand,
    ) -> Result<(Flow, String), DesktopError> {
        let text = match command {
            ConsoleCommand::Name(name) => {
                let state = self.handle.set_display_name(name).await?;
                format!("name: {:?}", state.choices.display_name)
            }
            ConsoleCommand::Mic(enabled) => {
                self.controls
                    .toggle(TrackSource::Microphone, enabled, true)
                    .await?;
                format!("microphone {}", on_off(enabled))
            }
            ConsoleCommand::Cam(enabled) => {
                self.controls
                    .toggle(TrackSource::Camera, enabled, true)
                    .await?;
                format!("camera {}", on_off(enabled))
            }
            ConsoleCommand::MicDevice(id) => {
                self.controls.select_device(TrackKind::Audio, id).await?;
                self.describe_preview().await?
            }
            ConsoleCommand::CamDevice(id) => {
                self.controls.select_device(TrackKind::Video, id).await?;
                self.describe_preview().await?
            }
            ConsoleCommand::Blur(enabled) => {
                let effect = enabled.then(|| EffectHandle::new(BackgroundBlur::default()));
                self.handle.set_effect(effect).await?;
                self.controls.dialogs().set_effects_open(false);
                format!("background blur {}", on_off(enabled))
            }
            ConsoleCommand::Devices => self.describe_devices().await,
            ConsoleCommand::State => self.describe_state().await?,
            ConsoleCommand::Join => return self.join().await,
            ConsoleCommand::Quit => {
                self.handle.close().await;
                return Ok((Flow::Exit, "bye".into()));
            }
            ConsoleCommand::Help => console::HELP.to_string(),
        };
        Ok((Flow::Continue, text))
    }

    async fn join(&mut self) -> Result<(Flow, String), DesktopError> {
        match self.handle.commit().await? {
            CommitOutcome::Submitted => {
                let choices = self
                    .submitted
                    .try_recv()
                    .map_err(|_| LobbyError::SessionClosed)?;
                self.handle.close().await;
                Ok((Flow::Exit, serde_json::to_string_pretty(&choices)?))
            }
            CommitOutcome::Rejected => Ok((
                Flow::Continue,
                "cannot join without a display name".into(),
            )),
            CommitOutcome::AlreadySubmitted => Ok((Flow::Exit, "already joined".into())),
        }
    }

    async fn describe_state(&self) -> Result<String, DesktopError> {
        let state = self.handle.snapshot().await?;
        let mut out = describe_choices(&state);
        out.push('\n');
        out.push_str(&self.describe_preview().await?);
        Ok(out)
    }

    async fn describe_preview(&self) -> Result<String, DesktopError> {
        let preview = self.handle.settled_preview().await?;
        let mut out = String::from("preview:");
        for track in preview.audio.iter().chain(preview.video.iter()) {
            let _ = write!(
                out,
                " [{:?} {} \"{}\"]",
                track.kind, track.device_id, track.label
            );
        }
        if preview.show_placeholder {
            out.push_str(" (camera placeholder)");
        }
        Ok(out)
    }

    async fn describe_devices(&self) -> String {
        let mut out = String::new();
        for kind in [TrackKind::Audio, TrackKind::Video] {
            match self.handle.devices(kind).await {
                Ok(devices) => {
                    for device in devices {
                        let _ = writeln!(out, "{kind:?}\t{}\t{}", device.device_id, device.label);
                    }
                }
                Err(e) => {
                    let _ = writeln!(out, "{kind:?}\tunavailable: {e}");
                }
            }
        }
        out.trim_end().to_string()
    }
}

fn describe_choices(state: &ChoicesState) -> String {
    let choices = &state.choices;
    format!(
        "name: {:?}\nmicrophone: {} ({})\ncamera: {} ({})\neffect: {}\njoin: {}",
        choices.display_name,
        on_off(choices.audio_enabled),
        device_or_default(&choices.audio_device_id),
        on_off(choices.video_enabled),
        device_or_default(&choices.video_device_id),
        choices.effect.as_ref().map_or("none", |e| e.name()),
        if state.can_submit() { "enabled" } else { "disabled" },
    )
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn device_or_default(id: &str) -> &str {
    if id.is_empty() { "default" } else { id }
}

/// Console entry point: run the pre-join prompt on stdin until join or quit.
pub async fn run() -> Result<(), DesktopError> {
    let data_dir = data_dir();
    let config = LobbyConfig::load(&data_dir);
    tracing::info!("lobby data dir: {}", data_dir.display());

    let emitter = EventEmitter::new();
    emitter.add_listener(Arc::new(ConsoleListener));
    let devices = Arc::new(MemoryDevices::with_defaults());
    let mut console = Console::start(&config, data_dir, devices, emitter).await?;

    println!("{}", console.describe_state().await?);
    println!("type `help` for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match console::parse(&line) {
            Ok(command) => command,
            Err(ParseError::Empty) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match console.execute(command).await {
            Ok((flow, text)) => {
                println!("{text}");
                if flow == Flow::Exit {
                    return Ok(());
                }
            }
            Err(e) => println!("error: {e}"),
        }
    }
    console.handle.close().await;
    Ok(())
}
