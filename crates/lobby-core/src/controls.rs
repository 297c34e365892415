use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

use crate::choices::UserChoices;
use crate::devices::DeviceEnvironment;
use crate::errors::{DeviceError, LobbyError};
use crate::events::{DeviceFailure, EventEmitter, LobbyEvent, TrackKind, TrackSource};
use crate::preferences::{Preference, PreferenceStore};
use crate::session::PreJoinHandle;

/// Publish rights of the local participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub can_publish: bool,
    pub can_publish_data: bool,
}

/// Controls the caller asks for; unset entries fall back to permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlBarControls {
    pub microphone: Option<bool>,
    pub camera: Option<bool>,
    pub chat: Option<bool>,
    pub screen_share: Option<bool>,
    pub leave: Option<bool>,
    pub settings: Option<bool>,
}

/// Which controls are rendered. Hidden controls are absent, not disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleControls {
    pub microphone: bool,
    pub camera: bool,
    pub chat: bool,
    pub screen_share: bool,
    pub leave: bool,
    pub settings: bool,
}

impl VisibleControls {
    /// Without permission info nothing but leave/settings is shown.
    pub fn resolve(
        requested: &ControlBarControls,
        permissions: Option<&Permissions>,
        supports_screen_share: bool,
    ) -> Self {
        let leave = requested.leave.unwrap_or(true);
        let settings = requested.settings.unwrap_or(false);
        let Some(permissions) = permissions else {
            return Self {
                microphone: false,
                camera: false,
                chat: false,
                screen_share: false,
                leave,
                settings,
            };
        };
        let publish = |wanted: Option<bool>| wanted.unwrap_or(true) && permissions.can_publish;
        Self {
            microphone: publish(requested.microphone),
            camera: publish(requested.camera),
            screen_share: publish(requested.screen_share) && supports_screen_share,
            chat: requested.chat.unwrap_or(false) && permissions.can_publish_data,
            leave,
            settings,
        }
    }

    /// The pre-join screen: microphone and camera toggles only.
    pub fn prejoin() -> Self {
        Self {
            microphone: true,
            camera: true,
            chat: false,
            screen_share: false,
            leave: false,
            settings: false,
        }
    }

    pub fn shows(&self, source: TrackSource) -> bool {
        match source {
            TrackSource::Microphone => self.microphone,
            TrackSource::Camera => self.camera,
            TrackSource::ScreenShare => self.screen_share,
        }
    }
}

/// Where toggle and device edits end up.
pub trait ChoiceSink: Send + Sync {
    fn set_enabled(
        &self,
        kind: TrackKind,
        enabled: bool,
    ) -> impl Future<Output = Result<(), LobbyError>> + Send;

    fn set_device(
        &self,
        kind: TrackKind,
        device_id: String,
    ) -> impl Future<Output = Result<(), LobbyError>> + Send;
}

/// Pre-join: edits go to the session, which persists them.
impl<E: DeviceEnvironment> ChoiceSink for PreJoinHandle<E> {
    async fn set_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), LobbyError> {
        match kind {
            TrackKind::Audio => self.set_audio_enabled(enabled).await?,
            TrackKind::Video => self.set_video_enabled(enabled).await?,
        };
        Ok(())
    }

    async fn set_device(&self, kind: TrackKind, device_id: String) -> Result<(), LobbyError> {
        match kind {
            TrackKind::Audio => self.set_audio_device(device_id).await?,
            TrackKind::Video => self.set_video_device(device_id).await?,
        };
        Ok(())
    }
}

/// In room: the control bar saves choices straight to the store.
impl ChoiceSink for Arc<PreferenceStore> {
    async fn set_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), LobbyError> {
        self.save(match kind {
            TrackKind::Audio => Preference::AudioEnabled(enabled),
            TrackKind::Video => Preference::VideoEnabled(enabled),
        });
        Ok(())
    }

    async fn set_device(&self, kind: TrackKind, device_id: String) -> Result<(), LobbyError> {
        self.save(match kind {
            TrackKind::Audio => Preference::AudioDeviceId(device_id),
            TrackKind::Video => Preference::VideoDeviceId(device_id),
        });
        Ok(())
    }
}

/// Entries of the options menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionsItem {
    Effects,
    Feedback(Url),
    Settings,
}

/// Open/closed signals for the dialogs reachable from the controls.
#[derive(Debug, Default)]
pub struct Dialogs {
    effects_open: AtomicBool,
    settings_open: AtomicBool,
    feedback_url: Option<Url>,
}

impl Dialogs {
    pub fn new(feedback_url: Option<Url>) -> Self {
        Self {
            feedback_url,
            ..Default::default()
        }
    }

    pub fn options_menu(&self) -> Vec<OptionsItem> {
        let mut items = vec![OptionsItem::Effects];
        if let Some(url) = &self.feedback_url {
            items.push(OptionsItem::Feedback(url.clone()));
        }
        items.push(OptionsItem::Settings);
        items
    }

    /// Act on a menu entry. Returns the link to open for feedback.
    pub fn activate(&self, item: &OptionsItem) -> Option<Url> {
        match item {
            OptionsItem::Effects => {
                self.toggle_effects();
                None
            }
            OptionsItem::Settings => {
                self.set_settings_open(true);
                None
            }
            OptionsItem::Feedback(url) => Some(url.clone()),
        }
    }

    pub fn toggle_effects(&self) -> bool {
        !self.effects_open.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn set_effects_open(&self, open: bool) {
        self.effects_open.store(open, Ordering::SeqCst);
    }

    pub fn is_effects_open(&self) -> bool {
        self.effects_open.load(Ordering::SeqCst)
    }

    pub fn set_settings_open(&self, open: bool) {
        self.settings_open.store(open, Ordering::SeqCst);
    }

    pub fn is_settings_open(&self) -> bool {
        self.settings_open.load(Ordering::SeqCst)
    }
}

/// Toggles and device menus for microphone, camera and screen share.
pub struct ControlSurface<S> {
    sink: S,
    visible: VisibleControls,
    emitter: EventEmitter,
    dialogs: Dialogs,
    mic_enabled: Mutex<bool>,
    camera_enabled: Mutex<bool>,
    screen_share_enabled: Mutex<bool>,
}

impl<S: ChoiceSink> ControlSurface<S> {
    pub fn new(
        sink: S,
        visible: VisibleControls,
        emitter: EventEmitter,
        initial: &UserChoices,
    ) -> Self {
        Self {
            sink,
            visible,
            emitter,
            dialogs: Dialogs::default(),
            mic_enabled: Mutex::new(initial.audio_enabled),
            camera_enabled: Mutex::new(initial.video_enabled),
            screen_share_enabled: Mutex::new(false),
        }
    }

    pub fn with_dialogs(mut self, dialogs: Dialogs) -> Self {
        self.dialogs = dialogs;
        self
    }

    pub fn visible(&self) -> VisibleControls {
        self.visible
    }

    pub fn dialogs(&self) -> &Dialogs {
        &self.dialogs
    }

    /// Flip a toggle. Only user-initiated changes reach the sink; changes
    /// made by the media stack itself are just reflected.
    pub async fn toggle(
        &self,
        source: TrackSource,
        enabled: bool,
        user_initiated: bool,
    ) -> Result<(), LobbyError> {
        self.ensure_visible(source)?;
        let (state, kind) = match source {
            TrackSource::Microphone => (&self.mic_enabled, Some(TrackKind::Audio)),
            TrackSource::Camera => (&self.camera_enabled, Some(TrackKind::Video)),
            TrackSource::ScreenShare => (&self.screen_share_enabled, None),
        };
        // The flag only moves once the sink has accepted the change.
        let mut current = state.lock().await;
        if let (Some(kind), true) = (kind, user_initiated) {
            self.sink.set_enabled(kind, enabled).await?;
        }
        *current = enabled;
        tracing::info!("{source:?} enabled: {enabled}");
        Ok(())
    }

    /// Pick a device from the menu; `None` means the system default.
    pub async fn select_device(
        &self,
        kind: TrackKind,
        device_id: Option<String>,
    ) -> Result<(), LobbyError> {
        self.ensure_visible(kind.source())?;
        self.sink.set_device(kind, device_id.unwrap_or_default()).await
    }

    pub async fn is_enabled(&self, source: TrackSource) -> bool {
        match source {
            TrackSource::Microphone => *self.mic_enabled.lock().await,
            TrackSource::Camera => *self.camera_enabled.lock().await,
            TrackSource::ScreenShare => *self.screen_share_enabled.lock().await,
        }
    }

    /// Forward a capture failure from the media stack to the error sink.
    pub fn report_device_error(&self, source: TrackSource, error: DeviceError) {
        tracing::warn!("{source:?} device error: {error}");
        self.emitter.emit(LobbyEvent::DeviceError(DeviceFailure { source, error }));
    }

    fn ensure_visible(&self, source: TrackSource) -> Result<(), LobbyError> {
        if self.visible.shows(source) {
            Ok(())
        } else {
            Err(LobbyError::ControlHidden(source))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choices::ChoiceLayer;
    use crate::devices::MemoryDevices;
    use crate::events::tests::EventCapture;
    use crate::session::{PreJoinSession, SessionConfig};

    const PUBLISHER: Permissions = Permissions {
        can_publish: true,
        can_publish_data: true,
    };

    fn publisher_controls(supports_screen_share: bool) -> VisibleControls {
        VisibleControls::resolve(
            &ControlBarControls::default(),
            Some(&PUBLISHER),
            supports_screen_share,
        )
    }

    fn surface(
        store: Arc<PreferenceStore>,
        visible: VisibleControls,
    ) -> ControlSurface<Arc<PreferenceStore>> {
        let initial = UserChoices::default();
        ControlSurface::new(store, visible, EventEmitter::new(), &initial)
    }

    #[test]
    fn no_permissions_hides_media_controls() {
        let visible = VisibleControls::resolve(&ControlBarControls::default(), None, true);
        assert!(!visible.microphone);
        assert!(!visible.camera);
        assert!(!visible.screen_share);
        assert!(!visible.chat);
        assert!(visible.leave);
    }

    #[test]
    fn publish_permission_drives_media_controls() {
        let visible = publisher_controls(true);
        assert!(visible.microphone && visible.camera && visible.screen_share);
        assert!(!visible.chat);

        let listener = Permissions {
            can_publish: false,
            can_publish_data: true,
        };
        let requested = ControlBarControls {
            camera: Some(true),
            chat: Some(true),
            ..Default::default()
        };
        let visible = VisibleControls::resolve(&requested, Some(&listener), true);
        assert!(!visible.camera);
        assert!(!visible.microphone);
        assert!(visible.chat);
    }

    #[test]
    fn screen_share_needs_platform_support() {
        let visible = publisher_controls(false);
        assert!(!visible.screen_share);
        assert!(visible.camera);
    }

    #[test]
    fn explicit_opt_out_hides_control() {
        let requested = ControlBarControls {
            microphone: Some(false),
            leave: Some(false),
            settings: Some(true),
            ..Default::default()
        };
        let visible = VisibleControls::resolve(&requested, Some(&PUBLISHER), true);
        assert!(!visible.microphone);
        assert!(!visible.leave);
        assert!(visible.settings);
    }

    #[tokio::test]
    async fn in_room_toggles_persist_only_user_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PreferenceStore::open(dir.path()));
        let visible = publisher_controls(true);
        let controls = surface(store.clone(), visible);

        controls
            .toggle(TrackSource::Microphone, false, false)
            .await
            .unwrap();
        assert!(!controls.is_enabled(TrackSource::Microphone).await);
        assert_eq!(store.load().audio_enabled, None);

        controls
            .toggle(TrackSource::Camera, false, true)
            .await
            .unwrap();
        assert_eq!(store.load().video_enabled, Some(false));

        controls
            .select_device(TrackKind::Audio, None)
            .await
            .unwrap();
        assert_eq!(store.load().audio_device_id.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn screen_share_state_stays_local() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PreferenceStore::open(dir.path()));
        let visible = publisher_controls(true);
        let controls = surface(store.clone(), visible);

        controls
            .toggle(TrackSource::ScreenShare, true, true)
            .await
            .unwrap();
        assert!(controls.is_enabled(TrackSource::ScreenShare).await);
        assert_eq!(store.load(), ChoiceLayer::default());
    }

    #[tokio::test]
    async fn hidden_controls_reject_operations() {
        let store = Arc::new(PreferenceStore::disabled());
        let visible = VisibleControls::resolve(&ControlBarControls::default(), None, true);
        let controls = surface(store, visible);

        assert!(matches!(
            controls.toggle(TrackSource::Camera, true, true).await,
            Err(LobbyError::ControlHidden(TrackSource::Camera))
        ));
        assert!(matches!(
            controls.select_device(TrackKind::Audio, Some("mic-1".into())).await,
            Err(LobbyError::ControlHidden(TrackSource::Microphone))
        ));
    }

    #[tokio::test]
    async fn prejoin_surface_round_trips_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PreferenceStore::open(dir.path()));
        let config = SessionConfig {
            defaults: ChoiceLayer::default().with_display_name("Alice"),
            ..Default::default()
        };
        let handle = PreJoinSession::spawn(
            config,
            store.clone(),
            Arc::new(MemoryDevices::with_defaults()),
            EventEmitter::new(),
            |_| {},
        );
        let initial = handle.snapshot().await.unwrap().choices;
        let controls = ControlSurface::new(
            handle.clone(),
            VisibleControls::prejoin(),
            EventEmitter::new(),
            &initial,
        );

        controls
            .toggle(TrackSource::Microphone, false, true)
            .await
            .unwrap();
        controls
            .select_device(TrackKind::Video, Some("cam-1".into()))
            .await
            .unwrap();

        let stored = store.load();
        assert_eq!(stored.audio_enabled, Some(false));
        assert_eq!(stored.video_device_id.as_deref(), Some("cam-1"));

        let state = handle.snapshot().await.unwrap();
        assert!(!state.choices.audio_enabled);
        assert_eq!(state.choices.video_device_id, "cam-1");
        handle.close().await;
    }

    #[tokio::test]
    async fn rejected_toggle_keeps_the_surface_in_sync() {
        let store = Arc::new(PreferenceStore::disabled());
        let config = SessionConfig {
            defaults: ChoiceLayer::default().with_display_name("Alice"),
            ..Default::default()
        };
        let handle = PreJoinSession::spawn(
            config,
            store,
            Arc::new(MemoryDevices::with_defaults()),
            EventEmitter::new(),
            |_| {},
        );
        let initial = handle.snapshot().await.unwrap().choices;
        let controls = ControlSurface::new(
            handle.clone(),
            VisibleControls::prejoin(),
            EventEmitter::new(),
            &initial,
        );
        handle.commit().await.unwrap();

        assert!(matches!(
            controls.toggle(TrackSource::Microphone, false, true).await,
            Err(LobbyError::AlreadySubmitted)
        ));
        let snapshot = handle.snapshot().await.unwrap().choices;
        assert!(snapshot.audio_enabled);
        assert_eq!(
            controls.is_enabled(TrackSource::Microphone).await,
            snapshot.audio_enabled
        );

        handle.close().await;
        assert!(matches!(
            controls.toggle(TrackSource::Camera, false, true).await,
            Err(LobbyError::SessionClosed)
        ));
        assert!(controls.is_enabled(TrackSource::Camera).await);
    }

    #[test]
    fn device_errors_reach_the_sink() {
        let emitter = EventEmitter::new();
        let capture = Arc::new(EventCapture::default());
        emitter.add_listener(capture.clone());
        let controls = ControlSurface::new(
            Arc::new(PreferenceStore::disabled()),
            VisibleControls::prejoin(),
            emitter,
            &UserChoices::default(),
        );

        let error = DeviceError::PermissionDenied;
        controls.report_device_error(TrackSource::Camera, error);

        let failures = capture.device_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error, DeviceError::PermissionDenied);
    }

    #[test]
    fn options_menu_and_dialogs() {
        let url = Url::parse("https://forms.example.org/feedback").unwrap();
        let dialogs = Dialogs::new(Some(url.clone()));
        let items = dialogs.options_menu();
        assert_eq!(
            items,
            vec![
                OptionsItem::Effects,
                OptionsItem::Feedback(url.clone()),
                OptionsItem::Settings
            ]
        );

        assert_eq!(dialogs.activate(&OptionsItem::Effects), None);
        assert!(dialogs.is_effects_open());
        assert!(!dialogs.toggle_effects());
        assert!(!dialogs.is_effects_open());

        dialogs.activate(&OptionsItem::Settings);
        assert!(dialogs.is_settings_open());
        assert_eq!(dialogs.activate(&items[1]), Some(url));

        let without_feedback = Dialogs::new(None);
        assert_eq!(without_feedback.options_menu().len(), 2);
    }
}
