//! The application-facing room handle.
//!
//! A [`Room`] is cheap to clone. All state mutation happens inside the
//! session actor for the current connection attempt; the handle reads room
//! fields from observables and participants from directory snapshots without
//! going through the actor.

use crate::actors::{RoomActor, RoomActorHandle};
use crate::config::{ConnectOptions, RoomOptions};
use crate::directory::{Directory, ParticipantDirectory};
use crate::engine::{JoinRequest, RtcEngine};
use crate::errors::{ConnectError, RoomError};
use crate::events::{EventBus, EventStream, ParticipantEventRelay, RoomEvent};
use crate::observable::Observable;
use crate::participant::{LocalParticipant, LocalTrack, Participant, RemoteParticipant};
use crate::platform::{AudioHandler, NetworkMonitor, NoopNetworkMonitor};
use crate::types::{
    ConnectionState, EncryptionType, ParticipantIdentity, ParticipantSid, RoomSid, TrackSid,
};

use secrecy::SecretString;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// How long to wait for a superseded session actor to stop.
const SESSION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared between the room handle and its session actors.
pub(crate) struct RoomShared {
    pub(crate) engine: Arc<dyn RtcEngine>,
    pub(crate) network_monitor: Arc<dyn NetworkMonitor>,
    pub(crate) audio_handlers: Vec<Arc<dyn AudioHandler>>,
    pub(crate) options: RoomOptions,
    pub(crate) bus: EventBus,
    pub(crate) directory: ParticipantDirectory,
    pub(crate) sid: Observable<Option<RoomSid>>,
    pub(crate) name: Observable<Option<String>>,
    pub(crate) metadata: Observable<String>,
    pub(crate) is_recording: Observable<bool>,
    pub(crate) connection_state: Observable<ConnectionState>,
    pub(crate) active_speakers: Observable<Vec<Participant>>,
    local: RwLock<Arc<LocalParticipant>>,
}

impl RoomShared {
    pub(crate) fn local(&self) -> Arc<LocalParticipant> {
        Arc::clone(&self.local.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install the local participant for a new connection attempt and return
    /// the one it replaces.
    fn replace_local(&self, local: Arc<LocalParticipant>) -> Arc<LocalParticipant> {
        let mut guard = self.local.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, local)
    }
}

/// The live session actor for the current connection attempt.
struct Session {
    handle: RoomActorHandle,
    task: JoinHandle<()>,
}

impl Session {
    /// Cancel the actor and wait for it to stop.
    async fn shut_down(self) {
        self.handle.supersede();
        match tokio::time::timeout(SESSION_SHUTDOWN_TIMEOUT, self.task).await {
            Ok(Ok(())) => {
                debug!(target: "room.session", "Previous session actor stopped");
            }
            Ok(Err(e)) => {
                error!(target: "room.session", error = %e, "Previous session actor panicked");
            }
            Err(_) => {
                warn!(target: "room.session", "Timed out waiting for previous session actor");
            }
        }
    }
}

struct RoomInner {
    shared: Arc<RoomShared>,
    /// Held across actor swaps so two `connect` calls never overlap their
    /// setup.
    session: Mutex<Option<Session>>,
    released: AtomicBool,
}

/// One logical participation in a conferencing room.
#[derive(Clone)]
pub struct Room {
    inner: Arc<RoomInner>,
}

impl Room {
    /// Start building a room over a transport engine.
    #[must_use]
    pub fn builder(engine: Arc<dyn RtcEngine>) -> RoomBuilder {
        RoomBuilder::new(engine)
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> Arc<RoomShared> {
        Arc::clone(&self.inner.shared)
    }

    fn ensure_live(&self) -> Result<(), RoomError> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(RoomError::Released);
        }
        Ok(())
    }

    /// Connect to a room.
    ///
    /// Suspends until the transport engine completes its join handshake or
    /// fails. A connection attempt that is still running is cancelled first,
    /// including one that is reconnecting.
    #[instrument(skip_all, name = "room.connect", fields(url = %url))]
    pub async fn connect(
        &self,
        url: &str,
        token: SecretString,
        options: ConnectOptions,
    ) -> Result<(), ConnectError> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(ConnectError::Released);
        }

        let shared = &self.inner.shared;
        let handle = {
            let mut session = self.inner.session.lock().await;
            if let Some(previous) = session.take() {
                info!(target: "room.session", "Cancelling previous connection attempt");
                previous.shut_down().await;
            }

            let context = CancellationToken::new();
            let relay = ParticipantEventRelay::new(shared.bus.clone(), context.clone());
            let encryption = shared
                .options
                .e2ee
                .as_ref()
                .map_or(EncryptionType::None, |e2ee| e2ee.encryption_type);
            let local =
                LocalParticipant::new(Arc::clone(&shared.engine), relay.clone(), encryption);
            shared.replace_local(Arc::clone(&local)).dispose();

            let (handle, task) = RoomActor::spawn(
                Arc::clone(shared),
                local,
                relay,
                context,
                options.auto_subscribe,
            );
            *session = Some(Session {
                handle: handle.clone(),
                task,
            });
            handle
        };

        handle.prepare().await?;

        let request = JoinRequest {
            url: url.to_string(),
            token,
            auto_subscribe: options.auto_subscribe,
            adaptive_stream: shared.options.adaptive_stream,
            dynacast: shared.options.dynacast,
        };

        let result = tokio::select! {
            () = handle.context().cancelled() => Err(handle.interruption()),
            joined = shared.engine.join(request, handle.engine_events()) => {
                joined.map_err(ConnectError::from)
            }
        };
        let result = match result {
            Ok(()) => handle.confirm_join().await,
            Err(e) => Err(e),
        };

        if let Err(error) = result {
            if error != ConnectError::Cancelled {
                warn!(target: "room.session", error = %error, "Connect failed");
                shared.bus.try_post(RoomEvent::FailedToConnect {
                    error: error.clone(),
                });
                handle.join_failed(error.clone()).await;
            }
            return Err(error);
        }

        info!(target: "room.session", "Connected");

        let local = shared.local();
        if options.publish_audio {
            if let Err(e) = local.set_microphone_enabled(true).await {
                warn!(target: "room.session", error = %e, "Failed to publish microphone");
            }
        }
        if options.publish_video {
            if let Err(e) = local.set_camera_enabled(true).await {
                warn!(target: "room.session", error = %e, "Failed to publish camera");
            }
        }

        Ok(())
    }

    async fn session_handle(&self) -> Option<RoomActorHandle> {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|session| session.handle.clone())
    }

    /// Leave the room. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        match self.session_handle().await {
            Some(handle) if !handle.is_cancelled() => handle.disconnect().await,
            _ => debug!(target: "room.session", "Disconnect without a live session"),
        }
    }

    /// Release every resource held by the room. The room cannot connect
    /// again afterwards.
    pub async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let session = self.inner.session.lock().await.take();
        if let Some(session) = session {
            session.handle.disconnect().await;
            session.shut_down().await;
        }

        let shared = &self.inner.shared;
        shared.local().dispose();
        shared.bus.close();
        shared.engine.release();
        info!(target: "room.session", "Room released");
    }

    /// Subscribe to every room event posted from now on.
    #[must_use]
    pub fn events(&self) -> EventStream {
        self.inner.shared.bus.subscribe()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.shared.connection_state.get()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.connection_state.subscribe()
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) {
        self.inner
            .shared
            .connection_state
            .wait_for(|current| *current == state)
            .await;
    }

    /// Server-assigned room sid. Suspends until the server has sent one.
    pub async fn sid(&self) -> RoomSid {
        self.inner.shared.sid.first_value().await
    }

    /// Room sid if already known.
    #[must_use]
    pub fn current_sid(&self) -> Option<RoomSid> {
        self.inner.shared.sid.get()
    }

    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.inner.shared.name.get()
    }

    #[must_use]
    pub fn metadata(&self) -> String {
        self.inner.shared.metadata.get()
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.inner.shared.is_recording.get()
    }

    #[must_use]
    pub fn active_speakers(&self) -> Vec<Participant> {
        self.inner.shared.active_speakers.get()
    }

    /// The local participant of the current connection attempt.
    #[must_use]
    pub fn local_participant(&self) -> Arc<LocalParticipant> {
        self.inner.shared.local()
    }

    /// Snapshot of the remote participants.
    #[must_use]
    pub fn remote_participants(&self) -> Arc<Directory> {
        self.inner.shared.directory.snapshot()
    }

    /// Watch directory snapshots.
    #[must_use]
    pub fn subscribe_remote_participants(&self) -> watch::Receiver<Arc<Directory>> {
        self.inner.shared.directory.subscribe()
    }

    #[must_use]
    pub fn remote_participant(
        &self,
        identity: &ParticipantIdentity,
    ) -> Option<Arc<RemoteParticipant>> {
        self.inner.shared.directory.snapshot().get(identity).cloned()
    }

    /// Local or remote participant by sid.
    #[must_use]
    pub fn participant_by_sid(&self, sid: &ParticipantSid) -> Option<Participant> {
        let shared = &self.inner.shared;
        shared.directory.lookup_by_sid(&shared.local(), sid)
    }

    /// Local or remote participant by identity.
    #[must_use]
    pub fn participant_by_identity(&self, identity: &ParticipantIdentity) -> Option<Participant> {
        let shared = &self.inner.shared;
        shared.directory.lookup_by_identity(&shared.local(), identity)
    }

    /// Subscribe to or unsubscribe from a remote track.
    ///
    /// The intent is recorded on the publication and replayed in the sync
    /// state after a resumed connection.
    pub async fn set_track_subscribed(
        &self,
        participant_sid: &ParticipantSid,
        track_sid: &TrackSid,
        subscribe: bool,
    ) -> Result<(), RoomError> {
        self.ensure_live()?;
        let handle = self
            .session_handle()
            .await
            .filter(|handle| !handle.is_cancelled())
            .ok_or(RoomError::NotConnected)?;
        handle
            .set_track_subscribed(participant_sid.clone(), track_sid.clone(), subscribe)
            .await
    }

    /// Publish a local track on the current connection.
    pub async fn publish_track(&self, track: LocalTrack) -> Result<(), RoomError> {
        self.ensure_live()?;
        self.inner.shared.local().publish_track(track).await?;
        Ok(())
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = &self.inner.shared;
        f.debug_struct("Room")
            .field("sid", &shared.sid.get())
            .field("state", &shared.connection_state.get())
            .field("remote_participants", &shared.directory.snapshot().len())
            .field("released", &self.inner.released.load(Ordering::SeqCst))
            .finish()
    }
}

/// Builder for [`Room`].
pub struct RoomBuilder {
    engine: Arc<dyn RtcEngine>,
    network_monitor: Arc<dyn NetworkMonitor>,
    audio_handlers: Vec<Arc<dyn AudioHandler>>,
    options: RoomOptions,
}

impl RoomBuilder {
    #[must_use]
    pub fn new(engine: Arc<dyn RtcEngine>) -> Self {
        Self {
            engine,
            network_monitor: Arc::new(NoopNetworkMonitor),
            audio_handlers: Vec::new(),
            options: RoomOptions::default(),
        }
    }

    #[must_use]
    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = monitor;
        self
    }

    /// Register an audio handler. Any number may be registered.
    #[must_use]
    pub fn audio_handler(mut self, handler: Arc<dyn AudioHandler>) -> Self {
        self.audio_handlers.push(handler);
        self
    }

    #[must_use]
    pub fn options(mut self, options: RoomOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn build(self) -> Room {
        let bus = EventBus::new();

        // Until the first connect nothing the local participant emits is
        // delivered.
        let idle = CancellationToken::new();
        idle.cancel();
        let local = LocalParticipant::new(
            Arc::clone(&self.engine),
            ParticipantEventRelay::new(bus.clone(), idle),
            EncryptionType::None,
        );

        let shared = RoomShared {
            engine: self.engine,
            network_monitor: self.network_monitor,
            audio_handlers: self.audio_handlers,
            options: self.options,
            bus,
            directory: ParticipantDirectory::new(),
            sid: Observable::new(None),
            name: Observable::new(None),
            metadata: Observable::new(String::new()),
            is_recording: Observable::new(false),
            connection_state: Observable::new(ConnectionState::Disconnected),
            active_speakers: Observable::new(Vec::new()),
            local: RwLock::new(local),
        };

        Room {
            inner: Arc::new(RoomInner {
                shared: Arc::new(shared),
                session: Mutex::new(None),
                released: AtomicBool::new(false),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::participant::tests::TestEngine;

    fn room() -> Room {
        RoomBuilder::new(Arc::new(TestEngine::default())).build()
    }

    fn token() -> SecretString {
        SecretString::from("join-token".to_string())
    }

    #[test]
    fn test_new_room_is_disconnected_and_empty() {
        let room = room();
        assert_eq!(room.connection_state(), ConnectionState::Disconnected);
        assert!(room.current_sid().is_none());
        assert!(room.remote_participants().is_empty());
        assert!(room.active_speakers().is_empty());
        assert!(!room.is_recording());
    }

    #[tokio::test]
    async fn test_join_without_local_participant_fails() {
        // TestEngine never delivers a join response.
        let room = room();
        let mut events = room.events();

        let result = room
            .connect("wss://rtc.example.com", token(), ConnectOptions::default())
            .await;
        assert_eq!(result, Err(ConnectError::MissingLocalParticipant));
        assert_eq!(room.connection_state(), ConnectionState::Disconnected);

        let mut kinds = Vec::new();
        while let Some(event) = events.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(kinds, vec!["failed_to_connect", "disconnected"]);
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_noop() {
        let room = room();
        room.disconnect().await;
        room.disconnect().await;
        assert_eq!(room.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_released_room_rejects_connect() {
        let room = room();
        room.release().await;
        room.release().await;

        let result = room
            .connect("wss://rtc.example.com", token(), ConnectOptions::default())
            .await;
        assert_eq!(result, Err(ConnectError::Released));
        assert!(matches!(
            room.set_track_subscribed(&ParticipantSid::new("PA_1"), &TrackSid::new("TR_1"), true)
                .await,
            Err(RoomError::Released)
        ));
    }

    #[tokio::test]
    async fn test_subscription_command_needs_session() {
        let room = room();
        let result = room
            .set_track_subscribed(&ParticipantSid::new("PA_1"), &TrackSid::new("TR_1"), false)
            .await;
        assert!(matches!(result, Err(RoomError::NotConnected)));
    }
}
