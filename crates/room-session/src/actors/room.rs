//! `RoomActor` - one per connection attempt.
//!
//! The actor is the single writer of session state: connection state, room
//! metadata, the participant directory and active speakers. It consumes:
//!
//! - application commands from the bounded mailbox,
//! - transport callbacks from the engine inbox,
//! - reachability notifications from the network inbox,
//! - delayed track-attach retries.
//!
//! Callbacks are preferred over commands so a join response emitted before
//! `join` returns is applied before the join is confirmed.
//!
//! The actor's `CancellationToken` is the connection's coordination context.
//! Teardown posts `Disconnected` and only then cancels it.

use super::messages::{RoomCommand, TrackRetry};
use super::reconnect::{build_sync_state, ReconnectController};
use crate::e2ee::E2eeManager;
use crate::engine::{
    resolve_track_target, ConnectionQualityInfo, EngineEvent, EngineEventSink, JoinResponse,
    ParticipantInfo, SpeakerInfo, StreamStateInfo, SubscriptionPermissionUpdate,
    UpdateSubscription,
};
use crate::errors::{ConnectError, NetworkError, RoomError};
use crate::events::RoomEvent;
use crate::observability::metrics;
use crate::participant::{LocalParticipant, ParticipantListener, RemoteParticipant};
use crate::platform::{NetworkEvent, NetworkEventSink};
use crate::room::RoomShared;
use crate::speakers;
use crate::types::{
    ConnectionState, DisconnectReason, ParticipantIdentity, ParticipantSid, ParticipantState,
    RoomSid, TrackSid,
};

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room actor mailbox.
const ROOM_CHANNEL_BUFFER: usize = 64;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub(crate) struct RoomActorHandle {
    sender: mpsc::Sender<RoomCommand>,
    cancel_token: CancellationToken,
    /// Cancelled only when a newer `connect` or `release` replaces this
    /// session, as opposed to the session ending on its own.
    superseded: CancellationToken,
    engine_events: EngineEventSink,
}

impl RoomActorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))
    }

    /// Reset per-connection state and enter `Connecting`.
    pub(crate) async fn prepare(&self) -> Result<(), ConnectError> {
        self.request(|respond_to| RoomCommand::Prepare { respond_to })
            .await
            .map_err(|_| self.interruption())
    }

    /// Confirm a completed handshake.
    pub(crate) async fn confirm_join(&self) -> Result<(), ConnectError> {
        self.request(|respond_to| RoomCommand::ConfirmJoin { respond_to })
            .await
            .map_err(|_| self.interruption())?
    }

    /// Why a handshake stopped once the context was cancelled.
    ///
    /// A replaced session was cancelled on purpose. Any other cancellation
    /// means the session was torn down while joining, which is a transport
    /// failure from the caller's point of view.
    pub(crate) fn interruption(&self) -> ConnectError {
        if self.superseded.is_cancelled() {
            ConnectError::Cancelled
        } else {
            ConnectError::Transport("session ended during join".to_string())
        }
    }

    /// Tear down after a failed handshake.
    pub(crate) async fn join_failed(&self, error: ConnectError) {
        if let Err(e) = self
            .request(|respond_to| RoomCommand::JoinFailed { error, respond_to })
            .await
        {
            debug!(target: "room.actor", error = %e, "Session already gone after join failure");
        }
    }

    /// Leave the room. A no-op when the session already ended.
    pub(crate) async fn disconnect(&self) {
        if let Err(e) = self
            .request(|respond_to| RoomCommand::Disconnect { respond_to })
            .await
        {
            debug!(target: "room.actor", error = %e, "Disconnect on finished session");
        }
    }

    pub(crate) async fn set_track_subscribed(
        &self,
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
        subscribe: bool,
    ) -> Result<(), RoomError> {
        self.request(|respond_to| RoomCommand::SetTrackSubscribed {
            participant_sid,
            track_sid,
            subscribe,
            respond_to,
        })
        .await
        .map_err(|_| RoomError::NotConnected)?
    }

    /// Sink the transport engine delivers callbacks to.
    pub(crate) fn engine_events(&self) -> EngineEventSink {
        self.engine_events.clone()
    }

    /// The connection's coordination context.
    pub(crate) fn context(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Cancel the actor because a newer session replaces it.
    pub(crate) fn supersede(&self) {
        self.superseded.cancel();
        self.cancel_token.cancel();
    }

    #[must_use]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Session actor for one connection attempt.
pub(crate) struct RoomActor {
    shared: Arc<RoomShared>,
    local: Arc<LocalParticipant>,
    listener: Arc<dyn ParticipantListener>,
    cancel_token: CancellationToken,
    receiver: mpsc::Receiver<RoomCommand>,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    network_sink: NetworkEventSink,
    network_events: mpsc::UnboundedReceiver<NetworkEvent>,
    retry_sender: mpsc::UnboundedSender<TrackRetry>,
    retries: mpsc::UnboundedReceiver<TrackRetry>,
    reconnect: ReconnectController,
    e2ee: Option<E2eeManager>,
    auto_subscribe: bool,
    /// A join response has been applied.
    joined: bool,
    /// Failure recorded while applying the join response.
    join_error: Option<ConnectError>,
}

impl RoomActor {
    /// Spawn the actor for a new connection attempt.
    pub(crate) fn spawn(
        shared: Arc<RoomShared>,
        local: Arc<LocalParticipant>,
        listener: Arc<dyn ParticipantListener>,
        cancel_token: CancellationToken,
        auto_subscribe: bool,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (network_tx, network_rx) = mpsc::unbounded_channel();
        let (retry_sender, retries) = mpsc::unbounded_channel();

        let engine_events = EngineEventSink::new(engine_tx);

        let actor = Self {
            shared,
            local,
            listener,
            cancel_token: cancel_token.clone(),
            receiver,
            engine_events: engine_rx,
            network_sink: NetworkEventSink::new(network_tx),
            network_events: network_rx,
            retry_sender,
            retries,
            reconnect: ReconnectController::new(),
            e2ee: None,
            auto_subscribe,
            joined: false,
            join_error: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            superseded: CancellationToken::new(),
            engine_events,
        };

        (handle, task_handle)
    }

    /// Run the actor loop.
    #[instrument(skip_all, name = "room.actor")]
    async fn run(mut self) {
        debug!(target: "room.actor", "RoomActor started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    self.abandon();
                    break;
                }

                Some(event) = self.engine_events.recv() => {
                    self.handle_engine_event(event).await;
                }

                Some(event) = self.network_events.recv() => {
                    self.handle_network_event(event).await;
                }

                Some(retry) = self.retries.recv() => {
                    self.attach_track(retry);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!(target: "room.actor", "RoomActor mailbox closed, exiting");
                            self.abandon();
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "room.actor",
            state = self.shared.connection_state.get().as_str(),
            "RoomActor stopped"
        );
    }

    fn post(&self, event: RoomEvent) {
        // A closed context means the session already ended; nothing to notify.
        let _ = self.shared.bus.post(&self.cancel_token, event);
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Prepare { respond_to } => {
                self.prepare();
                let _ = respond_to.send(());
            }
            RoomCommand::ConfirmJoin { respond_to } => {
                let result = match self.join_error.take() {
                    Some(error) => Err(error),
                    None if !self.joined => Err(ConnectError::MissingLocalParticipant),
                    None => Ok(()),
                };
                let _ = respond_to.send(result);
            }
            RoomCommand::JoinFailed { error, respond_to } => {
                warn!(target: "room.session", error = %error, "Join failed");
                self.teardown(DisconnectReason::JoinFailure).await;
                let _ = respond_to.send(());
            }
            RoomCommand::Disconnect { respond_to } => {
                if self.shared.connection_state.get() != ConnectionState::Disconnected {
                    if let Err(e) = self.shared.engine.send_leave().await {
                        debug!(target: "room.session", error = %e, "Leave not delivered");
                    }
                    self.teardown(DisconnectReason::ClientInitiated).await;
                }
                let _ = respond_to.send(());
            }
            RoomCommand::SetTrackSubscribed {
                participant_sid,
                track_sid,
                subscribe,
                respond_to,
            } => {
                let result = self
                    .set_track_subscribed(&participant_sid, track_sid, subscribe)
                    .await;
                let _ = respond_to.send(result);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------------

    /// Reset per-connection state, register for reachability and enter
    /// `Connecting`. Encryption is set up here, before the handshake.
    fn prepare(&mut self) {
        // A connect issued while a previous session was live starts over.
        self.transition(ConnectionState::Disconnected);
        self.clear_room_fields();

        let leftovers: Vec<ParticipantIdentity> = self
            .shared
            .directory
            .snapshot()
            .participants()
            .map(|participant| participant.identity().clone())
            .collect();
        for identity in &leftovers {
            self.handle_participant_disconnect(identity);
        }

        if let Err(e) = self
            .shared
            .network_monitor
            .register(self.network_sink.clone())
        {
            warn!(target: "room.session", error = %e, "Network monitor registration failed");
        }

        self.transition(ConnectionState::Connecting);

        if let Some(options) = &self.shared.options.e2ee {
            self.e2ee = Some(E2eeManager::setup(options));
        }
    }

    /// Apply a connection state and fire its side effects.
    ///
    /// Redundant writes do nothing. Returns whether the state changed.
    fn transition(&self, next: ConnectionState) -> bool {
        let Some(previous) = self.shared.connection_state.set(next) else {
            return false;
        };

        info!(
            target: "room.session",
            from = previous.as_str(),
            to = next.as_str(),
            "Connection state changed"
        );
        metrics::record_state_transition(next.as_str());

        match next {
            ConnectionState::Connecting => {
                for handler in &self.shared.audio_handlers {
                    handler.start();
                }
            }
            ConnectionState::Connected => {
                if previous == ConnectionState::Reconnecting {
                    self.post(RoomEvent::Reconnected);
                } else {
                    self.post(RoomEvent::Connected);
                }
            }
            ConnectionState::Reconnecting => self.post(RoomEvent::Reconnecting),
            ConnectionState::Disconnected => {
                for handler in &self.shared.audio_handlers {
                    handler.stop();
                }
            }
        }
        true
    }

    /// Move to `next` only along a legal edge of the state machine.
    fn transition_from(&self, allowed: &[ConnectionState], next: ConnectionState) {
        let current = self.shared.connection_state.get();
        if allowed.contains(&current) {
            self.transition(next);
        } else {
            debug!(
                target: "room.session",
                from = current.as_str(),
                to = next.as_str(),
                "Ignoring state change"
            );
        }
    }

    fn clear_room_fields(&self) {
        self.shared.sid.set(None);
        self.shared.name.set(None);
        self.shared.metadata.set(String::new());
        self.shared.is_recording.set(false);
        self.shared.active_speakers.set(Vec::new());
    }

    /// Disconnection teardown. A no-op once `Disconnected`.
    #[instrument(skip_all, name = "room.teardown", fields(reason = ?reason))]
    async fn teardown(&mut self, reason: DisconnectReason) {
        if self.shared.connection_state.get() == ConnectionState::Disconnected {
            return;
        }

        self.unregister_network();
        self.transition(ConnectionState::Disconnected);

        if let Some(e2ee) = self.e2ee.take() {
            e2ee.cleanup();
        }

        let remaining: Vec<ParticipantIdentity> = self
            .shared
            .directory
            .snapshot()
            .participants()
            .map(|participant| participant.identity().clone())
            .collect();
        for identity in &remaining {
            self.handle_participant_disconnect(identity);
        }

        self.clear_room_fields();
        self.shared.engine.close(reason).await;
        self.local.dispose();

        info!(target: "room.session", reason = ?reason, "Room disconnected");
        self.post(RoomEvent::Disconnected { reason });
        self.cancel_token.cancel();
    }

    /// Cleanup when the context is cancelled from outside (superseded by a
    /// newer connect, or released).
    fn abandon(&mut self) {
        if self.shared.connection_state.get() == ConnectionState::Disconnected {
            return;
        }
        debug!(target: "room.actor", "Abandoning live session");
        self.unregister_network();
        if let Some(e2ee) = self.e2ee.take() {
            e2ee.cleanup();
        }
    }

    fn unregister_network(&self) {
        match self.shared.network_monitor.unregister() {
            Ok(()) | Err(NetworkError::NotRegistered) => {}
            Err(e) => {
                warn!(target: "room.session", error = %e, "Network monitor unregistration failed");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transport callbacks
    // ------------------------------------------------------------------------

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        debug!(target: "room.actor", event = event.kind(), "Engine event");
        match event {
            EngineEvent::JoinResponse(response) => self.handle_join_response(*response).await,
            EngineEvent::ParticipantUpdates(updates) => self.reconcile_participants(&updates),
            EngineEvent::ActiveSpeakersSnapshot(speakers) => {
                self.handle_speakers_snapshot(&speakers);
            }
            EngineEvent::ActiveSpeakersDelta(speakers) => self.handle_speakers_delta(&speakers),
            EngineEvent::TrackAdded { track, stream_id } => {
                let (participant_sid, track_sid) = resolve_track_target(&stream_id, &track.id);
                self.attach_track(TrackRetry {
                    track,
                    participant_sid,
                    track_sid,
                    attempt: 1,
                });
            }
            EngineEvent::ConnectionQuality(updates) => self.handle_connection_quality(&updates),
            EngineEvent::StreamStateUpdate(updates) => self.handle_stream_states(&updates),
            EngineEvent::SubscriptionPermission(update) => {
                self.handle_subscription_permission(&update);
            }
            EngineEvent::RemoteMuteChanged { track_sid, muted } => {
                self.local.on_remote_mute_changed(&track_sid, muted);
            }
            EngineEvent::RoomMetadataUpdate {
                sid,
                metadata,
                active_recording,
            } => self.handle_room_update(sid, metadata, active_recording),
            EngineEvent::SignalConnected { is_resume } => {
                if is_resume {
                    self.send_sync_state().await;
                }
            }
            EngineEvent::EngineConnected => {
                self.transition_from(&[ConnectionState::Connecting], ConnectionState::Connected);
            }
            EngineEvent::EngineReconnecting => {
                self.transition_from(&[ConnectionState::Connected], ConnectionState::Reconnecting);
            }
            EngineEvent::EngineReconnected => {
                self.transition_from(&[ConnectionState::Reconnecting], ConnectionState::Connected);
            }
            EngineEvent::EngineDisconnected(reason) => self.teardown(reason).await,
            EngineEvent::FullReconnecting => self.handle_full_reconnecting(),
            EngineEvent::PostReconnect { is_full_reconnect } => {
                self.handle_post_reconnect(is_full_reconnect).await;
            }
            EngineEvent::FailToConnect(error) => {
                warn!(target: "room.session", error = %error, "Engine failed to connect");
                self.shared.bus.try_post(RoomEvent::FailedToConnect {
                    error: error.into(),
                });
            }
        }
    }

    async fn handle_join_response(&mut self, response: JoinResponse) {
        let rejoin = self.joined;
        self.joined = true;

        let JoinResponse {
            room,
            participant,
            other_participants,
            sif_trailer,
        } = response;

        if let Some(sid) = room.sid {
            self.shared.sid.set(Some(sid));
        }
        self.shared.name.set(Some(room.name));
        self.shared.metadata.set(room.metadata);
        if self.shared.is_recording.set(room.active_recording).is_some() {
            self.post(RoomEvent::RecordingStatusChanged {
                is_recording: room.active_recording,
            });
        }

        if let (Some(e2ee), Some(trailer)) = (&self.e2ee, &sif_trailer) {
            e2ee.set_sif_trailer(trailer);
        }

        let Some(local_info) = participant else {
            warn!(target: "room.session", "Join response without local participant");
            if self.shared.connection_state.get() == ConnectionState::Connecting {
                self.join_error = Some(ConnectError::MissingLocalParticipant);
            } else {
                self.shared.bus.try_post(RoomEvent::FailedToConnect {
                    error: ConnectError::MissingLocalParticipant,
                });
                self.teardown(DisconnectReason::JoinFailure).await;
            }
            return;
        };
        if rejoin {
            self.local.reset_sid(&local_info.sid);
        }
        self.local.update_from_info(&local_info);

        for info in &other_participants {
            if info.identity.is_empty() || self.is_local(&info.identity, &info.sid) {
                continue;
            }
            if info.state == ParticipantState::Disconnected {
                continue;
            }
            let (participant, created) =
                self.shared
                    .directory
                    .get_or_create(&info.identity, Some(info), &self.listener);
            if !created {
                participant.update_from_info(info);
                self.shared.directory.index_sid(&info.sid, &info.identity);
            } else if rejoin {
                // Participants were announced as disconnected when the full
                // reconnect started.
                self.post(RoomEvent::ParticipantConnected { participant });
            }
        }

        info!(
            target: "room.session",
            room_sid = ?self.shared.sid.get(),
            remote_participants = self.shared.directory.snapshot().len(),
            rejoin,
            "Join response applied"
        );
    }

    fn is_local(&self, identity: &ParticipantIdentity, sid: &ParticipantSid) -> bool {
        self.local.identity().as_ref() == Some(identity) || self.local.sid().as_ref() == Some(sid)
    }

    /// Apply participant updates.
    fn reconcile_participants(&self, updates: &[ParticipantInfo]) {
        for info in updates {
            let Some(identity) = self.resolve_identity(info) else {
                debug!(
                    target: "room.directory",
                    sid = %info.sid,
                    "Participant update for unknown sid without identity"
                );
                metrics::record_signal_dropped("participant_update");
                continue;
            };

            if self.is_local(&identity, &info.sid) {
                self.local.update_from_info(info);
                continue;
            }

            if info.state == ParticipantState::Disconnected {
                self.handle_participant_disconnect(&identity);
                continue;
            }

            let is_new = !self.shared.directory.snapshot().contains(&identity);
            let (participant, created) =
                self.shared
                    .directory
                    .get_or_create(&identity, Some(info), &self.listener);
            if !created {
                participant.update_from_info(info);
            }
            if !info.sid.is_empty() {
                self.shared.directory.index_sid(&info.sid, &identity);
            }
            if is_new {
                info!(
                    target: "room.directory",
                    identity = %identity,
                    sid = %info.sid,
                    "Participant connected"
                );
                self.post(RoomEvent::ParticipantConnected { participant });
            }
        }
    }

    /// Identity from the update, falling back to the sid index for servers
    /// that omit it on disconnect notifications.
    fn resolve_identity(&self, info: &ParticipantInfo) -> Option<ParticipantIdentity> {
        if !info.identity.is_empty() {
            return Some(info.identity.clone());
        }
        if self.local.sid().as_ref() == Some(&info.sid) {
            return self.local.identity();
        }
        self.shared
            .directory
            .snapshot()
            .identity_for_sid(&info.sid)
            .cloned()
    }

    /// Remove a remote participant after unpublishing its tracks. Unknown
    /// identities are ignored.
    fn handle_participant_disconnect(&self, identity: &ParticipantIdentity) {
        let Some(participant) = self.shared.directory.snapshot().get(identity).cloned() else {
            return;
        };

        participant.unpublish_all();
        self.shared.directory.remove(identity);
        self.forget_speaker(&participant);

        info!(
            target: "room.directory",
            identity = %identity,
            "Participant disconnected"
        );
        self.post(RoomEvent::ParticipantDisconnected { participant });
    }

    fn forget_speaker(&self, participant: &Arc<RemoteParticipant>) {
        let speakers = self.shared.active_speakers.get();
        if speakers
            .iter()
            .any(|speaker| speaker.as_remote().is_some_and(|r| Arc::ptr_eq(r, participant)))
        {
            let remaining = speakers
                .into_iter()
                .filter(|speaker| !speaker.as_remote().is_some_and(|r| Arc::ptr_eq(r, participant)))
                .collect();
            self.shared.active_speakers.set(remaining);
        }
    }

    fn handle_speakers_snapshot(&self, speakers: &[SpeakerInfo]) {
        let active = speakers::apply_snapshot(&self.shared.directory, &self.local, speakers);
        self.shared.active_speakers.set(active.clone());
        self.post(RoomEvent::ActiveSpeakersChanged { speakers: active });
    }

    fn handle_speakers_delta(&self, speakers: &[SpeakerInfo]) {
        let current = self.shared.active_speakers.get();
        let active = speakers::apply_delta(&self.shared.directory, &self.local, &current, speakers);
        self.shared.active_speakers.set(active.clone());
        self.post(RoomEvent::ActiveSpeakersChanged { speakers: active });
    }

    /// Attach an arrived media track, retrying on a timer while the
    /// participant or publication metadata is still missing.
    fn attach_track(&self, retry: TrackRetry) {
        let TrackRetry {
            track,
            participant_sid,
            track_sid,
            attempt,
        } = retry;

        let participant = self.shared.directory.snapshot().get_by_sid(&participant_sid).cloned();
        let track = match &participant {
            Some(remote) => match remote.add_subscribed_media_track(track, &track_sid) {
                Ok(()) => return,
                Err(track) => track,
            },
            None => track,
        };

        if attempt >= self.shared.options.track_retry_attempts {
            if participant.is_some() {
                warn!(
                    target: "room.session",
                    participant_sid = %participant_sid,
                    track_sid = %track_sid,
                    attempts = attempt,
                    "Track publication never arrived"
                );
                self.post(RoomEvent::TrackSubscriptionFailed {
                    participant_sid,
                    track_sid,
                });
            } else {
                debug!(
                    target: "room.session",
                    participant_sid = %participant_sid,
                    track_sid = %track_sid,
                    "Dropping track for unknown participant"
                );
                metrics::record_signal_dropped("track_added");
            }
            return;
        }

        self.schedule_track_retry(TrackRetry {
            track,
            participant_sid,
            track_sid,
            attempt: attempt + 1,
        });
    }

    fn schedule_track_retry(&self, retry: TrackRetry) {
        let sender = self.retry_sender.clone();
        let token = self.cancel_token.child_token();
        let interval = self.shared.options.track_retry_interval;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(interval) => {
                    let _ = sender.send(retry);
                }
            }
        });
    }

    fn handle_connection_quality(&self, updates: &[ConnectionQualityInfo]) {
        for update in updates {
            let Some(participant) = self
                .shared
                .directory
                .lookup_by_sid(&self.local, &update.participant_sid)
            else {
                debug!(
                    target: "room.session",
                    sid = %update.participant_sid,
                    "Connection quality for unknown participant"
                );
                metrics::record_signal_dropped("connection_quality");
                continue;
            };
            participant.core().set_connection_quality(update.quality);
            self.post(RoomEvent::ConnectionQualityChanged {
                participant,
                quality: update.quality,
            });
        }
    }

    fn handle_stream_states(&self, updates: &[StreamStateInfo]) {
        for update in updates {
            if let Some(remote) = self.remote_by_sid(&update.participant_sid, "stream_state") {
                remote.update_stream_state(&update.track_sid, update.state);
            }
        }
    }

    fn handle_subscription_permission(&self, update: &SubscriptionPermissionUpdate) {
        if let Some(remote) =
            self.remote_by_sid(&update.participant_sid, "subscription_permission")
        {
            remote.update_subscription_permission(&update.track_sid, update.allowed);
        }
    }

    fn remote_by_sid(
        &self,
        sid: &ParticipantSid,
        signal: &'static str,
    ) -> Option<Arc<RemoteParticipant>> {
        let remote = self.shared.directory.snapshot().get_by_sid(sid).cloned();
        if remote.is_none() {
            debug!(target: "room.session", sid = %sid, signal, "Update for unknown participant");
            metrics::record_signal_dropped(signal);
        }
        remote
    }

    fn handle_room_update(&self, sid: Option<RoomSid>, metadata: String, active_recording: bool) {
        if let Some(sid) = sid {
            if self.shared.sid.get().is_none() {
                self.shared.sid.set(Some(sid));
            }
        }
        if let Some(previous) = self.shared.metadata.set(metadata.clone()) {
            self.post(RoomEvent::RoomMetadataChanged { previous, metadata });
        }
        if self.shared.is_recording.set(active_recording).is_some() {
            self.post(RoomEvent::RecordingStatusChanged {
                is_recording: active_recording,
            });
        }
    }

    // ------------------------------------------------------------------------
    // Reconnection
    // ------------------------------------------------------------------------

    async fn send_sync_state(&self) {
        let state = build_sync_state(
            &self.shared.directory.snapshot(),
            &self.local,
            self.auto_subscribe,
        );
        info!(
            target: "room.reconnect",
            tracks = state.subscription.track_sids.len(),
            subscribe = state.subscription.subscribe,
            published = state.publish_tracks.len(),
            "Sending sync state after resume"
        );
        if let Err(e) = self.shared.engine.send_sync_state(state).await {
            warn!(target: "room.reconnect", error = %e, "Failed to send sync state");
        }
    }

    fn handle_full_reconnecting(&self) {
        info!(target: "room.reconnect", "Full reconnect, resetting participants");
        self.local.prepare_for_full_reconnect();

        let everyone: Vec<ParticipantIdentity> = self
            .shared
            .directory
            .snapshot()
            .participants()
            .map(|participant| participant.identity().clone())
            .collect();
        for identity in &everyone {
            self.handle_participant_disconnect(identity);
        }
        self.shared.active_speakers.set(Vec::new());
    }

    async fn handle_post_reconnect(&self, is_full_reconnect: bool) {
        metrics::record_reconnect(is_full_reconnect);
        if is_full_reconnect {
            info!(target: "room.reconnect", "Full reconnect complete, republishing tracks");
            self.spawn_republish();
            return;
        }

        let settings: Vec<_> = self
            .shared
            .directory
            .snapshot()
            .participants()
            .flat_map(|participant| participant.subscribed_track_settings())
            .collect();
        debug!(
            target: "room.reconnect",
            tracks = settings.len(),
            "Resume complete, refreshing track settings"
        );
        for track_settings in settings {
            if let Err(e) = self.shared.engine.update_track_settings(track_settings).await {
                warn!(target: "room.reconnect", error = %e, "Failed to refresh track settings");
            }
        }
    }

    /// Republish stashed local tracks off the actor loop, bounded by the
    /// connection context.
    fn spawn_republish(&self) {
        let local = Arc::clone(&self.local);
        let token = self.cancel_token.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(target: "room.reconnect", "Republish abandoned with the session");
                }
                () = local.republish_tracks() => {}
            }
        });
    }

    async fn handle_network_event(&mut self, event: NetworkEvent) {
        let state = self.shared.connection_state.get();
        if self.reconnect.on_network_event(event, state) {
            self.shared.engine.reconnect().await;
        }
    }

    // ------------------------------------------------------------------------
    // Application commands
    // ------------------------------------------------------------------------

    async fn set_track_subscribed(
        &self,
        participant_sid: &ParticipantSid,
        track_sid: TrackSid,
        subscribe: bool,
    ) -> Result<(), RoomError> {
        let remote = self
            .shared
            .directory
            .snapshot()
            .get_by_sid(participant_sid)
            .cloned()
            .ok_or_else(|| RoomError::ParticipantNotFound(participant_sid.to_string()))?;

        if !remote.set_subscription_desired(&track_sid, subscribe) {
            return Err(RoomError::TrackNotFound(track_sid.to_string()));
        }

        self.shared
            .engine
            .update_subscription(UpdateSubscription {
                track_sids: vec![track_sid],
                subscribe,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::ParticipantEventRelay;
    use crate::participant::tests::TestEngine;
    use crate::room::RoomBuilder;
    use crate::types::EncryptionType;
    use std::time::Duration;

    fn spawn_actor() -> (Arc<RoomShared>, RoomActorHandle, JoinHandle<()>) {
        let room = RoomBuilder::new(Arc::new(TestEngine::default())).build();
        let shared = room.shared();
        let context = CancellationToken::new();
        let relay = ParticipantEventRelay::new(shared.bus.clone(), context.clone());
        let local = LocalParticipant::new(
            Arc::clone(&shared.engine),
            relay.clone(),
            EncryptionType::None,
        );
        let (handle, task) = RoomActor::spawn(Arc::clone(&shared), local, relay, context, true);
        (shared, handle, task)
    }

    #[tokio::test]
    async fn test_actor_exits_on_cancel() {
        let (_shared, handle, task) = spawn_actor();
        assert!(!handle.is_cancelled());
        handle.supersede();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_interruption_separates_superseded_from_ended() {
        let (_shared, ended, _task) = spawn_actor();
        ended.context().cancel();
        assert!(matches!(ended.interruption(), ConnectError::Transport(_)));
        assert!(ended.interruption().is_retryable());

        let (_shared, replaced, _task) = spawn_actor();
        replaced.supersede();
        assert_eq!(replaced.interruption(), ConnectError::Cancelled);
    }

    #[tokio::test]
    async fn test_prepare_enters_connecting() {
        let (shared, handle, _task) = spawn_actor();
        handle.prepare().await.unwrap();
        assert_eq!(shared.connection_state.get(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_confirm_without_join_response_fails() {
        let (_shared, handle, _task) = spawn_actor();
        handle.prepare().await.unwrap();
        assert_eq!(
            handle.confirm_join().await,
            Err(ConnectError::MissingLocalParticipant)
        );
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_noop() {
        let (shared, handle, task) = spawn_actor();
        handle.prepare().await.unwrap();
        handle.disconnect().await;
        assert_eq!(shared.connection_state.get(), ConnectionState::Disconnected);
        assert!(handle.context().is_cancelled());

        handle.disconnect().await;
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
