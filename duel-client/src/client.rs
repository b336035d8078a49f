//! MatchClient - one player's side of a match.
//!
//! [`MatchClient`] is the match context: it owns the local store, the
//! synchronizer and the session, and is moved into a single event loop by
//! [`MatchClient::spawn`]. Everything that can change the match reaches the
//! loop as an event and is handled to completion before the next one:
//! - commands from the [`MatchHandle`]
//! - frames and link closures from the transport reader
//! - the sync, heartbeat and turn clock ticks
//! - the reconnect timer
//!
//! ```text
//! MatchHandle ─┐
//! reader task ─┼─→ event loop → LocalStore / Synchronizer (duelsync-core)
//! timers ──────┘        ↓
//!                 SessionManager → Transport
//! ```
//!
//! # Example
//!
//! ```ignore
//! let hub = LoopbackHub::new();
//! let client = MatchClient::new(config, hub.transport(), "alice".into(), state, registry)?;
//! let mut handle = client.spawn();
//!
//! handle.act(ActionPayload::DrawCard).await?;
//! while let Some(event) = handle.next_event().await { /* ... */ }
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use duelsync_core::{
    ConnectionEvent, ConnectionState, FighterRegistry, LocalStore, Rejection, RemoteOutcome,
    Repair, Role, RulesEngine, StoreError, SyncCommand, Synchronizer,
};
use duelsync_types::{
    unix_millis, Action, ActionId, ActionPayload, Envelope, GameEvent, MatchState, Payload,
    PlayerId, PresenceStatus, Reconnect, Seat, StateHash,
};

use crate::config::{ConfigError, MatchConfig};
use crate::session::{PeerInfo, SessionConfig, SessionError, SessionManager, SessionOutput};
use crate::transport::{Transport, TransportError};

/// Commands buffered between the handle and the loop.
const COMMAND_CAPACITY: usize = 64;
/// Frames buffered between the reader and the loop.
const FRAME_CAPACITY: usize = 256;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The player is not one of the two seats of the match.
    #[error("player {0} has no seat in this match")]
    NotSeated(PlayerId),

    /// The configuration cannot be run with.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The local store refused the action.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The event loop is gone.
    #[error("match client stopped")]
    Stopped,
}

impl ClientError {
    /// The rules violation behind a refused action, if that is what this is.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ClientError::Store(StoreError::Rejected { reason, .. }) => Some(reason),
            _ => None,
        }
    }
}

/// Notifications for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Connection lifecycle change.
    Connection(ConnectionEvent),
    /// The local state changed.
    StateChanged {
        /// Turn number.
        turn: u32,
        /// Seat to act.
        current: Seat,
        /// New state hash.
        hash: StateHash,
    },
    /// A peer action was refused by our rules engine.
    RemoteRejected {
        /// Refused action.
        action_id: ActionId,
        /// Why.
        reason: Rejection,
    },
    /// Local state was repaired by the synchronizer.
    Repaired(Repair),
    /// One of our actions was never acknowledged and was rolled back.
    AckTimedOut {
        /// The action.
        action_id: ActionId,
    },
    /// A peer joined or left the channel.
    PeerPresence {
        /// The peer.
        player_id: PlayerId,
        /// Joined or left.
        status: PresenceStatus,
    },
    /// A turn deadline passed and the turn was ended.
    TurnTimedOut {
        /// Seat whose turn expired.
        seat: Seat,
    },
    /// The peer reported an error.
    PeerError {
        /// Machine-readable code.
        code: String,
        /// Description.
        message: String,
    },
    /// The match reached its terminal phase.
    MatchFinished {
        /// Winning seat.
        winner: Seat,
    },
    /// We lost the connection for good and forfeited.
    Abandoned,
}

/// Point-in-time view of the client internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    /// Our seat.
    pub seat: Seat,
    /// Our synchronization role.
    pub role: Role,
    /// Connection state.
    pub connection: ConnectionState,
    /// Current state hash.
    pub hash: StateHash,
    /// Local actions not yet acknowledged.
    pub pending_actions: usize,
    /// Envelopes waiting for a connection.
    pub queued: usize,
    /// Envelopes waiting for an acknowledgment.
    pub awaiting_ack: usize,
    /// Conflicts reported and not yet resolved.
    pub open_conflicts: usize,
    /// Known peers.
    pub peers: Vec<(PlayerId, PeerInfo)>,
}

enum ClientCommand {
    Act {
        payload: ActionPayload,
        reply: oneshot::Sender<Result<MatchState, ClientError>>,
    },
    State {
        reply: oneshot::Sender<MatchState>,
    },
    Status {
        reply: oneshot::Sender<ClientStatus>,
    },
    SyncNow,
    Shutdown {
        reply: oneshot::Sender<MatchState>,
    },
}

enum LinkEvent {
    Frame(Vec<u8>),
    Closed { generation: u64, error: TransportError },
}

enum Flow {
    Continue,
    Stop,
}

/// The match context for one player.
pub struct MatchClient<T: Transport + 'static> {
    config: MatchConfig,
    session: SessionManager<T>,
    store: LocalStore,
    sync: Synchronizer,
}

impl<T: Transport + 'static> MatchClient<T> {
    /// Create a client for `player` over an initial match state.
    ///
    /// The player's seat decides the synchronization role: seat one is the
    /// authority.
    pub fn new(
        config: MatchConfig,
        transport: T,
        player: PlayerId,
        state: MatchState,
        registry: Arc<dyn FighterRegistry>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let seat = state
            .seat_of(&player)
            .ok_or_else(|| ClientError::NotSeated(player.clone()))?;
        let engine = RulesEngine::new(config.rules(), registry);
        let session = SessionManager::new(
            Arc::new(transport),
            state.room_id.clone(),
            player,
            SessionConfig::from(&config),
        );
        let sync = Synchronizer::new(Role::for_seat(seat), config.sync());
        let store = LocalStore::new(engine, seat, state, config.history_capacity);

        Ok(Self {
            config,
            session,
            store,
            sync,
        })
    }

    /// Our seat.
    pub fn seat(&self) -> Seat {
        self.store.seat()
    }

    /// Our synchronization role.
    pub fn role(&self) -> Role {
        self.sync.role()
    }

    /// Current local state.
    pub fn state(&self) -> &MatchState {
        self.store.state()
    }

    /// Connect and run the event loop on the current tokio runtime.
    pub fn spawn(self) -> MatchHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CAPACITY);

        let event_loop = EventLoop::new(self, events_tx, frames_tx);
        let task = tokio::spawn(event_loop.run(commands_rx, frames_rx));

        MatchHandle {
            commands: commands_tx,
            events: events_rx,
            task,
        }
    }

    fn status(&self) -> ClientStatus {
        ClientStatus {
            seat: self.store.seat(),
            role: self.sync.role(),
            connection: self.session.state(),
            hash: self.store.hash(),
            pending_actions: self.store.pending().len(),
            queued: self.session.queued(),
            awaiting_ack: self.session.awaiting_ack(),
            open_conflicts: self.sync.open_conflicts(),
            peers: self
                .session
                .peers()
                .iter()
                .map(|(id, info)| (id.clone(), *info))
                .collect(),
        }
    }
}

/// Application side of a running match client.
pub struct MatchHandle {
    commands: mpsc::Sender<ClientCommand>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    task: JoinHandle<()>,
}

impl MatchHandle {
    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> ClientCommand) -> Result<R, ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ClientError::Stopped)?;
        response.await.map_err(|_| ClientError::Stopped)
    }

    /// Perform an action as our seat.
    ///
    /// Applied locally before it is broadcast. A rules violation comes back
    /// as [`ClientError::Store`] and leaves the state untouched.
    pub async fn act(&self, payload: ActionPayload) -> Result<MatchState, ClientError> {
        self.request(|reply| ClientCommand::Act { payload, reply }).await?
    }

    /// Copy of the current local state.
    pub async fn state(&self) -> Result<MatchState, ClientError> {
        self.request(|reply| ClientCommand::State { reply }).await
    }

    /// Client internals.
    pub async fn status(&self) -> Result<ClientStatus, ClientError> {
        self.request(|reply| ClientCommand::Status { reply }).await
    }

    /// Run the periodic sync check now.
    pub async fn sync_now(&self) -> Result<(), ClientError> {
        self.commands
            .send(ClientCommand::SyncNow)
            .await
            .map_err(|_| ClientError::Stopped)
    }

    /// Wait for the next event. `None` once the loop has stopped.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Next event if one is ready.
    pub fn try_next_event(&mut self) -> Option<ClientEvent> {
        self.events.try_recv().ok()
    }

    /// Leave the channel, stop the loop and return the final state.
    pub async fn shutdown(self) -> Result<MatchState, ClientError> {
        let state = self.request(|reply| ClientCommand::Shutdown { reply }).await?;
        if let Err(e) = self.task.await {
            warn!(error = %e, "match event loop panicked");
        }
        Ok(state)
    }
}

struct EventLoop<T: Transport + 'static> {
    client: MatchClient<T>,
    events: mpsc::UnboundedSender<ClientEvent>,
    frames: mpsc::Sender<LinkEvent>,
    reader: Option<JoinHandle<()>>,
    reconnect_at: Option<Instant>,
    finish_announced: bool,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn ticker(period: std::time::Duration) -> time::Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl<T: Transport + 'static> EventLoop<T> {
    fn new(client: MatchClient<T>, events: mpsc::UnboundedSender<ClientEvent>, frames: mpsc::Sender<LinkEvent>) -> Self {
        let finish_announced = client.store.state().is_finished();
        Self {
            client,
            events,
            frames,
            reader: None,
            reconnect_at: None,
            finish_announced,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<ClientCommand>, mut frames: mpsc::Receiver<LinkEvent>) {
        let outputs = self.client.session.connect(unix_millis()).await;
        self.on_session_outputs(outputs, unix_millis()).await;

        let mut sync_tick = ticker(self.client.config.sync_interval());
        let mut heartbeat = ticker(self.client.config.heartbeat_interval());
        let mut clock = ticker(self.client.config.clock_tick());

        loop {
            let flow = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command, unix_millis()).await,
                    None => {
                        debug!("match handle dropped");
                        self.stop(unix_millis()).await;
                        Flow::Stop
                    }
                },
                Some(event) = frames.recv() => {
                    self.on_link_event(event, unix_millis()).await;
                    Flow::Continue
                }
                _ = sync_tick.tick() => {
                    self.on_sync_tick(unix_millis()).await;
                    Flow::Continue
                }
                _ = heartbeat.tick() => {
                    self.client.session.heartbeat(unix_millis()).await;
                    Flow::Continue
                }
                _ = clock.tick() => {
                    self.on_clock_tick(unix_millis()).await;
                    Flow::Continue
                }
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    let now = unix_millis();
                    let outputs = self.client.session.on_reconnect_timer(now).await;
                    self.on_session_outputs(outputs, now).await;
                    Flow::Continue
                }
            };
            if let Flow::Stop = flow {
                break;
            }
        }
    }

    fn emit(&self, event: ClientEvent) {
        // The application may have dropped its handle; nothing to do then.
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn on_command(&mut self, command: ClientCommand, now: u64) -> Flow {
        match command {
            ClientCommand::Act { payload, reply } => {
                let result = self.submit(payload, now).await;
                let _ = reply.send(result);
            }
            ClientCommand::State { reply } => {
                let _ = reply.send(self.client.store.state().clone());
            }
            ClientCommand::Status { reply } => {
                let _ = reply.send(self.client.status());
            }
            ClientCommand::SyncNow => self.on_sync_tick(now).await,
            ClientCommand::Shutdown { reply } => {
                self.stop(now).await;
                let _ = reply.send(self.client.store.state().clone());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn stop(&mut self, now: u64) {
        let outputs = self.client.session.disconnect(now).await;
        self.on_session_outputs(outputs, now).await;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    /// Apply a local action and broadcast it.
    ///
    /// An action that cannot be sent or queued is undone before the error
    /// is returned.
    async fn submit(&mut self, payload: ActionPayload, now: u64) -> Result<MatchState, ClientError> {
        let before = self.client.store.snapshot();
        let action = self.client.store.next_action(payload, now);
        let id = action.id;
        let state = match self.client.store.process_local_action(action.clone()) {
            Ok(state) => state.clone(),
            Err(e) => {
                debug!(error = %e, "local action rejected");
                return Err(e.into());
            }
        };

        if let Err(e) = self.client.session.send(Payload::Action(action), true, now).await {
            warn!(action = %id, error = %e, "action could not be sent, undoing it");
            self.client.store.restore(before);
            return Err(e.into());
        }

        self.after_change(now).await;
        Ok(state)
    }

    async fn broadcast(&mut self, payload: Payload, requires_ack: bool, now: u64) {
        if let Err(e) = self.client.session.send(payload, requires_ack, now).await {
            warn!(error = %e, "broadcast failed");
        }
    }

    async fn after_change(&mut self, now: u64) {
        let state = self.client.store.state();
        self.emit(ClientEvent::StateChanged {
            turn: state.turn,
            current: state.current,
            hash: state.state_hash,
        });

        if self.finish_announced || !state.is_finished() {
            return;
        }
        let Some(winner) = state.winner else {
            return;
        };
        self.finish_announced = true;
        info!(%winner, turn = state.turn, "match finished");
        self.emit(ClientEvent::MatchFinished { winner });
        if self.client.sync.role() == Role::Authority {
            self.broadcast(Payload::GameEvent(GameEvent::MatchFinished { winner }), false, now)
                .await;
        }
    }

    // =========================================================================
    // Transport
    // =========================================================================

    fn spawn_reader(&mut self, generation: u64) {
        if let Some(old) = self.reader.take() {
            old.abort();
        }
        let transport = Arc::clone(self.client.session.transport());
        let frames = self.frames.clone();
        self.reader = Some(tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(frame) => {
                        if frames.send(LinkEvent::Frame(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        let _ = frames.send(LinkEvent::Closed { generation, error }).await;
                        break;
                    }
                }
            }
        }));
    }

    async fn on_link_event(&mut self, event: LinkEvent, now: u64) {
        match event {
            LinkEvent::Frame(frame) => match self.client.session.receive(&frame, now).await {
                Ok(Some(envelope)) => self.on_envelope(envelope, now).await,
                Ok(None) => {}
                Err(e) => warn!(error = %e, "dropping undecodable frame"),
            },
            LinkEvent::Closed { generation, error } => {
                let outputs = self.client.session.on_link_lost(generation, error, now).await;
                self.on_session_outputs(outputs, now).await;
            }
        }
    }

    async fn on_session_outputs(&mut self, outputs: Vec<SessionOutput>, now: u64) {
        for output in outputs {
            match output {
                SessionOutput::LinkUp { generation } => self.spawn_reader(generation),
                SessionOutput::ReconnectAfter(delay) => self.reconnect_at = Some(Instant::now() + delay),
                SessionOutput::ReconnectCancelled => self.reconnect_at = None,
                SessionOutput::Connection(event) => {
                    self.emit(ClientEvent::Connection(event.clone()));
                    match event {
                        ConnectionEvent::Reconnected { attempt } => {
                            self.broadcast(Payload::Reconnect(Reconnect { attempt }), false, now)
                                .await;
                            // Anything may have happened while we were away.
                            self.on_sync_tick(now).await;
                        }
                        ConnectionEvent::GaveUp { .. } => self.abandon(now).await,
                        _ => {}
                    }
                }
            }
        }
    }

    /// The connection is gone for good: forfeit locally.
    async fn abandon(&mut self, now: u64) {
        if self.client.store.state().is_finished() {
            return;
        }
        let seat = self.client.store.seat();
        self.client.store.abandon(seat, now);
        warn!(%seat, "connection lost for good, match abandoned");
        self.emit(ClientEvent::Abandoned);
        self.after_change(now).await;
    }

    // =========================================================================
    // Inbound envelopes
    // =========================================================================

    async fn on_envelope(&mut self, envelope: Envelope, now: u64) {
        match envelope.data {
            Payload::Action(action) => self.on_remote_action(action, now).await,
            Payload::StateSync(message) => {
                let before = self.client.store.hash();
                let commands = self.client.sync.handle(&mut self.client.store, message, now);
                let changed = self.client.store.hash() != before;
                self.execute(commands, now).await;
                if changed {
                    self.after_change(now).await;
                }
            }
            Payload::Ack(ack) => {
                if let Some(action_id) = ack.action_id {
                    if self.client.store.acknowledge(&action_id).is_some() {
                        debug!(action = %action_id, "action acknowledged");
                    }
                }
            }
            Payload::Presence(presence) => self.emit(ClientEvent::PeerPresence {
                player_id: presence.player_id,
                status: presence.status,
            }),
            Payload::GameEvent(event) => self.on_game_event(event),
            Payload::Error(report) => {
                warn!(code = %report.code, message = %report.message, "peer reported an error");
                self.emit(ClientEvent::PeerError {
                    code: report.code,
                    message: report.message,
                });
            }
            Payload::Reconnect(notice) => {
                info!(attempt = notice.attempt, "peer reconnected");
            }
            Payload::Heartbeat(_) => {}
        }
    }

    async fn on_remote_action(&mut self, action: Action, now: u64) {
        let report = self.client.sync.on_remote_action(&mut self.client.store, &action);
        match report.outcome {
            Some(RemoteOutcome::Applied) => self.after_change(now).await,
            Some(RemoteOutcome::Rejected(reason)) => self.emit(ClientEvent::RemoteRejected {
                action_id: action.id,
                reason,
            }),
            Some(RemoteOutcome::Acknowledged | RemoteOutcome::Duplicate) | None => {}
        }
        self.execute(report.commands, now).await;
    }

    fn on_game_event(&mut self, event: GameEvent) {
        match event {
            GameEvent::TurnTimedOut { seat } => self.emit(ClientEvent::TurnTimedOut { seat }),
            GameEvent::MatchFinished { winner } => {
                if self.client.store.state().winner != Some(winner) {
                    warn!(%winner, local = ?self.client.store.state().winner, "peer finished the match differently");
                }
            }
        }
    }

    async fn execute(&mut self, commands: Vec<SyncCommand>, now: u64) {
        for command in commands {
            match command {
                SyncCommand::Send(message) => self.broadcast(Payload::StateSync(message), false, now).await,
                SyncCommand::Retransmit(actions) => {
                    for action in actions {
                        self.broadcast(Payload::Action(action), true, now).await;
                    }
                }
                SyncCommand::Repaired(repair) => {
                    info!(?repair, hash = %self.client.store.hash(), "local state repaired");
                    self.emit(ClientEvent::Repaired(repair));
                }
            }
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    async fn on_sync_tick(&mut self, now: u64) {
        if !self.client.session.is_connected() {
            return;
        }
        let commands = self.client.sync.on_tick(&self.client.store, now);
        self.execute(commands, now).await;
    }

    async fn on_clock_tick(&mut self, now: u64) {
        for envelope in self.client.session.check_acks(now) {
            let Payload::Action(action) = envelope.data else {
                continue;
            };
            self.emit(ClientEvent::AckTimedOut { action_id: action.id });
            let commands = self.client.sync.on_ack_timeout(&mut self.client.store, &action.id);
            self.execute(commands, now).await;
        }

        let commands = self.client.sync.check_timeouts(&self.client.store, now);
        self.execute(commands, now).await;

        let state = self.client.store.state();
        if state.is_finished() || now < state.turn_deadline {
            return;
        }
        let (expired, turn, deadline) = (state.current, state.turn, state.turn_deadline);
        let seat = self.client.store.seat();

        if expired == seat {
            info!(%seat, turn, "turn deadline passed, ending turn");
            match self.submit(ActionPayload::EndTurn, now).await {
                Ok(_) => self.announce_timeout(seat, now).await,
                Err(e) => warn!(error = %e, "could not end timed out turn"),
            }
            return;
        }

        // A stalled or vanished peer gets one ack window to end its own turn.
        let grace = self.client.config.ack_timeout_ms();
        if self.client.sync.role() != Role::Authority || now < deadline.saturating_add(grace) {
            return;
        }
        match self.client.store.expire_turn(now) {
            Ok(action) => {
                info!(seat = %expired, turn, "peer missed its turn deadline, ending it");
                self.broadcast(Payload::Action(action), true, now).await;
                self.announce_timeout(expired, now).await;
                self.after_change(now).await;
            }
            Err(e) => warn!(error = %e, "could not end the peer's timed out turn"),
        }
    }

    async fn announce_timeout(&mut self, seat: Seat, now: u64) {
        self.emit(ClientEvent::TurnTimedOut { seat });
        self.broadcast(Payload::GameEvent(GameEvent::TurnTimedOut { seat }), false, now)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use duelsync_core::sample::{sample_match, sample_registry};
    use duelsync_types::{Ack, Heartbeat, MessageType, Phase, RoomId, SyncMessage};

    struct Harness {
        event_loop: EventLoop<MockTransport>,
        transport: MockTransport,
        events: mpsc::UnboundedReceiver<ClientEvent>,
        _frames: mpsc::Receiver<LinkEvent>,
    }

    impl Harness {
        fn drain_events(&mut self) -> Vec<ClientEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        fn sent(&self, msg_type: MessageType) -> Vec<Envelope> {
            self.transport
                .sent_envelopes()
                .into_iter()
                .filter(|e| e.msg_type == msg_type)
                .collect()
        }
    }

    fn client_for(player: &str, state: MatchState) -> (MatchClient<MockTransport>, MockTransport) {
        client_with(player, state, MatchConfig::default())
    }

    fn client_with(player: &str, state: MatchState, config: MatchConfig) -> (MatchClient<MockTransport>, MockTransport) {
        let transport = MockTransport::new();
        let client = MatchClient::new(
            config,
            transport.clone(),
            PlayerId::from(player),
            state,
            Arc::new(sample_registry()),
        )
        .unwrap();
        (client, transport)
    }

    fn offline(player: &str, state: MatchState, config: MatchConfig) -> Harness {
        let (client, transport) = client_with(player, state, config);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (frames_tx, frames) = mpsc::channel(16);
        Harness {
            event_loop: EventLoop::new(client, events_tx, frames_tx),
            transport,
            events,
            _frames: frames,
        }
    }

    async fn connected(player: &str, state: MatchState) -> Harness {
        let mut harness = offline(player, state, MatchConfig::default());
        let outputs = harness.event_loop.client.session.connect(0).await;
        harness.event_loop.on_session_outputs(outputs, 0).await;
        harness.transport.clear_sent();
        harness.drain_events();
        harness
    }

    fn from_peer(sender: &str, payload: Payload) -> Vec<u8> {
        Envelope::new(RoomId::from("sample-room"), Some(PlayerId::from(sender)), payload)
            .to_bytes()
            .unwrap()
    }

    fn live(state: MatchState) -> MatchState {
        let mut state = state;
        state.turn_deadline = u64::MAX;
        duelsync_core::hash::refresh(&mut state);
        state
    }

    // ===========================================
    // Construction
    // ===========================================

    #[test]
    fn seat_decides_role() {
        let (alice, _) = client_for("alice", sample_match());
        let (bob, _) = client_for("bob", sample_match());

        assert_eq!(alice.seat(), Seat::One);
        assert_eq!(alice.role(), Role::Authority);
        assert_eq!(bob.seat(), Seat::Two);
        assert_eq!(bob.role(), Role::Follower);
    }

    #[test]
    fn unseated_player_is_refused() {
        let result = MatchClient::new(
            MatchConfig::default(),
            MockTransport::new(),
            PlayerId::from("mallory"),
            sample_match(),
            Arc::new(sample_registry()),
        );
        assert!(matches!(result, Err(ClientError::NotSeated(_))));
    }

    // ===========================================
    // Local Actions
    // ===========================================

    #[tokio::test]
    async fn act_applies_then_broadcasts() {
        let mut h = connected("alice", live(sample_match())).await;

        let state = h.event_loop.submit(ActionPayload::DrawCard, 10).await.unwrap();

        assert_eq!(state.phase, Phase::Main);
        let sent = h.sent(MessageType::Action);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].requires_ack);
        assert_eq!(h.event_loop.client.store.pending().len(), 1);
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, ClientEvent::StateChanged { .. })));
    }

    #[tokio::test]
    async fn rejected_action_is_not_sent() {
        let mut h = connected("bob", live(sample_match())).await;
        let before = h.event_loop.client.store.hash();

        let result = h.event_loop.submit(ActionPayload::DrawCard, 10).await;

        let error = result.unwrap_err();
        assert!(matches!(error.rejection(), Some(Rejection::NotYourTurn { .. })));
        assert!(h.sent(MessageType::Action).is_empty());
        assert_eq!(h.event_loop.client.store.hash(), before);
    }

    #[tokio::test]
    async fn unsendable_action_is_undone() {
        let config = MatchConfig {
            outbound_capacity: 1,
            ..MatchConfig::default()
        };
        let mut h = offline("alice", live(sample_match()), config);

        // The first action fills the offline queue.
        let drawn = h.event_loop.submit(ActionPayload::DrawCard, 10).await.unwrap();
        assert_eq!(h.event_loop.client.session.queued(), 1);

        let result = h.event_loop.submit(ActionPayload::EndTurn, 20).await;

        assert!(matches!(result, Err(ClientError::Session(SessionError::Queue(_)))));
        let state = h.event_loop.client.store.state();
        assert_eq!(state, &drawn);
        assert_eq!(state.current, Seat::One);
        assert_eq!(h.event_loop.client.store.pending().len(), 1);
    }

    #[tokio::test]
    async fn ack_clears_pending_action() {
        let mut h = connected("alice", live(sample_match())).await;
        h.event_loop.submit(ActionPayload::DrawCard, 10).await.unwrap();
        let sent = h.sent(MessageType::Action).remove(0);
        let Payload::Action(action) = &sent.data else {
            panic!("expected an action");
        };

        let ack = from_peer(
            "bob",
            Payload::Ack(Ack {
                message_id: sent.message_id,
                action_id: Some(action.id),
            }),
        );
        h.event_loop.on_link_event(LinkEvent::Frame(ack), 20).await;

        assert!(h.event_loop.client.store.pending().is_empty());
        assert_eq!(h.event_loop.client.session.awaiting_ack(), 0);
    }

    // ===========================================
    // Remote Traffic
    // ===========================================

    #[tokio::test]
    async fn remote_action_is_applied_and_acked() {
        let state = live(sample_match());
        let mut bob = connected("bob", state.clone()).await;
        let mut alice = connected("alice", state).await;

        alice.event_loop.submit(ActionPayload::DrawCard, 10).await.unwrap();
        let frame = alice.transport.sent_frames().pop().unwrap();

        bob.event_loop.on_link_event(LinkEvent::Frame(frame), 20).await;

        assert_eq!(bob.event_loop.client.store.hash(), alice.event_loop.client.store.hash());
        assert_eq!(bob.sent(MessageType::Ack).len(), 1);
        assert!(bob
            .drain_events()
            .iter()
            .any(|e| matches!(e, ClientEvent::StateChanged { .. })));
    }

    #[tokio::test]
    async fn authority_answers_ping() {
        let mut h = connected("alice", live(sample_match())).await;
        let ping = SyncMessage::Ping(duelsync_types::SyncPing {
            local_hash: h.event_loop.client.store.hash(),
            timestamp: 5,
            turn_number: 1,
            last_action_id: None,
        });

        h.event_loop
            .on_link_event(LinkEvent::Frame(from_peer("bob", Payload::StateSync(ping))), 6)
            .await;

        let replies = h.sent(MessageType::StateSync);
        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0].data, Payload::StateSync(SyncMessage::Pong(_))));
    }

    #[tokio::test]
    async fn heartbeats_do_not_reach_the_application() {
        let mut h = connected("alice", live(sample_match())).await;
        let beat = from_peer("bob", Payload::Heartbeat(Heartbeat { sent_at: 1 }));

        h.event_loop.on_link_event(LinkEvent::Frame(beat), 3).await;

        assert!(h.drain_events().is_empty());
        let status = h.event_loop.client.status();
        assert_eq!(status.peers.len(), 1);
        assert_eq!(status.peers[0].1.latency_ms, Some(2));
    }

    // ===========================================
    // Timers
    // ===========================================

    #[tokio::test]
    async fn expired_turn_is_ended() {
        let mut state = live(sample_match());
        state.turn_deadline = 1_000;
        duelsync_core::hash::refresh(&mut state);
        let mut h = connected("alice", state).await;

        h.event_loop.on_clock_tick(1_000).await;

        let state = h.event_loop.client.store.state();
        assert_eq!(state.current, Seat::Two);
        assert!(h.sent(MessageType::GameEvent).iter().any(|e| matches!(
            e.data,
            Payload::GameEvent(GameEvent::TurnTimedOut { seat: Seat::One })
        )));
        assert!(h
            .drain_events()
            .contains(&ClientEvent::TurnTimedOut { seat: Seat::One }));
    }

    #[tokio::test]
    async fn authority_ends_a_stalled_peer_turn() {
        let mut state = live(sample_match());
        state.current = Seat::Two;
        state.turn_deadline = 1_000;
        duelsync_core::hash::refresh(&mut state);
        let mut alice = connected("alice", state.clone()).await;
        let mut bob = connected("bob", state).await;

        // Within one ack window the peer may still end its own turn.
        alice.event_loop.on_clock_tick(2_000).await;
        assert_eq!(alice.event_loop.client.store.state().current, Seat::Two);
        assert!(alice.sent(MessageType::Action).is_empty());

        alice.event_loop.on_clock_tick(1_000 + 5_000).await;

        let ended = alice.event_loop.client.store.state().clone();
        assert_eq!(ended.current, Seat::One);
        assert_eq!(ended.phase, Phase::Draw);
        let sent = alice.sent(MessageType::Action);
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0].data,
            Payload::Action(action) if action.actor == Seat::Two && action.payload == ActionPayload::EndTurn
        ));
        assert!(alice
            .drain_events()
            .contains(&ClientEvent::TurnTimedOut { seat: Seat::Two }));

        // The stalled side adopts the synthesized end of turn.
        for envelope in alice.transport.sent_envelopes() {
            let frame = envelope.to_bytes().unwrap();
            bob.event_loop.on_link_event(LinkEvent::Frame(frame), 6_001).await;
        }
        assert_eq!(bob.event_loop.client.store.hash(), ended.state_hash);
        assert_eq!(bob.event_loop.client.store.state().current, Seat::One);
        assert!(bob
            .drain_events()
            .contains(&ClientEvent::TurnTimedOut { seat: Seat::Two }));
    }

    #[tokio::test]
    async fn follower_leaves_the_peer_deadline_to_the_authority() {
        let mut state = live(sample_match());
        state.turn_deadline = 1_000;
        duelsync_core::hash::refresh(&mut state);
        let mut h = connected("bob", state).await;

        h.event_loop.on_clock_tick(60_000).await;

        assert_eq!(h.event_loop.client.store.state().current, Seat::One);
        assert!(h.sent(MessageType::Action).is_empty());
    }

    #[tokio::test]
    async fn unacked_action_is_rolled_back() {
        let mut h = connected("alice", live(sample_match())).await;
        h.event_loop.submit(ActionPayload::DrawCard, 10).await.unwrap();
        let action_id = h.event_loop.client.store.pending()[0].id;

        h.event_loop.on_clock_tick(10 + 5_000).await;

        assert!(h.event_loop.client.store.pending().is_empty());
        assert!(h
            .drain_events()
            .contains(&ClientEvent::AckTimedOut { action_id }));
        // The authority answers by pushing its state.
        assert!(h.sent(MessageType::StateSync).iter().any(|e| matches!(
            e.data,
            Payload::StateSync(SyncMessage::FullState(_))
        )));
    }

    // ===========================================
    // Connection
    // ===========================================

    #[tokio::test]
    async fn giving_up_forfeits_the_match() {
        let mut h = connected("alice", live(sample_match())).await;

        let outputs = vec![SessionOutput::Connection(ConnectionEvent::GaveUp {
            attempts: 10,
            error: "offline".into(),
        })];
        h.event_loop.on_session_outputs(outputs, 50).await;

        assert_eq!(h.event_loop.client.store.state().winner, Some(Seat::Two));
        let events = h.drain_events();
        assert!(events.contains(&ClientEvent::Abandoned));
        assert!(events.contains(&ClientEvent::MatchFinished { winner: Seat::Two }));
    }

    #[tokio::test]
    async fn reconnect_triggers_sync_check() {
        let mut h = connected("bob", live(sample_match())).await;

        let outputs = vec![SessionOutput::Connection(ConnectionEvent::Reconnected { attempt: 2 })];
        h.event_loop.on_session_outputs(outputs, 50).await;

        assert_eq!(h.sent(MessageType::Reconnect).len(), 1);
        assert!(h.sent(MessageType::StateSync).iter().any(|e| matches!(
            e.data,
            Payload::StateSync(SyncMessage::Ping(_))
        )));
    }

    #[tokio::test]
    async fn shutdown_announces_departure() {
        let mut h = connected("alice", live(sample_match())).await;

        let flow = h.event_loop.on_command(
            ClientCommand::Shutdown {
                reply: oneshot::channel().0,
            },
            10,
        );

        assert!(matches!(flow.await, Flow::Stop));
        assert!(!h.transport.is_connected());
        assert_eq!(h.sent(MessageType::Presence).len(), 1);
    }
}
