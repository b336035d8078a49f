//! Session manager for one match room.
//!
//! Executes the commands of the pure [`ConnectionState`] machine against a
//! [`Transport`]: subscribing, presence, flushing the offline queue and
//! arming reconnect timers. Owns the envelope codec for outgoing and
//! incoming traffic, filters our own broadcasts, answers `requires_ack`
//! envelopes and tracks peers.
//!
//! The session never sleeps and never spawns. Timers and the reader task
//! belong to the match event loop, which feeds their results back through
//! [`SessionManager::on_reconnect_timer`] and [`SessionManager::on_link_lost`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use duelsync_core::{
    BufferError, ConnectionEvent, ConnectionInput, ConnectionState, OutboundQueue,
    ReconnectPolicy, SessionCommand,
};
use duelsync_types::{
    Ack, Envelope, Heartbeat, MessageId, Payload, PlayerId, Presence, PresenceStatus,
    ProtocolError, RoomId,
};

use crate::config::MatchConfig;
use crate::transport::{Transport, TransportError};

/// Error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Envelope could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Offline queue is full.
    #[error(transparent)]
    Queue(#[from] BufferError),

    /// Reconnect attempts were exhausted.
    #[error("connection permanently lost")]
    Terminal,
}

/// Session tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Acknowledgment window in milliseconds.
    pub ack_timeout_ms: u64,
    /// Envelopes held while offline or awaiting ack.
    pub outbound_capacity: usize,
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&MatchConfig::default())
    }
}

impl From<&MatchConfig> for SessionConfig {
    fn from(config: &MatchConfig) -> Self {
        Self {
            ack_timeout_ms: config.ack_timeout_ms(),
            outbound_capacity: config.outbound_capacity,
            reconnect: config.reconnect(),
        }
    }
}

/// What we know about another participant of the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    /// Announced itself and has not left.
    pub present: bool,
    /// Local time of the last envelope from this peer.
    pub last_seen: u64,
    /// Delay of the last heartbeat, by the peer's clock against ours.
    pub latency_ms: Option<u64>,
}

/// Where an outgoing envelope went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Broadcast now.
    Sent(MessageId),
    /// Held for the next connect.
    Queued(MessageId),
}

impl Delivery {
    /// Id of the envelope either way.
    pub fn message_id(&self) -> MessageId {
        match self {
            Delivery::Sent(id) | Delivery::Queued(id) => *id,
        }
    }
}

/// Work for the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutput {
    /// Connection lifecycle change for the application.
    Connection(ConnectionEvent),
    /// A new subscription is live; start a reader tagged with `generation`.
    LinkUp {
        /// Subscription generation.
        generation: u64,
    },
    /// Call [`SessionManager::on_reconnect_timer`] after this delay.
    ReconnectAfter(Duration),
    /// Disarm the reconnect timer.
    ReconnectCancelled,
}

/// Drives one room subscription.
pub struct SessionManager<T: Transport> {
    transport: Arc<T>,
    room: RoomId,
    player: PlayerId,
    config: SessionConfig,
    state: ConnectionState,
    queue: OutboundQueue,
    generation: u64,
    peers: HashMap<PlayerId, PeerInfo>,
}

impl<T: Transport> SessionManager<T> {
    /// Create a disconnected session.
    pub fn new(transport: Arc<T>, room: RoomId, player: PlayerId, config: SessionConfig) -> Self {
        Self {
            transport,
            room,
            player,
            queue: OutboundQueue::new(config.outbound_capacity),
            config,
            state: ConnectionState::new(),
            generation: 0,
            peers: HashMap::new(),
        }
    }

    /// The transport, shared with the reader task.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Room this session is bound to.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Our identity on the channel.
    pub fn player(&self) -> &PlayerId {
        &self.player
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Subscribed and able to broadcast.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Generation of the current subscription.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Known peers.
    pub fn peers(&self) -> &HashMap<PlayerId, PeerInfo> {
        &self.peers
    }

    /// One peer.
    pub fn peer(&self, id: &PlayerId) -> Option<&PeerInfo> {
        self.peers.get(id)
    }

    /// Envelopes waiting for a connection.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Envelopes waiting for an acknowledgment.
    pub fn awaiting_ack(&self) -> usize {
        self.queue.awaiting_count()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Subscribe to the room channel.
    pub async fn connect(&mut self, now: u64) -> Vec<SessionOutput> {
        self.drive(ConnectionInput::ConnectRequested, now).await
    }

    /// Announce departure and leave the channel.
    pub async fn disconnect(&mut self, now: u64) -> Vec<SessionOutput> {
        self.drive(ConnectionInput::DisconnectRequested, now).await
    }

    /// The reconnect delay elapsed.
    pub async fn on_reconnect_timer(&mut self, now: u64) -> Vec<SessionOutput> {
        self.drive(ConnectionInput::ReconnectTimer, now).await
    }

    /// The reader of subscription `generation` stopped with `error`.
    ///
    /// Readers of replaced subscriptions are ignored. A channel closed by
    /// the backend is final; any other failure is retried.
    pub async fn on_link_lost(&mut self, generation: u64, error: TransportError, now: u64) -> Vec<SessionOutput> {
        if generation != self.generation || !self.state.is_connected() {
            trace!(generation, current = self.generation, "ignoring stale reader");
            return vec![];
        }
        let input = match error {
            TransportError::ChannelClosed => ConnectionInput::ChannelClosed,
            other => ConnectionInput::ConnectionLost {
                reason: other.to_string(),
            },
        };
        self.drive(input, now).await
    }

    async fn drive(&mut self, input: ConnectionInput, now: u64) -> Vec<SessionOutput> {
        let mut outputs = Vec::new();
        let mut inputs = VecDeque::from([input]);

        while let Some(input) = inputs.pop_front() {
            let (next, commands) = self.state.on_event(input, &self.config.reconnect);
            if next != self.state {
                debug!(room = %self.room, from = ?self.state, to = ?next, "connection state changed");
            }
            self.state = next;

            for command in commands {
                match command {
                    SessionCommand::Subscribe => {
                        match self.transport.connect(&self.room.channel_name()).await {
                            Ok(()) => {
                                self.generation += 1;
                                outputs.push(SessionOutput::LinkUp {
                                    generation: self.generation,
                                });
                                inputs.push_back(ConnectionInput::ConnectSucceeded);
                            }
                            Err(e) => inputs.push_back(ConnectionInput::ConnectFailed {
                                error: e.to_string(),
                            }),
                        }
                    }
                    SessionCommand::Unsubscribe => {
                        // Orphan whatever reader is still running.
                        self.generation += 1;
                        if let Err(e) = self.transport.close().await {
                            debug!(error = %e, "close failed");
                        }
                    }
                    SessionCommand::AnnouncePresence(status) => self.announce(status, now).await,
                    SessionCommand::FlushQueue => self.flush(now).await,
                    SessionCommand::StartReconnectTimer { delay } => {
                        outputs.push(SessionOutput::ReconnectAfter(delay));
                    }
                    SessionCommand::CancelReconnect => outputs.push(SessionOutput::ReconnectCancelled),
                    SessionCommand::Emit(event) => {
                        self.log_event(&event);
                        outputs.push(SessionOutput::Connection(event));
                    }
                }
            }
        }

        outputs
    }

    fn log_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => info!(room = %self.room, player = %self.player, "connected"),
            ConnectionEvent::Reconnected { attempt } => info!(room = %self.room, attempt, "reconnected"),
            ConnectionEvent::Disconnected { reason } => info!(room = %self.room, %reason, "disconnected"),
            ConnectionEvent::ConnectionFailed { error } => {
                warn!(room = %self.room, %error, "connection failed, will retry")
            }
            ConnectionEvent::Interrupted { reason } => {
                warn!(room = %self.room, %reason, "connection interrupted, will retry")
            }
            ConnectionEvent::ReconnectFailed { attempt, error } => {
                warn!(room = %self.room, attempt, %error, "reconnect attempt failed")
            }
            ConnectionEvent::GaveUp { attempts, error } => {
                error!(room = %self.room, attempts, %error, "giving up on connection")
            }
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    fn envelope(&self, payload: Payload, requires_ack: bool, now: u64) -> Envelope {
        let mut envelope = Envelope::new(self.room.clone(), Some(self.player.clone()), payload);
        envelope.timestamp = now;
        if requires_ack {
            envelope = envelope.with_ack();
        }
        envelope
    }

    async fn transmit(&self, envelope: &Envelope) -> Result<(), SessionError> {
        let bytes = envelope.to_bytes()?;
        self.transport.send(&bytes).await?;
        Ok(())
    }

    /// Broadcast a payload, or queue it while offline.
    ///
    /// A transport failure is not an error: the envelope stays queued and
    /// goes out on the next connect.
    pub async fn send(&mut self, payload: Payload, requires_ack: bool, now: u64) -> Result<Delivery, SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::Terminal);
        }

        let envelope = self.envelope(payload, requires_ack, now);
        let id = envelope.message_id;

        if !self.state.is_connected() {
            self.queue.enqueue(envelope)?;
            return Ok(Delivery::Queued(id));
        }

        match self.transmit(&envelope).await {
            Ok(()) => {
                if requires_ack {
                    self.queue.track(envelope, now + self.config.ack_timeout_ms);
                }
                Ok(Delivery::Sent(id))
            }
            Err(SessionError::Transport(e)) => {
                warn!(error = %e, msg_type = ?envelope.msg_type, "send failed, queued for retry");
                self.queue.enqueue(envelope)?;
                Ok(Delivery::Queued(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Broadcast a heartbeat. Skipped while offline.
    pub async fn heartbeat(&mut self, now: u64) {
        if !self.state.is_connected() {
            return;
        }
        let envelope = self.envelope(Payload::Heartbeat(Heartbeat { sent_at: now }), false, now);
        if let Err(e) = self.transmit(&envelope).await {
            debug!(error = %e, "heartbeat not sent");
        }
    }

    async fn announce(&mut self, status: PresenceStatus, now: u64) {
        let presence = Presence {
            player_id: self.player.clone(),
            status,
        };
        let envelope = self.envelope(Payload::Presence(presence), false, now);
        if let Err(e) = self.transmit(&envelope).await {
            debug!(error = %e, ?status, "presence not announced");
        }
    }

    async fn flush(&mut self, now: u64) {
        let mut pending: VecDeque<Envelope> = self.queue.drain().into();
        if !pending.is_empty() {
            debug!(count = pending.len(), "flushing outbound queue");
        }

        while let Some(envelope) = pending.pop_front() {
            match self.transmit(&envelope).await {
                Ok(()) => {
                    if envelope.requires_ack {
                        self.queue.track(envelope, now + self.config.ack_timeout_ms);
                    }
                }
                Err(SessionError::Transport(e)) => {
                    warn!(error = %e, remaining = pending.len() + 1, "flush interrupted");
                    pending.push_front(envelope);
                    while let Some(unsent) = pending.pop_back() {
                        self.queue.requeue_front(unsent);
                    }
                    return;
                }
                Err(e) => warn!(error = %e, "dropping unencodable envelope"),
            }
        }
    }

    /// Envelopes whose acknowledgment window closed, oldest first.
    pub fn check_acks(&mut self, now: u64) -> Vec<Envelope> {
        let expired = self.queue.expired(now);
        for envelope in &expired {
            warn!(message_id = %envelope.message_id, msg_type = ?envelope.msg_type, "ack timed out");
        }
        expired
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Decode a frame and handle session-level traffic.
    ///
    /// Returns the envelope when the application has something to do with
    /// it. Our own broadcasts, other rooms and heartbeats yield `None`.
    pub async fn receive(&mut self, bytes: &[u8], now: u64) -> Result<Option<Envelope>, SessionError> {
        let envelope = Envelope::from_bytes(bytes)?;

        if envelope.room_id != self.room {
            trace!(room = %envelope.room_id, "ignoring envelope for another room");
            return Ok(None);
        }
        if envelope.is_from(&self.player) {
            return Ok(None);
        }

        if let Some(sender) = &envelope.player_id {
            let peer = self.peers.entry(sender.clone()).or_insert(PeerInfo {
                present: true,
                last_seen: now,
                latency_ms: None,
            });
            peer.last_seen = now;
        }

        if envelope.requires_ack {
            self.reply_ack(&envelope, now).await;
        }

        match &envelope.data {
            Payload::Heartbeat(heartbeat) => {
                if let Some(peer) = envelope.player_id.as_ref().and_then(|id| self.peers.get_mut(id)) {
                    peer.latency_ms = Some(now.saturating_sub(heartbeat.sent_at));
                }
                return Ok(None);
            }
            Payload::Ack(ack) => {
                if self.queue.ack(&ack.message_id).is_none() {
                    trace!(message_id = %ack.message_id, "ack for envelope not awaited");
                }
            }
            Payload::Presence(presence) => {
                let present = presence.status == PresenceStatus::Joined;
                if let Some(peer) = self.peers.get_mut(&presence.player_id) {
                    peer.present = present;
                }
                info!(peer = %presence.player_id, status = ?presence.status, "peer presence");
            }
            _ => {}
        }

        Ok(Some(envelope))
    }

    async fn reply_ack(&mut self, envelope: &Envelope, now: u64) {
        let action_id = match &envelope.data {
            Payload::Action(action) => Some(action.id),
            _ => None,
        };
        let ack = Payload::Ack(Ack {
            message_id: envelope.message_id,
            action_id,
        });
        if let Err(e) = self.send(ack, false, now).await {
            debug!(error = %e, "ack not sent");
        }
    }
}
