//! Connection state machine for the match session.
//!
//! Pure and side-effect free: it takes an input, returns the next state and
//! a list of commands. The session manager in duelsync-client performs the
//! actual I/O, which keeps this testable without a transport.
//!
//! ```text
//! disconnected → connecting → connected ⇄ reconnecting → connected | error
//! ```

use std::time::Duration;

use duelsync_types::PresenceStatus;

/// Fixed-delay reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait between attempts.
    pub delay: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not subscribed.
    #[default]
    Disconnected,
    /// First subscription in progress.
    Connecting,
    /// Subscribed to the room channel.
    Connected,
    /// Lost the channel; retrying.
    Reconnecting {
        /// Attempt in progress or about to start, from 1.
        attempt: u32,
    },
    /// Gave up. Terminal.
    Error,
}

impl ConnectionState {
    /// Start disconnected.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an input and return the new state plus commands to execute.
    pub fn on_event(self, input: ConnectionInput, policy: &ReconnectPolicy) -> (Self, Vec<SessionCommand>) {
        match (self, input) {
            (Self::Error, _) => (Self::Error, vec![]),

            (Self::Disconnected, ConnectionInput::ConnectRequested) => {
                (Self::Connecting, vec![SessionCommand::Subscribe])
            }

            (Self::Connecting, ConnectionInput::ConnectSucceeded) => (
                Self::Connected,
                vec![
                    SessionCommand::AnnouncePresence(PresenceStatus::Joined),
                    SessionCommand::FlushQueue,
                    SessionCommand::Emit(ConnectionEvent::Connected),
                ],
            ),
            (Self::Connecting, ConnectionInput::ConnectFailed { error }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    SessionCommand::Emit(ConnectionEvent::ConnectionFailed { error }),
                    SessionCommand::StartReconnectTimer { delay: policy.delay },
                ],
            ),

            (Self::Connected, ConnectionInput::ConnectionLost { reason }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    SessionCommand::Emit(ConnectionEvent::Interrupted { reason }),
                    SessionCommand::StartReconnectTimer { delay: policy.delay },
                ],
            ),
            (Self::Connected, ConnectionInput::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    SessionCommand::AnnouncePresence(PresenceStatus::Left),
                    SessionCommand::Unsubscribe,
                    SessionCommand::Emit(ConnectionEvent::Disconnected {
                        reason: "requested".into(),
                    }),
                ],
            ),

            (Self::Reconnecting { attempt }, ConnectionInput::ReconnectTimer) => {
                (Self::Reconnecting { attempt }, vec![SessionCommand::Subscribe])
            }
            (Self::Reconnecting { attempt }, ConnectionInput::ConnectSucceeded) => (
                Self::Connected,
                vec![
                    SessionCommand::AnnouncePresence(PresenceStatus::Joined),
                    SessionCommand::FlushQueue,
                    SessionCommand::Emit(ConnectionEvent::Reconnected { attempt }),
                ],
            ),
            (Self::Reconnecting { attempt }, ConnectionInput::ConnectFailed { error }) => {
                if attempt >= policy.max_attempts {
                    (
                        Self::Error,
                        vec![
                            SessionCommand::Unsubscribe,
                            SessionCommand::Emit(ConnectionEvent::GaveUp { attempts: attempt, error }),
                        ],
                    )
                } else {
                    let next = attempt.saturating_add(1);
                    (
                        Self::Reconnecting { attempt: next },
                        vec![
                            SessionCommand::Emit(ConnectionEvent::ReconnectFailed { attempt, error }),
                            SessionCommand::StartReconnectTimer { delay: policy.delay },
                        ],
                    )
                }
            }
            (Self::Reconnecting { .. }, ConnectionInput::DisconnectRequested) => (
                Self::Disconnected,
                vec![SessionCommand::CancelReconnect, SessionCommand::Unsubscribe],
            ),

            // The channel closed under us: back to idle from any live state.
            (Self::Connecting | Self::Connected | Self::Reconnecting { .. }, ConnectionInput::ChannelClosed) => (
                Self::Disconnected,
                vec![
                    SessionCommand::CancelReconnect,
                    SessionCommand::Emit(ConnectionEvent::Disconnected {
                        reason: "channel closed".into(),
                    }),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Subscribed and able to broadcast.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Trying to (re)connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }

    /// Reached the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error)
    }
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionInput {
    /// Caller asked to connect.
    ConnectRequested,
    /// Subscription succeeded.
    ConnectSucceeded,
    /// Subscription failed.
    ConnectFailed {
        /// Failure description.
        error: String,
    },
    /// The channel dropped unexpectedly or timed out.
    ConnectionLost {
        /// Failure description.
        reason: String,
    },
    /// The channel was closed by the other end.
    ChannelClosed,
    /// Caller asked to disconnect.
    DisconnectRequested,
    /// Reconnect delay elapsed.
    ReconnectTimer,
}

/// Instructions for the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Subscribe to the room channel.
    Subscribe,
    /// Leave the room channel.
    Unsubscribe,
    /// Broadcast a presence change.
    AnnouncePresence(PresenceStatus),
    /// Send everything queued while offline.
    FlushQueue,
    /// Arm the reconnect timer.
    StartReconnectTimer {
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Report to the application.
    Emit(ConnectionEvent),
}

/// Connection events surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First connection established.
    Connected,
    /// First connection failed; retrying.
    ConnectionFailed {
        /// Failure description.
        error: String,
    },
    /// Connected channel dropped; retrying.
    Interrupted {
        /// Failure description.
        reason: String,
    },
    /// Reconnected after a drop.
    Reconnected {
        /// Attempt that succeeded.
        attempt: u32,
    },
    /// A reconnect attempt failed.
    ReconnectFailed {
        /// Attempt that failed.
        attempt: u32,
        /// Failure description.
        error: String,
    },
    /// Reconnect attempts exhausted. The match cannot continue.
    GaveUp {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        error: String,
    },
    /// Back to idle.
    Disconnected {
        /// Why.
        reason: String,
    },
}
