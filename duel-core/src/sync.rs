//! State synchronizer.
//!
//! A pure state machine in the same shape as the connection state machine:
//! every input (a timer tick, an inbound sync message, a remote action, an
//! ack timeout) goes in together with the store and the current time, and a
//! list of [`SyncCommand`]s comes out for the caller to execute.
//!
//! One seat per match is the [`Role::Authority`]. It answers pings and
//! repair requests and polices incoming actions for conflicts. The other
//! seat is a [`Role::Follower`] that pings periodically and repairs itself
//! from what the authority sends.

use std::collections::HashMap;

use duelsync_types::{
    Action, ActionId, ConflictDetected, ConflictId, ConflictResolution, FullState, HashMismatch,
    MatchState, MismatchSeverity, ResolutionType, Seat, StateDiffMessage, StateHash, SyncMessage,
    SyncMode, SyncPing, SyncPong, SyncRequest,
};

use crate::conflict::ConflictDetector;
use crate::diff;
use crate::error::SyncError;
use crate::store::{LocalStore, RemoteOutcome};

/// Which side of the protocol this client plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Holds the reference state.
    Authority,
    /// Repairs itself from the authority.
    Follower,
}

impl Role {
    /// Seat one is the authority.
    pub fn for_seat(seat: Seat) -> Self {
        match seat {
            Seat::One => Role::Authority,
            Seat::Two => Role::Follower,
        }
    }
}

/// Synchronizer timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Ping interval.
    pub check_interval_ms: u64,
    /// How close two actions must be to count as concurrent.
    pub conflict_window_ms: u64,
    /// How long to wait for a conflict resolution before a full sync.
    pub resolution_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 10_000,
            conflict_window_ms: 500,
            resolution_timeout_ms: 5_000,
        }
    }
}

/// How local state was repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    /// Replaced wholesale.
    Full,
    /// Patched.
    Diff,
    /// Settled a conflict.
    Conflict(ResolutionType),
}

/// Work for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCommand {
    /// Broadcast a sync message.
    Send(SyncMessage),
    /// Broadcast these actions again.
    Retransmit(Vec<Action>),
    /// Local state was repaired.
    Repaired(Repair),
}

/// The last pair of hashes proven equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashPair {
    /// Our hash.
    pub local: StateHash,
    /// The authority's hash.
    pub remote: StateHash,
    /// When the pair was recorded.
    pub at: u64,
}

/// Result of handing a remote action to the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteReport {
    /// What the store did with the action, if it was offered to it.
    pub outcome: Option<RemoteOutcome>,
    /// Follow-up work.
    pub commands: Vec<SyncCommand>,
}

/// Keeps the local store consistent with the peer.
#[derive(Debug)]
pub struct Synchronizer {
    role: Role,
    config: SyncConfig,
    detector: ConflictDetector,
    last_pair: Option<HashPair>,
    open_conflicts: HashMap<ConflictId, u64>,
    retry_full: bool,
}

impl Synchronizer {
    /// Create a synchronizer.
    pub fn new(role: Role, config: SyncConfig) -> Self {
        Self {
            role,
            detector: ConflictDetector::new(config.conflict_window_ms),
            config,
            last_pair: None,
            open_conflicts: HashMap::new(),
            retry_full: false,
        }
    }

    /// This side's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Timing in force.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The last hash pair proven equal.
    pub fn last_pair(&self) -> Option<HashPair> {
        self.last_pair
    }

    /// Conflicts reported to us and not yet resolved.
    pub fn open_conflicts(&self) -> usize {
        self.open_conflicts.len()
    }

    /// Whether a failed full sync is waiting to be retried.
    pub fn retry_pending(&self) -> bool {
        self.retry_full
    }

    /// Periodic check.
    ///
    /// Followers ping, or retry a failed full sync. Both roles expire
    /// overdue conflicts.
    pub fn on_tick(&mut self, store: &LocalStore, now: u64) -> Vec<SyncCommand> {
        let mut commands = self.check_timeouts(store, now);
        if self.role == Role::Authority || !commands.is_empty() {
            return commands;
        }
        if self.retry_full {
            commands.push(request(store, SyncMode::Full));
        } else {
            commands.push(SyncCommand::Send(SyncMessage::Ping(self.ping(store, now))));
        }
        commands
    }

    /// Build a ping for the current state.
    pub fn ping(&self, store: &LocalStore, now: u64) -> SyncPing {
        SyncPing {
            local_hash: store.hash(),
            timestamp: now,
            turn_number: store.state().turn,
            last_action_id: store.last_action().map(|action| action.id),
        }
    }

    /// Escalate conflicts whose resolution never came.
    pub fn check_timeouts(&mut self, store: &LocalStore, now: u64) -> Vec<SyncCommand> {
        let before = self.open_conflicts.len();
        self.open_conflicts.retain(|_, deadline| *deadline > now);
        if self.open_conflicts.len() == before {
            return Vec::new();
        }
        tracing::warn!(expired = before - self.open_conflicts.len(), "conflict resolution timed out");
        if self.role == Role::Follower {
            vec![request(store, SyncMode::Full)]
        } else {
            Vec::new()
        }
    }

    /// Handle an inbound sync message.
    pub fn handle(&mut self, store: &mut LocalStore, message: SyncMessage, now: u64) -> Vec<SyncCommand> {
        match (self.role, message) {
            (Role::Authority, SyncMessage::Ping(ping)) => self.answer_ping(store, &ping, now),
            (Role::Authority, SyncMessage::RequestSync(req)) => vec![self.answer_request(store, req)],
            (Role::Follower, SyncMessage::Pong(pong)) => self.on_pong(store, &pong, now),
            (Role::Follower, SyncMessage::FullState(full)) => self.on_full_state(store, full, now),
            (Role::Follower, SyncMessage::StateDiff(diff)) => self.on_state_diff(store, &diff, now),
            (Role::Follower, SyncMessage::ConflictDetected(conflict)) => {
                self.on_conflict_detected(&conflict, now);
                Vec::new()
            }
            (Role::Follower, SyncMessage::ConflictResolution(resolution)) => {
                self.on_conflict_resolution(store, resolution)
            }
            (Role::Follower, SyncMessage::HashMismatch(mismatch)) => on_hash_mismatch(store, &mismatch),
            (role, message) => {
                tracing::debug!(?role, message = message_name(&message), "sync message ignored");
                Vec::new()
            }
        }
    }

    /// Handle an action broadcast by the peer.
    ///
    /// The authority first checks that the action was issued from the state
    /// it holds. If not, it looks for a conflicting local action and either
    /// settles the conflict or reports the divergence.
    pub fn on_remote_action(&mut self, store: &mut LocalStore, action: &Action) -> RemoteReport {
        if self.role == Role::Follower || store.is_pending(&action.id) || action.prev_hash == store.hash() {
            return RemoteReport {
                outcome: Some(store.process_remote_action(action)),
                commands: Vec::new(),
            };
        }

        let own = store.seat();
        let recent: Vec<&Action> = store.history().filter(|known| known.actor == own).collect();
        let Some(conflict) = self.detector.detect(action, recent) else {
            let severity = if action.turn.abs_diff(store.state().turn) > 1 {
                MismatchSeverity::Critical
            } else {
                MismatchSeverity::Warning
            };
            tracing::warn!(action = %action.id, expected = %store.hash(), received = %action.prev_hash, ?severity, "action issued from a diverged state");
            let mismatch = SyncMessage::HashMismatch(HashMismatch {
                expected_hash: store.hash(),
                received_hash: action.prev_hash,
                severity,
            });
            return RemoteReport {
                outcome: Some(store.process_remote_action(action)),
                commands: vec![SyncCommand::Send(mismatch)],
            };
        };

        let resolution_type = conflict.resolution();
        tracing::warn!(conflict = %conflict.id, severity = ?conflict.severity, ?resolution_type, "concurrent actions collided");

        // Client-wins accepts the action now; its retransmission is then a duplicate.
        let outcome = match resolution_type {
            ResolutionType::ClientWins => Some(store.process_remote_action(action)),
            ResolutionType::ServerWins | ResolutionType::Merge => None,
        };
        let new_state = match resolution_type {
            ResolutionType::ClientWins => None,
            ResolutionType::ServerWins | ResolutionType::Merge => Some(Box::new(store.state().clone())),
        };

        let detected = SyncMessage::ConflictDetected(ConflictDetected {
            conflict_id: conflict.id,
            local_actions: vec![conflict.remote.clone()],
            server_actions: conflict.local.clone(),
        });
        let resolution = SyncMessage::ConflictResolution(ConflictResolution {
            conflict_id: conflict.id,
            resolution_type,
            new_state,
            rollback_to_action: store.last_action().map(|last| last.id),
        });
        RemoteReport {
            outcome,
            commands: vec![SyncCommand::Send(detected), SyncCommand::Send(resolution)],
        }
    }

    /// An acknowledgment window lapsed for one of our actions.
    ///
    /// Followers drop it and request a full sync. The authority holds the
    /// reference state, so it pushes that state instead.
    pub fn on_ack_timeout(&mut self, store: &mut LocalStore, action_id: &ActionId) -> Vec<SyncCommand> {
        if let Err(e) = store.rollback(action_id) {
            tracing::debug!(error = %e, "ack timeout for action outside history");
        }
        match self.role {
            Role::Follower => vec![request(store, SyncMode::Full)],
            Role::Authority => vec![SyncCommand::Send(full_state(store))],
        }
    }

    fn answer_ping(&mut self, store: &LocalStore, ping: &SyncPing, now: u64) -> Vec<SyncCommand> {
        if ping.local_hash == store.hash() {
            self.last_pair = Some(HashPair {
                local: store.hash(),
                remote: ping.local_hash,
                at: now,
            });
        }
        vec![SyncCommand::Send(SyncMessage::Pong(SyncPong {
            server_hash: store.hash(),
            timestamp: now,
            turn_number: store.state().turn,
        }))]
    }

    fn answer_request(&self, store: &LocalStore, req: SyncRequest) -> SyncCommand {
        match (req.mode, req.base_state) {
            (SyncMode::Diff, Some(base)) => {
                let message = diff::message(&base, store.state());
                tracing::debug!(patches = message.diffs.len(), "answering diff sync");
                SyncCommand::Send(SyncMessage::StateDiff(message))
            }
            _ => {
                tracing::debug!(history = store.history().count(), "answering full sync");
                SyncCommand::Send(full_state(store))
            }
        }
    }

    fn on_pong(&mut self, store: &LocalStore, pong: &SyncPong, now: u64) -> Vec<SyncCommand> {
        let local = store.hash();
        if local == pong.server_hash {
            self.last_pair = Some(HashPair {
                local,
                remote: pong.server_hash,
                at: now,
            });
            return Vec::new();
        }

        let mode = if store.state().turn.abs_diff(pong.turn_number) <= 1 {
            SyncMode::Diff
        } else {
            SyncMode::Full
        };
        tracing::warn!(%local, remote = %pong.server_hash, ?mode, "hash mismatch on periodic check");
        vec![request(store, mode)]
    }

    fn on_full_state(&mut self, store: &mut LocalStore, full: FullState, now: u64) -> Vec<SyncCommand> {
        let snapshot = store.snapshot();
        let result = check_claimed_hash(&full.game_state, full.server_hash)
            .and_then(|()| store.replace(*full.game_state, full.action_history).map_err(SyncError::from));
        match result {
            Ok(dropped) => {
                self.retry_full = false;
                self.open_conflicts.clear();
                self.last_pair = Some(HashPair {
                    local: store.hash(),
                    remote: full.server_hash,
                    at: now,
                });
                tracing::info!(hash = %store.hash(), dropped = dropped.len(), "full sync applied");
                vec![SyncCommand::Repaired(Repair::Full)]
            }
            Err(e) => {
                store.restore(snapshot);
                self.retry_full = true;
                tracing::warn!(error = %e, "full sync failed, state restored, will retry");
                Vec::new()
            }
        }
    }

    fn on_state_diff(&mut self, store: &mut LocalStore, message: &StateDiffMessage, now: u64) -> Vec<SyncCommand> {
        let patched = diff::apply(store.state(), message).and_then(|state| store.adopt(state).map_err(SyncError::from));
        match patched {
            Ok(_) => {
                self.last_pair = Some(HashPair {
                    local: store.hash(),
                    remote: message.target_hash,
                    at: now,
                });
                tracing::info!(hash = %store.hash(), patches = message.diffs.len(), "diff sync applied");
                vec![SyncCommand::Repaired(Repair::Diff)]
            }
            Err(e) => {
                tracing::warn!(error = %e, "diff sync did not converge, escalating to full sync");
                vec![request(store, SyncMode::Full)]
            }
        }
    }

    fn on_conflict_detected(&mut self, conflict: &ConflictDetected, now: u64) {
        tracing::warn!(conflict = %conflict.conflict_id, ours = conflict.local_actions.len(), theirs = conflict.server_actions.len(), "conflict reported");
        self.open_conflicts
            .insert(conflict.conflict_id, now + self.config.resolution_timeout_ms);
    }

    fn on_conflict_resolution(&mut self, store: &mut LocalStore, resolution: ConflictResolution) -> Vec<SyncCommand> {
        if self.open_conflicts.remove(&resolution.conflict_id).is_none() {
            tracing::debug!(error = %SyncError::UnknownConflict(resolution.conflict_id), "applying unannounced resolution");
        }

        let kind = resolution.resolution_type;
        let result = match (kind, resolution.new_state) {
            (ResolutionType::ClientWins, _) => Ok(vec![SyncCommand::Retransmit(store.pending().to_vec())]),
            (_, None) => Err(SyncError::MissingState(kind)),
            (ResolutionType::ServerWins, Some(state)) => store
                .adopt(*state)
                .map(|_| Vec::new())
                .map_err(SyncError::from),
            (ResolutionType::Merge, Some(state)) => store
                .merge(*state)
                .map(|replayed| vec![SyncCommand::Retransmit(replayed)])
                .map_err(SyncError::from),
        };

        match result {
            Ok(mut commands) => {
                commands.retain(|command| !matches!(command, SyncCommand::Retransmit(actions) if actions.is_empty()));
                commands.push(SyncCommand::Repaired(Repair::Conflict(kind)));
                tracing::info!(conflict = %resolution.conflict_id, ?kind, hash = %store.hash(), "conflict resolved");
                commands
            }
            Err(e) => {
                tracing::warn!(error = %e, "conflict resolution unusable, escalating to full sync");
                vec![request(store, SyncMode::Full)]
            }
        }
    }
}

fn on_hash_mismatch(store: &LocalStore, mismatch: &HashMismatch) -> Vec<SyncCommand> {
    let mode = match mismatch.severity {
        MismatchSeverity::Critical => SyncMode::Full,
        MismatchSeverity::Warning => SyncMode::Diff,
    };
    tracing::warn!(expected = %mismatch.expected_hash, received = %mismatch.received_hash, ?mode, "peer reported hash mismatch");
    vec![request(store, mode)]
}

fn request(store: &LocalStore, mode: SyncMode) -> SyncCommand {
    SyncCommand::Send(SyncMessage::RequestSync(SyncRequest {
        mode,
        turn_number: store.state().turn,
        local_hash: store.hash(),
        base_state: match mode {
            SyncMode::Diff => Some(Box::new(store.state().clone())),
            SyncMode::Full => None,
        },
    }))
}

fn full_state(store: &LocalStore) -> SyncMessage {
    SyncMessage::FullState(FullState {
        game_state: Box::new(store.state().clone()),
        action_history: store.history().cloned().collect(),
        server_hash: store.hash(),
    })
}

fn check_claimed_hash(state: &MatchState, claimed: StateHash) -> Result<(), SyncError> {
    if state.state_hash != claimed {
        return Err(SyncError::HashMismatch {
            expected: claimed,
            actual: state.state_hash,
        });
    }
    Ok(())
}

fn message_name(message: &SyncMessage) -> &'static str {
    match message {
        SyncMessage::Ping(_) => "ping",
        SyncMessage::Pong(_) => "pong",
        SyncMessage::RequestSync(_) => "request_sync",
        SyncMessage::FullState(_) => "full_state",
        SyncMessage::StateDiff(_) => "state_diff",
        SyncMessage::ConflictDetected(_) => "conflict_detected",
        SyncMessage::ConflictResolution(_) => "conflict_resolution",
        SyncMessage::HashMismatch(_) => "hash_mismatch",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample;
    use crate::store::DEFAULT_HISTORY_CAPACITY;
    use duelsync_types::{ActionPayload, Phase};

    fn store(seat: Seat) -> LocalStore {
        LocalStore::new(
            sample::sample_engine(),
            seat,
            sample::sample_match(),
            DEFAULT_HISTORY_CAPACITY,
        )
    }

    fn pair() -> (Synchronizer, LocalStore, Synchronizer, LocalStore) {
        (
            Synchronizer::new(Role::Authority, SyncConfig::default()),
            store(Seat::One),
            Synchronizer::new(Role::Follower, SyncConfig::default()),
            store(Seat::Two),
        )
    }

    fn sent(commands: &[SyncCommand]) -> Vec<SyncMessage> {
        commands
            .iter()
            .filter_map(|command| match command {
                SyncCommand::Send(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Deliver every message from one side to the other, returning the replies.
    fn deliver(to: &mut Synchronizer, store: &mut LocalStore, commands: &[SyncCommand], now: u64) -> Vec<SyncCommand> {
        sent(commands)
            .into_iter()
            .flat_map(|message| to.handle(store, message, now))
            .collect()
    }

    fn local(store: &mut LocalStore, payload: ActionPayload, now: u64) -> Action {
        let action = store.next_action(payload, now);
        store.process_local_action(action.clone()).unwrap();
        action
    }

    // ===== Periodic Check =====

    #[test]
    fn roles_follow_seats() {
        assert_eq!(Role::for_seat(Seat::One), Role::Authority);
        assert_eq!(Role::for_seat(Seat::Two), Role::Follower);
    }

    #[test]
    fn follower_tick_sends_ping() {
        let (_, _, mut follower, store) = pair();
        let commands = follower.on_tick(&store, 10);
        match sent(&commands).as_slice() {
            [SyncMessage::Ping(ping)] => {
                assert_eq!(ping.local_hash, store.hash());
                assert_eq!(ping.turn_number, 1);
                assert_eq!(ping.last_action_id, None);
            }
            other => panic!("expected ping, got {other:?}"),
        }
    }

    #[test]
    fn authority_tick_is_silent() {
        let (mut authority, store, _, _) = pair();
        assert!(authority.on_tick(&store, 10).is_empty());
    }

    #[test]
    fn equal_hashes_record_pair() {
        let (mut authority, mut a_store, mut follower, mut f_store) = pair();
        let ping = follower.on_tick(&f_store, 10);
        let pong = deliver(&mut authority, &mut a_store, &ping, 11);
        let replies = deliver(&mut follower, &mut f_store, &pong, 12);

        assert!(replies.is_empty());
        let recorded = follower.last_pair().unwrap();
        assert_eq!(recorded.local, f_store.hash());
        assert_eq!(recorded.remote, a_store.hash());
        assert!(authority.last_pair().is_some());
    }

    #[test]
    fn close_turns_request_diff_and_far_turns_request_full() {
        let (_, _, mut follower, mut f_store) = pair();
        let diverged = SyncPong {
            server_hash: StateHash::from_bytes([5; 32]),
            timestamp: 0,
            turn_number: 2,
        };
        let near = follower.handle(&mut f_store, SyncMessage::Pong(diverged.clone()), 0);
        assert!(matches!(
            sent(&near).as_slice(),
            [SyncMessage::RequestSync(SyncRequest { mode: SyncMode::Diff, base_state: Some(_), .. })]
        ));

        let far = follower.handle(
            &mut f_store,
            SyncMessage::Pong(SyncPong {
                turn_number: 9,
                ..diverged
            }),
            0,
        );
        assert!(matches!(
            sent(&far).as_slice(),
            [SyncMessage::RequestSync(SyncRequest { mode: SyncMode::Full, base_state: None, .. })]
        ));
    }

    // ===== Repair =====

    #[test]
    fn diff_repair_converges() {
        let (mut authority, mut a_store, mut follower, mut f_store) = pair();
        local(&mut a_store, ActionPayload::DrawCard, 1_000);
        local(&mut a_store, ActionPayload::EndTurn, 2_000);

        let ping = follower.on_tick(&f_store, 3_000);
        let pong = deliver(&mut authority, &mut a_store, &ping, 3_001);
        let request = deliver(&mut follower, &mut f_store, &pong, 3_002);
        let diff = deliver(&mut authority, &mut a_store, &request, 3_003);
        assert!(matches!(sent(&diff).as_slice(), [SyncMessage::StateDiff(_)]));

        let done = deliver(&mut follower, &mut f_store, &diff, 3_004);
        assert_eq!(done, vec![SyncCommand::Repaired(Repair::Diff)]);
        assert_eq!(f_store.hash(), a_store.hash());
        assert_eq!(f_store.state().current, Seat::Two);
        assert_eq!(f_store.state().phase, Phase::Draw);
    }

    #[test]
    fn non_converging_diff_escalates() {
        let (_, _, mut follower, mut f_store) = pair();
        let bogus = StateDiffMessage {
            diffs: vec![],
            target_hash: StateHash::from_bytes([1; 32]),
        };
        let before = f_store.state().clone();
        let commands = follower.handle(&mut f_store, SyncMessage::StateDiff(bogus), 0);

        assert!(matches!(
            sent(&commands).as_slice(),
            [SyncMessage::RequestSync(SyncRequest { mode: SyncMode::Full, .. })]
        ));
        assert_eq!(f_store.state(), &before);
    }

    #[test]
    fn full_sync_replaces_everything() {
        let (mut authority, mut a_store, mut follower, mut f_store) = pair();
        local(&mut a_store, ActionPayload::DrawCard, 1_000);
        local(&mut f_store, ActionPayload::Surrender, 1_000);

        let full = authority.handle(
            &mut a_store,
            SyncMessage::RequestSync(SyncRequest {
                mode: SyncMode::Full,
                turn_number: 1,
                local_hash: f_store.hash(),
                base_state: None,
            }),
            2_000,
        );
        let done = deliver(&mut follower, &mut f_store, &full, 2_001);

        assert_eq!(done, vec![SyncCommand::Repaired(Repair::Full)]);
        assert_eq!(f_store.state(), a_store.state());
        assert_eq!(f_store.history().count(), 1);
        assert!(f_store.pending().is_empty());
    }

    #[test]
    fn failed_full_sync_restores_and_retries() {
        let (_, a_store, mut follower, mut f_store) = pair();
        let before = f_store.state().clone();
        let mut tampered = a_store.state().clone();
        tampered.player_mut(Seat::One).hp = 3;

        let commands = follower.handle(
            &mut f_store,
            SyncMessage::FullState(FullState {
                server_hash: tampered.state_hash,
                game_state: Box::new(tampered),
                action_history: vec![],
            }),
            0,
        );

        assert!(commands.is_empty());
        assert_eq!(f_store.state(), &before);
        assert!(follower.retry_pending());
        assert!(matches!(
            sent(&follower.on_tick(&f_store, 1)).as_slice(),
            [SyncMessage::RequestSync(SyncRequest { mode: SyncMode::Full, .. })]
        ));
    }

    #[test]
    fn mismatch_severity_picks_repair() {
        let (_, _, mut follower, mut f_store) = pair();
        let mut report = HashMismatch {
            expected_hash: StateHash::from_bytes([1; 32]),
            received_hash: StateHash::from_bytes([2; 32]),
            severity: MismatchSeverity::Critical,
        };
        let critical = follower.handle(&mut f_store, SyncMessage::HashMismatch(report.clone()), 0);
        assert!(matches!(
            sent(&critical).as_slice(),
            [SyncMessage::RequestSync(SyncRequest { mode: SyncMode::Full, .. })]
        ));

        report.severity = MismatchSeverity::Warning;
        let warning = follower.handle(&mut f_store, SyncMessage::HashMismatch(report), 0);
        assert!(matches!(
            sent(&warning).as_slice(),
            [SyncMessage::RequestSync(SyncRequest { mode: SyncMode::Diff, .. })]
        ));
    }

    // ===== Remote Actions =====

    #[test]
    fn in_sync_remote_actions_apply_on_both_sides() {
        let (mut authority, mut a_store, mut follower, mut f_store) = pair();
        let draw = local(&mut a_store, ActionPayload::DrawCard, 1_000);
        let end = local(&mut a_store, ActionPayload::EndTurn, 2_000);

        for action in [&draw, &end] {
            let report = follower.on_remote_action(&mut f_store, action);
            assert_eq!(report.outcome, Some(RemoteOutcome::Applied));
            assert!(report.commands.is_empty());
        }

        let reply = local(&mut f_store, ActionPayload::DrawCard, 3_000);
        let report = authority.on_remote_action(&mut a_store, &reply);
        assert_eq!(report.outcome, Some(RemoteOutcome::Applied));
        assert!(report.commands.is_empty());
        assert_eq!(a_store.hash(), f_store.hash());
    }

    #[test]
    fn concurrent_end_turn_resolves_server_wins() {
        let (mut authority, mut a_store, mut follower, mut f_store) = pair();
        local(&mut a_store, ActionPayload::EndTurn, 1_000);
        let surrender = local(&mut f_store, ActionPayload::Surrender, 1_200);

        let report = authority.on_remote_action(&mut a_store, &surrender);
        assert_eq!(report.outcome, None);
        let messages = sent(&report.commands);
        assert!(matches!(messages.first(), Some(SyncMessage::ConflictDetected(_))));
        match messages.last() {
            Some(SyncMessage::ConflictResolution(resolution)) => {
                assert_eq!(resolution.resolution_type, ResolutionType::ServerWins);
                assert!(resolution.new_state.is_some());
            }
            other => panic!("expected resolution, got {other:?}"),
        }
        assert!(!a_store.state().is_finished());

        let detected = deliver(&mut follower, &mut f_store, &report.commands[..1], 1_300);
        assert!(detected.is_empty());
        assert_eq!(follower.open_conflicts(), 1);

        let done = deliver(&mut follower, &mut f_store, &report.commands[1..], 1_301);
        assert_eq!(done, vec![SyncCommand::Repaired(Repair::Conflict(ResolutionType::ServerWins))]);
        assert_eq!(follower.open_conflicts(), 0);
        assert_eq!(f_store.hash(), a_store.hash());
        assert!(f_store.pending().is_empty());
    }

    #[test]
    fn diverged_action_without_collision_reports_mismatch() {
        let (mut authority, mut a_store, _, mut f_store) = pair();
        local(&mut a_store, ActionPayload::DrawCard, 1_000);
        let surrender = local(&mut f_store, ActionPayload::Surrender, 9_000);

        let report = authority.on_remote_action(&mut a_store, &surrender);
        assert_eq!(report.outcome, Some(RemoteOutcome::Applied));
        assert!(matches!(
            sent(&report.commands).as_slice(),
            [SyncMessage::HashMismatch(HashMismatch { severity: MismatchSeverity::Warning, .. })]
        ));
    }

    #[test]
    fn merge_resolution_retransmits_replayed_actions() {
        let (_, a_store, mut follower, mut f_store) = pair();
        let mut server = a_store.state().clone();
        server.current = Seat::Two;
        let surrender = local(&mut f_store, ActionPayload::Surrender, 1_000);
        let conflict_id = ConflictId::new();
        server.phase = Phase::Main;
        crate::hash::refresh(&mut server);

        let commands = follower.handle(
            &mut f_store,
            SyncMessage::ConflictResolution(ConflictResolution {
                conflict_id,
                resolution_type: ResolutionType::Merge,
                new_state: Some(Box::new(server)),
                rollback_to_action: None,
            }),
            2_000,
        );

        match commands.as_slice() {
            [SyncCommand::Retransmit(actions), SyncCommand::Repaired(Repair::Conflict(ResolutionType::Merge))] => {
                assert_eq!(actions.len(), 1);
                assert_eq!(actions[0].id, surrender.id);
            }
            other => panic!("unexpected commands {other:?}"),
        }
        assert!(f_store.state().is_finished());
    }

    #[test]
    fn resolution_without_state_escalates() {
        let (_, _, mut follower, mut f_store) = pair();
        let commands = follower.handle(
            &mut f_store,
            SyncMessage::ConflictResolution(ConflictResolution {
                conflict_id: ConflictId::new(),
                resolution_type: ResolutionType::ServerWins,
                new_state: None,
                rollback_to_action: None,
            }),
            0,
        );
        assert!(matches!(
            sent(&commands).as_slice(),
            [SyncMessage::RequestSync(SyncRequest { mode: SyncMode::Full, .. })]
        ));
    }

    #[test]
    fn unresolved_conflict_times_out_to_full_sync() {
        let (_, _, mut follower, mut f_store) = pair();
        follower.handle(
            &mut f_store,
            SyncMessage::ConflictDetected(ConflictDetected {
                conflict_id: ConflictId::new(),
                local_actions: vec![],
                server_actions: vec![],
            }),
            1_000,
        );

        assert!(follower.check_timeouts(&f_store, 5_999).is_empty());
        let commands = follower.on_tick(&f_store, 6_000);
        assert!(matches!(
            sent(&commands).as_slice(),
            [SyncMessage::RequestSync(SyncRequest { mode: SyncMode::Full, .. })]
        ));
        assert_eq!(follower.open_conflicts(), 0);
    }

    #[test]
    fn ack_timeout_triggers_full_sync() {
        let (mut authority, mut a_store, mut follower, mut f_store) = pair();
        let surrender = local(&mut f_store, ActionPayload::Surrender, 1_000);
        let commands = follower.on_ack_timeout(&mut f_store, &surrender.id);
        assert!(!f_store.is_pending(&surrender.id));
        assert!(matches!(
            sent(&commands).as_slice(),
            [SyncMessage::RequestSync(SyncRequest { mode: SyncMode::Full, .. })]
        ));

        let draw = local(&mut a_store, ActionPayload::DrawCard, 1_000);
        let pushed = authority.on_ack_timeout(&mut a_store, &draw.id);
        assert!(matches!(sent(&pushed).as_slice(), [SyncMessage::FullState(_)]));
    }
}
