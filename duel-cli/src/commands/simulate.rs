//! Play a bot-versus-bot match over the loopback hub.
//!
//! Both clients run their full event loops; only the transport is
//! in-process. Seat one is the authority, so its state decides whose turn
//! it is. A seat that acts on a stale view would be refused, so a lagging
//! follower is asked to sync first.

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use duelsync_client::{ClientEvent, LoopbackHub, MatchClient, MatchConfig, MatchHandle};
use duelsync_core::sample::{sample_registry, sample_setup};
use duelsync_core::RulesEngine;
use duelsync_types::{unix_millis, ActionPayload, MatchState, PlayerId, Seat};

use crate::bot;

/// Pause between moves so frames can cross the hub.
const STEP: Duration = Duration::from_millis(10);

/// Pause after asking a lagging follower to sync.
const SETTLE: Duration = Duration::from_millis(50);

/// Consecutive stalls tolerated before giving up on the match.
const MAX_STALLS: u32 = 100;

/// Time allowed for both clients to subscribe and to converge at the end.
const PATIENCE: Duration = Duration::from_secs(5);

/// Arguments of the simulate command.
#[derive(Debug)]
pub struct SimulateArgs {
    /// Seed for deck shuffles and frame loss.
    pub seed: u64,
    /// Turn limit.
    pub max_turns: u32,
    /// Fraction of frames dropped by the hub.
    pub drop_rate: f64,
    /// Optional configuration file.
    pub config: Option<PathBuf>,
}

/// Outcome of a simulated match.
#[derive(Debug)]
struct Report {
    moves: u32,
    refused: u32,
    repairs: u32,
    alice: MatchState,
    bob: MatchState,
}

impl Report {
    fn converged(&self) -> bool {
        self.alice.state_hash == self.bob.state_hash
    }
}

/// Run the simulate command.
pub async fn run(args: SimulateArgs) -> Result<()> {
    if !(0.0..=1.0).contains(&args.drop_rate) {
        bail!("--drop-rate must be between 0.0 and 1.0, got {}", args.drop_rate);
    }
    let config = match &args.config {
        Some(path) => MatchConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => MatchConfig::default(),
    };

    let report = play(&args, config).await?;

    println!("=== duel-cli simulate ===");
    println!();
    println!("Seed:       {}", args.seed);
    println!("Turns:      {}", report.alice.turn);
    println!("Moves:      {} ({} refused)", report.moves, report.refused);
    println!("Repairs:    {}", report.repairs);
    match report.alice.winner {
        Some(seat) => println!("Winner:     {}", seat),
        None => println!("Winner:     none"),
    }
    println!("Alice hash: {}", report.alice.state_hash);
    println!("Bob hash:   {}", report.bob.state_hash);
    println!("Converged:  {}", if report.converged() { "yes" } else { "NO" });

    if !report.converged() {
        bail!("clients finished with different states");
    }
    Ok(())
}

async fn play(args: &SimulateArgs, config: MatchConfig) -> Result<Report> {
    let registry = Arc::new(sample_registry());
    let engine = RulesEngine::new(config.rules(), registry.clone());
    let room = format!("sim-{}", args.seed);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let state = sample_setup(&room)
        .shuffled(&mut rng)
        .build(&config.rules(), &*registry, unix_millis())
        .context("Failed to deal the match")?;
    let channel = state.room_id.channel_name();

    let hub = LoopbackHub::with_drop_rate(args.drop_rate, args.seed);
    let mut alice = MatchClient::new(
        config.clone(),
        hub.transport(),
        PlayerId::from("alice"),
        state.clone(),
        registry.clone(),
    )?
    .spawn();
    let mut bob = MatchClient::new(config, hub.transport(), PlayerId::from("bob"), state, registry)?.spawn();

    tokio::time::timeout(PATIENCE, async {
        while hub.subscribers(&channel) < 2 {
            tokio::time::sleep(STEP).await;
        }
    })
    .await
    .context("Clients did not join the match channel")?;
    tracing::info!(room = %room, drop_rate = args.drop_rate, "match started");

    let mut moves = 0;
    let mut refused = 0;
    let mut repairs = 0;
    let mut stalls = 0;

    loop {
        repairs += drain("alice", &mut alice) + drain("bob", &mut bob);

        let reference = alice.state().await?;
        if reference.is_finished() || reference.turn > args.max_turns {
            break;
        }

        let seat = reference.current;
        let handle = match seat {
            Seat::One => &alice,
            Seat::Two => &bob,
        };
        let view = handle.state().await?;
        if view.state_hash != reference.state_hash {
            stalls += 1;
            if stalls > MAX_STALLS {
                tracing::warn!(stalls, "follower never caught up, stopping");
                break;
            }
            bob.sync_now().await?;
            tokio::time::sleep(SETTLE).await;
            continue;
        }
        stalls = 0;

        let payload = bot::next_move(&engine, &view, seat);
        tracing::debug!(%seat, ?payload, "move");
        match handle.act(payload).await {
            Ok(_) => moves += 1,
            Err(e) if e.rejection().is_some() => {
                refused += 1;
                tracing::debug!(%seat, error = %e, "move refused, passing");
                if handle.act(ActionPayload::EndTurn).await.is_ok() {
                    moves += 1;
                }
            }
            Err(e) => return Err(e.into()),
        }
        tokio::time::sleep(STEP).await;
    }

    let (alice_state, bob_state) = settle(&alice, &bob).await?;
    repairs += drain("alice", &mut alice) + drain("bob", &mut bob);
    alice.shutdown().await?;
    bob.shutdown().await?;

    Ok(Report {
        moves,
        refused,
        repairs,
        alice: alice_state,
        bob: bob_state,
    })
}

/// Give the follower a chance to catch up before reporting.
async fn settle(alice: &MatchHandle, bob: &MatchHandle) -> Result<(MatchState, MatchState)> {
    let deadline = tokio::time::Instant::now() + PATIENCE;
    loop {
        let a = alice.state().await?;
        let b = bob.state().await?;
        if a.state_hash == b.state_hash || tokio::time::Instant::now() >= deadline {
            return Ok((a, b));
        }
        bob.sync_now().await?;
        tokio::time::sleep(SETTLE).await;
    }
}

/// Log pending events and count repairs among them.
fn drain(name: &str, handle: &mut MatchHandle) -> u32 {
    let mut repairs = 0;
    while let Some(event) = handle.try_next_event() {
        match &event {
            ClientEvent::Repaired(repair) => {
                repairs += 1;
                tracing::info!(player = name, ?repair, "state repaired");
            }
            ClientEvent::MatchFinished { winner } => {
                tracing::info!(player = name, %winner, "match finished");
            }
            ClientEvent::AckTimedOut { action_id } => {
                tracing::warn!(player = name, %action_id, "action not acknowledged");
            }
            other => tracing::trace!(player = name, event = ?other, "event"),
        }
    }
    repairs
}
