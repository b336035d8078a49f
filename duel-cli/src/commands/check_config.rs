//! Validate a match configuration file.

use anyhow::{Context, Result};
use std::path::Path;

use duelsync_client::MatchConfig;

/// Run the check-config command.
pub fn run(path: &Path) -> Result<()> {
    let config = MatchConfig::from_file(path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    println!("{}: OK", path.display());
    print!("{}", summary(&config));
    Ok(())
}

fn summary(config: &MatchConfig) -> String {
    let rules = &config.rules;
    format!(
        "  Sync:      every {}s, heartbeat every {}s, ack within {}s\n\
         \x20 Reconnect: every {}s, at most {} attempts\n\
         \x20 Conflicts: window {}ms, resolved within {}s\n\
         \x20 Turns:     {}s, clock tick {}ms\n\
         \x20 Rules:     {} hp, {} cards dealt, field of {}, energy cap {}\n",
        config.sync_interval_secs,
        config.heartbeat_interval_secs,
        config.ack_timeout_secs,
        config.reconnect_delay_secs,
        config.max_reconnect_attempts,
        config.conflict_window_ms,
        config.conflict_resolution_timeout_secs,
        config.turn_duration_secs,
        config.clock_tick_ms,
        rules.starting_hp,
        rules.initial_hand,
        rules.field_limit,
        rules.energy_cap,
    )
}
