use std::time::Duration;

use crate::ledger::Gems;

/// Tunable parameters of the round engine. The defaults are the published
/// contract values; the server binary layers CLI flags and environment
/// variables on top.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How long a round accepts bets before the wheel spins on its own.
    pub betting_duration: Duration,
    /// Server-side visual spin window between the draw and the reveal.
    pub spinning_duration: Duration,
    /// Reveal/settlement window before the next round opens.
    pub results_duration: Duration,
    pub min_stake: Gems,
    pub max_stake: Gems,
    /// Balance materialized for a player on first touch.
    pub initial_balance: Gems,
    /// Bounded per-subscriber event queue depth.
    pub subscriber_queue_depth: usize,
    /// Per-request deadline for bet submissions.
    pub bet_request_deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            betting_duration: Duration::from_secs(15),
            spinning_duration: Duration::from_secs(5),
            results_duration: Duration::from_secs(3),
            min_stake: 10,
            max_stake: 10_000,
            initial_balance: 5_000,
            subscriber_queue_depth: 64,
            bet_request_deadline: Duration::from_secs(5),
        }
    }
}
