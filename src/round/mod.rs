pub mod audit;
pub mod errors;
pub mod events;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use audit::{AuditStore, AuditedBet, InMemoryAuditStore, JsonlAuditStore, RoundAuditRecord};
pub use errors::EngineError;
pub use events::{AbortReason, PlayerSettlement, RoundEvent};
pub use scheduler::{BetReceipt, PlayerRoundResults, RoundEngine, RoundEngineConfig};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fairness::Outcome;
use crate::ledger::RoundNumber;
use crate::wheel::{WheelColor, WheelIndex};

/// Phase of a round. The derived ordering mirrors the lifecycle; phase
/// transitions are monotone within a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Betting,
    Spinning,
    Results,
    Ended,
}

/// Authoritative server-side round state. Owned by the scheduler; the HTTP
/// layer only ever sees the [`RoundSnapshot`] projection.
#[derive(Debug)]
pub struct Round {
    pub number: RoundNumber,
    pub phase: RoundPhase,
    pub commitment: String,
    pub client_seed: String,
    pub betting_duration: Duration,
    /// Start of the current phase, wall clock.
    pub phase_started_at: DateTime<Utc>,
    /// Deadline of the current phase, wall clock. Published so clients can
    /// compute remaining time without continuous ticks.
    pub phase_ends_at: DateTime<Utc>,
    pub outcome: Option<Outcome>,
    pub outcome_drawn_at: Option<DateTime<Utc>>,
    pub revealed_seed: Option<String>,
}

impl Round {
    pub fn open(
        number: RoundNumber,
        commitment: String,
        client_seed: String,
        betting_duration: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            number,
            phase: RoundPhase::Betting,
            commitment,
            client_seed,
            betting_duration,
            phase_started_at: now,
            phase_ends_at: now + chrono_duration(betting_duration),
            outcome: None,
            outcome_drawn_at: None,
            revealed_seed: None,
        }
    }

    /// The per-round hash-chain nonce equals the round number.
    pub fn nonce(&self) -> u64 {
        self.number
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> RoundSnapshot {
        let remaining_ms = (self.phase_ends_at - now).num_milliseconds().max(0);
        RoundSnapshot {
            round_number: self.number,
            phase: self.phase,
            commitment: self.commitment.clone(),
            started_at: self.phase_started_at,
            ends_at: self.phase_ends_at,
            betting_duration: self.betting_duration.as_secs(),
            time_remaining: remaining_ms as f64 / 1000.0,
            outcome_number: self.outcome.map(|o| o.index),
            outcome_color: self.outcome.map(|o| o.color),
            server_seed_revealed: self.revealed_seed.clone(),
        }
    }
}

/// Full representation of the current round, sufficient for a fresh client
/// to render state and compute remaining time from its own clock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_number: RoundNumber,
    pub phase: RoundPhase,
    pub commitment: String,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub betting_duration: u64,
    pub time_remaining: f64,
    pub outcome_number: Option<WheelIndex>,
    pub outcome_color: Option<WheelColor>,
    pub server_seed_revealed: Option<String>,
}

pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX))
}
