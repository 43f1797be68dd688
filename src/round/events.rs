use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{RoundPhase, RoundSnapshot};
use crate::book::{BetId, BetKind, SettledBet, Settlement};
use crate::ledger::{Gems, PlayerId, RoundNumber};
use crate::wheel::{WheelColor, WheelIndex};

/// Events published on the round stream. Serialized with a `type` tag whose
/// value matches [`RoundEvent::event_name`].
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundEvent {
    /// A fresh round opened for betting.
    RoundStarted {
        round_number: RoundNumber,
        phase: RoundPhase,
        commitment: String,
        nonce: u64,
        started_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        betting_duration: u64,
    },

    /// Phase transition. Carries the outcome from SPINNING onward so every
    /// client animates toward the same winning index.
    PhaseChanged {
        round_number: RoundNumber,
        phase: RoundPhase,
        outcome_number: Option<WheelIndex>,
        outcome_color: Option<WheelColor>,
        time_remaining: f64,
    },

    /// Seed reveal plus per-bet settlements.
    RoundResults {
        round_number: RoundNumber,
        outcome_number: WheelIndex,
        outcome_color: WheelColor,
        server_seed_revealed: String,
        settlements: Vec<PlayerSettlement>,
    },

    RoundEnded {
        round_number: RoundNumber,
    },

    /// The round was abandoned and every accepted bet refunded.
    RoundAborted {
        round_number: RoundNumber,
        reason: AbortReason,
    },

    /// Settlement cannot complete; the engine refuses to advance until the
    /// operator resolves the underlying failure.
    RoundStalled {
        round_number: RoundNumber,
        reason: String,
    },

    /// Full snapshot, sent once per subscription.
    RoundCurrent(RoundSnapshot),
}

impl RoundEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            RoundEvent::RoundStarted { .. } => "round_started",
            RoundEvent::PhaseChanged { .. } => "phase_changed",
            RoundEvent::RoundResults { .. } => "round_results",
            RoundEvent::RoundEnded { .. } => "round_ended",
            RoundEvent::RoundAborted { .. } => "round_aborted",
            RoundEvent::RoundStalled { .. } => "round_stalled",
            RoundEvent::RoundCurrent(_) => "round_current",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    RngFailure,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::RngFailure => "rng_failure",
        }
    }
}

/// One bet's outcome as published to clients.
#[derive(Clone, Debug, Serialize)]
pub struct PlayerSettlement {
    pub bet_id: BetId,
    pub player: PlayerId,
    #[serde(flatten)]
    pub kind: BetKind,
    pub stake: Gems,
    #[serde(flatten)]
    pub settlement: Settlement,
    /// Net balance change over the round: payout minus stake.
    pub net: i64,
}

impl From<&SettledBet> for PlayerSettlement {
    fn from(settled: &SettledBet) -> Self {
        Self {
            bet_id: settled.bet.id,
            player: settled.bet.player.clone(),
            kind: settled.bet.kind,
            stake: settled.bet.stake,
            settlement: settled.settlement,
            net: settled.net(),
        }
    }
}
