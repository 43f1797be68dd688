use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Virtual currency units. Balances are unsigned by construction; only
/// transaction deltas carry a sign.
pub type Gems = u64;

/// Monotone, gap-free round identifier, preserved across restarts.
pub type RoundNumber = u64;

/// Opaque stable player identity supplied by the external auth service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mandatory idempotency key on every ledger mutation. The deterministic
/// formats below are part of the external contract; constructing one by any
/// other means is reserved for tests and operator tooling.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(String);

impl TxnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Stake debit for a bet: `{round}:{player}:{seq}`.
    pub fn bet_debit(round: RoundNumber, player: &PlayerId, seq: u32) -> Self {
        Self(format!("{round}:{player}:{seq}"))
    }

    /// Settlement credit for a winning bet: `{round}:{bet_id}:payout`.
    pub fn bet_payout(round: RoundNumber, bet_id: u32) -> Self {
        Self(format!("{round}:{bet_id}:payout"))
    }

    /// Refund credit when a round aborts: `{round}:{bet_id}:refund`.
    pub fn bet_refund(round: RoundNumber, bet_id: u32) -> Self {
        Self(format!("{round}:{bet_id}:refund"))
    }

    /// Compensating credit for a debit whose bet record lost the race with
    /// the book freeze: `{debit}:refund`.
    pub fn compensation(debit: &TxnId) -> Self {
        Self(format!("{}:refund", debit.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnReason {
    BetStake,
    BetPayout,
    BetRefund,
}

/// A mutation request handed to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub txn_id: TxnId,
    pub player: PlayerId,
    pub delta: i64,
    pub reason: TxnReason,
    pub round: Option<RoundNumber>,
}

/// Committed transaction as it appears in the append-only log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnRecord {
    pub id: TxnId,
    pub player: PlayerId,
    pub delta: i64,
    pub reason: TxnReason,
    pub round: Option<RoundNumber>,
    pub applied_at: DateTime<Utc>,
    pub balance_after: Gems,
}
