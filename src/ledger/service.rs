use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, warn};

use super::error::LedgerError;
use super::log::TransactionLog;
use super::types::{Gems, LedgerEntry, PlayerId, TxnId, TxnRecord};

const LOG_TARGET: &str = "gem_roulette::ledger";

const APPEND_ATTEMPTS: u32 = 3;
const APPEND_BACKOFF: Duration = Duration::from_millis(50);

/// The authoritative GEM balance store.
///
/// All mutations serialize on one async mutex, which subsumes the per-player
/// ordering requirement and makes batches trivially atomic. The durable log
/// is written before in-memory state is touched, so a failed append leaves
/// the ledger exactly as it was and the caller free to retry with the same
/// transaction ids.
pub struct Ledger {
    inner: Mutex<Inner>,
    log: Arc<dyn TransactionLog>,
    initial_balance: Gems,
}

#[derive(Default)]
struct Inner {
    balances: HashMap<PlayerId, Gems>,
    applied: HashMap<TxnId, AppliedTxn>,
}

#[derive(Clone)]
struct AppliedTxn {
    player: PlayerId,
    delta: i64,
    reason: super::types::TxnReason,
    round: Option<u64>,
    balance_after: Gems,
}

impl AppliedTxn {
    fn from_record(record: &TxnRecord) -> Self {
        Self {
            player: record.player.clone(),
            delta: record.delta,
            reason: record.reason,
            round: record.round,
            balance_after: record.balance_after,
        }
    }

    fn matches(&self, entry: &LedgerEntry) -> bool {
        self.player == entry.player
            && self.delta == entry.delta
            && self.reason == entry.reason
            && self.round == entry.round
    }
}

impl Ledger {
    pub fn new(log: Arc<dyn TransactionLog>, initial_balance: Gems) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            log,
            initial_balance,
        }
    }

    /// Rebuild balances and the idempotency table by replaying the log.
    pub async fn restore(
        log: Arc<dyn TransactionLog>,
        initial_balance: Gems,
    ) -> anyhow::Result<Self> {
        let records = log.load().await?;
        let mut inner = Inner::default();
        for record in &records {
            inner
                .balances
                .insert(record.player.clone(), record.balance_after);
            inner
                .applied
                .insert(record.id.clone(), AppliedTxn::from_record(record));
        }
        Ok(Self {
            inner: Mutex::new(inner),
            log,
            initial_balance,
        })
    }

    /// Current balance. Unknown players are materialized at the configured
    /// initial balance on first touch.
    pub async fn balance(&self, player: &PlayerId) -> Gems {
        let mut inner = self.inner.lock().await;
        let initial = self.initial_balance;
        *inner.balances.entry(player.clone()).or_insert(initial)
    }

    /// Apply a single transaction. Idempotent on the transaction id: a
    /// replay returns the original resulting balance without side effect,
    /// and a replay with different parameters is a [`LedgerError::Conflict`].
    pub async fn apply(&self, entry: LedgerEntry) -> Result<Gems, LedgerError> {
        let mut inner = self.inner.lock().await;
        if let Some(prior) = inner.applied.get(&entry.txn_id) {
            return if prior.matches(&entry) {
                Ok(prior.balance_after)
            } else {
                Err(LedgerError::Conflict(entry.txn_id))
            };
        }

        let current = inner
            .balances
            .get(&entry.player)
            .copied()
            .unwrap_or(self.initial_balance);
        let next = next_balance(current, entry.delta)?;

        let record = TxnRecord {
            id: entry.txn_id.clone(),
            player: entry.player.clone(),
            delta: entry.delta,
            reason: entry.reason,
            round: entry.round,
            applied_at: Utc::now(),
            balance_after: next,
        };
        self.append_with_retry(std::slice::from_ref(&record))
            .await?;

        inner.balances.insert(entry.player.clone(), next);
        inner
            .applied
            .insert(entry.txn_id, AppliedTxn::from_record(&record));
        Ok(next)
    }

    /// Apply a batch of transactions as a single atomic unit. If any entry
    /// would violate the non-negative balance invariant, none are applied.
    /// Entries whose ids were already applied with identical parameters are
    /// skipped, so retrying a partially-acknowledged batch is safe.
    pub async fn batch_apply(&self, entries: Vec<LedgerEntry>) -> Result<(), LedgerError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;

        let mut scratch: HashMap<PlayerId, Gems> = HashMap::new();
        let mut records = Vec::with_capacity(entries.len());
        let now = Utc::now();
        for entry in &entries {
            if let Some(prior) = inner.applied.get(&entry.txn_id) {
                if prior.matches(entry) {
                    continue;
                }
                return Err(LedgerError::Conflict(entry.txn_id.clone()));
            }
            let current = scratch
                .get(&entry.player)
                .copied()
                .or_else(|| inner.balances.get(&entry.player).copied())
                .unwrap_or(self.initial_balance);
            let next = next_balance(current, entry.delta)?;
            scratch.insert(entry.player.clone(), next);
            records.push(TxnRecord {
                id: entry.txn_id.clone(),
                player: entry.player.clone(),
                delta: entry.delta,
                reason: entry.reason,
                round: entry.round,
                applied_at: now,
                balance_after: next,
            });
        }
        if records.is_empty() {
            return Ok(());
        }

        self.append_with_retry(&records).await?;

        for record in &records {
            inner
                .balances
                .insert(record.player.clone(), record.balance_after);
            inner
                .applied
                .insert(record.id.clone(), AppliedTxn::from_record(record));
        }
        Ok(())
    }

    async fn append_with_retry(&self, records: &[TxnRecord]) -> Result<(), LedgerError> {
        let mut attempt = 1u32;
        loop {
            match self.log.append(records).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < APPEND_ATTEMPTS => {
                    warn!(
                        target: LOG_TARGET,
                        attempt,
                        error = %err,
                        "transaction log append failed; retrying"
                    );
                    tokio::time::sleep(APPEND_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        target: LOG_TARGET,
                        attempts = attempt,
                        error = %err,
                        "transaction log append exhausted retries"
                    );
                    return Err(LedgerError::Unavailable(err.to_string()));
                }
            }
        }
    }
}

fn next_balance(current: Gems, delta: i64) -> Result<Gems, LedgerError> {
    if delta < 0 {
        let requested = delta.unsigned_abs();
        current
            .checked_sub(requested)
            .ok_or(LedgerError::InsufficientFunds {
                balance: current,
                requested,
            })
    } else {
        current
            .checked_add(delta as u64)
            .ok_or_else(|| LedgerError::Unavailable("balance overflow".into()))
    }
}
