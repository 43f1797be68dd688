use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::audit::{AuditStore, AuditedBet, RoundAuditRecord, RoundDisposition};
use super::errors::EngineError;
use super::events::{AbortReason, PlayerSettlement, RoundEvent};
use super::{chrono_duration, Round, RoundPhase, RoundSnapshot};
use crate::book::{Bet, BetBook, BetId, BetKind, SettledBet, Settlement};
use crate::config::EngineConfig;
use crate::fairness::{FairRng, ServerSeed, DEFAULT_CLIENT_SEED};
use crate::ledger::{Gems, Ledger, LedgerEntry, PlayerId, RoundNumber, TxnId, TxnReason};
use crate::stream::{EventHub, Subscription};
use crate::wheel::WheelColor;

const LOG_TARGET: &str = "gem_roulette::round::scheduler";

const CMD_CHANNEL_CAPACITY: usize = 64;
const BATCH_ATTEMPTS: u32 = 5;
const BATCH_BACKOFF: Duration = Duration::from_millis(200);
const STALL_RETRY_INTERVAL: Duration = Duration::from_secs(5);
const SEED_RETRY_INTERVAL: Duration = Duration::from_secs(1);

const MAX_CLIENT_SEED_LEN: usize = 64;

/// Dependencies of the round engine, wired up at process start.
pub struct RoundEngineConfig {
    pub engine: EngineConfig,
    pub ledger: Arc<Ledger>,
    pub audit: Arc<dyn AuditStore>,
    pub hub: Arc<EventHub>,
    pub rng: Arc<dyn FairRng>,
    pub shutdown: CancellationToken,
}

/// Commands routed into the scheduler worker. Phase timers and these are
/// the only sources of phase transitions.
enum Command {
    SpinTrigger {
        respond: oneshot::Sender<bool>,
    },
    ClientSeed {
        seed: String,
        respond: oneshot::Sender<RoundNumber>,
    },
}

/// State shared between the worker and request handlers. The lock is only
/// ever held for field access, never across a suspension point.
struct SharedRound {
    round: Round,
    book: BetBook,
    settled: Option<Vec<SettledBet>>,
}

#[derive(Clone, Copy, Debug)]
pub struct BetReceipt {
    pub bet_id: BetId,
    pub new_balance: Gems,
}

/// Outcome and caller-filtered settlements for one round.
#[derive(Clone, Debug, Serialize)]
pub struct PlayerRoundResults {
    pub round_number: RoundNumber,
    pub outcome_number: Option<u8>,
    pub outcome_color: Option<WheelColor>,
    pub server_seed_revealed: Option<String>,
    pub settlements: Vec<PlayerSettlement>,
}

/// Handle to the live round engine. Cheap to clone behind an `Arc`; all
/// phase transitions happen on the single worker task spawned alongside it.
pub struct RoundEngine {
    shared: Arc<RwLock<SharedRound>>,
    cmd_tx: mpsc::Sender<Command>,
    ledger: Arc<Ledger>,
    hub: Arc<EventHub>,
    audit: Arc<dyn AuditStore>,
    config: EngineConfig,
}

impl RoundEngine {
    /// Open the first round and start the scheduler worker. The round
    /// counter resumes from the audit log, keeping round numbers gap-free
    /// across restarts.
    pub async fn spawn(
        config: RoundEngineConfig,
    ) -> anyhow::Result<(Arc<RoundEngine>, JoinHandle<()>)> {
        let RoundEngineConfig {
            engine,
            ledger,
            audit,
            hub,
            rng,
            shutdown,
        } = config;

        let first_round = audit
            .last_round_number()
            .await?
            .map(|last| last + 1)
            .unwrap_or(1);
        let seed = rng
            .prepare()
            .map_err(|err| anyhow::anyhow!("failed to draw initial server seed: {err}"))?;

        let now = Utc::now();
        let shared = Arc::new(RwLock::new(SharedRound {
            round: Round::open(
                first_round,
                seed.commitment(),
                DEFAULT_CLIENT_SEED.to_string(),
                engine.betting_duration,
                now,
            ),
            book: BetBook::open(first_round, engine.min_stake, engine.max_stake),
            settled: None,
        }));

        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);

        let engine_handle = Arc::new(RoundEngine {
            shared: Arc::clone(&shared),
            cmd_tx,
            ledger: Arc::clone(&ledger),
            hub: Arc::clone(&hub),
            audit: Arc::clone(&audit),
            config: engine.clone(),
        });

        let worker = Worker {
            shared,
            cmd_rx,
            ledger,
            audit,
            hub,
            rng,
            config: engine.clone(),
            shutdown,
            current_round: first_round,
            seed,
            betting_deadline: Instant::now() + engine.betting_duration,
            pending_client_seed: None,
            stopping: false,
        };
        let handle = tokio::spawn(worker.run());

        Ok((engine_handle, handle))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn current_snapshot(&self) -> RoundSnapshot {
        self.shared.read().round.snapshot_at(Utc::now())
    }

    /// Attach a stream subscriber and capture the snapshot it should see
    /// first.
    pub fn subscribe(&self) -> (RoundSnapshot, Subscription) {
        let subscription = self.hub.subscribe();
        (self.current_snapshot(), subscription)
    }

    pub fn unsubscribe(&self, id: uuid::Uuid) {
        self.hub.unsubscribe(id);
    }

    /// Submit a bet for the current round.
    ///
    /// The sequence number is reserved under the phase gate, the ledger
    /// debit happens outside it, and the bet record is committed afterwards.
    /// A debit whose commit loses the race with the book freeze is refunded
    /// with a compensating transaction, so the window is unobservable to the
    /// ledger's conservation invariant.
    pub async fn place_bet(
        &self,
        player: PlayerId,
        round_number: RoundNumber,
        kind: BetKind,
        stake: Gems,
    ) -> Result<BetReceipt, EngineError> {
        let seq = {
            let mut shared = self.shared.write();
            if shared.round.number != round_number {
                return Err(EngineError::UnknownRound(round_number));
            }
            if shared.round.phase != RoundPhase::Betting {
                return Err(EngineError::BettingClosed);
            }
            shared.book.reserve(&kind, stake)?
        };

        let debit_txn = TxnId::bet_debit(round_number, &player, seq);
        let new_balance = self
            .ledger
            .apply(LedgerEntry {
                txn_id: debit_txn.clone(),
                player: player.clone(),
                delta: -(stake as i64),
                reason: TxnReason::BetStake,
                round: Some(round_number),
            })
            .await?;

        let bet = Bet {
            id: seq,
            round: round_number,
            player: player.clone(),
            kind,
            stake,
            accepted_at: Utc::now(),
        };
        let committed = {
            let mut shared = self.shared.write();
            if shared.round.number == round_number && !shared.book.is_frozen() {
                shared.book.commit(bet).is_ok()
            } else {
                false
            }
        };

        if !committed {
            let refund = LedgerEntry {
                txn_id: TxnId::compensation(&debit_txn),
                player: player.clone(),
                delta: stake as i64,
                reason: TxnReason::BetRefund,
                round: Some(round_number),
            };
            if let Err(err) = self.ledger.apply(refund).await {
                error!(
                    target: LOG_TARGET,
                    %player,
                    round = round_number,
                    txn = %debit_txn,
                    error = %err,
                    "failed to refund debit stranded by freeze"
                );
            }
            return Err(EngineError::BettingClosed);
        }

        Ok(BetReceipt {
            bet_id: seq,
            new_balance,
        })
    }

    /// Spin the wheel early. The first trigger of a round wins; any later
    /// call lands after the transition and is an acknowledged no-op.
    pub async fn trigger_spin(&self) -> Result<bool, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SpinTrigger { respond: tx })
            .await
            .map_err(|_| EngineError::Internal("scheduler is not running".into()))?;
        rx.await
            .map_err(|_| EngineError::Internal("scheduler dropped the trigger".into()))
    }

    /// Register a client seed for the next round. Seeds are immutable once
    /// the round they apply to opens for betting.
    pub async fn set_client_seed(
        &self,
        player: &PlayerId,
        seed: String,
    ) -> Result<RoundNumber, EngineError> {
        let seed = seed.trim().to_string();
        if seed.is_empty() || seed.len() > MAX_CLIENT_SEED_LEN {
            return Err(EngineError::BadSelection(format!(
                "client seed must be 1..={MAX_CLIENT_SEED_LEN} characters"
            )));
        }
        if !seed.chars().all(|c| c.is_ascii_graphic()) {
            return Err(EngineError::BadSelection(
                "client seed must be printable ASCII".into(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ClientSeed { seed, respond: tx })
            .await
            .map_err(|_| EngineError::Internal("scheduler is not running".into()))?;
        let applies_to = rx
            .await
            .map_err(|_| EngineError::Internal("scheduler dropped the request".into()))?;
        info!(
            target: LOG_TARGET,
            %player,
            round = applies_to,
            "client seed registered"
        );
        Ok(applies_to)
    }

    /// Outcome and settlements for a round, filtered to the caller. Empty
    /// settlements (and no outcome) while the round has not reached RESULTS.
    pub async fn round_results(
        &self,
        round_number: RoundNumber,
        player: &PlayerId,
    ) -> Result<PlayerRoundResults, EngineError> {
        {
            let shared = self.shared.read();
            if shared.round.number == round_number {
                if let Some(settled) = shared
                    .settled
                    .as_ref()
                    .filter(|_| shared.round.phase >= RoundPhase::Results)
                {
                    let settlements = settled
                        .iter()
                        .filter(|entry| &entry.bet.player == player)
                        .map(PlayerSettlement::from)
                        .collect();
                    return Ok(PlayerRoundResults {
                        round_number,
                        outcome_number: shared.round.outcome.map(|o| o.index),
                        outcome_color: shared.round.outcome.map(|o| o.color),
                        server_seed_revealed: shared.round.revealed_seed.clone(),
                        settlements,
                    });
                }
                return Ok(PlayerRoundResults {
                    round_number,
                    outcome_number: None,
                    outcome_color: None,
                    server_seed_revealed: None,
                    settlements: Vec::new(),
                });
            }
        }

        match self.audit.load(round_number).await {
            Ok(Some(record)) => {
                let settlements = record
                    .bets
                    .iter()
                    .filter(|entry| &entry.bet.player == player)
                    .map(|entry| PlayerSettlement {
                        bet_id: entry.bet.id,
                        player: entry.bet.player.clone(),
                        kind: entry.bet.kind,
                        stake: entry.bet.stake,
                        settlement: entry.settlement,
                        net: entry.payout() as i64 - entry.bet.stake as i64,
                    })
                    .collect();
                Ok(PlayerRoundResults {
                    round_number,
                    outcome_number: record.outcome_number,
                    outcome_color: record.outcome_color,
                    server_seed_revealed: Some(record.server_seed),
                    settlements,
                })
            }
            Ok(None) => Err(EngineError::UnknownRound(round_number)),
            Err(err) => Err(EngineError::Internal(err.to_string())),
        }
    }
}

enum PhaseWait {
    Elapsed,
    Spin,
    Shutdown,
}

/// The scheduler worker: sole owner of phase transitions. Logically
/// single-threaded over round state; exactly one transition is in flight at
/// any time.
struct Worker {
    shared: Arc<RwLock<SharedRound>>,
    cmd_rx: mpsc::Receiver<Command>,
    ledger: Arc<Ledger>,
    audit: Arc<dyn AuditStore>,
    hub: Arc<EventHub>,
    rng: Arc<dyn FairRng>,
    config: EngineConfig,
    shutdown: CancellationToken,
    current_round: RoundNumber,
    seed: ServerSeed,
    betting_deadline: Instant,
    pending_client_seed: Option<String>,
    stopping: bool,
}

impl Worker {
    async fn run(mut self) {
        info!(
            target: LOG_TARGET,
            first_round = self.current_round,
            "round scheduler started"
        );
        loop {
            self.run_round().await;
            self.current_round += 1;
            if self.stopping || self.shutdown.is_cancelled() {
                break;
            }

            let seed = loop {
                match self.rng.prepare() {
                    Ok(seed) => break Some(seed),
                    Err(err) => {
                        error!(
                            target: LOG_TARGET,
                            round = self.current_round,
                            error = %err,
                            "failed to draw server seed; retrying"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(SEED_RETRY_INTERVAL) => {}
                            _ = self.shutdown.cancelled() => break None,
                        }
                    }
                }
            };
            let Some(seed) = seed else { break };
            self.seed = seed;
            self.open_round();
        }
        info!(
            target: LOG_TARGET,
            next_round = self.current_round,
            "round scheduler stopped"
        );
    }

    fn open_round(&mut self) {
        let client_seed = self
            .pending_client_seed
            .take()
            .unwrap_or_else(|| DEFAULT_CLIENT_SEED.to_string());
        let now = Utc::now();
        let round = Round::open(
            self.current_round,
            self.seed.commitment(),
            client_seed,
            self.config.betting_duration,
            now,
        );
        let book = BetBook::open(
            self.current_round,
            self.config.min_stake,
            self.config.max_stake,
        );
        self.betting_deadline = Instant::now() + self.config.betting_duration;
        let mut shared = self.shared.write();
        *shared = SharedRound {
            round,
            book,
            settled: None,
        };
    }

    async fn run_round(&mut self) {
        let number = self.current_round;
        let started = {
            let shared = self.shared.read();
            RoundEvent::RoundStarted {
                round_number: number,
                phase: RoundPhase::Betting,
                commitment: shared.round.commitment.clone(),
                nonce: shared.round.nonce(),
                started_at: shared.round.phase_started_at,
                ends_at: shared.round.phase_ends_at,
                betting_duration: shared.round.betting_duration.as_secs(),
            }
        };
        self.hub.publish(&started);
        info!(target: LOG_TARGET, round = number, "round open for betting");

        match self.wait_phase(self.betting_deadline, true).await {
            PhaseWait::Elapsed => {}
            PhaseWait::Spin => {
                info!(target: LOG_TARGET, round = number, "spin triggered early");
            }
            PhaseWait::Shutdown => self.stopping = true,
        }

        // Freeze happens-before the draw; bets past this point bounce.
        let (client_seed, nonce, bet_count) = {
            let mut shared = self.shared.write();
            shared.book.freeze();
            let now = Utc::now();
            shared.round.phase = RoundPhase::Spinning;
            shared.round.phase_started_at = now;
            shared.round.phase_ends_at = now + chrono_duration(self.config.spinning_duration);
            (
                shared.round.client_seed.clone(),
                shared.round.nonce(),
                shared.book.bets().len(),
            )
        };

        // Exactly one draw per round, no redraws.
        let outcome = match self.rng.draw(&self.seed, &client_seed, nonce) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    target: LOG_TARGET,
                    round = number,
                    error = %err,
                    "outcome draw failed; aborting round"
                );
                self.abort_round(AbortReason::RngFailure).await;
                return;
            }
        };
        {
            let mut shared = self.shared.write();
            shared.round.outcome = Some(outcome);
            shared.round.outcome_drawn_at = Some(Utc::now());
        }
        self.hub.publish(&RoundEvent::PhaseChanged {
            round_number: number,
            phase: RoundPhase::Spinning,
            outcome_number: Some(outcome.index),
            outcome_color: Some(outcome.color),
            time_remaining: self.config.spinning_duration.as_secs_f64(),
        });
        info!(
            target: LOG_TARGET,
            round = number,
            outcome = outcome.index,
            color = %outcome.color,
            bets = bet_count,
            "outcome drawn"
        );

        if !self.stopping {
            let deadline = Instant::now() + self.config.spinning_duration;
            if matches!(self.wait_phase(deadline, false).await, PhaseWait::Shutdown) {
                self.stopping = true;
            }
        }

        // RESULTS: reveal, settle, credit, announce.
        let revealed = self.seed.reveal_hex();
        {
            let mut shared = self.shared.write();
            let now = Utc::now();
            shared.round.phase = RoundPhase::Results;
            shared.round.phase_started_at = now;
            shared.round.phase_ends_at = now + chrono_duration(self.config.results_duration);
            shared.round.revealed_seed = Some(revealed.clone());
        }

        let settled = { self.shared.read().book.settle(outcome.index) };
        {
            self.shared.write().settled = Some(settled.clone());
        }

        let credits: Vec<LedgerEntry> = settled
            .iter()
            .filter(|entry| entry.payout() > 0)
            .map(|entry| LedgerEntry {
                txn_id: entry.credit_txn.clone(),
                player: entry.bet.player.clone(),
                delta: entry.payout() as i64,
                reason: TxnReason::BetPayout,
                round: Some(number),
            })
            .collect();
        if !self.apply_with_retry(number, "settlement", credits).await {
            return;
        }

        self.hub.publish(&RoundEvent::RoundResults {
            round_number: number,
            outcome_number: outcome.index,
            outcome_color: outcome.color,
            server_seed_revealed: revealed,
            settlements: settled.iter().map(PlayerSettlement::from).collect(),
        });

        let record = self.build_audit(RoundDisposition::Completed);
        if !self.append_audit_with_retry(&record).await {
            return;
        }

        if !self.stopping {
            let deadline = Instant::now() + self.config.results_duration;
            if matches!(self.wait_phase(deadline, false).await, PhaseWait::Shutdown) {
                self.stopping = true;
            }
        }

        self.hub
            .publish(&RoundEvent::RoundEnded { round_number: number });
        self.shared.write().round.phase = RoundPhase::Ended;
        info!(
            target: LOG_TARGET,
            round = number,
            staked = record.total_staked,
            paid_out = record.total_paid_out,
            "round ended"
        );
    }

    /// Terminal failure path: refund every accepted bet and bury the round.
    async fn abort_round(&mut self, reason: AbortReason) {
        let number = self.current_round;
        let refunds: Vec<LedgerEntry> = {
            let shared = self.shared.read();
            shared
                .book
                .bets()
                .iter()
                .map(|bet| LedgerEntry {
                    txn_id: TxnId::bet_refund(number, bet.id),
                    player: bet.player.clone(),
                    delta: bet.stake as i64,
                    reason: TxnReason::BetRefund,
                    round: Some(number),
                })
                .collect()
        };
        let refund_count = refunds.len();
        if !self.apply_with_retry(number, "refund", refunds).await {
            return;
        }
        warn!(
            target: LOG_TARGET,
            round = number,
            reason = reason.as_str(),
            refunds = refund_count,
            "round aborted"
        );

        self.hub.publish(&RoundEvent::RoundAborted {
            round_number: number,
            reason,
        });

        let record = self.build_audit(RoundDisposition::Aborted {
            reason: reason.as_str().to_string(),
        });
        self.append_audit_with_retry(&record).await;

        self.shared.write().round.phase = RoundPhase::Ended;
    }

    fn build_audit(&self, disposition: RoundDisposition) -> RoundAuditRecord {
        let shared = self.shared.read();
        let bets: Vec<AuditedBet> = match &shared.settled {
            Some(settled) => settled
                .iter()
                .map(|entry| AuditedBet {
                    bet: entry.bet.clone(),
                    settlement: entry.settlement,
                })
                .collect(),
            None => shared
                .book
                .bets()
                .iter()
                .map(|bet| AuditedBet {
                    bet: bet.clone(),
                    settlement: Settlement::Pending,
                })
                .collect(),
        };
        let total_paid_out = bets.iter().map(AuditedBet::payout).sum();
        RoundAuditRecord {
            round_number: shared.round.number,
            commitment: shared.round.commitment.clone(),
            server_seed: self.seed.reveal_hex(),
            client_seed: shared.round.client_seed.clone(),
            nonce: shared.round.nonce(),
            disposition,
            outcome_number: shared.round.outcome.map(|o| o.index),
            outcome_color: shared.round.outcome.map(|o| o.color),
            outcome_drawn_at: shared.round.outcome_drawn_at,
            bets,
            total_staked: shared.book.total_staked(),
            total_paid_out,
            ended_at: Utc::now(),
        }
    }

    /// Sleep until the deadline while servicing commands. Spin triggers end
    /// the wait only during BETTING; outside it they are acknowledged no-ops.
    async fn wait_phase(&mut self, deadline: Instant, spin_breaks: bool) -> PhaseWait {
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return PhaseWait::Elapsed,
                _ = self.shutdown.cancelled() => return PhaseWait::Shutdown,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::SpinTrigger { respond }) => {
                        let _ = respond.send(spin_breaks);
                        if spin_breaks {
                            return PhaseWait::Spin;
                        }
                    }
                    Some(Command::ClientSeed { seed, respond }) => {
                        if self.pending_client_seed.is_none() {
                            self.pending_client_seed = Some(seed);
                        }
                        let _ = respond.send(self.current_round + 1);
                    }
                    None => return PhaseWait::Shutdown,
                },
            }
        }
    }

    /// Push a credit batch into the ledger, retrying with bounded backoff.
    /// On exhaustion the round is announced as stalled and retried on a slow
    /// cadence; the engine never advances past an unsettled round. Returns
    /// false only when shut down mid-stall.
    async fn apply_with_retry(
        &mut self,
        round: RoundNumber,
        what: &'static str,
        entries: Vec<LedgerEntry>,
    ) -> bool {
        if entries.is_empty() {
            return true;
        }
        let mut attempt = 1u32;
        let mut stalled = false;
        loop {
            match self.ledger.batch_apply(entries.clone()).await {
                Ok(()) => {
                    if stalled {
                        info!(
                            target: LOG_TARGET,
                            round,
                            what,
                            "stalled ledger batch recovered"
                        );
                    }
                    return true;
                }
                Err(err) if attempt < BATCH_ATTEMPTS => {
                    warn!(
                        target: LOG_TARGET,
                        round,
                        what,
                        attempt,
                        error = %err,
                        "ledger batch failed; retrying"
                    );
                    tokio::time::sleep(BATCH_BACKOFF * attempt).await;
                }
                Err(err) => {
                    if !stalled {
                        stalled = true;
                        error!(
                            target: LOG_TARGET,
                            round,
                            what,
                            error = %err,
                            "ledger batch exhausted retries; round stalled"
                        );
                        self.hub.publish(&RoundEvent::RoundStalled {
                            round_number: round,
                            reason: format!("{what} failed: {err}"),
                        });
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(STALL_RETRY_INTERVAL) => {}
                        _ = self.shutdown.cancelled() => {
                            self.stopping = true;
                            return false;
                        }
                    }
                }
            }
            attempt = attempt.saturating_add(1);
        }
    }

    async fn append_audit_with_retry(&mut self, record: &RoundAuditRecord) -> bool {
        let mut attempt = 1u32;
        let mut stalled = false;
        loop {
            match self.audit.append(record).await {
                Ok(()) => return true,
                Err(err) if attempt < BATCH_ATTEMPTS => {
                    warn!(
                        target: LOG_TARGET,
                        round = record.round_number,
                        attempt,
                        error = %err,
                        "audit append failed; retrying"
                    );
                    tokio::time::sleep(BATCH_BACKOFF * attempt).await;
                }
                Err(err) => {
                    if !stalled {
                        stalled = true;
                        error!(
                            target: LOG_TARGET,
                            round = record.round_number,
                            error = %err,
                            "audit append exhausted retries; round stalled"
                        );
                        self.hub.publish(&RoundEvent::RoundStalled {
                            round_number: record.round_number,
                            reason: format!("audit append failed: {err}"),
                        });
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(STALL_RETRY_INTERVAL) => {}
                        _ = self.shutdown.cancelled() => {
                            self.stopping = true;
                            return false;
                        }
                    }
                }
            }
            attempt = attempt.saturating_add(1);
        }
    }
}
