use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::audit::{AuditStore, InMemoryAuditStore, RoundDisposition};
use super::errors::EngineError;
use super::events::RoundEvent;
use super::scheduler::{RoundEngine, RoundEngineConfig};
use super::RoundPhase;
use crate::book::{BetKind, ParityPick, Settlement};
use crate::config::EngineConfig;
use crate::fairness::{FairRng, FairnessError, Outcome, ServerSeed, DEFAULT_CLIENT_SEED};
use crate::ledger::{InMemoryTransactionLog, Ledger, PlayerId};
use crate::stream::{EventHub, Subscription};
use crate::wheel::{WheelColor, WheelIndex};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Deterministic outcome source: real commitments, pinned winning index.
struct FixedRng {
    index: WheelIndex,
}

impl FairRng for FixedRng {
    fn prepare(&self) -> Result<ServerSeed, FairnessError> {
        Ok(ServerSeed::from_bytes([9u8; 32]))
    }

    fn draw(
        &self,
        _seed: &ServerSeed,
        _client_seed: &str,
        _nonce: u64,
    ) -> Result<Outcome, FairnessError> {
        Ok(Outcome::from_index(self.index))
    }
}

struct FailingDrawRng;

impl FairRng for FailingDrawRng {
    fn prepare(&self) -> Result<ServerSeed, FairnessError> {
        Ok(ServerSeed::from_bytes([3u8; 32]))
    }

    fn draw(
        &self,
        _seed: &ServerSeed,
        _client_seed: &str,
        _nonce: u64,
    ) -> Result<Outcome, FairnessError> {
        Err(FairnessError::Entropy("injected draw failure".into()))
    }
}

struct Harness {
    engine: Arc<RoundEngine>,
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
    ledger: Arc<Ledger>,
    audit: Arc<InMemoryAuditStore>,
}

impl Harness {
    async fn start(rng: Arc<dyn FairRng>, config: EngineConfig) -> Self {
        Self::start_with_audit(rng, config, Arc::new(InMemoryAuditStore::new())).await
    }

    async fn start_with_audit(
        rng: Arc<dyn FairRng>,
        config: EngineConfig,
        audit: Arc<InMemoryAuditStore>,
    ) -> Self {
        let hub = Arc::new(EventHub::new(config.subscriber_queue_depth));
        let ledger = Arc::new(Ledger::new(
            Arc::new(InMemoryTransactionLog::new()),
            config.initial_balance,
        ));
        let shutdown = CancellationToken::new();
        let (engine, handle) = RoundEngine::spawn(RoundEngineConfig {
            engine: config,
            ledger: Arc::clone(&ledger),
            audit: Arc::clone(&audit) as Arc<dyn AuditStore>,
            hub,
            rng,
            shutdown: shutdown.clone(),
        })
        .await
        .expect("engine spawn");
        Self {
            engine,
            handle,
            shutdown,
            ledger,
            audit,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(EVENT_TIMEOUT, self.handle).await;
    }
}

/// Long betting window so tests drive transitions via the spin trigger;
/// short visual phases so rounds complete quickly.
fn quick_config() -> EngineConfig {
    EngineConfig {
        betting_duration: Duration::from_secs(30),
        spinning_duration: Duration::from_millis(20),
        results_duration: Duration::from_millis(20),
        initial_balance: 1_000,
        ..EngineConfig::default()
    }
}

async fn next_event(sub: &mut Subscription) -> RoundEvent {
    tokio::time::timeout(EVENT_TIMEOUT, sub.receiver.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

async fn wait_for(sub: &mut Subscription, pred: impl Fn(&RoundEvent) -> bool) -> RoundEvent {
    loop {
        let event = next_event(sub).await;
        if pred(&event) {
            return event;
        }
    }
}

fn alice() -> PlayerId {
    PlayerId::new("alice")
}

#[tokio::test]
async fn straight_up_win_pays_out_and_settles_once() {
    let harness = Harness::start(Arc::new(FixedRng { index: 7 }), quick_config()).await;
    let (snapshot, mut sub) = harness.engine.subscribe();
    assert_eq!(snapshot.round_number, 1);
    assert_eq!(snapshot.phase, RoundPhase::Betting);

    let receipt = harness
        .engine
        .place_bet(alice(), 1, BetKind::SingleNumber(7), 100)
        .await
        .expect("bet accepted");
    assert_eq!(receipt.bet_id, 0);
    assert_eq!(receipt.new_balance, 900);

    assert!(harness.engine.trigger_spin().await.unwrap());

    let results = wait_for(&mut sub, |e| matches!(e, RoundEvent::RoundResults { .. })).await;
    match results {
        RoundEvent::RoundResults {
            round_number,
            outcome_number,
            outcome_color,
            settlements,
            ..
        } => {
            assert_eq!(round_number, 1);
            assert_eq!(outcome_number, 7);
            assert_eq!(outcome_color, WheelColor::Red);
            assert_eq!(settlements.len(), 1);
            assert_eq!(settlements[0].net, 3_400);
            assert_eq!(
                settlements[0].settlement,
                Settlement::Won { payout: 3_500 }
            );
        }
        _ => unreachable!(),
    }

    assert_eq!(harness.ledger.balance(&alice()).await, 4_400);

    wait_for(&mut sub, |e| matches!(e, RoundEvent::RoundEnded { .. })).await;
    let record = harness.audit.load(1).await.unwrap().expect("audit record");
    assert_eq!(record.disposition, RoundDisposition::Completed);
    assert_eq!(record.total_staked, 100);
    assert_eq!(record.total_paid_out, 3_500);
    assert_eq!(record.nonce, 1);

    harness.stop().await;
}

#[tokio::test]
async fn color_bet_loses_when_zero_hits() {
    let harness = Harness::start(Arc::new(FixedRng { index: 0 }), quick_config()).await;
    let (_, mut sub) = harness.engine.subscribe();

    harness
        .engine
        .place_bet(alice(), 1, BetKind::Color(WheelColor::Red), 50)
        .await
        .expect("bet accepted");
    harness.engine.trigger_spin().await.unwrap();

    let results = wait_for(&mut sub, |e| matches!(e, RoundEvent::RoundResults { .. })).await;
    match results {
        RoundEvent::RoundResults {
            outcome_color,
            settlements,
            ..
        } => {
            assert_eq!(outcome_color, WheelColor::Green);
            assert_eq!(settlements[0].settlement, Settlement::Lost);
            assert_eq!(settlements[0].net, -50);
        }
        _ => unreachable!(),
    }
    assert_eq!(harness.ledger.balance(&alice()).await, 950);

    harness.stop().await;
}

#[tokio::test]
async fn insufficient_funds_rejects_synchronously_without_mutation() {
    let config = EngineConfig {
        initial_balance: 30,
        ..quick_config()
    };
    let harness = Harness::start(Arc::new(FixedRng { index: 2 }), config).await;
    let (_, mut sub) = harness.engine.subscribe();

    let err = harness
        .engine
        .place_bet(alice(), 1, BetKind::Parity(ParityPick::Even), 40)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientFunds { balance: 30 }
    ));
    assert_eq!(harness.ledger.balance(&alice()).await, 30);

    harness.engine.trigger_spin().await.unwrap();
    let results = wait_for(&mut sub, |e| matches!(e, RoundEvent::RoundResults { .. })).await;
    match results {
        RoundEvent::RoundResults { settlements, .. } => assert!(settlements.is_empty()),
        _ => unreachable!(),
    }

    harness.stop().await;
}

#[tokio::test]
async fn early_spin_trigger_is_idempotent_and_closes_betting() {
    let harness = Harness::start(Arc::new(FixedRng { index: 4 }), quick_config()).await;
    let (_, mut sub) = harness.engine.subscribe();

    // First trigger fires the transition well before the 30 s timer.
    assert!(harness.engine.trigger_spin().await.unwrap());
    let spinning = wait_for(&mut sub, |e| {
        matches!(
            e,
            RoundEvent::PhaseChanged {
                phase: RoundPhase::Spinning,
                ..
            }
        )
    })
    .await;
    match spinning {
        RoundEvent::PhaseChanged { outcome_number, .. } => {
            assert_eq!(outcome_number, Some(4));
        }
        _ => unreachable!(),
    }

    // A repeat trigger in the same round succeeds without re-triggering.
    assert!(!harness.engine.trigger_spin().await.unwrap());

    // Late bets bounce.
    let err = harness
        .engine
        .place_bet(alice(), 1, BetKind::SingleNumber(4), 100)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BettingClosed));
    assert_eq!(harness.ledger.balance(&alice()).await, 1_000);

    harness.stop().await;
}

#[tokio::test]
async fn concurrent_bets_from_one_player_cannot_overspend() {
    let harness = Harness::start(Arc::new(FixedRng { index: 13 }), quick_config()).await;
    let (_, mut sub) = harness.engine.subscribe();

    let first = {
        let engine = Arc::clone(&harness.engine);
        tokio::spawn(async move {
            engine
                .place_bet(alice(), 1, BetKind::Range(crate::book::RangePick::Low), 600)
                .await
        })
    };
    let second = {
        let engine = Arc::clone(&harness.engine);
        tokio::spawn(async move {
            engine
                .place_bet(alice(), 1, BetKind::Range(crate::book::RangePick::High), 600)
                .await
        })
    };
    let (first, second) = (first.await.unwrap(), second.await.unwrap());
    assert!(
        first.is_ok() ^ second.is_ok(),
        "exactly one concurrent bet must be accepted"
    );
    let rejected = if first.is_err() { first } else { second };
    assert!(matches!(
        rejected.unwrap_err(),
        EngineError::InsufficientFunds { .. }
    ));
    assert_eq!(harness.ledger.balance(&alice()).await, 400);

    harness.engine.trigger_spin().await.unwrap();
    wait_for(&mut sub, |e| matches!(e, RoundEvent::RoundEnded { .. })).await;
    let record = harness.audit.load(1).await.unwrap().unwrap();
    assert_eq!(record.bets.len(), 1);
    assert_eq!(record.total_staked, 600);

    harness.stop().await;
}

#[tokio::test]
async fn draw_failure_refunds_bets_and_starts_a_fresh_round() {
    let harness = Harness::start(Arc::new(FailingDrawRng), quick_config()).await;
    let (_, mut sub) = harness.engine.subscribe();

    harness
        .engine
        .place_bet(alice(), 1, BetKind::SingleNumber(7), 100)
        .await
        .expect("bet accepted");
    assert_eq!(harness.ledger.balance(&alice()).await, 900);

    harness.engine.trigger_spin().await.unwrap();

    let aborted = wait_for(&mut sub, |e| matches!(e, RoundEvent::RoundAborted { .. })).await;
    match aborted {
        RoundEvent::RoundAborted {
            round_number,
            reason,
        } => {
            assert_eq!(round_number, 1);
            assert_eq!(reason.as_str(), "rng_failure");
        }
        _ => unreachable!(),
    }
    // Refund is applied before the abort is announced.
    assert_eq!(harness.ledger.balance(&alice()).await, 1_000);

    let record = harness.audit.load(1).await.unwrap().unwrap();
    assert!(matches!(
        record.disposition,
        RoundDisposition::Aborted { .. }
    ));
    assert_eq!(record.outcome_number, None);
    assert_eq!(record.bets.len(), 1);
    assert_eq!(record.bets[0].settlement, Settlement::Pending);

    // The engine moves straight on to the next round.
    let started = wait_for(&mut sub, |e| matches!(e, RoundEvent::RoundStarted { .. })).await;
    match started {
        RoundEvent::RoundStarted { round_number, .. } => assert_eq!(round_number, 2),
        _ => unreachable!(),
    }

    harness.stop().await;
}

#[tokio::test]
async fn events_for_a_round_arrive_in_lifecycle_order() {
    let harness = Harness::start(Arc::new(FixedRng { index: 11 }), quick_config()).await;
    let (_, mut sub) = harness.engine.subscribe();

    // Finish round 1 so round 2's full sequence is observable from the start.
    harness.engine.trigger_spin().await.unwrap();
    wait_for(&mut sub, |e| {
        matches!(e, RoundEvent::RoundStarted { round_number: 2, .. })
    })
    .await;
    harness.engine.trigger_spin().await.unwrap();

    let mut seen = Vec::new();
    loop {
        let event = next_event(&mut sub).await;
        let done = matches!(event, RoundEvent::RoundEnded { round_number: 2 });
        seen.push(event);
        if done {
            break;
        }
    }

    let names: Vec<&'static str> = seen.iter().map(RoundEvent::event_name).collect();
    assert_eq!(
        names,
        vec!["phase_changed", "round_results", "round_ended"],
        "round 2 lifecycle out of order: {names:?}"
    );

    harness.stop().await;
}

#[tokio::test]
async fn every_bet_is_accepted_before_the_draw() {
    let harness = Harness::start(Arc::new(FixedRng { index: 17 }), quick_config()).await;
    let (_, mut sub) = harness.engine.subscribe();

    for stake in [100u64, 200, 300] {
        harness
            .engine
            .place_bet(alice(), 1, BetKind::SingleNumber(17), stake)
            .await
            .expect("bet accepted");
    }
    harness.engine.trigger_spin().await.unwrap();
    wait_for(&mut sub, |e| matches!(e, RoundEvent::RoundEnded { .. })).await;

    let record = harness.audit.load(1).await.unwrap().unwrap();
    let drawn_at = record.outcome_drawn_at.expect("draw timestamp");
    assert_eq!(record.bets.len(), 3);
    for audited in &record.bets {
        assert!(
            audited.bet.accepted_at <= drawn_at,
            "bet accepted after the draw"
        );
    }

    // Conservation: staked minus paid out is the house take.
    assert_eq!(record.total_staked, 600);
    assert_eq!(record.total_paid_out, 600 * 35);
    assert_eq!(
        harness.ledger.balance(&alice()).await,
        1_000 - 600 + 600 * 35
    );

    harness.stop().await;
}

#[tokio::test]
async fn round_numbers_resume_gap_free_after_restart() {
    let audit = Arc::new(InMemoryAuditStore::new());
    let harness = Harness::start_with_audit(
        Arc::new(FixedRng { index: 1 }),
        quick_config(),
        Arc::clone(&audit),
    )
    .await;
    let (_, mut sub) = harness.engine.subscribe();
    harness.engine.trigger_spin().await.unwrap();
    wait_for(&mut sub, |e| matches!(e, RoundEvent::RoundEnded { .. })).await;
    harness.stop().await;

    let last = audit.last_round_number().await.unwrap().expect("rounds ran");
    let numbers: Vec<u64> = audit
        .records()
        .iter()
        .map(|record| record.round_number)
        .collect();
    assert_eq!(numbers, (1..=last).collect::<Vec<_>>());

    let restarted = Harness::start_with_audit(
        Arc::new(FixedRng { index: 1 }),
        quick_config(),
        Arc::clone(&audit),
    )
    .await;
    let snapshot = restarted.engine.current_snapshot();
    assert_eq!(snapshot.round_number, last + 1);
    restarted.stop().await;
}

#[tokio::test]
async fn shutdown_completes_the_current_round_through_results() {
    let harness = Harness::start(Arc::new(FixedRng { index: 7 }), quick_config()).await;

    harness
        .engine
        .place_bet(alice(), 1, BetKind::SingleNumber(7), 100)
        .await
        .expect("bet accepted");

    // Cancel mid-betting: the worker must settle the round before exiting.
    harness.shutdown.cancel();
    tokio::time::timeout(EVENT_TIMEOUT, harness.handle)
        .await
        .expect("worker exited")
        .expect("worker completed");

    let record = harness.audit.load(1).await.unwrap().expect("audited");
    assert_eq!(record.disposition, RoundDisposition::Completed);
    assert_eq!(record.bets[0].settlement, Settlement::Won { payout: 3_500 });
    assert_eq!(harness.ledger.balance(&alice()).await, 4_400);
}

#[tokio::test]
async fn client_seed_applies_to_the_next_round_only() {
    let harness = Harness::start(Arc::new(FixedRng { index: 6 }), quick_config()).await;
    let (_, mut sub) = harness.engine.subscribe();

    let applies_to = harness
        .engine
        .set_client_seed(&alice(), "lucky-seed".into())
        .await
        .unwrap();
    assert_eq!(applies_to, 2);

    harness.engine.trigger_spin().await.unwrap();
    wait_for(&mut sub, |e| {
        matches!(e, RoundEvent::RoundStarted { round_number: 2, .. })
    })
    .await;
    harness.engine.trigger_spin().await.unwrap();
    wait_for(&mut sub, |e| {
        matches!(e, RoundEvent::RoundEnded { round_number: 2 })
    })
    .await;

    let first = harness.audit.load(1).await.unwrap().unwrap();
    assert_eq!(first.client_seed, DEFAULT_CLIENT_SEED);
    let second = harness.audit.load(2).await.unwrap().unwrap();
    assert_eq!(second.client_seed, "lucky-seed");

    harness.stop().await;
}

#[tokio::test]
async fn malformed_client_seeds_are_rejected() {
    let harness = Harness::start(Arc::new(FixedRng { index: 6 }), quick_config()).await;
    let too_long = "x".repeat(65);
    for bad in ["", "   ", "has spaces", too_long.as_str()] {
        let err = harness
            .engine
            .set_client_seed(&alice(), bad.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BadSelection(_)), "seed {bad:?}");
    }
    harness.stop().await;
}

#[tokio::test]
async fn bets_against_a_non_current_round_are_rejected() {
    let harness = Harness::start(Arc::new(FixedRng { index: 6 }), quick_config()).await;
    let err = harness
        .engine
        .place_bet(alice(), 99, BetKind::SingleNumber(7), 100)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownRound(99)));
    harness.stop().await;
}

#[tokio::test]
async fn round_results_filter_to_the_caller() {
    let harness = Harness::start(Arc::new(FixedRng { index: 7 }), quick_config()).await;
    let (_, mut sub) = harness.engine.subscribe();
    let bob = PlayerId::new("bob");

    // Before RESULTS the view is empty.
    let early = harness.engine.round_results(1, &alice()).await.unwrap();
    assert!(early.settlements.is_empty());
    assert_eq!(early.outcome_number, None);

    harness
        .engine
        .place_bet(alice(), 1, BetKind::SingleNumber(7), 100)
        .await
        .unwrap();
    harness
        .engine
        .place_bet(bob.clone(), 1, BetKind::Color(WheelColor::Black), 200)
        .await
        .unwrap();
    harness.engine.trigger_spin().await.unwrap();
    wait_for(&mut sub, |e| matches!(e, RoundEvent::RoundEnded { .. })).await;

    let mine = harness.engine.round_results(1, &alice()).await.unwrap();
    assert_eq!(mine.outcome_number, Some(7));
    assert_eq!(mine.settlements.len(), 1);
    assert_eq!(mine.settlements[0].net, 3_400);
    assert!(mine.server_seed_revealed.is_some());

    let theirs = harness.engine.round_results(1, &bob).await.unwrap();
    assert_eq!(theirs.settlements.len(), 1);
    assert_eq!(theirs.settlements[0].net, -200);

    let unknown = harness.engine.round_results(50, &alice()).await;
    assert!(matches!(unknown, Err(EngineError::UnknownRound(50))));

    harness.stop().await;
}
