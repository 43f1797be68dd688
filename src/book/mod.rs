pub mod types;

pub use types::{Bet, BetId, BetKind, ParityPick, RangePick, SettledBet, Settlement};

use thiserror::Error;

use crate::ledger::{Gems, RoundNumber, TxnId};
use crate::wheel::WheelIndex;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookError {
    #[error("betting is closed")]
    BettingClosed,
    #[error("unrecognized bet kind or selection")]
    BadSelection,
    #[error("stake {stake} outside [{min}, {max}]")]
    StakeOutOfRange { stake: Gems, min: Gems, max: Gems },
}

/// Per-round, in-memory collection of accepted bets.
///
/// Acceptance is two-phase to keep the ledger debit out of the phase lock:
/// [`BetBook::reserve`] validates the bet and hands out the sequence number
/// the debit transaction id is derived from, and [`BetBook::commit`] records
/// the bet once the debit has landed. A commit that arrives after
/// [`BetBook::freeze`] fails, and the caller compensates the debit.
#[derive(Debug)]
pub struct BetBook {
    round: RoundNumber,
    min_stake: Gems,
    max_stake: Gems,
    next_seq: BetId,
    frozen: bool,
    bets: Vec<Bet>,
}

impl BetBook {
    pub fn open(round: RoundNumber, min_stake: Gems, max_stake: Gems) -> Self {
        Self {
            round,
            min_stake,
            max_stake,
            next_seq: 0,
            frozen: false,
            bets: Vec::new(),
        }
    }

    pub fn round(&self) -> RoundNumber {
        self.round
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Validate a prospective bet and assign its sequence number. A reserved
    /// sequence that is never committed simply never appears in the book.
    pub fn reserve(&mut self, kind: &BetKind, stake: Gems) -> Result<BetId, BookError> {
        if self.frozen {
            return Err(BookError::BettingClosed);
        }
        if !kind.is_valid() {
            return Err(BookError::BadSelection);
        }
        if stake < self.min_stake || stake > self.max_stake {
            return Err(BookError::StakeOutOfRange {
                stake,
                min: self.min_stake,
                max: self.max_stake,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Record a bet whose debit has been applied.
    pub fn commit(&mut self, bet: Bet) -> Result<(), BookError> {
        if self.frozen {
            return Err(BookError::BettingClosed);
        }
        debug_assert_eq!(bet.round, self.round);
        debug_assert!(bet.id < self.next_seq, "commit without reserve");
        self.bets.push(bet);
        Ok(())
    }

    /// Transition the book to read-only. Irreversible.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    pub fn total_staked(&self) -> Gems {
        self.bets.iter().map(|bet| bet.stake).sum()
    }

    /// Settle every bet against the outcome. Pure over the frozen book:
    /// re-running with the same outcome yields bit-identical records.
    pub fn settle(&self, outcome: WheelIndex) -> Vec<SettledBet> {
        self.bets
            .iter()
            .map(|bet| {
                let settlement = if bet.kind.wins(outcome) {
                    Settlement::Won {
                        payout: bet.stake * bet.kind.multiplier(),
                    }
                } else {
                    Settlement::Lost
                };
                SettledBet {
                    bet: bet.clone(),
                    settlement,
                    credit_txn: TxnId::bet_payout(self.round, bet.id),
                }
            })
            .collect()
    }
}
