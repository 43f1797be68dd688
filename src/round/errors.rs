use thiserror::Error;

use crate::book::BookError;
use crate::ledger::{Gems, LedgerError, RoundNumber};

/// Caller-facing failures of the round engine. Each variant maps onto one
/// code of the wire error taxonomy.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("betting is closed")]
    BettingClosed,

    #[error("round {0} is not the current round")]
    UnknownRound(RoundNumber),

    #[error("{0}")]
    BadSelection(String),

    #[error("stake {stake} outside [{min}, {max}]")]
    StakeOutOfRange { stake: Gems, min: Gems, max: Gems },

    #[error("insufficient funds: balance {balance}")]
    InsufficientFunds { balance: Gems },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BookError> for EngineError {
    fn from(err: BookError) -> Self {
        match err {
            BookError::BettingClosed => EngineError::BettingClosed,
            BookError::BadSelection => EngineError::BadSelection(err.to_string()),
            BookError::StakeOutOfRange { stake, min, max } => {
                EngineError::StakeOutOfRange { stake, min, max }
            }
        }
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds { balance, .. } => {
                EngineError::InsufficientFunds { balance }
            }
            LedgerError::Conflict(_) | LedgerError::Unavailable(_) => {
                EngineError::Internal(err.to_string())
            }
        }
    }
}
