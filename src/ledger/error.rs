use thiserror::Error;

use super::types::{Gems, TxnId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// A debit would take the player's balance negative. Nothing mutated.
    #[error("insufficient funds: balance {balance}, debit {requested}")]
    InsufficientFunds { balance: Gems, requested: Gems },

    /// The same transaction id was re-submitted with different parameters.
    #[error("transaction {0} re-submitted with different parameters")]
    Conflict(TxnId),

    /// Durable log writes kept failing after bounded retries. In-memory
    /// state is untouched; the caller may safely retry the whole call.
    #[error("ledger storage unavailable: {0}")]
    Unavailable(String),
}
