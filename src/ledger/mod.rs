pub mod error;
pub mod log;
pub mod service;
pub mod types;

pub use error::LedgerError;
pub use log::{InMemoryTransactionLog, JsonlTransactionLog, TransactionLog};
pub use service::Ledger;
pub use types::{Gems, LedgerEntry, PlayerId, RoundNumber, TxnId, TxnReason, TxnRecord};
