//! Transaction ledger for the recharge saga.
//!
//! The ledger is the durable record of every recharge attempt. It is the
//! only place a transaction's status lives, and it refuses any write that
//! would move a record backwards or touch a finished one.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod transition;

pub use common::{TransactionId, UserId};
pub use error::{LedgerError, Result};
pub use memory::InMemoryTransactionStore;
pub use postgres::PostgresTransactionStore;
pub use store::{TransactionStore, TransactionStoreExt, UpdateOptions, validate_update};
pub use transition::StatusTransition;
