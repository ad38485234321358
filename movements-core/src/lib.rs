//! Account Movements Ledger Core
//!
//! Records deposits, withdrawals and account-to-account transfers against
//! customer accounts. Balances are never stored; they are recomputed from
//! the movements on record.
//!
//! # Architecture
//!
//! - **Validation**: concept, parties and amount checked; type and sign derived
//! - **Single Writer per Account**: balance check and append never interleave
//! - **Transfer Saga**: charge and payment legs tracked, retried and recovered
//! - **Pluggable Store**: in-memory, or RocksDB behind the `rocksdb` feature
//!
//! # Invariants
//!
//! - Balance of an account = Σ signed amounts of its movements
//! - Charges are negative, payments positive
//! - A transfer is two mirrored legs sharing one transfer id
//! - No movement takes an account below zero

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod balance;
pub mod config;
pub mod error;
pub mod factory;
pub mod ledger;
pub mod metrics;
pub mod retry;
pub mod saga;
#[cfg(feature = "rocksdb")]
pub mod storage;
pub mod store;
pub mod transfer;
pub mod types;
pub mod validation;

// Re-exports
pub use config::Config;
pub use error::{Error, Rejection, Result, StoreError, StoreResult, ValidationError};
pub use ledger::MovementLedger;
pub use saga::{TransferKind, TransferSaga, TransferState};
pub use store::{InMemoryStore, LedgerStore, MovementStore, SagaStore};
pub use transfer::{RecoveryReport, TransferRequest};
pub use types::{
    AccountId, Concept, CustomerId, Movement, MovementIntent, MovementOutcome, MovementType,
};
