//! Error types for the movements ledger
//!
//! Two families live here:
//!
//! - [`Error`] is exceptional: store failures, actor failures, and transfer
//!   inconsistencies. It is what `Result` carries.
//! - [`Rejection`] and [`ValidationError`] are expected outcomes. They are
//!   returned inside [`crate::MovementOutcome::Rejected`], never as `Err`.

use crate::types::AccountId;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Store error (I/O, conflict, missing record)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Charge leg committed but the payment leg could not be written
    #[error(
        "Transfer {transfer_id} inconsistent: charge {charge_id} committed, payment leg failed: {reason}"
    )]
    TransferInconsistency {
        /// Saga id shared by both legs
        transfer_id: Uuid,
        /// Id of the committed charge leg
        charge_id: Uuid,
        /// Last store error seen while writing the payment leg
        reason: String,
    },

    /// Illegal saga state transition
    #[error("Saga error: {0}")]
    Saga(String),

    /// Concurrency error (writer mailbox closed, task aborted, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Balance arithmetic left the representable range
    #[error("Overflow: {0}")]
    Overflow(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

/// Errors raised by a [`crate::store::MovementStore`] or [`crate::store::SagaStore`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Movement not found
    #[error("Movement not found: {0}")]
    MovementNotFound(Uuid),

    /// A movement with this id is already on record
    #[error("Duplicate movement id: {0}")]
    DuplicateId(Uuid),

    /// A movement with this reference is already on record
    #[error("Duplicate movement reference: {0}")]
    DuplicateReference(String),

    /// Backend failure (RocksDB, network, ...)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend is temporarily unavailable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(feature = "rocksdb")]
impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Input defects found by the [`crate::validation::MovementValidator`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// No concept code supplied
    #[error("You must enter the movement concept, e.g. {{ \"concept\": \"DP\" }}")]
    MissingConcept,

    /// Concept code outside DP/RT/TR
    #[error("The concept code ({0}) does not exist!")]
    UnknownConcept(String),

    /// No customer supplied
    #[error("You must enter your identification, e.g. {{ \"customer\": \"78345212\" }}")]
    MissingCustomer,

    /// No account supplied
    #[error("You must enter the charge account, e.g. {{ \"account\": \"78345212-653\" }}")]
    MissingAccount,

    /// Transfer without a destination account
    #[error(
        "You must enter the destination account, e.g. {{ \"transferAccount\": \"78345212-653\" }}"
    )]
    MissingTransferAccount,

    /// Transfer without a beneficiary
    #[error(
        "You must enter the beneficiary identification, e.g. {{ \"transferCustomer\": \"78345212\" }}"
    )]
    MissingTransferCustomer,

    /// Source and destination are the same account
    #[error("The destination account must differ from the charge account ({0})")]
    SameAccountTransfer(AccountId),

    /// No amount supplied
    #[error("You must enter the amount, e.g. {{ \"amount\": \"300.50\" }}")]
    MissingAmount,

    /// Amount is zero
    #[error("You must enter an amount other than zero, e.g. {{ \"amount\": \"300.50\" }}")]
    ZeroAmount,

    /// Amount carries more decimal places than the ledger scale
    #[error("The amount {amount} has more than {scale} decimal places")]
    ExcessPrecision {
        /// Amount as submitted
        amount: Decimal,
        /// Ledger scale
        scale: u32,
    },

    /// Amount magnitude above the configured ceiling
    #[error("The amount {amount} exceeds the maximum allowed ({max})")]
    AmountTooLarge {
        /// Amount as submitted
        amount: Decimal,
        /// Configured ceiling
        max: Decimal,
    },

    /// Movement type code outside CG/AB
    #[error("The movement type code ({0}) does not exist!")]
    UnknownMovementType(String),

    /// Supplied movement type contradicts the concept
    #[error("The movement type ({supplied}) does not match the concept ({concept})")]
    MovementTypeMismatch {
        /// Concept code
        concept: String,
        /// Supplied movement type code
        supplied: String,
    },

    /// Transfers must use the transfer operations
    #[error("Transfers must be submitted through the transfer operations")]
    TransferNotDirect,

    /// Update would break the sign rule
    #[error("The amount {amount} does not agree with the movement type ({movement_type})")]
    SignMismatch {
        /// Amount as submitted
        amount: Decimal,
        /// Movement type code
        movement_type: String,
    },

    /// Update tries to move a record to another account
    #[error("A movement cannot be reassigned from account {from} to {to}")]
    AccountReassignment {
        /// Account on record
        from: AccountId,
        /// Account requested
        to: AccountId,
    },
}

impl ValidationError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingConcept => "MISSING_CONCEPT",
            ValidationError::UnknownConcept(_) => "UNKNOWN_CONCEPT",
            ValidationError::MissingCustomer => "MISSING_CUSTOMER",
            ValidationError::MissingAccount => "MISSING_ACCOUNT",
            ValidationError::MissingTransferAccount => "MISSING_TRANSFER_ACCOUNT",
            ValidationError::MissingTransferCustomer => "MISSING_TRANSFER_CUSTOMER",
            ValidationError::SameAccountTransfer(_) => "SAME_ACCOUNT_TRANSFER",
            ValidationError::MissingAmount => "MISSING_AMOUNT",
            ValidationError::ZeroAmount => "ZERO_AMOUNT",
            ValidationError::ExcessPrecision { .. } => "EXCESS_PRECISION",
            ValidationError::AmountTooLarge { .. } => "AMOUNT_TOO_LARGE",
            ValidationError::UnknownMovementType(_) => "UNKNOWN_MOVEMENT_TYPE",
            ValidationError::MovementTypeMismatch { .. } => "MOVEMENT_TYPE_MISMATCH",
            ValidationError::TransferNotDirect => "TRANSFER_NOT_DIRECT",
            ValidationError::SignMismatch { .. } => "SIGN_MISMATCH",
            ValidationError::AccountReassignment { .. } => "ACCOUNT_REASSIGNMENT",
        }
    }
}

/// Expected, non-exceptional refusal of a movement request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Input defect
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Movement would drive the account negative
    #[error("The movement exceeds the available balance.")]
    InsufficientBalance {
        /// Account that would be overdrawn
        account: AccountId,
        /// Balance before the movement
        balance: Decimal,
        /// Signed amount requested
        requested: Decimal,
    },

    /// Movement would push the balance out of the representable range
    #[error("The movement would take the account balance out of range.")]
    BalanceOverflow {
        /// Account that would overflow
        account: AccountId,
        /// Balance before the movement
        balance: Decimal,
        /// Signed amount requested
        requested: Decimal,
    },
}

impl Rejection {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::Invalid(err) => err.code(),
            Rejection::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Rejection::BalanceOverflow { .. } => "BALANCE_OVERFLOW",
        }
    }

    /// User-facing message
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        let rejection = Rejection::InsufficientBalance {
            account: AccountId::new("A-1"),
            balance: Decimal::ZERO,
            requested: Decimal::new(-1000, 2),
        };
        assert_eq!(rejection.code(), "INSUFFICIENT_BALANCE");
        assert_eq!(rejection.message(), "The movement exceeds the available balance.");

        let invalid = Rejection::from(ValidationError::UnknownConcept("XX".to_string()));
        assert_eq!(invalid.code(), "UNKNOWN_CONCEPT");
        assert!(invalid.message().contains("(XX)"));
    }

    #[test]
    fn test_store_error_wraps_into_ledger_error() {
        let err: Error = StoreError::Unavailable("down".to_string()).into();
        assert!(err.to_string().contains("Store unavailable"));
    }
}
