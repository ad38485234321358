//! Transfer saga record
//!
//! A transfer has no cross-account transaction to lean on, so its progress
//! is persisted next to the movements as an explicit state machine:
//!
//! ```text
//! Validated ──► BalanceChecked ──► ChargeCommitted ──► PaymentCommitted
//!     │               │                   │                   ▲
//!     ▼               ▼                   ▼                   │
//!  Rejected        Rejected          Inconsistent ────────────┘
//! ```
//!
//! Both legs are stamped before anything is written, so their ids are
//! fixed for the life of the saga and replaying a step is idempotent.

use crate::types::Movement;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Transfer request variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    /// To an account of another customer
    ThirdParty,
    /// Between the caller's own accounts
    OwnAccount,
}

impl TransferKind {
    /// Label used in observations
    pub fn label(&self) -> &'static str {
        match self {
            TransferKind::ThirdParty => "Bank transfer to other accounts",
            TransferKind::OwnAccount => "Bank transfer between own accounts",
        }
    }
}

/// Saga state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransferState {
    /// Request passed validation
    Validated = 1,
    /// Source balance covers the amount
    BalanceChecked = 2,
    /// Charge leg on record
    ChargeCommitted = 3,
    /// Payment leg on record (terminal)
    PaymentCommitted = 4,
    /// Refused before any write (terminal)
    Rejected = 5,
    /// Charge on record, payment leg failed; awaiting reconciliation
    Inconsistent = 6,
}

impl TransferState {
    /// Check whether `next` may follow this state
    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Validated, BalanceChecked)
                | (Validated, Rejected)
                | (BalanceChecked, ChargeCommitted)
                | (BalanceChecked, Rejected)
                | (ChargeCommitted, PaymentCommitted)
                | (ChargeCommitted, Inconsistent)
                | (Inconsistent, PaymentCommitted)
                | (Inconsistent, Inconsistent)
        )
    }

    /// Check if the saga still needs work
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            TransferState::BalanceChecked
                | TransferState::ChargeCommitted
                | TransferState::Inconsistent
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Persisted progress of one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSaga {
    /// Saga id, also stamped on both legs
    pub transfer_id: Uuid,

    /// Request variant
    pub kind: TransferKind,

    /// Current state
    pub state: TransferState,

    /// Charge leg against the source account
    pub charge: Movement,

    /// Payment leg against the destination account
    pub payment: Movement,

    /// Payment leg write attempts so far
    pub payment_attempts: u32,

    /// Last failure seen while driving the saga
    pub last_error: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl TransferSaga {
    /// Start a saga for two stamped legs; links both legs to the saga id
    pub fn new(kind: TransferKind, mut charge: Movement, mut payment: Movement) -> Self {
        let transfer_id = Uuid::now_v7();
        charge.transfer_id = Some(transfer_id);
        payment.transfer_id = Some(transfer_id);
        let now = Utc::now();

        Self {
            transfer_id,
            kind,
            state: TransferState::Validated,
            charge,
            payment,
            payment_attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing transitions the state machine does not allow
    pub fn advance(&mut self, next: TransferState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Saga(format!(
                "transfer {}: illegal transition {} -> {}",
                self.transfer_id, self.state, next
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a failed payment leg attempt
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.payment_attempts += 1;
        self.last_error = Some(reason.into());
        self.updated_at = Utc::now();
    }
}
