//! Core types for the movements ledger
//!
//! All types are designed for:
//! - Stable wire names (camelCase fields, source codes for enums)
//! - Exact arithmetic (Decimal for money)
//! - Closed enumerations matched exhaustively

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Customer identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    /// Create new customer ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Business reason for a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Concept {
    /// Cash in
    #[serde(rename = "DP")]
    Deposit,
    /// Cash out
    #[serde(rename = "RT")]
    Withdrawal,
    /// Account to account
    #[serde(rename = "TR")]
    Transfer,
}

impl Concept {
    /// Source code
    pub fn code(&self) -> &'static str {
        match self {
            Concept::Deposit => "DP",
            Concept::Withdrawal => "RT",
            Concept::Transfer => "TR",
        }
    }

    /// Parse from source code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "DP" => Some(Concept::Deposit),
            "RT" => Some(Concept::Withdrawal),
            "TR" => Some(Concept::Transfer),
            _ => None,
        }
    }

    /// Effect of this concept on the account it is recorded against.
    /// Transfers are seen from the outbound leg.
    pub fn movement_type(&self) -> MovementType {
        match self {
            Concept::Deposit => MovementType::Payment,
            Concept::Withdrawal | Concept::Transfer => MovementType::Charge,
        }
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Effect of a movement on its account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementType {
    /// Debit, negative amount
    #[serde(rename = "CG")]
    Charge,
    /// Credit, positive amount
    #[serde(rename = "AB")]
    Payment,
}

impl MovementType {
    /// Source code
    pub fn code(&self) -> &'static str {
        match self {
            MovementType::Charge => "CG",
            MovementType::Payment => "AB",
        }
    }

    /// Parse from source code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "CG" => Some(MovementType::Charge),
            "AB" => Some(MovementType::Payment),
            _ => None,
        }
    }

    /// Apply this type's sign to an amount, whatever sign the amount had
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            MovementType::Charge => -amount.abs(),
            MovementType::Payment => amount.abs(),
        }
    }

    /// Check that an amount carries this type's sign
    pub fn agrees_with(&self, amount: Decimal) -> bool {
        match self {
            MovementType::Charge => amount.is_sign_negative() && !amount.is_zero(),
            MovementType::Payment => amount.is_sign_positive() && !amount.is_zero(),
        }
    }

    /// The other side of a transfer
    pub fn opposite(&self) -> Self {
        match self {
            MovementType::Charge => MovementType::Payment,
            MovementType::Payment => MovementType::Charge,
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Atomic ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    /// Unique id (UUIDv7)
    pub id: Uuid,

    /// Human-facing reference (`customer-NNNNNN`)
    pub reference: String,

    /// Party the movement is recorded against
    pub customer: CustomerId,

    /// Account the movement is recorded against
    pub account: AccountId,

    /// Counterpart party (transfers only)
    #[serde(default)]
    pub transfer_customer: Option<CustomerId>,

    /// Counterpart account (transfers only)
    #[serde(default)]
    pub transfer_account: Option<AccountId>,

    /// Business reason
    pub concept: Concept,

    /// Derived effect
    pub movement_type: MovementType,

    /// Signed amount
    pub amount: Decimal,

    /// Creation date, `dd-MM-yyyy`
    pub date: String,

    /// Creation time, `HH:mm:ss`
    pub time: String,

    /// Server-side description
    pub observations: String,

    /// Passed validation at creation
    pub correct: bool,

    /// Saga linking both legs of a transfer
    #[serde(default)]
    pub transfer_id: Option<Uuid>,
}

/// Movement request as submitted by a caller.
///
/// Every field is optional so that missing input can be reported with the
/// matching message instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MovementIntent {
    /// Concept code (DP, RT, TR)
    pub concept: Option<String>,

    /// Movement type code (CG, AB); legacy direct-create only
    pub movement_type: Option<String>,

    /// Customer
    pub customer: Option<String>,

    /// Account to record against
    pub account: Option<String>,

    /// Counterpart customer
    pub transfer_customer: Option<String>,

    /// Counterpart account
    pub transfer_account: Option<String>,

    /// Amount, any sign
    pub amount: Option<Decimal>,
}

impl MovementIntent {
    /// Deposit intent
    pub fn deposit(customer: &str, account: &str, amount: Decimal) -> Self {
        Self::direct(Concept::Deposit, customer, account, amount)
    }

    /// Withdrawal intent
    pub fn withdrawal(customer: &str, account: &str, amount: Decimal) -> Self {
        Self::direct(Concept::Withdrawal, customer, account, amount)
    }

    /// Transfer intent
    pub fn transfer(
        customer: &str,
        account: &str,
        transfer_customer: &str,
        transfer_account: &str,
        amount: Decimal,
    ) -> Self {
        Self {
            concept: Some(Concept::Transfer.code().to_string()),
            movement_type: None,
            customer: Some(customer.to_string()),
            account: Some(account.to_string()),
            transfer_customer: Some(transfer_customer.to_string()),
            transfer_account: Some(transfer_account.to_string()),
            amount: Some(amount),
        }
    }

    fn direct(concept: Concept, customer: &str, account: &str, amount: Decimal) -> Self {
        Self {
            concept: Some(concept.code().to_string()),
            customer: Some(customer.to_string()),
            account: Some(account.to_string()),
            amount: Some(amount),
            ..Self::default()
        }
    }
}

/// Validated movement, sign and type derived, not yet stamped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMovement {
    /// Customer
    pub customer: CustomerId,
    /// Account
    pub account: AccountId,
    /// Counterpart customer
    pub transfer_customer: Option<CustomerId>,
    /// Counterpart account
    pub transfer_account: Option<AccountId>,
    /// Concept
    pub concept: Concept,
    /// Derived movement type
    pub movement_type: MovementType,
    /// Signed amount
    pub amount: Decimal,
    /// Synthesized description
    pub observations: String,
}

impl NormalizedMovement {
    /// Absolute amount
    pub fn magnitude(&self) -> Decimal {
        self.amount.abs()
    }

    /// Drop any transfer fields (direct path)
    pub fn without_transfer_fields(mut self) -> Self {
        self.transfer_customer = None;
        self.transfer_account = None;
        self
    }

    /// Mirror of a transfer's outbound leg: the payment recorded against
    /// the destination, pointing back at the source.
    pub fn mirrored(&self, observations: String) -> Option<Self> {
        let account = self.transfer_account.clone()?;
        let customer = self.transfer_customer.clone()?;
        let movement_type = self.movement_type.opposite();

        Some(Self {
            customer,
            account,
            transfer_customer: Some(self.customer.clone()),
            transfer_account: Some(self.account.clone()),
            concept: self.concept,
            movement_type,
            amount: movement_type.signed(self.amount),
            observations,
        })
    }
}

/// Result of a movement-creating operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovementOutcome {
    /// Movement recorded
    Accepted(Movement),
    /// Request refused, nothing written
    Rejected(crate::error::Rejection),
}

impl MovementOutcome {
    /// Accepted movement, if any
    pub fn accepted(&self) -> Option<&Movement> {
        match self {
            MovementOutcome::Accepted(movement) => Some(movement),
            MovementOutcome::Rejected(_) => None,
        }
    }

    /// Rejection, if any
    pub fn rejection(&self) -> Option<&crate::error::Rejection> {
        match self {
            MovementOutcome::Accepted(_) => None,
            MovementOutcome::Rejected(rejection) => Some(rejection),
        }
    }

    /// True if the movement was recorded
    pub fn is_accepted(&self) -> bool {
        matches!(self, MovementOutcome::Accepted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concept_codes() {
        assert_eq!(Concept::from_code("DP"), Some(Concept::Deposit));
        assert_eq!(Concept::from_code("RT"), Some(Concept::Withdrawal));
        assert_eq!(Concept::from_code("TR"), Some(Concept::Transfer));
        assert_eq!(Concept::from_code("XX"), None);
        assert_eq!(Concept::Transfer.movement_type(), MovementType::Charge);
    }

    #[test]
    fn test_movement_type_sign() {
        let amount = Decimal::new(2000, 2);
        assert_eq!(MovementType::Charge.signed(amount), Decimal::new(-2000, 2));
        assert_eq!(MovementType::Payment.signed(-amount), amount);
        assert!(MovementType::Charge.agrees_with(-amount));
        assert!(!MovementType::Payment.agrees_with(-amount));
        assert!(!MovementType::Payment.agrees_with(Decimal::ZERO));
    }

    #[test]
    fn test_mirrored_leg() {
        let outbound = NormalizedMovement {
            customer: CustomerId::new("C-1"),
            account: AccountId::new("A-1"),
            transfer_customer: Some(CustomerId::new("C-2")),
            transfer_account: Some(AccountId::new("A-2")),
            concept: Concept::Transfer,
            movement_type: MovementType::Charge,
            amount: Decimal::new(-5000, 2),
            observations: String::new(),
        };

        let inbound = outbound.mirrored("in".to_string()).unwrap();
        assert_eq!(inbound.account, AccountId::new("A-2"));
        assert_eq!(inbound.customer, CustomerId::new("C-2"));
        assert_eq!(inbound.transfer_account, Some(AccountId::new("A-1")));
        assert_eq!(inbound.transfer_customer, Some(CustomerId::new("C-1")));
        assert_eq!(inbound.movement_type, MovementType::Payment);
        assert_eq!(inbound.amount, Decimal::new(5000, 2));
    }

    #[test]
    fn test_movement_wire_names() {
        let intent: MovementIntent = serde_json::from_str(
            r#"{"concept":"RT","customer":"78345212","account":"78345212-653","amount":"30.00"}"#,
        )
        .unwrap();
        assert_eq!(intent.concept.as_deref(), Some("RT"));
        assert_eq!(intent.amount, Some(Decimal::new(3000, 2)));
        assert_eq!(intent.transfer_account, None);
    }
}
