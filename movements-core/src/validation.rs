//! Validation of movement requests
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. Concept present and known
//! 2. Customer present
//! 3. Account present
//! 4. Transfers: destination account and beneficiary present, accounts differ
//! 5. Amount present, non-zero, within the ledger scale and ceiling
//!
//! After the checks pass the movement type and the sign of the amount are
//! derived from the concept. The caller's sign is never trusted.

use crate::config::LedgerConfig;
use crate::error::ValidationError;
use crate::types::{
    AccountId, Concept, CustomerId, Movement, MovementIntent, MovementType, NormalizedMovement,
};
use rust_decimal::Decimal;

/// Validator for movement intents
#[derive(Debug, Clone)]
pub struct MovementValidator {
    /// Maximum decimal places on an amount
    amount_scale: u32,

    /// Largest accepted amount magnitude
    max_amount: Decimal,
}

impl Default for MovementValidator {
    fn default() -> Self {
        let ledger = LedgerConfig::default();
        Self::new(ledger.amount_scale, ledger.max_amount)
    }
}

impl MovementValidator {
    /// Create new validator
    pub fn new(amount_scale: u32, max_amount: Decimal) -> Self {
        Self {
            amount_scale,
            max_amount,
        }
    }

    /// Validate an intent and derive its canonical type and sign
    pub fn validate(&self, intent: &MovementIntent) -> Result<NormalizedMovement, ValidationError> {
        // 1. Concept
        let code = present(&intent.concept).ok_or(ValidationError::MissingConcept)?;
        let concept = Concept::from_code(code)
            .ok_or_else(|| ValidationError::UnknownConcept(code.to_string()))?;

        // 2. Customer
        let customer = present(&intent.customer)
            .map(CustomerId::new)
            .ok_or(ValidationError::MissingCustomer)?;

        // 3. Account
        let account = present(&intent.account)
            .map(AccountId::new)
            .ok_or(ValidationError::MissingAccount)?;

        // 4. Counterpart
        let (transfer_customer, transfer_account) = match concept {
            Concept::Transfer => {
                let transfer_account = present(&intent.transfer_account)
                    .map(AccountId::new)
                    .ok_or(ValidationError::MissingTransferAccount)?;
                let transfer_customer = present(&intent.transfer_customer)
                    .map(CustomerId::new)
                    .ok_or(ValidationError::MissingTransferCustomer)?;
                if transfer_account == account {
                    return Err(ValidationError::SameAccountTransfer(account));
                }
                (Some(transfer_customer), Some(transfer_account))
            }
            Concept::Deposit | Concept::Withdrawal => (None, None),
        };

        // 5. Amount
        let raw = intent.amount.ok_or(ValidationError::MissingAmount)?;
        if raw.is_zero() {
            return Err(ValidationError::ZeroAmount);
        }
        if raw.normalize().scale() > self.amount_scale {
            return Err(ValidationError::ExcessPrecision {
                amount: raw,
                scale: self.amount_scale,
            });
        }
        if raw.abs() > self.max_amount {
            return Err(ValidationError::AmountTooLarge {
                amount: raw,
                max: self.max_amount,
            });
        }

        let movement_type = concept.movement_type();
        let amount = movement_type.signed(raw);
        let observations = describe(concept, movement_type, amount.abs(), transfer_account.as_ref());

        Ok(NormalizedMovement {
            customer,
            account,
            transfer_customer,
            transfer_account,
            concept,
            movement_type,
            amount,
            observations,
        })
    }

    /// Validate an intent for the single-leg create path.
    ///
    /// Besides [`validate`](Self::validate), an explicit movement type code
    /// must exist and agree with the concept, and transfers are refused.
    pub fn validate_direct(
        &self,
        intent: &MovementIntent,
    ) -> Result<NormalizedMovement, ValidationError> {
        let normalized = self.validate(intent)?;

        if let Some(code) = present(&intent.movement_type) {
            let supplied = MovementType::from_code(code)
                .ok_or_else(|| ValidationError::UnknownMovementType(code.to_string()))?;
            if supplied != normalized.movement_type {
                return Err(ValidationError::MovementTypeMismatch {
                    concept: normalized.concept.code().to_string(),
                    supplied: code.to_string(),
                });
            }
        }

        if normalized.concept == Concept::Transfer {
            return Err(ValidationError::TransferNotDirect);
        }

        Ok(normalized.without_transfer_fields())
    }

    /// Check a bookkeeping correction against the record it replaces
    pub fn validate_update(
        &self,
        existing: &Movement,
        updated: &Movement,
    ) -> Result<(), ValidationError> {
        if updated.account != existing.account {
            return Err(ValidationError::AccountReassignment {
                from: existing.account.clone(),
                to: updated.account.clone(),
            });
        }
        if updated.amount.normalize().scale() > self.amount_scale {
            return Err(ValidationError::ExcessPrecision {
                amount: updated.amount,
                scale: self.amount_scale,
            });
        }
        if updated.amount.abs() > self.max_amount {
            return Err(ValidationError::AmountTooLarge {
                amount: updated.amount,
                max: self.max_amount,
            });
        }
        if !updated.movement_type.agrees_with(updated.amount) {
            return Err(ValidationError::SignMismatch {
                amount: updated.amount,
                movement_type: updated.movement_type.code().to_string(),
            });
        }
        Ok(())
    }
}

/// Synthesize the observations text for a movement
pub fn describe(
    concept: Concept,
    movement_type: MovementType,
    magnitude: Decimal,
    counterpart: Option<&AccountId>,
) -> String {
    match (concept, movement_type, counterpart) {
        (Concept::Deposit, _, _) => format!("Deposit of {}", magnitude),
        (Concept::Withdrawal, _, _) => format!("Withdrawal of {}", magnitude),
        (Concept::Transfer, MovementType::Charge, Some(account)) => {
            format!("Transfer of {} to account {}", magnitude, account)
        }
        (Concept::Transfer, MovementType::Payment, Some(account)) => {
            format!("Transfer of {} from account {}", magnitude, account)
        }
        (Concept::Transfer, _, None) => format!("Transfer of {}", magnitude),
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
