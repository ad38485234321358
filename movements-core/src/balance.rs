//! Balance evaluation
//!
//! Balances are never stored. They are recomputed from the movements on
//! record every time, as a pure sum over an explicit snapshot.

use crate::store::MovementStore;
use crate::types::{AccountId, CustomerId, Movement};
use crate::{Error, Result};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Sum of signed amounts. Order-independent; empty is zero.
///
/// `None` if the running total leaves the `Decimal` range.
pub fn sum_amounts<'a>(movements: impl IntoIterator<Item = &'a Movement>) -> Option<Decimal> {
    movements
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, movement| acc.checked_add(movement.amount))
}

/// Computes current balances from the store
pub struct BalanceEvaluator<S> {
    store: Arc<S>,
}

impl<S> Clone for BalanceEvaluator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> std::fmt::Debug for BalanceEvaluator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceEvaluator").finish_non_exhaustive()
    }
}

impl<S: MovementStore> BalanceEvaluator<S> {
    /// Create new evaluator
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Current balance of `account`, optionally scoped to one customer
    pub async fn current_balance(
        &self,
        account: &AccountId,
        customer: Option<&CustomerId>,
    ) -> Result<Decimal> {
        let movements = match customer {
            Some(customer) => {
                self.store
                    .find_by_customer_and_account(customer, account)
                    .await?
            }
            None => self.store.find_by_account(account).await?,
        };

        sum_amounts(&movements)
            .ok_or_else(|| Error::Overflow(format!("balance of account {} out of range", account)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::{Concept, MovementType};
    use uuid::Uuid;

    fn movement(customer: &str, account: &str, cents: i64) -> Movement {
        let movement_type = if cents < 0 {
            MovementType::Charge
        } else {
            MovementType::Payment
        };
        Movement {
            id: Uuid::now_v7(),
            reference: format!("{}-{}", customer, Uuid::now_v7()),
            customer: CustomerId::new(customer),
            account: AccountId::new(account),
            transfer_customer: None,
            transfer_account: None,
            concept: Concept::Deposit,
            movement_type,
            amount: Decimal::new(cents, 2),
            date: "01-01-2024".to_string(),
            time: "10:00:00".to_string(),
            observations: String::new(),
            correct: true,
            transfer_id: None,
        }
    }

    #[test]
    fn test_sum_is_exact() {
        // 0.10 added a thousand times is exactly 100.00
        let movements: Vec<Movement> = (0..1000).map(|_| movement("C-1", "A-1", 10)).collect();
        assert_eq!(sum_amounts(&movements), Some(Decimal::new(10000, 2)));
        assert_eq!(sum_amounts(&Vec::new()), Some(Decimal::ZERO));
    }

    #[test]
    fn test_sum_out_of_range() {
        let mut big = movement("C-1", "A-1", 1);
        big.amount = Decimal::MAX;
        let movements = vec![big.clone(), big];
        assert_eq!(sum_amounts(&movements), None);
    }

    #[tokio::test]
    async fn test_current_balance() {
        let store = Arc::new(InMemoryStore::new());
        store.append(movement("C-1", "A-1", 10000)).await.unwrap();
        store.append(movement("C-1", "A-1", -3000)).await.unwrap();
        store.append(movement("C-2", "A-1", 500)).await.unwrap();
        store.append(movement("C-1", "A-2", 999)).await.unwrap();

        let evaluator = BalanceEvaluator::new(store);
        let account = AccountId::new("A-1");

        assert_eq!(
            evaluator.current_balance(&account, None).await.unwrap(),
            Decimal::new(7500, 2)
        );
        assert_eq!(
            evaluator
                .current_balance(&account, Some(&CustomerId::new("C-1")))
                .await
                .unwrap(),
            Decimal::new(7000, 2)
        );
        assert_eq!(
            evaluator
                .current_balance(&AccountId::new("A-9"), None)
                .await
                .unwrap(),
            Decimal::ZERO
        );
    }
}
