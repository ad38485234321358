//! Ledger store seam
//!
//! The ledger treats persistence as an append/query collaborator. Two traits
//! describe it:
//!
//! - [`MovementStore`] - movement records, filtered retrieval, corrections
//! - [`SagaStore`] - transfer saga records kept alongside the movements
//!
//! Returned sequences carry no ordering guarantee; callers must not depend
//! on order. [`InMemoryStore`] is the reference implementation; the
//! RocksDB-backed store lives in [`crate::storage`] behind the `rocksdb`
//! feature.

use crate::error::{StoreError, StoreResult};
use crate::saga::TransferSaga;
use crate::types::{AccountId, CustomerId, Movement};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Durable, queryable collection of movements
#[async_trait]
pub trait MovementStore: Send + Sync + 'static {
    /// Append a new movement. Fails on a duplicate id or reference.
    async fn append(&self, movement: Movement) -> StoreResult<Movement>;

    /// All movements on record
    async fn find_all(&self) -> StoreResult<Vec<Movement>>;

    /// Movements recorded against an account
    async fn find_by_account(&self, account: &AccountId) -> StoreResult<Vec<Movement>>;

    /// Movements recorded against a customer
    async fn find_by_customer(&self, customer: &CustomerId) -> StoreResult<Vec<Movement>>;

    /// Movements recorded against a customer's account
    async fn find_by_customer_and_account(
        &self,
        customer: &CustomerId,
        account: &AccountId,
    ) -> StoreResult<Vec<Movement>>;

    /// Movement by id
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Movement>>;

    /// Replace the movement stored under `id`
    async fn update(&self, id: Uuid, movement: Movement) -> StoreResult<Movement>;

    /// Remove the movement stored under `id`
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
}

/// Persistence for transfer sagas
#[async_trait]
pub trait SagaStore: Send + Sync + 'static {
    /// Insert or replace a saga record
    async fn put_saga(&self, saga: &TransferSaga) -> StoreResult<()>;

    /// Saga by id
    async fn get_saga(&self, transfer_id: Uuid) -> StoreResult<Option<TransferSaga>>;

    /// Sagas that still need work
    async fn find_open_sagas(&self) -> StoreResult<Vec<TransferSaga>>;
}

/// Everything the ledger needs from persistence
pub trait LedgerStore: MovementStore + SagaStore {}

impl<T: MovementStore + SagaStore> LedgerStore for T {}

#[derive(Default)]
struct Movements {
    by_id: HashMap<Uuid, Movement>,
    by_account: HashMap<AccountId, HashSet<Uuid>>,
    references: HashMap<String, Uuid>,
}

impl Movements {
    fn insert(&mut self, movement: Movement) {
        self.by_account
            .entry(movement.account.clone())
            .or_default()
            .insert(movement.id);
        self.references.insert(movement.reference.clone(), movement.id);
        self.by_id.insert(movement.id, movement);
    }

    fn remove(&mut self, id: Uuid) -> Option<Movement> {
        let movement = self.by_id.remove(&id)?;
        if let Some(ids) = self.by_account.get_mut(&movement.account) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_account.remove(&movement.account);
            }
        }
        self.references.remove(&movement.reference);
        Some(movement)
    }

    fn account(&self, account: &AccountId) -> impl Iterator<Item = &Movement> {
        self.by_account
            .get(account)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
    }
}

/// In-process store
#[derive(Default)]
pub struct InMemoryStore {
    movements: RwLock<Movements>,
    sagas: DashMap<Uuid, TransferSaga>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of movements on record
    pub fn len(&self) -> usize {
        self.movements.read().by_id.len()
    }

    /// True if no movements are on record
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("movements", &self.len())
            .field("sagas", &self.sagas.len())
            .finish()
    }
}

#[async_trait]
impl MovementStore for InMemoryStore {
    async fn append(&self, movement: Movement) -> StoreResult<Movement> {
        let mut movements = self.movements.write();

        if movements.by_id.contains_key(&movement.id) {
            return Err(StoreError::DuplicateId(movement.id));
        }
        if movements.references.contains_key(&movement.reference) {
            return Err(StoreError::DuplicateReference(movement.reference));
        }

        movements.insert(movement.clone());

        tracing::debug!(
            movement_id = %movement.id,
            account = %movement.account,
            amount = %movement.amount,
            "Movement appended"
        );

        Ok(movement)
    }

    async fn find_all(&self) -> StoreResult<Vec<Movement>> {
        Ok(self.movements.read().by_id.values().cloned().collect())
    }

    async fn find_by_account(&self, account: &AccountId) -> StoreResult<Vec<Movement>> {
        Ok(self.movements.read().account(account).cloned().collect())
    }

    async fn find_by_customer(&self, customer: &CustomerId) -> StoreResult<Vec<Movement>> {
        Ok(self
            .movements
            .read()
            .by_id
            .values()
            .filter(|m| &m.customer == customer)
            .cloned()
            .collect())
    }

    async fn find_by_customer_and_account(
        &self,
        customer: &CustomerId,
        account: &AccountId,
    ) -> StoreResult<Vec<Movement>> {
        Ok(self
            .movements
            .read()
            .account(account)
            .filter(|m| &m.customer == customer)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Movement>> {
        Ok(self.movements.read().by_id.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, mut movement: Movement) -> StoreResult<Movement> {
        movement.id = id;
        let mut movements = self.movements.write();

        if !movements.by_id.contains_key(&id) {
            return Err(StoreError::MovementNotFound(id));
        }
        if let Some(owner) = movements.references.get(&movement.reference) {
            if *owner != id {
                return Err(StoreError::DuplicateReference(movement.reference));
            }
        }

        movements.remove(id);
        movements.insert(movement.clone());
        Ok(movement)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.movements
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::MovementNotFound(id))
    }
}

#[async_trait]
impl SagaStore for InMemoryStore {
    async fn put_saga(&self, saga: &TransferSaga) -> StoreResult<()> {
        self.sagas.insert(saga.transfer_id, saga.clone());
        Ok(())
    }

    async fn get_saga(&self, transfer_id: Uuid) -> StoreResult<Option<TransferSaga>> {
        Ok(self.sagas.get(&transfer_id).map(|entry| entry.value().clone()))
    }

    async fn find_open_sagas(&self) -> StoreResult<Vec<TransferSaga>> {
        Ok(self
            .sagas
            .iter()
            .filter(|entry| entry.state.is_open())
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Concept, MovementType};
    use rust_decimal::Decimal;

    fn movement(customer: &str, account: &str, reference: &str, cents: i64) -> Movement {
        let movement_type = if cents < 0 {
            MovementType::Charge
        } else {
            MovementType::Payment
        };
        Movement {
            id: Uuid::now_v7(),
            reference: reference.to_string(),
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

    #[tokio::test]
    async fn test_append_and_filters() {
        let store = InMemoryStore::new();
        store.append(movement("C-1", "A-1", "C-1-000001", 100)).await.unwrap();
        store.append(movement("C-1", "A-2", "C-1-000002", 200)).await.unwrap();
        store.append(movement("C-2", "A-1", "C-2-000003", 300)).await.unwrap();

        assert_eq!(store.find_all().await.unwrap().len(), 3);
        assert_eq!(store.find_by_account(&AccountId::new("A-1")).await.unwrap().len(), 2);
        assert_eq!(store.find_by_customer(&CustomerId::new("C-1")).await.unwrap().len(), 2);
        assert_eq!(
            store
                .find_by_customer_and_account(&CustomerId::new("C-2"), &AccountId::new("A-1"))
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(store.find_by_account(&AccountId::new("A-9")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_rejected() {
        let store = InMemoryStore::new();
        let first = movement("C-1", "A-1", "C-1-000001", 100);
        store.append(first.clone()).await.unwrap();

        assert_eq!(
            store.append(first.clone()).await,
            Err(StoreError::DuplicateId(first.id))
        );

        let same_reference = movement("C-1", "A-1", "C-1-000001", 500);
        assert_eq!(
            store.append(same_reference).await,
            Err(StoreError::DuplicateReference("C-1-000001".to_string()))
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = InMemoryStore::new();
        let original = store.append(movement("C-1", "A-1", "C-1-000001", 100)).await.unwrap();

        let mut corrected = original.clone();
        corrected.amount = Decimal::new(150, 2);
        corrected.id = Uuid::nil(); // id comes from the path
        let updated = store.update(original.id, corrected).await.unwrap();
        assert_eq!(updated.id, original.id);
        assert_eq!(
            store.find_by_id(original.id).await.unwrap().unwrap().amount,
            Decimal::new(150, 2)
        );

        store.delete(original.id).await.unwrap();
        assert!(store.find_by_id(original.id).await.unwrap().is_none());
        assert!(store.find_by_account(&AccountId::new("A-1")).await.unwrap().is_empty());
        assert_eq!(
            store.delete(original.id).await,
            Err(StoreError::MovementNotFound(original.id))
        );
    }
}
