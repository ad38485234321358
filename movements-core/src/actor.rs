//! Per-account serialization of ledger writes
//!
//! Every mutation of an account goes through the single-writer actor that
//! owns it. Accounts are hashed onto a fixed set of writers; each writer
//! drains its mailbox one message at a time, so the balance read and the
//! append for one account can never interleave with another write to the
//! same account.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │            AccountWriters (Clone handle)              │
//! │     hash(account) % shards  →  writer mailbox         │
//! └───────────┬──────────────────┬───────────────────────┘
//!             │                  │   mpsc::channel (bounded)
//!             ▼                  ▼
//! ┌──────────────────┐  ┌──────────────────┐
//! │  AccountWriter 0 │  │  AccountWriter N │   one task each
//! │  read balance    │  │  read balance    │
//! │  check ≥ 0       │  │  check ≥ 0       │
//! │  append          │  │  append          │
//! └────────┬─────────┘  └────────┬─────────┘
//!          └──────────┬──────────┘
//!                     ▼
//!               LedgerStore
//! ```
//!
//! A message already in a mailbox is processed even if the caller stops
//! waiting for the answer, so a write is either fully done or never started.

use crate::balance::sum_amounts;
use crate::config::WriterConfig;
use crate::error::{Rejection, StoreError};
use crate::factory::MovementFactory;
use crate::metrics::Metrics;
use crate::saga::{TransferSaga, TransferState};
use crate::store::LedgerStore;
use crate::types::{AccountId, Movement, MovementOutcome};
use crate::validation::MovementValidator;
use crate::{Error, Result};
use rust_decimal::Decimal;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Result of committing a transfer's charge leg
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    /// Charge on record; saga is `ChargeCommitted`
    Committed(TransferSaga),
    /// Nothing written
    Rejected(Rejection),
}

/// Message sent to an account writer
#[derive(Debug)]
pub enum WriterMessage {
    /// Check the balance and append if it stays non-negative
    AppendChecked {
        movement: Movement,
        response: oneshot::Sender<Result<MovementOutcome>>,
    },

    /// Append without a balance check (credits only)
    AppendCredit {
        movement: Movement,
        response: oneshot::Sender<Result<Movement>>,
    },

    /// Balance-check and write the charge leg of a transfer, persisting
    /// the saga before and after the append
    CommitCharge {
        saga: TransferSaga,
        response: oneshot::Sender<Result<ChargeOutcome>>,
    },

    /// Settle a saga left at `BalanceChecked` by a crash
    ResolveUncommitted {
        transfer_id: Uuid,
        response: oneshot::Sender<Result<Option<TransferSaga>>>,
    },

    /// Replace a movement
    Update {
        id: Uuid,
        movement: Movement,
        response: oneshot::Sender<Result<MovementOutcome>>,
    },

    /// Remove a movement
    Delete {
        id: Uuid,
        response: oneshot::Sender<Result<MovementOutcome>>,
    },

    /// Shutdown writer
    Shutdown,
}

/// Actor that owns the writes of a subset of accounts
pub struct AccountWriter<S> {
    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<WriterMessage>,

    /// State shared by every message handler
    core: WriterCore<S>,
}

struct WriterCore<S> {
    /// Shard index
    shard: usize,

    /// Storage backend
    store: Arc<S>,

    /// Re-stamps references on collision
    factory: MovementFactory,

    /// Checks corrections
    validator: MovementValidator,

    /// Attempts at a fresh reference before giving up
    reference_attempts: u32,

    /// Metrics
    metrics: Metrics,
}

impl<S> std::fmt::Debug for AccountWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountWriter")
            .field("shard", &self.core.shard)
            .finish_non_exhaustive()
    }
}

impl<S: LedgerStore> AccountWriter<S> {
    /// Run the actor event loop
    pub async fn run(self) {
        let AccountWriter { mut mailbox, core } = self;

        while let Some(msg) = mailbox.recv().await {
            match msg {
                WriterMessage::Shutdown => break,
                msg => core.handle_message(msg).await,
            }
        }
        tracing::debug!(shard = core.shard, "Account writer stopped");
    }
}

impl<S: LedgerStore> WriterCore<S> {
    /// Handle a single message
    async fn handle_message(&self, msg: WriterMessage) {
        match msg {
            WriterMessage::AppendChecked { movement, response } => {
                let result = self.append_checked(movement).await;
                let _ = response.send(result);
            }

            WriterMessage::AppendCredit { movement, response } => {
                let result = self.append_fresh(movement).await;
                let _ = response.send(result);
            }

            WriterMessage::CommitCharge { saga, response } => {
                let result = self.commit_charge(saga).await;
                let _ = response.send(result);
            }

            WriterMessage::ResolveUncommitted {
                transfer_id,
                response,
            } => {
                let result = self.resolve_uncommitted(transfer_id).await;
                let _ = response.send(result);
            }

            WriterMessage::Update {
                id,
                movement,
                response,
            } => {
                let result = self.update(id, movement).await;
                let _ = response.send(result);
            }

            WriterMessage::Delete { id, response } => {
                let result = self.delete(id).await;
                let _ = response.send(result);
            }

            WriterMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    async fn balance(&self, account: &AccountId) -> Result<Decimal> {
        let movements = self.store.find_by_account(account).await?;
        sum_amounts(&movements)
            .ok_or_else(|| Error::Overflow(format!("balance of account {} out of range", account)))
    }

    /// Rejection if applying `delta` to the account would overdraw it
    /// or take its balance out of range
    async fn overdraft(&self, account: &AccountId, delta: Decimal) -> Result<Option<Rejection>> {
        let balance = self.balance(account).await?;
        let Some(after) = balance.checked_add(delta) else {
            tracing::warn!(
                account = %account,
                balance = %balance,
                requested = %delta,
                "Movement would take the balance out of range"
            );
            return Ok(Some(Rejection::BalanceOverflow {
                account: account.clone(),
                balance,
                requested: delta,
            }));
        };
        if after < Decimal::ZERO {
            tracing::info!(
                account = %account,
                balance = %balance,
                requested = %delta,
                "Movement exceeds available balance"
            );
            return Ok(Some(Rejection::InsufficientBalance {
                account: account.clone(),
                balance,
                requested: delta,
            }));
        }
        Ok(None)
    }

    async fn append_checked(&self, movement: Movement) -> Result<MovementOutcome> {
        if let Some(rejection) = self.overdraft(&movement.account, movement.amount).await? {
            return Ok(MovementOutcome::Rejected(rejection));
        }
        let movement = self.append_fresh(movement).await?;
        Ok(MovementOutcome::Accepted(movement))
    }

    /// Append, drawing a new reference suffix on collision
    async fn append_fresh(&self, mut movement: Movement) -> Result<Movement> {
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            match self.store.append(movement.clone()).await {
                Ok(stored) => {
                    self.metrics
                        .record_append_duration(started.elapsed().as_secs_f64());
                    return Ok(stored);
                }
                Err(StoreError::DuplicateReference(reference))
                    if attempt < self.reference_attempts =>
                {
                    tracing::warn!(
                        reference = %reference,
                        attempt,
                        "Reference collision, drawing a new suffix"
                    );
                    self.metrics.record_reference_collision();
                    self.factory.restamp_reference(&mut movement);
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn commit_charge(&self, mut saga: TransferSaga) -> Result<ChargeOutcome> {
        let charge = &saga.charge;
        if let Some(rejection) = self.overdraft(&charge.account, charge.amount).await? {
            saga.advance(TransferState::Rejected)?;
            return Ok(ChargeOutcome::Rejected(rejection));
        }

        saga.advance(TransferState::BalanceChecked)?;
        self.store.put_saga(&saga).await?;

        match self.append_fresh(saga.charge.clone()).await {
            Ok(stored) => {
                saga.charge = stored;
                saga.advance(TransferState::ChargeCommitted)?;
                if let Err(err) = self.store.put_saga(&saga).await {
                    // The charge is on record, so the payment leg must still run
                    tracing::warn!(
                        transfer_id = %saga.transfer_id,
                        error = %err,
                        "Could not persist committed charge; continuing with payment leg"
                    );
                }
                Ok(ChargeOutcome::Committed(saga))
            }
            Err(err) => {
                // Charge never landed; close the saga so recovery skips it
                saga.last_error = Some(err.to_string());
                saga.advance(TransferState::Rejected)?;
                if let Err(put_err) = self.store.put_saga(&saga).await {
                    tracing::warn!(
                        transfer_id = %saga.transfer_id,
                        error = %put_err,
                        "Could not close saga; recovery will resolve it"
                    );
                }
                Err(err)
            }
        }
    }

    async fn resolve_uncommitted(&self, transfer_id: Uuid) -> Result<Option<TransferSaga>> {
        let Some(mut saga) = self.store.get_saga(transfer_id).await? else {
            return Ok(None);
        };
        if saga.state != TransferState::BalanceChecked {
            return Ok(Some(saga));
        }

        match self.store.find_by_id(saga.charge.id).await? {
            Some(stored) => {
                tracing::info!(transfer_id = %transfer_id, "Charge leg found on record");
                saga.charge = stored;
                saga.advance(TransferState::ChargeCommitted)?;
            }
            None => {
                tracing::info!(transfer_id = %transfer_id, "Charge leg never written, closing");
                saga.last_error = Some("charge leg not on record after restart".to_string());
                saga.advance(TransferState::Rejected)?;
            }
        }
        self.store.put_saga(&saga).await?;
        Ok(Some(saga))
    }

    async fn update(&self, id: Uuid, movement: Movement) -> Result<MovementOutcome> {
        let existing = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(StoreError::MovementNotFound(id))?;

        if let Err(err) = self.validator.validate_update(&existing, &movement) {
            return Ok(MovementOutcome::Rejected(err.into()));
        }

        let Some(delta) = movement.amount.checked_sub(existing.amount) else {
            return Ok(MovementOutcome::Rejected(Rejection::BalanceOverflow {
                account: existing.account.clone(),
                balance: self.balance(&existing.account).await?,
                requested: movement.amount,
            }));
        };
        if let Some(rejection) = self.overdraft(&existing.account, delta).await? {
            return Ok(MovementOutcome::Rejected(rejection));
        }

        let updated = self.store.update(id, movement).await?;
        tracing::info!(movement_id = %id, account = %updated.account, "Movement updated");
        Ok(MovementOutcome::Accepted(updated))
    }

    async fn delete(&self, id: Uuid) -> Result<MovementOutcome> {
        let existing = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(StoreError::MovementNotFound(id))?;

        if let Some(rejection) = self.overdraft(&existing.account, -existing.amount).await? {
            return Ok(MovementOutcome::Rejected(rejection));
        }

        self.store.delete(id).await?;
        tracing::info!(movement_id = %id, account = %existing.account, "Movement deleted");
        Ok(MovementOutcome::Accepted(existing))
    }
}

/// Handle for sending messages to the account writers
pub struct AccountWriters {
    shards: Arc<Vec<mpsc::Sender<WriterMessage>>>,
}

impl Clone for AccountWriters {
    fn clone(&self) -> Self {
        Self {
            shards: Arc::clone(&self.shards),
        }
    }
}

impl std::fmt::Debug for AccountWriters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountWriters")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl AccountWriters {
    /// Number of writers
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Writer index owning `account`
    pub fn shard_for(&self, account: &AccountId) -> usize {
        let mut hasher = DefaultHasher::new();
        account.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    async fn request<T>(
        &self,
        account: &AccountId,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> WriterMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.shards[self.shard_for(account)]
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Writer mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Balance-check and append a movement on its account
    pub async fn append_checked(&self, movement: Movement) -> Result<MovementOutcome> {
        let account = movement.account.clone();
        self.request(&account, |response| WriterMessage::AppendChecked {
            movement,
            response,
        })
        .await
    }

    /// Append a credit on its account without a balance check
    pub async fn append_credit(&self, movement: Movement) -> Result<Movement> {
        let account = movement.account.clone();
        self.request(&account, |response| WriterMessage::AppendCredit {
            movement,
            response,
        })
        .await
    }

    /// Commit a transfer's charge leg on the source account
    pub async fn commit_charge(&self, saga: TransferSaga) -> Result<ChargeOutcome> {
        let account = saga.charge.account.clone();
        self.request(&account, |response| WriterMessage::CommitCharge { saga, response })
            .await
    }

    /// Settle a saga stuck at `BalanceChecked`
    pub async fn resolve_uncommitted(
        &self,
        source: &AccountId,
        transfer_id: Uuid,
    ) -> Result<Option<TransferSaga>> {
        self.request(source, |response| WriterMessage::ResolveUncommitted {
            transfer_id,
            response,
        })
        .await
    }

    /// Replace a movement on `account`
    pub async fn update(
        &self,
        account: &AccountId,
        id: Uuid,
        movement: Movement,
    ) -> Result<MovementOutcome> {
        self.request(account, |response| WriterMessage::Update {
            id,
            movement,
            response,
        })
        .await
    }

    /// Remove a movement from `account`
    pub async fn delete(&self, account: &AccountId, id: Uuid) -> Result<MovementOutcome> {
        self.request(account, |response| WriterMessage::Delete { id, response })
            .await
    }

    /// Shutdown all writers
    pub async fn shutdown(&self) -> Result<()> {
        for shard in self.shards.iter() {
            shard
                .send(WriterMessage::Shutdown)
                .await
                .map_err(|_| Error::Concurrency("Writer mailbox closed".to_string()))?;
        }
        Ok(())
    }
}

/// Spawn the account writers
pub fn spawn_account_writers<S: LedgerStore>(
    store: Arc<S>,
    config: &WriterConfig,
    factory: MovementFactory,
    validator: MovementValidator,
    reference_attempts: u32,
    metrics: Metrics,
) -> AccountWriters {
    let shards = (0..config.shards.max(1))
        .map(|shard| {
            // Bounded channel for backpressure
            let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
            let writer = AccountWriter {
                mailbox: rx,
                core: WriterCore {
                    shard,
                    store: Arc::clone(&store),
                    factory: factory.clone(),
                    validator: validator.clone(),
                    reference_attempts: reference_attempts.max(1),
                    metrics: metrics.clone(),
                },
            };

            tokio::spawn(async move {
                writer.run().await;
            });

            tx
        })
        .collect();

    AccountWriters {
        shards: Arc::new(shards),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, MovementStore, SagaStore};
    use crate::types::{Concept, CustomerId, MovementType};

    fn writers(store: Arc<InMemoryStore>) -> AccountWriters {
        spawn_account_writers(
            store,
            &WriterConfig::default(),
            MovementFactory::default(),
            MovementValidator::default(),
            3,
            Metrics::new().unwrap(),
        )
    }

    fn movement(account: &str, reference: &str, cents: i64) -> Movement {
        let movement_type = if cents < 0 {
            MovementType::Charge
        } else {
            MovementType::Payment
        };
        Movement {
            id: Uuid::now_v7(),
            reference: reference.to_string(),
            customer: CustomerId::new("C-1"),
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
    async fn test_writer_spawn_and_shutdown() {
        let handle = writers(Arc::new(InMemoryStore::new()));
        assert_eq!(handle.shard_count(), 16);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_checked_append_refuses_overdraft() {
        let store = Arc::new(InMemoryStore::new());
        let handle = writers(store.clone());

        let outcome = handle
            .append_checked(movement("A-1", "C-1-000001", -100))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            MovementOutcome::Rejected(Rejection::InsufficientBalance { .. })
        ));
        assert!(store.is_empty());

        handle.append_checked(movement("A-1", "C-1-000002", 500)).await.unwrap();
        let outcome = handle
            .append_checked(movement("A-1", "C-1-000003", -500))
            .await
            .unwrap();
        assert!(outcome.is_accepted());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reference_collision_is_restamped() {
        let store = Arc::new(InMemoryStore::new());
        let handle = writers(store.clone());

        handle.append_credit(movement("A-1", "C-1-000001", 100)).await.unwrap();
        let second = handle
            .append_credit(movement("A-1", "C-1-000001", 100))
            .await
            .unwrap();

        assert_ne!(second.reference, "C-1-000001");
        assert!(second.reference.starts_with("C-1-"));
        assert_eq!(store.len(), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_cannot_overdraw() {
        let store = Arc::new(InMemoryStore::new());
        let handle = writers(store.clone());

        let deposit = handle
            .append_credit(movement("A-1", "C-1-000001", 1000))
            .await
            .unwrap();
        handle
            .append_checked(movement("A-1", "C-1-000002", -800))
            .await
            .unwrap();

        let outcome = handle.delete(&deposit.account, deposit.id).await.unwrap();
        assert!(!outcome.is_accepted());
        assert!(store.find_by_id(deposit.id).await.unwrap().is_some());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_uncommitted_without_charge() {
        let store = Arc::new(InMemoryStore::new());
        let handle = writers(store.clone());

        let mut saga = TransferSaga::new(
            crate::saga::TransferKind::ThirdParty,
            movement("A-1", "C-1-000001", -100),
            movement("A-2", "C-2-000002", 100),
        );
        saga.advance(TransferState::BalanceChecked).unwrap();
        store.put_saga(&saga).await.unwrap();

        let resolved = handle
            .resolve_uncommitted(&AccountId::new("A-1"), saga.transfer_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.state, TransferState::Rejected);
        assert!(store.find_open_sagas().await.unwrap().is_empty());

        handle.shutdown().await.unwrap();
    }
}
