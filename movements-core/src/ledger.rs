//! Movements ledger facade
//!
//! This module ties together validation, stamping, the account writers and
//! the transfer orchestrator into the API the presentation layer calls.
//!
//! # Example
//!
//! ```no_run
//! use movements_core::{Config, InMemoryStore, MovementIntent, MovementLedger};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> movements_core::Result<()> {
//!     let ledger = MovementLedger::open(Config::default(), Arc::new(InMemoryStore::new())).await?;
//!
//!     let intent = MovementIntent::deposit("78345212", "78345212-653", Decimal::new(10000, 2));
//!     let outcome = ledger.create_movement(intent).await?;
//!     assert!(outcome.is_accepted());
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_account_writers, AccountWriters},
    balance::BalanceEvaluator,
    factory::MovementFactory,
    metrics::Metrics,
    retry::RetryStrategy,
    saga::{TransferKind, TransferSaga},
    store::LedgerStore,
    transfer::{RecoveryReport, TransferOrchestrator, TransferRequest},
    types::{AccountId, CustomerId, Movement, MovementIntent, MovementOutcome},
    validation::MovementValidator,
    Config, Error, Result, StoreError,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
pub struct MovementLedger<S> {
    /// Direct store access (for reads)
    store: Arc<S>,

    /// Handle to the per-account writers
    writers: AccountWriters,

    validator: MovementValidator,
    factory: MovementFactory,
    balances: BalanceEvaluator<S>,
    transfers: TransferOrchestrator<S>,
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl<S> std::fmt::Debug for MovementLedger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MovementLedger")
            .field("service", &self.config.service_name)
            .field("writers", &self.writers)
            .finish()
    }
}

impl<S: LedgerStore> MovementLedger<S> {
    /// Open ledger with configuration over `store`
    ///
    /// Spawns the account writers, so this must run inside a tokio runtime.
    pub async fn open(config: Config, store: Arc<S>) -> Result<Self> {
        config.validate()?;

        let factory = MovementFactory::new(config.ledger.display_utc_offset_secs).ok_or_else(
            || {
                Error::Config(format!(
                    "display_utc_offset_secs out of range: {}",
                    config.ledger.display_utc_offset_secs
                ))
            },
        )?;
        let validator =
            MovementValidator::new(config.ledger.amount_scale, config.ledger.max_amount);
        let metrics = Metrics::new()
            .map_err(|e| Error::Other(format!("Failed to create metrics: {}", e)))?;

        let writers = spawn_account_writers(
            store.clone(),
            &config.writers,
            factory.clone(),
            validator.clone(),
            config.ledger.reference_attempts,
            metrics.clone(),
        );

        let transfers = TransferOrchestrator::new(
            store.clone(),
            writers.clone(),
            validator.clone(),
            factory.clone(),
            RetryStrategy::new(config.retry.clone()),
            metrics.clone(),
        );

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            writers = writers.shard_count(),
            "Movements ledger opened"
        );

        Ok(Self {
            balances: BalanceEvaluator::new(store.clone()),
            store,
            writers,
            validator,
            factory,
            transfers,
            metrics,
            config,
        })
    }

    /// Record a deposit or withdrawal
    ///
    /// Rejections (invalid input, insufficient balance) come back as
    /// `Ok(MovementOutcome::Rejected)` with nothing written.
    pub async fn create_movement(&self, intent: MovementIntent) -> Result<MovementOutcome> {
        let normalized = match self.validator.validate_direct(&intent) {
            Ok(normalized) => normalized,
            Err(err) => {
                tracing::debug!(code = err.code(), "Movement rejected by validation");
                self.metrics.record_rejected();
                return Ok(MovementOutcome::Rejected(err.into()));
            }
        };

        let movement = self.factory.stamp(normalized);
        let outcome = self.writers.append_checked(movement).await?;

        match &outcome {
            MovementOutcome::Accepted(movement) => {
                self.metrics.record_accepted();
                tracing::info!(
                    movement_id = %movement.id,
                    reference = %movement.reference,
                    account = %movement.account,
                    amount = %movement.amount,
                    "Movement recorded"
                );
            }
            MovementOutcome::Rejected(_) => self.metrics.record_rejected(),
        }

        Ok(outcome)
    }

    /// Transfer to another customer's account; returns the charge leg
    pub async fn transfer_to_other_account(
        &self,
        request: TransferRequest,
    ) -> Result<MovementOutcome> {
        self.transfers
            .transfer(TransferKind::ThirdParty, request)
            .await
    }

    /// Transfer between the caller's own accounts; returns the charge leg
    pub async fn transfer_between_own_accounts(
        &self,
        request: TransferRequest,
    ) -> Result<MovementOutcome> {
        self.transfers
            .transfer(TransferKind::OwnAccount, request)
            .await
    }

    /// Get movement by id
    pub async fn get(&self, id: Uuid) -> Result<Option<Movement>> {
        Ok(self.store.find_by_id(id).await?)
    }

    /// All movements (unordered)
    pub async fn list_all(&self) -> Result<Vec<Movement>> {
        Ok(self.store.find_all().await?)
    }

    /// Movements recorded against a customer (unordered)
    pub async fn list_by_customer(&self, customer: &CustomerId) -> Result<Vec<Movement>> {
        Ok(self.store.find_by_customer(customer).await?)
    }

    /// Movements recorded against an account (unordered)
    pub async fn list_by_account(&self, account: &AccountId) -> Result<Vec<Movement>> {
        Ok(self.store.find_by_account(account).await?)
    }

    /// Movements recorded against a customer's account (unordered)
    pub async fn list_by_customer_and_account(
        &self,
        customer: &CustomerId,
        account: &AccountId,
    ) -> Result<Vec<Movement>> {
        Ok(self
            .store
            .find_by_customer_and_account(customer, account)
            .await?)
    }

    /// Replace the movement stored under `id`
    ///
    /// Runs on the owning account's writer. Moving a record to another
    /// account, a sign that disagrees with the type, or a change that
    /// overdraws the account is rejected.
    pub async fn update(&self, id: Uuid, mut movement: Movement) -> Result<MovementOutcome> {
        let existing = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(StoreError::MovementNotFound(id))?;

        movement.id = id;
        let outcome = self.writers.update(&existing.account, id, movement).await?;
        if !outcome.is_accepted() {
            self.metrics.record_rejected();
        }
        Ok(outcome)
    }

    /// Remove the movement stored under `id`
    ///
    /// Refused if the account would be left negative.
    pub async fn delete(&self, id: Uuid) -> Result<MovementOutcome> {
        let existing = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(StoreError::MovementNotFound(id))?;

        let outcome = self.writers.delete(&existing.account, id).await?;
        if !outcome.is_accepted() {
            self.metrics.record_rejected();
        }
        Ok(outcome)
    }

    /// Current balance of an account, optionally scoped to one customer
    pub async fn balance(
        &self,
        account: &AccountId,
        customer: Option<&CustomerId>,
    ) -> Result<Decimal> {
        self.balances.current_balance(account, customer).await
    }

    /// Saga record of a transfer
    pub async fn transfer_saga(&self, transfer_id: Uuid) -> Result<Option<TransferSaga>> {
        self.transfers.saga(transfer_id).await
    }

    /// Resume transfers interrupted by a crash or left inconsistent
    pub async fn recover_transfers(&self) -> Result<RecoveryReport> {
        self.transfers.recover().await
    }

    /// Ledger metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.writers.shutdown().await?;
        tracing::info!("Movements ledger stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Rejection, ValidationError};
    use crate::store::InMemoryStore;
    use crate::types::{Concept, MovementType};

    async fn create_test_ledger() -> (MovementLedger<InMemoryStore>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let mut config = Config::default();
        config.writers.shards = 4;
        let ledger = MovementLedger::open(config, store.clone()).await.unwrap();
        (ledger, store)
    }

    fn account(id: &str) -> AccountId {
        AccountId::new(id)
    }

    #[tokio::test]
    async fn test_ledger_open() {
        let (ledger, _) = create_test_ledger().await;
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_withdrawal_from_funded_account() {
        let (ledger, _) = create_test_ledger().await;

        ledger
            .create_movement(MovementIntent::deposit("C-1", "A-1", Decimal::new(10000, 2)))
            .await
            .unwrap();
        let outcome = ledger
            .create_movement(MovementIntent::withdrawal("C-1", "A-1", Decimal::new(3000, 2)))
            .await
            .unwrap();

        let movement = outcome.accepted().unwrap();
        assert_eq!(movement.movement_type, MovementType::Charge);
        assert_eq!(movement.amount, Decimal::new(-3000, 2));
        assert!(movement.reference.starts_with("C-1-"));
        assert!(movement.correct);
        assert_eq!(
            ledger.balance(&account("A-1"), None).await.unwrap(),
            Decimal::new(7000, 2)
        );

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_withdrawal_from_empty_account() {
        let (ledger, store) = create_test_ledger().await;

        let outcome = ledger
            .create_movement(MovementIntent::withdrawal("C-1", "A-1", Decimal::new(1000, 2)))
            .await
            .unwrap();

        let rejection = outcome.rejection().unwrap();
        assert!(matches!(rejection, Rejection::InsufficientBalance { .. }));
        assert_eq!(
            rejection.message(),
            "The movement exceeds the available balance."
        );
        assert!(store.is_empty());
        assert_eq!(ledger.metrics().rejected_total.get(), 1);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_negative_deposit_is_credited() {
        let (ledger, _) = create_test_ledger().await;

        let outcome = ledger
            .create_movement(MovementIntent::deposit("C-1", "A-1", Decimal::new(-2000, 2)))
            .await
            .unwrap();

        let movement = outcome.accepted().unwrap();
        assert_eq!(movement.movement_type, MovementType::Payment);
        assert_eq!(movement.amount, Decimal::new(2000, 2));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_concept_never_writes() {
        let (ledger, store) = create_test_ledger().await;

        let intent = MovementIntent {
            concept: Some("XX".to_string()),
            ..MovementIntent::deposit("C-1", "A-1", Decimal::ONE)
        };
        let outcome = ledger.create_movement(intent).await.unwrap();

        assert_eq!(
            outcome.rejection(),
            Some(&Rejection::Invalid(ValidationError::UnknownConcept(
                "XX".to_string()
            )))
        );
        assert!(store.is_empty());

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_direct_path_refuses_transfers() {
        let (ledger, store) = create_test_ledger().await;

        let intent = MovementIntent::transfer("C-1", "A-1", "C-2", "A-2", Decimal::ONE);
        let outcome = ledger.create_movement(intent).await.unwrap();

        assert_eq!(
            outcome.rejection(),
            Some(&Rejection::Invalid(ValidationError::TransferNotDirect))
        );
        assert!(store.is_empty());

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_transfer_writes_mirrored_legs() {
        let (ledger, _) = create_test_ledger().await;

        ledger
            .create_movement(MovementIntent::deposit("C-1", "A-1", Decimal::new(10000, 2)))
            .await
            .unwrap();

        let outcome = ledger
            .transfer_to_other_account(TransferRequest::new(
                "C-1",
                "A-1",
                "A-2",
                Some("C-2"),
                Decimal::new(5000, 2),
            ))
            .await
            .unwrap();

        let charge = outcome.accepted().unwrap().clone();
        assert_eq!(charge.concept, Concept::Transfer);
        assert_eq!(charge.amount, Decimal::new(-5000, 2));
        assert_eq!(charge.transfer_account, Some(account("A-2")));

        let inbound = ledger.list_by_account(&account("A-2")).await.unwrap();
        assert_eq!(inbound.len(), 1);
        let payment = &inbound[0];
        assert_eq!(payment.movement_type, MovementType::Payment);
        assert_eq!(payment.amount, Decimal::new(5000, 2));
        assert_eq!(payment.transfer_account, Some(account("A-1")));
        assert_eq!(payment.transfer_id, charge.transfer_id);

        assert_eq!(
            ledger.balance(&account("A-1"), None).await.unwrap(),
            Decimal::new(5000, 2)
        );
        assert_eq!(
            ledger.balance(&account("A-2"), None).await.unwrap(),
            Decimal::new(5000, 2)
        );

        let saga = ledger
            .transfer_saga(charge.transfer_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saga.state, crate::saga::TransferState::PaymentCommitted);
        assert_eq!(ledger.metrics().transfers_completed.get(), 1);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_own_account_transfer_defaults_beneficiary() {
        let (ledger, _) = create_test_ledger().await;

        ledger
            .create_movement(MovementIntent::deposit("C-1", "A-1", Decimal::new(2000, 2)))
            .await
            .unwrap();
        let outcome = ledger
            .transfer_between_own_accounts(TransferRequest::new(
                "C-1",
                "A-1",
                "A-3",
                None,
                Decimal::new(500, 2),
            ))
            .await
            .unwrap();
        assert!(outcome.is_accepted());

        let payments = ledger
            .list_by_customer_and_account(&CustomerId::new("C-1"), &account("A-3"))
            .await
            .unwrap();
        assert_eq!(payments.len(), 1);
        assert!(payments[0]
            .observations
            .starts_with("Bank transfer between own accounts"));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_transfer_without_funds_writes_nothing() {
        let (ledger, store) = create_test_ledger().await;

        let outcome = ledger
            .transfer_to_other_account(TransferRequest::new(
                "C-1",
                "A-1",
                "A-2",
                Some("C-2"),
                Decimal::new(100, 2),
            ))
            .await
            .unwrap();

        assert!(matches!(
            outcome.rejection(),
            Some(Rejection::InsufficientBalance { .. })
        ));
        assert!(store.is_empty());

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (ledger, _) = create_test_ledger().await;

        let deposit = ledger
            .create_movement(MovementIntent::deposit("C-1", "A-1", Decimal::new(1000, 2)))
            .await
            .unwrap()
            .accepted()
            .cloned()
            .unwrap();

        let mut corrected = deposit.clone();
        corrected.amount = Decimal::new(1500, 2);
        let outcome = ledger.update(deposit.id, corrected).await.unwrap();
        assert!(outcome.is_accepted());
        assert_eq!(
            ledger.balance(&account("A-1"), None).await.unwrap(),
            Decimal::new(1500, 2)
        );

        let mut moved = deposit.clone();
        moved.account = account("A-9");
        let outcome = ledger.update(deposit.id, moved).await.unwrap();
        assert!(matches!(
            outcome.rejection(),
            Some(Rejection::Invalid(ValidationError::AccountReassignment { .. }))
        ));

        let outcome = ledger.delete(deposit.id).await.unwrap();
        assert!(outcome.is_accepted());
        assert!(ledger.get(deposit.id).await.unwrap().is_none());

        let err = ledger.delete(deposit.id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Store(StoreError::MovementNotFound(id)) if id == deposit.id
        ));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_listing_surface() {
        let (ledger, _) = create_test_ledger().await;

        for (customer, acct) in [("C-1", "A-1"), ("C-1", "A-2"), ("C-2", "A-1")] {
            ledger
                .create_movement(MovementIntent::deposit(customer, acct, Decimal::ONE))
                .await
                .unwrap();
        }

        assert_eq!(ledger.list_all().await.unwrap().len(), 3);
        assert_eq!(
            ledger
                .list_by_customer(&CustomerId::new("C-1"))
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(ledger.list_by_account(&account("A-1")).await.unwrap().len(), 2);
        assert_eq!(
            ledger
                .balance(&account("A-1"), Some(&CustomerId::new("C-2")))
                .await
                .unwrap(),
            Decimal::ONE
        );

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_amount_above_ceiling_is_rejected() {
        let (ledger, store) = create_test_ledger().await;

        let outcome = ledger
            .create_movement(MovementIntent::deposit("C-1", "A-1", Decimal::MAX))
            .await
            .unwrap();
        assert!(matches!(
            outcome.rejection(),
            Some(Rejection::Invalid(ValidationError::AmountTooLarge { .. }))
        ));
        assert!(store.is_empty());

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_balance_overflow_keeps_writer_alive() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = Config::default();
        config.writers.shards = 1;
        config.ledger.max_amount = Decimal::MAX;
        let ledger = MovementLedger::open(config, store.clone()).await.unwrap();

        let first = ledger
            .create_movement(MovementIntent::deposit("C-1", "A-1", Decimal::MAX))
            .await
            .unwrap();
        assert!(first.is_accepted());

        let second = ledger
            .create_movement(MovementIntent::deposit("C-1", "A-1", Decimal::MAX))
            .await
            .unwrap();
        let rejection = second.rejection().unwrap();
        assert!(matches!(rejection, Rejection::BalanceOverflow { .. }));
        assert_eq!(rejection.code(), "BALANCE_OVERFLOW");
        assert_eq!(store.len(), 1);

        // Same writer, unrelated account
        let other = ledger
            .create_movement(MovementIntent::deposit("C-9", "Z-9", Decimal::new(100, 2)))
            .await
            .unwrap();
        assert!(other.is_accepted());
        assert_eq!(
            ledger.balance(&account("A-1"), None).await.unwrap(),
            Decimal::MAX
        );

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_rejects_bad_offset() {
        let mut config = Config::default();
        config.ledger.display_utc_offset_secs = 90_000;
        let result = MovementLedger::open(config, Arc::new(InMemoryStore::new())).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
