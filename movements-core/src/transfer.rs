//! Two-leg transfer orchestration
//!
//! A transfer writes a charge on the source account and a mirrored payment
//! on the destination account. No transaction spans both accounts, so the
//! protocol is driven as a saga (see [`crate::saga`]):
//!
//! 1. Validate the request
//! 2. On the source account's writer: check the balance, persist the saga,
//!    append the charge
//! 3. On the destination account's writer: append the payment, retrying
//!    with backoff; give up into `Inconsistent` and report it loudly
//! 4. Return the charge leg
//!
//! Steps 2-3 run on a spawned task. A caller that stops waiting does not
//! stop the transfer: once the charge is on record, the payment leg is
//! either written or the saga is left `Inconsistent` for
//! [`TransferOrchestrator::recover`].

use crate::actor::{AccountWriters, ChargeOutcome};
use crate::error::StoreError;
use crate::factory::MovementFactory;
use crate::metrics::Metrics;
use crate::retry::RetryStrategy;
use crate::saga::{TransferKind, TransferSaga, TransferState};
use crate::store::LedgerStore;
use crate::types::{MovementIntent, MovementOutcome, MovementType, NormalizedMovement};
use crate::validation::{describe, MovementValidator};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Transfer request as submitted by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferRequest {
    /// Caller
    pub customer: Option<String>,

    /// Source (charge) account
    pub account: Option<String>,

    /// Destination account
    pub transfer_account: Option<String>,

    /// Beneficiary; defaults to the caller for own-account transfers
    pub transfer_customer: Option<String>,

    /// Amount, any sign
    pub amount: Option<Decimal>,
}

impl TransferRequest {
    /// Build a request
    pub fn new(
        customer: &str,
        account: &str,
        transfer_account: &str,
        transfer_customer: Option<&str>,
        amount: Decimal,
    ) -> Self {
        Self {
            customer: Some(customer.to_string()),
            account: Some(account.to_string()),
            transfer_account: Some(transfer_account.to_string()),
            transfer_customer: transfer_customer.map(str::to_string),
            amount: Some(amount),
        }
    }

    /// Intent for the outbound leg, with the variant's defaults filled in
    pub fn into_intent(self, kind: TransferKind) -> MovementIntent {
        let transfer_customer = match kind {
            TransferKind::ThirdParty => self.transfer_customer,
            TransferKind::OwnAccount => self.transfer_customer.or_else(|| self.customer.clone()),
        };

        MovementIntent {
            concept: Some(crate::types::Concept::Transfer.code().to_string()),
            movement_type: None,
            customer: self.customer,
            account: self.account,
            transfer_customer,
            transfer_account: self.transfer_account,
            amount: self.amount,
        }
    }
}

/// Summary of a recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Open sagas found
    pub examined: usize,
    /// Sagas driven to `PaymentCommitted`
    pub completed: usize,
    /// Sagas closed because their charge never landed
    pub rejected: usize,
    /// Sagas still waiting for reconciliation
    pub inconsistent: Vec<Uuid>,
}

/// What the spawned saga task needs
struct SagaRuntime<S> {
    store: Arc<S>,
    writers: AccountWriters,
    retry: RetryStrategy,
    metrics: Metrics,
}

impl<S: LedgerStore> SagaRuntime<S> {
    /// Steps 2-3: charge on the source writer, then the payment leg
    async fn run(&self, saga: TransferSaga) -> Result<MovementOutcome> {
        match self.writers.commit_charge(saga).await? {
            ChargeOutcome::Rejected(rejection) => {
                self.metrics.record_rejected();
                Ok(MovementOutcome::Rejected(rejection))
            }
            ChargeOutcome::Committed(saga) => {
                self.metrics.record_accepted();
                tracing::debug!(
                    transfer_id = %saga.transfer_id,
                    charge_id = %saga.charge.id,
                    "Charge leg committed"
                );
                let charge = saga.charge.clone();
                self.complete_payment(saga).await?;
                Ok(MovementOutcome::Accepted(charge))
            }
        }
    }

    /// Write the payment leg of a saga whose charge is on record
    async fn complete_payment(&self, mut saga: TransferSaga) -> Result<TransferSaga> {
        let mut retry = 0;
        // False when an earlier attempt or run already wrote the leg
        let mut written = true;

        loop {
            let attempt = match self.writers.append_credit(saga.payment.clone()).await {
                // Written by an earlier attempt whose answer was lost
                Err(Error::Store(StoreError::DuplicateId(id))) => {
                    match self.store.find_by_id(id).await {
                        Ok(Some(stored)) => {
                            written = false;
                            Ok(stored)
                        }
                        Ok(None) => Err(Error::Store(StoreError::MovementNotFound(id))),
                        Err(err) => Err(err.into()),
                    }
                }
                other => other,
            };

            match attempt {
                Ok(stored) => {
                    saga.payment = stored;
                    break;
                }
                Err(err) if self.retry.is_retryable(&err) && retry < self.retry.max_retries() => {
                    let delay = self.retry.calculate_delay(retry);
                    retry += 1;
                    saga.record_failure(err.to_string());
                    self.metrics.record_payment_leg_retry();
                    tracing::warn!(
                        transfer_id = %saga.transfer_id,
                        attempt = retry,
                        max_retries = self.retry.max_retries(),
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Payment leg failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(self.mark_inconsistent(saga, err).await),
            }
        }

        saga.advance(TransferState::PaymentCommitted)?;
        saga.last_error = None;
        if let Err(err) = self.store.put_saga(&saga).await {
            // Both legs are on record; recovery will close the saga
            tracing::warn!(
                transfer_id = %saga.transfer_id,
                error = %err,
                "Could not persist completed saga"
            );
        }

        if written {
            self.metrics.record_accepted();
            self.metrics.record_transfer_completed();
        }
        tracing::info!(
            transfer_id = %saga.transfer_id,
            source = %saga.charge.account,
            destination = %saga.payment.account,
            amount = %saga.payment.amount,
            payment_already_on_record = !written,
            "Transfer completed"
        );

        Ok(saga)
    }

    async fn mark_inconsistent(&self, mut saga: TransferSaga, err: Error) -> Error {
        let reason = err.to_string();
        saga.record_failure(reason.clone());

        if let Err(advance_err) = saga.advance(TransferState::Inconsistent) {
            return advance_err;
        }
        if let Err(put_err) = self.store.put_saga(&saga).await {
            tracing::error!(
                transfer_id = %saga.transfer_id,
                error = %put_err,
                "Could not persist inconsistent saga"
            );
        }

        self.metrics.record_transfer_inconsistency();
        tracing::error!(
            transfer_id = %saga.transfer_id,
            charge_id = %saga.charge.id,
            payment_id = %saga.payment.id,
            source = %saga.charge.account,
            destination = %saga.payment.account,
            amount = %saga.payment.amount,
            attempts = saga.payment_attempts,
            reason = %reason,
            "Transfer inconsistent: charge committed without payment, reconciliation required"
        );

        Error::TransferInconsistency {
            transfer_id: saga.transfer_id,
            charge_id: saga.charge.id,
            reason,
        }
    }
}

/// Drives transfers between accounts
pub struct TransferOrchestrator<S> {
    runtime: Arc<SagaRuntime<S>>,
    validator: MovementValidator,
    factory: MovementFactory,
}

impl<S> Clone for TransferOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            validator: self.validator.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<S> std::fmt::Debug for TransferOrchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOrchestrator")
            .field("writers", &self.runtime.writers)
            .field("retry", &self.runtime.retry)
            .finish()
    }
}

impl<S: LedgerStore> TransferOrchestrator<S> {
    /// Create new orchestrator
    pub fn new(
        store: Arc<S>,
        writers: AccountWriters,
        validator: MovementValidator,
        factory: MovementFactory,
        retry: RetryStrategy,
        metrics: Metrics,
    ) -> Self {
        Self {
            runtime: Arc::new(SagaRuntime {
                store,
                writers,
                retry,
                metrics,
            }),
            validator,
            factory,
        }
    }

    /// Run a transfer; returns the charge leg when accepted
    pub async fn transfer(
        &self,
        kind: TransferKind,
        request: TransferRequest,
    ) -> Result<MovementOutcome> {
        let intent = request.into_intent(kind);
        let outbound = match self.validator.validate(&intent) {
            Ok(outbound) => outbound,
            Err(err) => {
                tracing::debug!(code = err.code(), "Transfer rejected by validation");
                self.runtime.metrics.record_rejected();
                return Ok(MovementOutcome::Rejected(err.into()));
            }
        };

        let saga = self.build_saga(kind, outbound)?;
        tracing::debug!(
            transfer_id = %saga.transfer_id,
            source = %saga.charge.account,
            destination = %saga.payment.account,
            "Transfer validated"
        );

        // Dropping the JoinHandle detaches the task; it still runs to the end
        let runtime = Arc::clone(&self.runtime);
        tokio::spawn(async move { runtime.run(saga).await })
            .await
            .map_err(|e| Error::Concurrency(format!("Transfer task failed: {}", e)))?
    }

    fn build_saga(&self, kind: TransferKind, outbound: NormalizedMovement) -> Result<TransferSaga> {
        let magnitude = outbound.magnitude();
        let inbound_text = describe(
            outbound.concept,
            MovementType::Payment,
            magnitude,
            Some(&outbound.account),
        );
        let inbound = outbound
            .mirrored(format!("{}: {}", kind.label(), inbound_text))
            .ok_or_else(|| Error::Other("transfer without counterpart".to_string()))?;

        let charge = NormalizedMovement {
            observations: format!("{}: {}", kind.label(), outbound.observations),
            ..outbound
        };

        Ok(TransferSaga::new(
            kind,
            self.factory.stamp(charge),
            self.factory.stamp(inbound),
        ))
    }

    /// Resume every open saga: settle crashed charges, finish payment legs
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let open = self.runtime.store.find_open_sagas().await?;
        let mut report = RecoveryReport {
            examined: open.len(),
            ..RecoveryReport::default()
        };

        for saga in open {
            let transfer_id = saga.transfer_id;
            let saga = if saga.state == TransferState::BalanceChecked {
                match self
                    .runtime
                    .writers
                    .resolve_uncommitted(&saga.charge.account, transfer_id)
                    .await?
                {
                    Some(resolved) => resolved,
                    None => continue,
                }
            } else {
                saga
            };

            match saga.state {
                TransferState::Rejected => report.rejected += 1,
                TransferState::ChargeCommitted | TransferState::Inconsistent => {
                    tracing::info!(
                        transfer_id = %transfer_id,
                        state = %saga.state,
                        "Resuming payment leg"
                    );
                    let runtime = Arc::clone(&self.runtime);
                    let result = tokio::spawn(async move { runtime.complete_payment(saga).await })
                        .await
                        .map_err(|e| Error::Concurrency(format!("Recovery task failed: {}", e)))?;
                    match result {
                        Ok(_) => report.completed += 1,
                        Err(Error::TransferInconsistency { .. }) => {
                            report.inconsistent.push(transfer_id)
                        }
                        Err(err) => return Err(err),
                    }
                }
                TransferState::PaymentCommitted => report.completed += 1,
                TransferState::Validated | TransferState::BalanceChecked => {}
            }
        }

        tracing::info!(
            examined = report.examined,
            completed = report.completed,
            rejected = report.rejected,
            inconsistent = report.inconsistent.len(),
            "Transfer recovery finished"
        );
        Ok(report)
    }

    /// Saga by id
    pub async fn saga(&self, transfer_id: Uuid) -> Result<Option<TransferSaga>> {
        Ok(self.runtime.store.get_saga(transfer_id).await?)
    }
}
