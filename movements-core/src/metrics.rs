//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//! Collectors live in a private registry so that several ledgers can run in
//! one process.
//!
//! # Metrics
//!
//! - `movements_accepted_total` - Movements written
//! - `movements_rejected_total` - Requests refused (validation or balance)
//! - `movements_transfers_completed_total` - Transfers with both legs on record
//! - `movements_transfer_inconsistencies_total` - Transfers left with only the charge leg
//! - `movements_payment_leg_retries_total` - Payment leg retry attempts
//! - `movements_reference_collisions_total` - Reference suffixes drawn again
//! - `movements_append_duration_seconds` - Histogram of append latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Movements written
    pub accepted_total: IntCounter,

    /// Requests refused
    pub rejected_total: IntCounter,

    /// Transfers completed
    pub transfers_completed: IntCounter,

    /// Transfers left inconsistent
    pub transfer_inconsistencies: IntCounter,

    /// Payment leg retries
    pub payment_leg_retries: IntCounter,

    /// Reference collisions
    pub reference_collisions: IntCounter,

    /// Append duration histogram
    pub append_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("accepted_total", &self.accepted_total.get())
            .field("rejected_total", &self.rejected_total.get())
            .field("transfer_inconsistencies", &self.transfer_inconsistencies.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let accepted_total = counter("movements_accepted_total", "Movements written")?;
        let rejected_total = counter(
            "movements_rejected_total",
            "Movement requests refused by validation or balance",
        )?;
        let transfers_completed = counter(
            "movements_transfers_completed_total",
            "Transfers with both legs on record",
        )?;
        let transfer_inconsistencies = counter(
            "movements_transfer_inconsistencies_total",
            "Transfers left with only the charge leg on record",
        )?;
        let payment_leg_retries = counter(
            "movements_payment_leg_retries_total",
            "Payment leg retry attempts",
        )?;
        let reference_collisions = counter(
            "movements_reference_collisions_total",
            "Reference suffixes drawn again after a collision",
        )?;

        let append_duration = Histogram::with_opts(
            HistogramOpts::new(
                "movements_append_duration_seconds",
                "Histogram of append latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        Ok(Self {
            accepted_total,
            rejected_total,
            transfers_completed,
            transfer_inconsistencies,
            payment_leg_retries,
            reference_collisions,
            append_duration,
            registry,
        })
    }

    /// Record a written movement
    pub fn record_accepted(&self) {
        self.accepted_total.inc();
    }

    /// Record a refused request
    pub fn record_rejected(&self) {
        self.rejected_total.inc();
    }

    /// Record a completed transfer
    pub fn record_transfer_completed(&self) {
        self.transfers_completed.inc();
    }

    /// Record a transfer left inconsistent
    pub fn record_transfer_inconsistency(&self) {
        self.transfer_inconsistencies.inc();
    }

    /// Record a payment leg retry
    pub fn record_payment_leg_retry(&self) {
        self.payment_leg_retries.inc();
    }

    /// Record a reference collision
    pub fn record_reference_collision(&self) {
        self.reference_collisions.inc();
    }

    /// Record append duration
    pub fn record_append_duration(&self, duration_seconds: f64) {
        self.append_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
