//! The dues engine: one entry point for every operation.
//!
//! Manual callers (the runner's IPC loop, tests) and the scheduler go
//! through the same methods here. Each method reads the time once from the
//! engine's clock and hands it down, so one operation never straddles two
//! timestamps.
//!
//! RULES:
//!   - Components never call each other's store mutations directly.
//!   - Every state change is recorded in the event log.
//!   - Fixed-amount obligations are materialized on creation.

use crate::{
    clock::Clock,
    config::EngineConfig,
    contribution_recorder::ContributionRecorder,
    due_payment_processor::{DuePaymentProcessor, PaymentOutcome},
    dues_materializer::{DuesMaterializer, SweepReport},
    error::{DuesError, DuesResult},
    event::EventLogEntry,
    ledger_audit::{Drift, LedgerAudit},
    obligation_registry::{NewObligation, ObligationRegistry},
    payment_reconciler::{PaymentReconciler, ReconcileReport},
    store::{ContributorRow, DueRow, DuesStore, ObligationRow, TransactionRow, WalletEntryRow},
    types::{Amount, AmountMode, EntityRef, PaymentMethod},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

/// `GetDuesForEntity` result: the dues plus their aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDues {
    pub entity: EntityRef,
    pub dues: Vec<DueRow>,
    pub total_dues: usize,
    pub unpaid_dues: usize,
    pub total_due_amount: Amount,
    pub total_paid_amount: Amount,
}

impl EntityDues {
    fn from_dues(entity: EntityRef, dues: Vec<DueRow>) -> Self {
        Self {
            total_dues: dues.len(),
            unpaid_dues: dues.iter().filter(|d| !d.is_paid).count(),
            total_due_amount: dues.iter().map(|d| d.amount).sum(),
            total_paid_amount: dues.iter().map(|d| d.paid_amount).sum(),
            entity,
            dues,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletView {
    pub entity: EntityRef,
    pub balance: Amount,
    /// None until the first entry is posted.
    pub updated_at: Option<DateTime<Utc>>,
    pub entries: Vec<WalletEntryRow>,
}

pub struct DuesEngine {
    pub store: DuesStore,
    pub config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl DuesEngine {
    pub fn new(store: DuesStore, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self { store, config, clock }
    }

    /// Open the configured database, apply migrations, and wire the engine.
    pub fn build(config: EngineConfig, clock: Arc<dyn Clock>) -> DuesResult<Self> {
        let store = DuesStore::open_with_timeout(
            &config.database_path,
            Duration::from_millis(config.busy_timeout_ms),
        )?;
        store.migrate()?;
        Ok(Self::new(store, config, clock))
    }

    /// In-memory engine with `EngineConfig::default_test()`.
    pub fn build_test(clock: Arc<dyn Clock>) -> DuesResult<Self> {
        Self::build(EngineConfig::default_test(), clock)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn materializer(&self) -> DuesMaterializer<'_> {
        DuesMaterializer::new(&self.store, self.config.sweep.parallelism)
    }

    // ── Obligation registry ────────────────────────────────────────

    pub fn create_obligation(&self, spec: &NewObligation) -> DuesResult<ObligationRow> {
        let now = self.now();
        let row = ObligationRegistry::new(&self.store).create(spec, now)?;
        if row.amount_mode != AmountMode::Fixed {
            return Ok(row);
        }

        let outcome = self.materializer().materialize(&row, now)?;
        if !outcome.failures.is_empty() {
            log::warn!(
                "fixed obligation {}: {} dues failed on creation; the next sweep retries them",
                row.obligation_id,
                outcome.failures.len()
            );
        }
        self.obligation(&row.obligation_id)
    }

    /// Open (or fetch) the collection for the ISO week containing `at`.
    pub fn open_weekly_collection(&self, church_id: &str, at: DateTime<Utc>) -> DuesResult<ObligationRow> {
        let (row, _created) = ObligationRegistry::new(&self.store).open_weekly_collection(
            church_id,
            at,
            self.config.collections.default_weekly_amount,
            self.now(),
        )?;
        Ok(row)
    }

    pub fn obligation(&self, obligation_id: &str) -> DuesResult<ObligationRow> {
        ObligationRegistry::new(&self.store).get(obligation_id)
    }

    pub fn contributors(&self, obligation_id: &str) -> DuesResult<Vec<ContributorRow>> {
        self.obligation(obligation_id)?;
        self.store.contributors(obligation_id)
    }

    pub fn deactivate_obligation(&self, obligation_id: &str) -> DuesResult<ObligationRow> {
        ObligationRegistry::new(&self.store).deactivate(obligation_id, self.now())
    }

    // ── Money in ───────────────────────────────────────────────────

    pub fn record_contribution(
        &self,
        obligation_id: &str,
        entity: &EntityRef,
        amount: Amount,
        method: PaymentMethod,
    ) -> DuesResult<TransactionRow> {
        ContributionRecorder::new(&self.store).record(obligation_id, entity, amount, method, self.now())
    }

    /// `None` sweeps every eligible obligation; `Some(id)` processes that
    /// one obligation regardless of its due date.
    pub fn process_dues(&self, obligation_id: Option<&str>) -> DuesResult<SweepReport> {
        let now = self.now();
        match obligation_id {
            Some(id) => self.materializer().process_one(id, now),
            None => self.materializer().sweep(now),
        }
    }

    pub fn pay_due(
        &self,
        due_id: &str,
        amount: Amount,
        method: PaymentMethod,
    ) -> DuesResult<PaymentOutcome> {
        DuePaymentProcessor::new(&self.store).pay(due_id, amount, method, self.now())
    }

    pub fn reconcile_payments(&self) -> DuesResult<ReconcileReport> {
        PaymentReconciler::new(&self.store).reconcile_pending(self.now())
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn dues_for_entity(&self, entity: &EntityRef) -> DuesResult<EntityDues> {
        if entity.id.trim().is_empty() {
            return Err(DuesError::MissingField { field: "entity_id" });
        }
        let dues = self.store.dues_for_entity(entity)?;
        Ok(EntityDues::from_dues(entity.clone(), dues))
    }

    pub fn wallet(&self, entity: &EntityRef) -> DuesResult<WalletView> {
        let wallet = self.store.get_wallet(entity)?;
        Ok(WalletView {
            entity: entity.clone(),
            balance: wallet.as_ref().map_or(0, |w| w.balance),
            updated_at: wallet.map(|w| w.updated_at),
            entries: self.store.wallet_entries(entity)?,
        })
    }

    pub fn audit(&self) -> DuesResult<Vec<Drift>> {
        LedgerAudit::new(&self.store).audit()
    }

    /// Event trail for one obligation, oldest first.
    pub fn events_for_obligation(&self, obligation_id: &str) -> DuesResult<Vec<EventLogEntry>> {
        self.store.events_for_obligation(obligation_id)
    }
}
