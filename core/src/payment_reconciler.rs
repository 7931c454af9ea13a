//! Payment reconciler: lands the follow-up steps of a due payment.
//!
//! A due payment commits its receipt and the due update first. Two steps
//! follow, each in its own write transaction and each gated by a flag on
//! the receipt so it can only ever apply once:
//!
//!   obligation_applied → contributor entry + obligation totals
//!   wallet_applied     → negative wallet entry tagged `*_payment`
//!
//! The processor calls `apply` right away; anything that did not land is
//! picked up by `reconcile_pending` on the next scheduler tick.

use crate::{
    error::{DuesError, DuesResult},
    event::{DuesEvent, PaymentStep},
    store::{ContributorRow, DuesStore, TransactionRow, WalletEntryRow},
    types::TransactionKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub reconciled: usize,
    pub failed: usize,
}

pub struct PaymentReconciler<'a> {
    store: &'a DuesStore,
}

impl<'a> PaymentReconciler<'a> {
    pub fn new(store: &'a DuesStore) -> Self {
        Self { store }
    }

    /// Apply whichever follow-up steps of `txn` are still outstanding.
    /// Contribution receipts carry both flags already and are ignored.
    pub fn apply(&self, txn: &TransactionRow, now: DateTime<Utc>) -> DuesResult<()> {
        if txn.kind != TransactionKind::DuePayment {
            return Ok(());
        }
        let obligation = self
            .store
            .get_obligation(&txn.obligation_id)?
            .ok_or_else(|| DuesError::not_found("obligation", txn.obligation_id.as_str()))?;

        self.store.immediate(|store| {
            if !store.mark_obligation_applied(&txn.transaction_id)? {
                return Ok(());
            }
            let existing = store.increment_contributor(&txn.obligation_id, &txn.entity, txn.amount, now)?;
            if !existing {
                store.insert_contributor(&ContributorRow {
                    obligation_id: txn.obligation_id.clone(),
                    entity: txn.entity.clone(),
                    contributed_amount: txn.amount,
                    contributed_at: now,
                })?;
            }
            store.add_to_obligation_totals(&txn.obligation_id, txn.amount, !existing)?;
            store.append_event(
                &DuesEvent::PaymentApplied {
                    transaction_id: txn.transaction_id.clone(),
                    step: PaymentStep::Obligation,
                },
                now,
            )
        })?;

        self.store.immediate(|store| {
            if !store.mark_wallet_applied(&txn.transaction_id)? {
                return Ok(());
            }
            store.post_wallet_entry(&WalletEntryRow {
                entry_id: None,
                entity: txn.entity.clone(),
                transaction_id: Some(txn.transaction_id.clone()),
                obligation_id: Some(txn.obligation_id.clone()),
                amount: -txn.amount,
                entry_type: obligation.ledger_tag("payment"),
                created_at: now,
            })?;
            store.append_event(
                &DuesEvent::PaymentApplied {
                    transaction_id: txn.transaction_id.clone(),
                    step: PaymentStep::Wallet,
                },
                now,
            )
        })
    }

    /// Re-apply every receipt with an outstanding step. Failures are logged
    /// and counted; the receipt stays pending for the next run.
    pub fn reconcile_pending(&self, now: DateTime<Utc>) -> DuesResult<ReconcileReport> {
        let pending = self.store.pending_payment_applications()?;
        let mut report = ReconcileReport::default();

        for txn in &pending {
            match self.apply(txn, now) {
                Ok(()) => report.reconciled += 1,
                Err(e) => {
                    log::warn!("reconcile: transaction {} still pending: {e}", txn.transaction_id);
                    report.failed += 1;
                }
            }
        }

        if !pending.is_empty() {
            log::info!(
                "reconcile: {} receipts reconciled, {} still pending",
                report.reconciled,
                report.failed
            );
        }
        Ok(report)
    }
}
