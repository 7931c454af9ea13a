//! Due payment processor.
//!
//! The receipt and the due update commit together; the obligation and
//! wallet steps follow best-effort through `PaymentReconciler`. A caller
//! always gets the committed receipt back, with `reconciliation_pending`
//! set when a follow-up step has to wait for the next reconciliation.

use crate::{
    error::{DuesError, DuesResult},
    event::DuesEvent,
    payment_reconciler::PaymentReconciler,
    store::{DueRow, DuesStore, TransactionRow},
    types::{Amount, PaymentMethod, TransactionKind},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub transaction: TransactionRow,
    pub due: DueRow,
    pub reconciliation_pending: bool,
}

pub struct DuePaymentProcessor<'a> {
    store: &'a DuesStore,
}

impl<'a> DuePaymentProcessor<'a> {
    pub fn new(store: &'a DuesStore) -> Self {
        Self { store }
    }

    pub fn pay(
        &self,
        due_id: &str,
        amount: Amount,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> DuesResult<PaymentOutcome> {
        if amount <= 0 {
            return Err(DuesError::InvalidAmount { amount });
        }
        if due_id.trim().is_empty() {
            return Err(DuesError::MissingField { field: "due_id" });
        }

        let (txn, due) = self.store.immediate(|store| {
            let due = store
                .get_due(due_id)?
                .ok_or_else(|| DuesError::not_found("due", due_id))?;
            if due.is_paid {
                return Err(DuesError::DueAlreadyPaid {
                    due_id: due_id.to_string(),
                });
            }
            if amount > due.balance {
                return Err(DuesError::AmountExceedsBalance {
                    due_id: due_id.to_string(),
                    amount,
                    balance: due.balance,
                });
            }
            let obligation = store
                .get_obligation(&due.obligation_id)?
                .ok_or_else(|| DuesError::not_found("obligation", due.obligation_id.as_str()))?;

            let txn = TransactionRow {
                transaction_id: uuid::Uuid::new_v4().to_string(),
                church_id: obligation.church_id,
                entity: due.entity.clone(),
                amount,
                obligation_id: due.obligation_id.clone(),
                due_id: Some(due.due_id.clone()),
                method,
                kind: TransactionKind::DuePayment,
                obligation_applied: false,
                wallet_applied: false,
                created_at: now,
            };
            store.insert_transaction(&txn)?;
            if !store.apply_due_payment(due_id, amount, &txn.transaction_id)? {
                return Err(DuesError::AmountExceedsBalance {
                    due_id: due_id.to_string(),
                    amount,
                    balance: due.balance,
                });
            }
            let due = store
                .get_due(due_id)?
                .ok_or_else(|| DuesError::not_found("due", due_id))?;
            store.append_event(
                &DuesEvent::DuePaid {
                    due_id: due.due_id.clone(),
                    transaction_id: txn.transaction_id.clone(),
                    amount,
                    balance_after: due.balance,
                    is_paid: due.is_paid,
                },
                now,
            )?;
            Ok((txn, due))
        })?;

        let reconciliation_pending = match PaymentReconciler::new(self.store).apply(&txn, now) {
            Ok(()) => false,
            Err(e) => {
                log::warn!(
                    "payment {} on due {due_id} committed, follow-up pending: {e}",
                    txn.transaction_id
                );
                true
            }
        };
        let transaction = self
            .store
            .get_transaction(&txn.transaction_id)?
            .unwrap_or(txn);

        log::debug!(
            "paid {amount} on due {due_id}: balance {} (paid: {})",
            due.balance,
            due.is_paid
        );
        Ok(PaymentOutcome {
            transaction,
            due,
            reconciliation_pending,
        })
    }
}
