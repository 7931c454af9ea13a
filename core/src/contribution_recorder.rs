//! Contribution recorder: voluntary pay-in against a variable obligation.
//!
//! The wallet is untouched: a contributor never owed a due,
//! and the wallet only reflects unfulfilled obligation.

use crate::{
    error::{DuesError, DuesResult},
    event::DuesEvent,
    store::{ContributorRow, DuesStore, TransactionRow},
    types::{Amount, EntityKind, EntityRef, PaymentMethod, TransactionKind},
};
use chrono::{DateTime, Utc};

pub struct ContributionRecorder<'a> {
    store: &'a DuesStore,
}

impl<'a> ContributionRecorder<'a> {
    pub fn new(store: &'a DuesStore) -> Self {
        Self { store }
    }

    /// Record one contribution. Every check runs inside the same write
    /// transaction as the mutation, so a concurrent sweep either sees the
    /// contributor row or has already created the due we reject on.
    pub fn record(
        &self,
        obligation_id: &str,
        entity: &EntityRef,
        amount: Amount,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> DuesResult<TransactionRow> {
        if amount <= 0 {
            return Err(DuesError::InvalidAmount { amount });
        }
        if obligation_id.trim().is_empty() {
            return Err(DuesError::MissingField { field: "obligation_id" });
        }
        if entity.id.trim().is_empty() {
            return Err(DuesError::MissingField { field: "entity_id" });
        }

        let txn = self.store.immediate(|store| {
            let obligation = store
                .get_obligation(obligation_id)?
                .ok_or_else(|| DuesError::not_found("obligation", obligation_id))?;
            obligation.ensure_accepts_contributions(now)?;
            if store.entity_name(entity)?.is_none() {
                return Err(DuesError::not_found(entity_label(entity), entity.id.as_str()));
            }

            if store.contributor(obligation_id, entity)?.is_some() {
                return Err(DuesError::DuplicateContribution {
                    obligation_id: obligation_id.to_string(),
                    entity: entity.clone(),
                });
            }
            if store.due_for(obligation_id, entity)?.is_some() {
                return Err(DuesError::DueAlreadyMaterialized {
                    obligation_id: obligation_id.to_string(),
                    entity: entity.clone(),
                });
            }

            let txn = TransactionRow {
                transaction_id: uuid::Uuid::new_v4().to_string(),
                church_id: obligation.church_id.clone(),
                entity: entity.clone(),
                amount,
                obligation_id: obligation_id.to_string(),
                due_id: None,
                method,
                kind: TransactionKind::Contribution,
                obligation_applied: true,
                wallet_applied: true,
                created_at: now,
            };
            store.insert_transaction(&txn)?;
            store.insert_contributor(&ContributorRow {
                obligation_id: obligation_id.to_string(),
                entity: entity.clone(),
                contributed_amount: amount,
                contributed_at: now,
            })?;
            store.add_to_obligation_totals(obligation_id, amount, true)?;
            store.append_event(
                &DuesEvent::ContributionRecorded {
                    obligation_id: obligation_id.to_string(),
                    entity: entity.clone(),
                    amount,
                    transaction_id: txn.transaction_id.clone(),
                },
                now,
            )?;
            Ok(txn)
        })?;

        log::debug!(
            "contribution {} of {amount} from {entity} to obligation {obligation_id}",
            txn.transaction_id
        );
        Ok(txn)
    }
}

fn entity_label(entity: &EntityRef) -> &'static str {
    match entity.kind {
        EntityKind::Member => "member",
        EntityKind::House => "house",
    }
}
