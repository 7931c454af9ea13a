//! Ledger audit: recompute every cached aggregate and report disagreement.
//!
//! Read-only. Drift means a bug or an interrupted payment; pending payment
//! steps show up as `ReceiptTotal` drift only once they are marked applied
//! without their effect, never while they are still pending.

use crate::{
    error::DuesResult,
    store::DuesStore,
    types::{Amount, DueId, EntityRef, ObligationId},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Drift {
    /// Cached wallet balance differs from the sum of its entries.
    WalletBalance {
        entity: EntityRef,
        balance: Amount,
        entry_sum: Amount,
    },
    /// `total_collected` differs from the sum of contributor amounts.
    ObligationTotal {
        obligation_id: ObligationId,
        total_collected: Amount,
        contributor_sum: Amount,
    },
    ParticipantCount {
        obligation_id: ObligationId,
        participant_count: i64,
        contributor_count: i64,
    },
    /// `total_collected` differs from the applied receipts.
    ReceiptTotal {
        obligation_id: ObligationId,
        total_collected: Amount,
        receipt_sum: Amount,
    },
    /// `balance != amount - paid_amount` or `is_paid != (balance == 0)`.
    DueArithmetic {
        due_id: DueId,
        amount: Amount,
        paid_amount: Amount,
        balance: Amount,
        is_paid: bool,
    },
}

pub struct LedgerAudit<'a> {
    store: &'a DuesStore,
}

impl<'a> LedgerAudit<'a> {
    pub fn new(store: &'a DuesStore) -> Self {
        Self { store }
    }

    pub fn audit(&self) -> DuesResult<Vec<Drift>> {
        let mut drift = Vec::new();

        for w in self.store.wallet_totals()? {
            if w.balance != w.entry_sum {
                drift.push(Drift::WalletBalance {
                    entity: w.entity,
                    balance: w.balance,
                    entry_sum: w.entry_sum,
                });
            }
        }

        for o in self.store.obligation_totals()? {
            if o.total_collected != o.contributor_sum {
                drift.push(Drift::ObligationTotal {
                    obligation_id: o.obligation_id.clone(),
                    total_collected: o.total_collected,
                    contributor_sum: o.contributor_sum,
                });
            }
            if o.participant_count != o.contributor_count {
                drift.push(Drift::ParticipantCount {
                    obligation_id: o.obligation_id.clone(),
                    participant_count: o.participant_count,
                    contributor_count: o.contributor_count,
                });
            }
            if o.total_collected != o.receipt_sum {
                drift.push(Drift::ReceiptTotal {
                    obligation_id: o.obligation_id,
                    total_collected: o.total_collected,
                    receipt_sum: o.receipt_sum,
                });
            }
        }

        for d in self.store.inconsistent_dues()? {
            drift.push(Drift::DueArithmetic {
                due_id: d.due_id,
                amount: d.amount,
                paid_amount: d.paid_amount,
                balance: d.balance,
                is_paid: d.is_paid,
            });
        }

        if drift.is_empty() {
            log::debug!("audit: ledger consistent");
        } else {
            log::warn!("audit: {} drift findings", drift.len());
        }
        Ok(drift)
    }
}
