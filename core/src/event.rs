//! Engine events: the audit trail of every state change.
//!
//! Operations append their events to `event_log` inside the same store
//! transaction as the change they describe. Scheduled jobs return summary
//! events which the scheduler appends after the job finishes.

use crate::types::{
    Amount, AmountMode, ChurchId, DueId, EntityRef, ObligationId, ObligationKind, TransactionId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Variants are only ever appended; stored payloads must keep parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DuesEvent {
    // ── Registry ───────────────────────────────────
    ObligationCreated {
        obligation_id: ObligationId,
        church_id: ChurchId,
        kind: ObligationKind,
        amount_mode: AmountMode,
    },
    ObligationDeactivated {
        obligation_id: ObligationId,
    },
    WeeklyCollectionOpened {
        obligation_id: ObligationId,
        church_id: ChurchId,
        year: i32,
        week: u32,
    },

    // ── Contributions ──────────────────────────────
    ContributionRecorded {
        obligation_id: ObligationId,
        entity: EntityRef,
        amount: Amount,
        transaction_id: TransactionId,
    },

    // ── Materialization ────────────────────────────
    DueMaterialized {
        obligation_id: ObligationId,
        due_id: DueId,
        entity: EntityRef,
        amount: Amount,
    },
    ObligationProcessed {
        obligation_id: ObligationId,
        members: usize,
        houses: usize,
    },
    SweepCompleted {
        obligations_processed: usize,
        obligations_failed: usize,
        members_processed: usize,
        houses_processed: usize,
    },

    // ── Payments ───────────────────────────────────
    DuePaid {
        due_id: DueId,
        transaction_id: TransactionId,
        amount: Amount,
        balance_after: Amount,
        is_paid: bool,
    },
    PaymentApplied {
        transaction_id: TransactionId,
        step: PaymentStep,
    },
    PaymentsReconciled {
        reconciled: usize,
        failed: usize,
    },
}

/// The follow-up steps of a due payment that run after the receipt commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStep {
    Obligation,
    Wallet,
}

impl DuesEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            DuesEvent::ObligationCreated { .. }      => "obligation_created",
            DuesEvent::ObligationDeactivated { .. }  => "obligation_deactivated",
            DuesEvent::WeeklyCollectionOpened { .. } => "weekly_collection_opened",
            DuesEvent::ContributionRecorded { .. }   => "contribution_recorded",
            DuesEvent::DueMaterialized { .. }        => "due_materialized",
            DuesEvent::ObligationProcessed { .. }    => "obligation_processed",
            DuesEvent::SweepCompleted { .. }         => "sweep_completed",
            DuesEvent::DuePaid { .. }                => "due_paid",
            DuesEvent::PaymentApplied { .. }         => "payment_applied",
            DuesEvent::PaymentsReconciled { .. }     => "payments_reconciled",
        }
    }

    /// The obligation this event concerns, when there is exactly one.
    pub fn obligation_id(&self) -> Option<&str> {
        match self {
            DuesEvent::ObligationCreated { obligation_id, .. }
            | DuesEvent::ObligationDeactivated { obligation_id }
            | DuesEvent::WeeklyCollectionOpened { obligation_id, .. }
            | DuesEvent::ContributionRecorded { obligation_id, .. }
            | DuesEvent::DueMaterialized { obligation_id, .. }
            | DuesEvent::ObligationProcessed { obligation_id, .. } => Some(obligation_id),
            _ => None,
        }
    }
}

/// A persisted event_log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub event_type: String,
    pub obligation_id: Option<ObligationId>,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn decode(&self) -> serde_json::Result<DuesEvent> {
        serde_json::from_str(&self.payload)
    }
}
