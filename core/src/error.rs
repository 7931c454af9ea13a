use crate::types::{Amount, DueId, EntityRef, ObligationId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DuesError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Validation: rejected before any mutation ───────────────
    #[error("Invalid amount: {amount} (must be greater than zero)")]
    InvalidAmount { amount: Amount },

    #[error("Missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    // ── State: rejected before any mutation ────────────────────
    #[error("Obligation {obligation_id} is inactive")]
    ObligationInactive { obligation_id: ObligationId },

    #[error("Obligation {obligation_id} does not open until {start_at}")]
    NotYetOpen { obligation_id: ObligationId, start_at: String },

    #[error("Obligation {obligation_id} closed at {end_at}")]
    ActiveWindowExpired { obligation_id: ObligationId, end_at: String },

    #[error("Obligation {obligation_id} has already been processed")]
    AlreadyProcessed { obligation_id: ObligationId },

    #[error("Obligation {obligation_id} has a fixed amount and does not take voluntary contributions")]
    NotVoluntary { obligation_id: ObligationId },

    #[error("{entity} has already contributed to obligation {obligation_id}")]
    DuplicateContribution { obligation_id: ObligationId, entity: EntityRef },

    #[error("{entity} already owes a due for obligation {obligation_id}; pay the due instead")]
    DueAlreadyMaterialized { obligation_id: ObligationId, entity: EntityRef },

    #[error("Payment of {amount} exceeds balance {balance} on due {due_id}")]
    AmountExceedsBalance { due_id: DueId, amount: Amount, balance: Amount },

    #[error("Due {due_id} is already paid")]
    DueAlreadyPaid { due_id: DueId },

    // ── Lookup ─────────────────────────────────────────────────
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    // ── Sweep ──────────────────────────────────────────────────
    #[error("Obligation {obligation_id} partially processed: {succeeded} entities done, {failed} failed")]
    PartialProcessing { obligation_id: ObligationId, succeeded: usize, failed: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification surfaced to callers (HTTP status mapping, IPC replies).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    State,
    NotFound,
    PartialProcessing,
    Storage,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation        => "validation",
            ErrorClass::State             => "state",
            ErrorClass::NotFound          => "not_found",
            ErrorClass::PartialProcessing => "partial_processing",
            ErrorClass::Storage           => "storage",
        }
    }
}

impl DuesError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DuesError::InvalidAmount { .. }
            | DuesError::MissingField { .. }
            | DuesError::InvalidField { .. } => ErrorClass::Validation,

            DuesError::ObligationInactive { .. }
            | DuesError::NotYetOpen { .. }
            | DuesError::ActiveWindowExpired { .. }
            | DuesError::AlreadyProcessed { .. }
            | DuesError::NotVoluntary { .. }
            | DuesError::DuplicateContribution { .. }
            | DuesError::DueAlreadyMaterialized { .. }
            | DuesError::AmountExceedsBalance { .. }
            | DuesError::DueAlreadyPaid { .. } => ErrorClass::State,

            DuesError::NotFound { .. } => ErrorClass::NotFound,
            DuesError::PartialProcessing { .. } => ErrorClass::PartialProcessing,

            DuesError::Database(_) | DuesError::Serialization(_) | DuesError::Other(_) => {
                ErrorClass::Storage
            }
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        DuesError::NotFound { kind, id: id.into() }
    }
}

pub type DuesResult<T> = Result<T, DuesError>;
