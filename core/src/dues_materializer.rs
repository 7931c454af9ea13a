//! Dues materializer: turns non-contributors into dues, exactly once.
//!
//! Per obligation:
//!   1. Nothing to charge when an all-scope obligation has minimum_amount <= 0
//!      (it is still marked processed).
//!   2. Resolve non-contributors.
//!   3. Price them: a derived-average collection charges
//!      round(total_collected / participant_count), falling back to the
//!      default amount when nobody contributed; explicit targets use their
//!      custom amount; everything else uses minimum_amount.
//!   4. One unit per entity, in its own write transaction:
//!      re-check contributor membership → insert due if absent →
//!      only on insert, post the wallet increment.
//!   5. Mark processed only when every unit succeeded.
//!
//! A crash or failure anywhere leaves each entity either fully charged or
//! untouched, so re-running is always safe.

use crate::{
    error::{DuesError, DuesResult},
    event::DuesEvent,
    non_contributor_resolver::NonContributorResolver,
    store::{DueRow, DuesStore, ObligationRow, WalletEntryRow},
    types::{Amount, DueAmountPolicy, EntityKind, EntityRef, ObligationId, ObligationKind, TargetScope},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of one sweep (or one explicit single-obligation request).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub obligations_processed: usize,
    /// Dues created for members.
    pub members_processed: usize,
    /// Dues created for houses.
    pub houses_processed: usize,
    pub obligations_failed: usize,
    pub failures: Vec<SweepFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub obligation_id: ObligationId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObligationOutcome {
    pub members: usize,
    pub houses: usize,
    /// Units whose due already existed (earlier, interrupted run).
    pub already_materialized: usize,
    /// Units that became contributors after the snapshot, or priced at zero.
    pub skipped: usize,
    pub failures: Vec<EntityFailure>,
}

impl ObligationOutcome {
    pub fn succeeded(&self) -> usize {
        self.members + self.houses + self.already_materialized + self.skipped
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    pub entity: EntityRef,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Created,
    AlreadyMaterialized,
    Contributed,
    ZeroAmount,
}

#[derive(Debug, Clone)]
struct DueUnit {
    entity: EntityRef,
    name: String,
    amount: Amount,
}

/// Average contribution, rounded half away from zero to the minor unit.
/// Falls back to `default_amount` when nobody contributed.
pub fn derived_due_amount(
    total_collected: Amount,
    participant_count: i64,
    default_amount: Amount,
) -> Amount {
    if participant_count <= 0 {
        return default_amount;
    }
    let quotient = total_collected / participant_count;
    let remainder = total_collected % participant_count;
    if 2 * remainder.abs() >= participant_count {
        quotient + total_collected.signum()
    } else {
        quotient
    }
}

/// Amount charged to a non-contributor with no per-target override.
pub fn due_amount(obligation: &ObligationRow) -> Amount {
    match (obligation.kind, obligation.due_amount_policy) {
        (ObligationKind::Collection, DueAmountPolicy::DerivedAverage) => derived_due_amount(
            obligation.total_collected,
            obligation.participant_count,
            obligation.minimum_amount,
        ),
        _ => obligation.minimum_amount,
    }
}

pub struct DuesMaterializer<'a> {
    store: &'a DuesStore,
    parallelism: usize,
}

impl<'a> DuesMaterializer<'a> {
    pub fn new(store: &'a DuesStore, parallelism: usize) -> Self {
        Self {
            store,
            parallelism: parallelism.max(1),
        }
    }

    // ── Entry points ───────────────────────────────────────────────

    /// Process every obligation eligible at `now`. One obligation's failure
    /// is logged and swept past; the report says what happened to each.
    /// The `SweepCompleted` summary is left to the caller (see `DuesSweepJob`).
    pub fn sweep(&self, now: DateTime<Utc>) -> DuesResult<SweepReport> {
        let candidates: Vec<ObligationRow> = self
            .store
            .unprocessed_obligations()?
            .into_iter()
            .filter(|o| o.is_due_for_sweep(now))
            .collect();

        let mut report = SweepReport::default();
        for obligation in &candidates {
            match self.materialize(obligation, now) {
                Ok(outcome) => {
                    report.members_processed += outcome.members;
                    report.houses_processed += outcome.houses;
                    if outcome.failures.is_empty() {
                        report.obligations_processed += 1;
                    } else {
                        report.obligations_failed += 1;
                        report.failures.push(SweepFailure {
                            obligation_id: obligation.obligation_id.clone(),
                            reason: format!(
                                "{} of {} entities failed",
                                outcome.failures.len(),
                                outcome.failures.len() + outcome.succeeded()
                            ),
                        });
                    }
                }
                Err(e) => {
                    log::warn!("sweep: obligation {} failed: {e}", obligation.obligation_id);
                    report.obligations_failed += 1;
                    report.failures.push(SweepFailure {
                        obligation_id: obligation.obligation_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "sweep: {} candidates, {} processed, {} failed, {} member dues, {} house dues",
            candidates.len(),
            report.obligations_processed,
            report.obligations_failed,
            report.members_processed,
            report.houses_processed
        );
        Ok(report)
    }

    /// Process one obligation on request, regardless of its due date.
    /// Already processed → empty report. Any entity failure →
    /// `PartialProcessing` (the obligation stays unprocessed for retry).
    pub fn process_one(&self, obligation_id: &str, now: DateTime<Utc>) -> DuesResult<SweepReport> {
        let obligation = self
            .store
            .get_obligation(obligation_id)?
            .ok_or_else(|| DuesError::not_found("obligation", obligation_id))?;

        if obligation.processed {
            log::debug!("obligation {obligation_id} already processed; nothing to do");
            return Ok(SweepReport::default());
        }
        if !obligation.is_active {
            return Err(DuesError::ObligationInactive {
                obligation_id: obligation_id.to_string(),
            });
        }

        let outcome = self.materialize(&obligation, now)?;
        if !outcome.failures.is_empty() {
            return Err(DuesError::PartialProcessing {
                obligation_id: obligation_id.to_string(),
                succeeded: outcome.succeeded(),
                failed: outcome.failures.len(),
            });
        }
        Ok(SweepReport {
            obligations_processed: 1,
            members_processed: outcome.members,
            houses_processed: outcome.houses,
            ..SweepReport::default()
        })
    }

    // ── Per obligation ─────────────────────────────────────────────

    pub fn materialize(
        &self,
        obligation: &ObligationRow,
        now: DateTime<Utc>,
    ) -> DuesResult<ObligationOutcome> {
        let mut outcome = ObligationOutcome::default();

        if obligation.target_scope == TargetScope::All && obligation.minimum_amount <= 0 {
            log::debug!(
                "obligation {}: minimum amount is {}, no dues to create",
                obligation.obligation_id,
                obligation.minimum_amount
            );
        } else {
            let amount = due_amount(obligation);
            let units: Vec<DueUnit> = NonContributorResolver::new(self.store)
                .resolve(obligation)?
                .into_iter()
                .map(|nc| DueUnit {
                    amount: nc.custom_amount.unwrap_or(amount),
                    entity: nc.entity,
                    name: nc.name,
                })
                .collect();

            let results = match self.store.path() {
                Some(path) if self.parallelism > 1 && units.len() > 1 => materialize_parallel(
                    path,
                    self.store.busy_timeout(),
                    obligation,
                    &units,
                    self.parallelism,
                    now,
                ),
                _ => units
                    .iter()
                    .map(|unit| {
                        let result = materialize_unit(self.store, obligation, unit, now)
                            .map_err(|e| e.to_string());
                        (unit.entity.clone(), result)
                    })
                    .collect(),
            };

            for (entity, result) in results {
                match result {
                    Ok(UnitOutcome::Created) => match entity.kind {
                        EntityKind::Member => outcome.members += 1,
                        EntityKind::House => outcome.houses += 1,
                    },
                    Ok(UnitOutcome::AlreadyMaterialized) => outcome.already_materialized += 1,
                    Ok(UnitOutcome::Contributed) | Ok(UnitOutcome::ZeroAmount) => outcome.skipped += 1,
                    Err(reason) => {
                        log::warn!(
                            "obligation {}: due for {entity} failed: {reason}",
                            obligation.obligation_id
                        );
                        outcome.failures.push(EntityFailure { entity, reason });
                    }
                }
            }
        }

        if outcome.failures.is_empty() {
            self.store.immediate(|store| {
                if store.mark_obligation_processed(&obligation.obligation_id, now)? {
                    store.append_event(
                        &DuesEvent::ObligationProcessed {
                            obligation_id: obligation.obligation_id.clone(),
                            members: outcome.members,
                            houses: outcome.houses,
                        },
                        now,
                    )?;
                }
                Ok(())
            })?;
            log::debug!(
                "obligation {} processed: {} member dues, {} house dues, {} existing, {} skipped",
                obligation.obligation_id,
                outcome.members,
                outcome.houses,
                outcome.already_materialized,
                outcome.skipped
            );
        }
        Ok(outcome)
    }
}

// ── Per entity ─────────────────────────────────────────────────────

/// The idempotent unit keyed by (obligation_id, entity_id). The wallet
/// increment happens only on the branch that created the due.
fn materialize_unit(
    store: &DuesStore,
    obligation: &ObligationRow,
    unit: &DueUnit,
    now: DateTime<Utc>,
) -> DuesResult<UnitOutcome> {
    if unit.amount <= 0 {
        return Ok(UnitOutcome::ZeroAmount);
    }

    store.immediate(|store| {
        // Re-check: a contribution may have landed after the snapshot.
        if store.contributor(&obligation.obligation_id, &unit.entity)?.is_some() {
            return Ok(UnitOutcome::Contributed);
        }

        let due = DueRow {
            due_id: uuid::Uuid::new_v4().to_string(),
            obligation_id: obligation.obligation_id.clone(),
            obligation_name: obligation.name.clone(),
            entity: unit.entity.clone(),
            name_snapshot: unit.name.clone(),
            amount: unit.amount,
            paid_amount: 0,
            balance: unit.amount,
            is_paid: false,
            transaction_id: None,
            due_date: obligation.end_at,
            created_at: now,
        };
        if !store.insert_due_if_absent(&due)? {
            return Ok(UnitOutcome::AlreadyMaterialized);
        }

        store.post_wallet_entry(&WalletEntryRow {
            entry_id: None,
            entity: unit.entity.clone(),
            transaction_id: None,
            obligation_id: Some(obligation.obligation_id.clone()),
            amount: unit.amount,
            entry_type: obligation.ledger_tag("due"),
            created_at: now,
        })?;
        store.append_event(
            &DuesEvent::DueMaterialized {
                obligation_id: obligation.obligation_id.clone(),
                due_id: due.due_id.clone(),
                entity: unit.entity.clone(),
                amount: unit.amount,
            },
            now,
        )?;
        Ok(UnitOutcome::Created)
    })
}

/// Split the units across at most `workers` threads, each with its own
/// connection to the same database file.
fn materialize_parallel(
    path: &str,
    busy_timeout: Duration,
    obligation: &ObligationRow,
    units: &[DueUnit],
    workers: usize,
    now: DateTime<Utc>,
) -> Vec<(EntityRef, Result<UnitOutcome, String>)> {
    let chunk_size = units.len().div_ceil(workers);

    std::thread::scope(|scope| {
        let handles: Vec<_> = units
            .chunks(chunk_size)
            .map(|chunk| {
                let handle = scope.spawn(move || -> DuesResult<Vec<_>> {
                    let store = DuesStore::open_with_timeout(path, busy_timeout)?;
                    Ok(chunk
                        .iter()
                        .map(|unit| {
                            let result = materialize_unit(&store, obligation, unit, now)
                                .map_err(|e| e.to_string());
                            (unit.entity.clone(), result)
                        })
                        .collect())
                });
                (chunk, handle)
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|(chunk, handle)| {
                let failed = |reason: String| -> Vec<(EntityRef, Result<UnitOutcome, String>)> {
                    chunk
                        .iter()
                        .map(|unit| (unit.entity.clone(), Err(reason.clone())))
                        .collect()
                };
                match handle.join() {
                    Ok(Ok(results)) => results,
                    Ok(Err(e)) => failed(format!("worker could not open the store: {e}")),
                    Err(_) => failed("worker panicked".to_string()),
                }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_amount_is_the_average_contribution() {
        assert_eq!(derived_due_amount(30_000, 3, 50_000), 10_000);
    }

    #[test]
    fn derived_amount_falls_back_without_contributors() {
        assert_eq!(derived_due_amount(0, 0, 50_000), 50_000);
    }

    #[test]
    fn derived_amount_rounds_half_away_from_zero() {
        assert_eq!(derived_due_amount(100, 3, 0), 33);
        assert_eq!(derived_due_amount(200, 3, 0), 67);
        assert_eq!(derived_due_amount(5, 2, 0), 3);
    }
}
