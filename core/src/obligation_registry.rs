//! Obligation registry: defines campaigns and recurring weekly collections.
//!
//! A campaign is created by an administrator with an explicit window.
//! A weekly collection is opened once per church per ISO week, per-house,
//! variable amount, and prices its non-contributors from the week's average.
//!
//! Fixed-amount obligations are materialized right after creation by the
//! engine (see `DuesEngine::create_obligation`); this module only defines
//! and validates them.

use crate::{
    error::{DuesError, DuesResult},
    event::DuesEvent,
    store::{DuesStore, ObligationRow, TargetRow},
    types::{
        Amount, AmountMode, ChurchId, DueAmountPolicy, EntityKind, EntityRef, ObligationKind,
        TargetScope, TargetType,
    },
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Administrator input for a new obligation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewObligation {
    pub church_id: ChurchId,
    pub name: String,
    pub kind: ObligationKind,
    pub amount_mode: AmountMode,
    pub target_type: TargetType,
    /// Empty means "everyone the target type covers".
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
    pub minimum_amount: Amount,
    #[serde(default)]
    pub due_amount_policy: DueAmountPolicy,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub entity: EntityRef,
    pub custom_amount: Amount,
}

impl ObligationRow {
    /// Contributions are accepted in `[start_at, end_at)`.
    pub fn ensure_accepts_contributions(&self, now: DateTime<Utc>) -> DuesResult<()> {
        if self.amount_mode == AmountMode::Fixed {
            return Err(DuesError::NotVoluntary {
                obligation_id: self.obligation_id.clone(),
            });
        }
        if !self.is_active {
            return Err(DuesError::ObligationInactive {
                obligation_id: self.obligation_id.clone(),
            });
        }
        if self.processed {
            return Err(DuesError::AlreadyProcessed {
                obligation_id: self.obligation_id.clone(),
            });
        }
        if now < self.start_at {
            return Err(DuesError::NotYetOpen {
                obligation_id: self.obligation_id.clone(),
                start_at: self.start_at.to_rfc3339(),
            });
        }
        if now >= self.end_at {
            return Err(DuesError::ActiveWindowExpired {
                obligation_id: self.obligation_id.clone(),
                end_at: self.end_at.to_rfc3339(),
            });
        }
        Ok(())
    }

    /// Eligible for the scheduled sweep at `now`.
    /// Fixed obligations are eligible as soon as they exist.
    pub fn is_due_for_sweep(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && !self.processed
            && match self.amount_mode {
                AmountMode::Fixed => true,
                AmountMode::Variable => self.end_at <= now,
            }
    }

    /// Wallet entry type, e.g. `campaign_per_house_due` or `collection_week7_payment`.
    pub fn ledger_tag(&self, suffix: &str) -> String {
        match (self.kind, self.week_number) {
            (ObligationKind::Collection, Some(week)) => format!("collection_week{week}_{suffix}"),
            (ObligationKind::Collection, None) => format!("collection_{suffix}"),
            (ObligationKind::Campaign, _) => {
                format!("campaign_{}_{suffix}", self.target_type.as_str())
            }
        }
    }
}

/// The ISO week a recurring collection covers: `[monday 00:00, next monday 00:00)` UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionWeek {
    pub year: i32,
    pub week: u32,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl CollectionWeek {
    pub fn containing(at: DateTime<Utc>) -> DuesResult<Self> {
        let iso = at.date_naive().iso_week();
        let monday = NaiveDate::from_isoywd_opt(iso.year(), iso.week(), Weekday::Mon)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| DuesError::InvalidField {
                field: "week_start",
                reason: format!("no ISO week {}-W{:02}", iso.year(), iso.week()),
            })?;
        let start_at = Utc.from_utc_datetime(&monday);
        Ok(Self {
            year: iso.year(),
            week: iso.week(),
            start_at,
            end_at: start_at + Duration::days(7),
        })
    }
}

pub struct ObligationRegistry<'a> {
    store: &'a DuesStore,
}

impl<'a> ObligationRegistry<'a> {
    pub fn new(store: &'a DuesStore) -> Self {
        Self { store }
    }

    pub fn get(&self, obligation_id: &str) -> DuesResult<ObligationRow> {
        self.store
            .get_obligation(obligation_id)?
            .ok_or_else(|| DuesError::not_found("obligation", obligation_id))
    }

    /// Validate and persist a new obligation with its explicit targets.
    pub fn create(&self, spec: &NewObligation, now: DateTime<Utc>) -> DuesResult<ObligationRow> {
        validate(spec)?;

        let row = ObligationRow {
            obligation_id: uuid::Uuid::new_v4().to_string(),
            church_id: spec.church_id.trim().to_string(),
            name: spec.name.trim().to_string(),
            kind: spec.kind,
            amount_mode: spec.amount_mode,
            target_type: spec.target_type,
            target_scope: if spec.targets.is_empty() {
                TargetScope::All
            } else {
                TargetScope::Specific
            },
            minimum_amount: spec.minimum_amount,
            due_amount_policy: spec.due_amount_policy,
            start_at: spec.start_at,
            end_at: spec.end_at,
            is_active: true,
            processed: false,
            processed_at: None,
            total_collected: 0,
            participant_count: 0,
            week_year: None,
            week_number: None,
            created_at: now,
        };

        self.store.immediate(|store| {
            store.insert_obligation(&row)?;
            for target in &spec.targets {
                store.insert_target(&TargetRow {
                    obligation_id: row.obligation_id.clone(),
                    entity: target.entity.clone(),
                    custom_amount: target.custom_amount,
                })?;
            }
            store.append_event(
                &DuesEvent::ObligationCreated {
                    obligation_id: row.obligation_id.clone(),
                    church_id: row.church_id.clone(),
                    kind: row.kind,
                    amount_mode: row.amount_mode,
                },
                now,
            )?;
            Ok(())
        })?;

        log::debug!(
            "created {} obligation {} ({}, {}, {} targets)",
            row.kind,
            row.obligation_id,
            row.amount_mode,
            row.target_type,
            spec.targets.len()
        );
        Ok(row)
    }

    /// Open the collection for the ISO week containing `at`, or return the
    /// one already open. The bool is true when this call created it.
    pub fn open_weekly_collection(
        &self,
        church_id: &str,
        at: DateTime<Utc>,
        default_amount: Amount,
        now: DateTime<Utc>,
    ) -> DuesResult<(ObligationRow, bool)> {
        if church_id.trim().is_empty() {
            return Err(DuesError::MissingField { field: "church_id" });
        }
        if default_amount < 0 {
            return Err(DuesError::InvalidField {
                field: "default_amount",
                reason: format!("{default_amount} is negative"),
            });
        }
        let week = CollectionWeek::containing(at)?;

        self.store.immediate(|store| {
            if let Some(existing) = store.weekly_collection(church_id, week.year, week.week)? {
                return Ok((existing, false));
            }

            let row = ObligationRow {
                obligation_id: uuid::Uuid::new_v4().to_string(),
                church_id: church_id.to_string(),
                name: format!("Weekly collection {}-W{:02}", week.year, week.week),
                kind: ObligationKind::Collection,
                amount_mode: AmountMode::Variable,
                target_type: TargetType::PerHouse,
                target_scope: TargetScope::All,
                minimum_amount: default_amount,
                due_amount_policy: DueAmountPolicy::DerivedAverage,
                start_at: week.start_at,
                end_at: week.end_at,
                is_active: true,
                processed: false,
                processed_at: None,
                total_collected: 0,
                participant_count: 0,
                week_year: Some(week.year),
                week_number: Some(week.week),
                created_at: now,
            };
            store.insert_obligation(&row)?;
            store.append_event(
                &DuesEvent::WeeklyCollectionOpened {
                    obligation_id: row.obligation_id.clone(),
                    church_id: row.church_id.clone(),
                    year: week.year,
                    week: week.week,
                },
                now,
            )?;
            log::info!(
                "opened weekly collection {}-W{:02} for church {church_id}",
                week.year,
                week.week
            );
            Ok((row, true))
        })
    }

    /// Stop accepting contributions and exclude the obligation from sweeps.
    pub fn deactivate(&self, obligation_id: &str, now: DateTime<Utc>) -> DuesResult<ObligationRow> {
        self.store.immediate(|store| {
            if !store.set_obligation_active(obligation_id, false)? {
                return Err(DuesError::not_found("obligation", obligation_id));
            }
            store.append_event(
                &DuesEvent::ObligationDeactivated {
                    obligation_id: obligation_id.to_string(),
                },
                now,
            )
        })?;
        self.get(obligation_id)
    }
}

fn validate(spec: &NewObligation) -> DuesResult<()> {
    if spec.church_id.trim().is_empty() {
        return Err(DuesError::MissingField { field: "church_id" });
    }
    if spec.name.trim().is_empty() {
        return Err(DuesError::MissingField { field: "name" });
    }
    if spec.end_at <= spec.start_at {
        return Err(DuesError::InvalidField {
            field: "end_at",
            reason: "must be after start_at".into(),
        });
    }
    if spec.minimum_amount < 0 {
        return Err(DuesError::InvalidField {
            field: "minimum_amount",
            reason: format!("{} is negative", spec.minimum_amount),
        });
    }
    if spec.due_amount_policy == DueAmountPolicy::DerivedAverage
        && spec.kind != ObligationKind::Collection
    {
        return Err(DuesError::InvalidField {
            field: "due_amount_policy",
            reason: "derived_average applies only to collections".into(),
        });
    }
    if spec.target_type == TargetType::Flexible && spec.targets.is_empty() {
        return Err(DuesError::InvalidField {
            field: "targets",
            reason: "flexible obligations need an explicit target list".into(),
        });
    }
    if spec.amount_mode == AmountMode::Fixed && spec.targets.is_empty() && spec.minimum_amount == 0 {
        return Err(DuesError::InvalidField {
            field: "minimum_amount",
            reason: "a fixed obligation without targets needs an amount".into(),
        });
    }

    let mut seen = HashSet::new();
    for target in &spec.targets {
        if target.entity.id.trim().is_empty() {
            return Err(DuesError::MissingField { field: "targets.entity.id" });
        }
        if target.custom_amount < 0 {
            return Err(DuesError::InvalidField {
                field: "targets.custom_amount",
                reason: format!("{} is negative for {}", target.custom_amount, target.entity),
            });
        }
        let kind_fits = match spec.target_type {
            TargetType::PerMember => target.entity.kind == EntityKind::Member,
            TargetType::PerHouse => target.entity.kind == EntityKind::House,
            TargetType::Flexible => true,
        };
        if !kind_fits {
            return Err(DuesError::InvalidField {
                field: "targets",
                reason: format!("{} does not match target type {}", target.entity, spec.target_type),
            });
        }
        if !seen.insert(&target.entity) {
            return Err(DuesError::InvalidField {
                field: "targets",
                reason: format!("{} listed twice", target.entity),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn collection_week_spans_monday_to_monday() {
        // Thursday 2026-10-15
        let at = Utc.with_ymd_and_hms(2026, 10, 15, 18, 30, 0).unwrap();
        let week = CollectionWeek::containing(at).unwrap();
        assert_eq!(week.year, 2026);
        assert_eq!(week.week, 42);
        assert_eq!(week.start_at, Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap());
        assert_eq!(week.end_at, Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap());
    }

    #[test]
    fn iso_week_can_belong_to_previous_year() {
        let at = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        let week = CollectionWeek::containing(at).unwrap();
        assert_eq!((week.year, week.week), (2026, 53));
    }
}
