//! Daily scheduler.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Weekly collection opener  (only if collections.auto_open_weekly)
//!   2. Dues sweep                (ProcessDues for every eligible obligation)
//!   3. Payment reconciliation    (re-apply pending due-payment steps)
//!
//! RULES:
//!   - The only state is the next run time.
//!   - Jobs call the same engine operations manual callers use.
//!   - A failing job is logged; later jobs still run.

use crate::{
    config::{EngineConfig, ScheduleConfig},
    engine::DuesEngine,
    error::DuesResult,
    event::DuesEvent,
    job::ScheduledJob,
};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub job: String,
    pub reason: String,
}

/// What one scheduler run did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub ran_at: DateTime<Utc>,
    pub jobs_run: Vec<String>,
    pub events: Vec<DuesEvent>,
    pub failures: Vec<JobFailure>,
}

pub struct Scheduler {
    sweep_time: NaiveTime,
    next_run: DateTime<Utc>,
    jobs: Vec<Box<dyn ScheduledJob>>,
}

impl Scheduler {
    pub fn new(schedule: &ScheduleConfig, now: DateTime<Utc>) -> Self {
        let sweep_time = NaiveTime::from_hms_opt(schedule.sweep_hour, schedule.sweep_minute, 0)
            .unwrap_or_else(|| {
                log::warn!(
                    "invalid sweep time {:02}:{:02}; using midnight",
                    schedule.sweep_hour,
                    schedule.sweep_minute
                );
                NaiveTime::default()
            });
        let mut scheduler = Self {
            sweep_time,
            next_run: now,
            jobs: Vec::new(),
        };
        if !schedule.run_on_start {
            scheduler.next_run = scheduler.next_run_after(now);
        }
        scheduler
    }

    /// Build a scheduler with all jobs registered.
    /// Call this instead of new() + manual register() calls.
    pub fn build(config: &EngineConfig, now: DateTime<Utc>) -> Self {
        let mut scheduler = Scheduler::new(&config.schedule, now);

        // EXECUTION ORDER: fixed, documented, never reordered.
        if config.collections.auto_open_weekly {
            scheduler.register(Box::new(WeeklyCollectionJob));
        }
        scheduler.register(Box::new(DuesSweepJob));
        scheduler.register(Box::new(PaymentReconciliationJob));
        scheduler
    }

    /// Register a job. Call in the documented execution order.
    pub fn register(&mut self, job: Box<dyn ScheduledJob>) {
        self.jobs.push(job);
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    pub fn next_run(&self) -> DateTime<Utc> {
        self.next_run
    }

    /// First scheduled time strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = Utc.from_utc_datetime(&now.date_naive().and_time(self.sweep_time));
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }

    /// Run the jobs if the schedule is due at the engine's current time.
    /// Returns None when it is not time yet.
    pub fn tick(&mut self, engine: &DuesEngine) -> DuesResult<Option<TickReport>> {
        let now = engine.now();
        if now < self.next_run {
            return Ok(None);
        }
        let report = self.run_now(engine)?;
        self.next_run = self.next_run_after(now);
        log::debug!("next scheduled run at {}", self.next_run);
        Ok(Some(report))
    }

    /// Run every job once, in order, without touching the schedule.
    pub fn run_now(&mut self, engine: &DuesEngine) -> DuesResult<TickReport> {
        let now = engine.now();
        let mut report = TickReport {
            ran_at: now,
            jobs_run: Vec::new(),
            events: Vec::new(),
            failures: Vec::new(),
        };

        for job in &mut self.jobs {
            report.jobs_run.push(job.name().to_string());
            match job.run(engine) {
                Ok(events) => {
                    // Persist each summary event to the log.
                    for event in &events {
                        engine.store.append_event(event, now)?;
                    }
                    report.events.extend(events);
                }
                Err(e) => {
                    log::warn!("scheduled job {} failed: {e}", job.name());
                    report.failures.push(JobFailure {
                        job: job.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}

// ── Jobs ───────────────────────────────────────────────────────────

/// Opens the current ISO week's collection for every church.
pub struct WeeklyCollectionJob;

impl ScheduledJob for WeeklyCollectionJob {
    fn name(&self) -> &'static str {
        "weekly_collection"
    }

    fn run(&mut self, engine: &DuesEngine) -> DuesResult<Vec<DuesEvent>> {
        let now = engine.now();
        for church_id in engine.store.church_ids()? {
            if let Err(e) = engine.open_weekly_collection(&church_id, now) {
                log::warn!("could not open weekly collection for church {church_id}: {e}");
            }
        }
        Ok(Vec::new())
    }
}

pub struct DuesSweepJob;

impl ScheduledJob for DuesSweepJob {
    fn name(&self) -> &'static str {
        "dues_sweep"
    }

    fn run(&mut self, engine: &DuesEngine) -> DuesResult<Vec<DuesEvent>> {
        let report = engine.process_dues(None)?;
        Ok(vec![DuesEvent::SweepCompleted {
            obligations_processed: report.obligations_processed,
            obligations_failed: report.obligations_failed,
            members_processed: report.members_processed,
            houses_processed: report.houses_processed,
        }])
    }
}

pub struct PaymentReconciliationJob;

impl ScheduledJob for PaymentReconciliationJob {
    fn name(&self) -> &'static str {
        "payment_reconciliation"
    }

    fn run(&mut self, engine: &DuesEngine) -> DuesResult<Vec<DuesEvent>> {
        let report = engine.reconcile_payments()?;
        if report.reconciled == 0 && report.failed == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![DuesEvent::PaymentsReconciled {
            reconciled: report.reconciled,
            failed: report.failed,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn schedule(run_on_start: bool) -> ScheduleConfig {
        ScheduleConfig {
            sweep_hour: 0,
            sweep_minute: 5,
            run_on_start,
            poll_interval_secs: 60,
        }
    }

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        let s = Scheduler::new(&schedule(false), at("2026-10-16T00:00:00Z"));
        assert_eq!(s.next_run(), at("2026-10-16T00:05:00Z"));
        assert_eq!(s.next_run_after(at("2026-10-16T00:05:00Z")), at("2026-10-17T00:05:00Z"));
        assert_eq!(s.next_run_after(at("2026-10-16T13:00:00Z")), at("2026-10-17T00:05:00Z"));
    }

    #[test]
    fn run_on_start_fires_immediately() {
        let now = at("2026-10-16T13:00:00Z");
        let s = Scheduler::new(&schedule(true), now);
        assert_eq!(s.next_run(), now);
    }

    #[test]
    fn build_registers_jobs_in_fixed_order() {
        let mut config = EngineConfig::default_test();
        config.collections.auto_open_weekly = true;
        let s = Scheduler::build(&config, at("2026-10-16T00:00:00Z"));
        assert_eq!(
            s.job_names(),
            vec!["weekly_collection", "dues_sweep", "payment_reconciliation"]
        );

        config.collections.auto_open_weekly = false;
        let s = Scheduler::build(&config, at("2026-10-16T00:00:00Z"));
        assert_eq!(s.job_names(), vec!["dues_sweep", "payment_reconciliation"]);
    }
}
