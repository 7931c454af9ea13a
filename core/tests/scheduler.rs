//! Integration tests for the daily scheduler.
//!
//! The scheduler has no state beyond its next run time and drives the same
//! operations manual callers use.

mod common;

use chrono::Duration;
use common::*;
use dues_core::{
    clock::ManualClock,
    config::EngineConfig,
    engine::DuesEngine,
    event::DuesEvent,
    scheduler::Scheduler,
    types::{PaymentMethod, TargetType, TransactionKind},
};
use std::sync::Arc;

fn build_with_collections() -> (DuesEngine, Arc<ManualClock>) {
    let mut config = EngineConfig::default_test();
    config.collections.auto_open_weekly = true;
    config.collections.default_weekly_amount = 500;
    let clock = Arc::new(ManualClock::new(at("2026-10-02T09:00:00Z")));
    let engine = DuesEngine::build(config, clock.clone()).expect("build failed");
    seed_population(&engine.store);
    (engine, clock)
}

#[test]
fn tick_before_the_sweep_time_does_nothing() {
    let (engine, clock) = build();
    let mut scheduler = Scheduler::build(&engine.config, engine.now());
    assert_eq!(scheduler.next_run(), at("2026-10-03T00:05:00Z"));

    clock.set(at("2026-10-03T00:04:59Z"));
    assert!(scheduler.tick(&engine).unwrap().is_none());
}

#[test]
fn scheduled_sweep_matches_a_manual_one() {
    let (engine, clock) = build();
    let ob = engine.create_obligation(&campaign(TargetType::PerMember, 700)).unwrap();
    engine
        .record_contribution(&ob.obligation_id, &member("m-3"), 900, PaymentMethod::Cash)
        .unwrap();
    let mut scheduler = Scheduler::build(&engine.config, engine.now());

    clock.set(at("2026-10-08T00:05:00Z"));
    let report = scheduler.tick(&engine).unwrap().expect("schedule was due");
    assert!(report.failures.is_empty());
    assert_eq!(report.jobs_run, vec!["dues_sweep", "payment_reconciliation"]);
    assert_eq!(
        report.events,
        vec![DuesEvent::SweepCompleted {
            obligations_processed: 1,
            obligations_failed: 0,
            members_processed: 2,
            houses_processed: 0,
        }]
    );
    assert_eq!(scheduler.next_run(), at("2026-10-09T00:05:00Z"));
    let logged = engine.store.events_of_type("sweep_completed").unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].decode().unwrap(), report.events[0]);

    // Same minute again: nothing runs until tomorrow.
    assert!(scheduler.tick(&engine).unwrap().is_none());
    assert_eq!(engine.store.dues_for_obligation(&ob.obligation_id).unwrap().len(), 2);
}

#[test]
fn reconciliation_job_picks_up_pending_payments() {
    let (engine, clock) = build();
    let ob = engine
        .create_obligation(&targeted(&[(member("m-1"), 300)]))
        .unwrap();
    engine.process_dues(Some(&ob.obligation_id)).unwrap();
    let due = engine.store.due_for(&ob.obligation_id, &member("m-1")).unwrap().unwrap();

    // Receipt committed; follow-up steps never ran.
    engine
        .store
        .immediate(|store| {
            store.insert_transaction(&dues_core::store::TransactionRow {
                transaction_id: "txn-pending".into(),
                church_id: CHURCH.into(),
                entity: member("m-1"),
                amount: 300,
                obligation_id: ob.obligation_id.clone(),
                due_id: Some(due.due_id.clone()),
                method: PaymentMethod::Cash,
                kind: TransactionKind::DuePayment,
                obligation_applied: false,
                wallet_applied: false,
                created_at: at("2026-10-02T10:00:00Z"),
            })?;
            store.apply_due_payment(&due.due_id, 300, "txn-pending")?;
            Ok(())
        })
        .unwrap();

    let mut scheduler = Scheduler::build(&engine.config, engine.now());
    clock.advance(Duration::days(1));
    let report = scheduler.tick(&engine).unwrap().expect("schedule was due");
    assert!(report
        .events
        .contains(&DuesEvent::PaymentsReconciled { reconciled: 1, failed: 0 }));
    assert_eq!(engine.wallet(&member("m-1")).unwrap().balance, 0);
    assert!(engine.audit().unwrap().is_empty());
}

#[test]
fn weekly_collections_open_and_close_on_schedule() {
    let (engine, clock) = build_with_collections();
    let mut scheduler = Scheduler::build(&engine.config, engine.now());
    assert_eq!(
        scheduler.job_names(),
        vec!["weekly_collection", "dues_sweep", "payment_reconciliation"]
    );

    // Saturday 2026-10-03: opens W40 (2026-09-28 .. 2026-10-05).
    clock.set(at("2026-10-03T00:05:00Z"));
    scheduler.tick(&engine).unwrap().expect("due");
    let w40 = engine.store.weekly_collection(CHURCH, 2026, 40).unwrap().expect("W40 open");
    engine
        .record_contribution(&w40.obligation_id, &house("h-1"), 800, PaymentMethod::Cash)
        .unwrap();

    // Sunday: same week, nothing new.
    clock.set(at("2026-10-04T00:05:00Z"));
    scheduler.tick(&engine).unwrap().expect("due");
    assert!(engine.store.weekly_collection(CHURCH, 2026, 41).unwrap().is_none());

    // Monday: W41 opens, W40 closes and is swept at the average of 800.
    clock.set(at("2026-10-05T00:05:00Z"));
    let report = scheduler.tick(&engine).unwrap().expect("due");
    assert!(report.failures.is_empty());
    assert!(engine.store.weekly_collection(CHURCH, 2026, 41).unwrap().is_some());

    let w40 = engine.obligation(&w40.obligation_id).unwrap();
    assert!(w40.processed);
    let dues = engine.store.dues_for_obligation(&w40.obligation_id).unwrap();
    assert_eq!(dues.len(), 3);
    assert!(dues.iter().all(|d| d.amount == 800));
}

#[test]
fn run_now_ignores_the_schedule() {
    let (engine, _clock) = build();
    let mut scheduler = Scheduler::build(&engine.config, engine.now());
    let next = scheduler.next_run();

    let report = scheduler.run_now(&engine).unwrap();
    assert_eq!(report.jobs_run.len(), 2);
    assert_eq!(scheduler.next_run(), next);
}
