//! Integration tests for the dues sweep.
//!
//! Tests verify the materializer's core behaviours:
//! 1. Non-contributors get exactly one due and one wallet increment
//! 2. Re-running the sweep creates nothing and moves no balance
//! 3. Collections price dues from the average contribution
//! 4. Only closed, active, unprocessed obligations are swept
//! 5. Fixed obligations are materialized on creation

mod common;

use chrono::Duration;
use common::*;
use dues_core::{
    dues_materializer::SweepReport,
    error::DuesError,
    store::{DueRow, WalletEntryRow},
    types::{AmountMode, EntityRef, PaymentMethod, TargetType},
};

fn close_window(clock: &dues_core::clock::ManualClock) {
    clock.set(at(CLOSES) + Duration::minutes(5));
}

fn due_entities(engine: &dues_core::engine::DuesEngine, obligation_id: &str) -> Vec<EntityRef> {
    engine
        .store
        .dues_for_obligation(obligation_id)
        .unwrap()
        .into_iter()
        .map(|d| d.entity)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: minimum 100, three targets, one voluntary contribution of 150
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn sweep_charges_only_non_contributors() {
    let (engine, clock) = build();
    let ob = engine
        .create_obligation(&targeted(&[
            (member("m-1"), 100),
            (member("m-2"), 100),
            (member("m-3"), 100),
        ]))
        .unwrap();
    engine
        .record_contribution(&ob.obligation_id, &member("m-1"), 150, PaymentMethod::Cash)
        .unwrap();

    close_window(&clock);
    let report = engine.process_dues(None).unwrap();
    assert_eq!(report.obligations_processed, 1);
    assert_eq!(report.members_processed, 2);
    assert_eq!(report.houses_processed, 0);
    assert_eq!(report.obligations_failed, 0);

    let dues = engine.store.dues_for_obligation(&ob.obligation_id).unwrap();
    assert_eq!(dues.len(), 2);
    for due in &dues {
        assert_eq!(due.amount, 100);
        assert_eq!(due.balance, 100);
        assert!(!due.is_paid);
        assert_eq!(due.due_date, at(CLOSES));
    }
    assert_eq!(due_entities(&engine, &ob.obligation_id), vec![member("m-2"), member("m-3")]);

    assert_eq!(engine.wallet(&member("m-1")).unwrap().balance, 0);
    assert_eq!(engine.wallet(&member("m-2")).unwrap().balance, 100);
    assert_eq!(engine.wallet(&member("m-3")).unwrap().balance, 100);

    let ob = engine.obligation(&ob.obligation_id).unwrap();
    assert!(ob.processed);
    assert!(ob.processed_at.is_some());
    assert_eq!(ob.total_collected, 150, "totals move only when dues are paid");
}

#[test]
fn due_snapshots_names_and_tags_wallet_entries() {
    let (engine, clock) = build();
    let ob = engine.create_obligation(&campaign(TargetType::PerMember, 2_000)).unwrap();
    close_window(&clock);
    engine.process_dues(None).unwrap();

    let dues = engine.dues_for_entity(&member("m-2")).unwrap();
    assert_eq!(dues.dues.len(), 1);
    assert_eq!(dues.dues[0].name_snapshot, "Biju");
    assert_eq!(dues.dues[0].obligation_name, "Roof fund");

    let wallet = engine.wallet(&member("m-2")).unwrap();
    assert_eq!(wallet.entries.len(), 1);
    let entry: &WalletEntryRow = &wallet.entries[0];
    assert_eq!(entry.amount, 2_000);
    assert_eq!(entry.entry_type, "campaign_per_member_due");
    assert_eq!(entry.obligation_id.as_deref(), Some(ob.obligation_id.as_str()));
    assert_eq!(entry.transaction_id, None);
}

#[test]
fn per_member_population_excludes_inactive_members() {
    let (engine, clock) = build();
    let ob = engine.create_obligation(&campaign(TargetType::PerMember, 500)).unwrap();
    close_window(&clock);

    let report = engine.process_dues(None).unwrap();
    assert_eq!(report.members_processed, 3);
    assert_eq!(
        due_entities(&engine, &ob.obligation_id),
        vec![member("m-1"), member("m-2"), member("m-3")]
    );
    assert_eq!(engine.wallet(&member("m-4")).unwrap().balance, 0);
}

#[test]
fn per_house_population_walks_the_hierarchy() {
    let (engine, clock) = build();
    let ob = engine.create_obligation(&campaign(TargetType::PerHouse, 500)).unwrap();
    engine
        .record_contribution(&ob.obligation_id, &house("h-3"), 800, PaymentMethod::Cash)
        .unwrap();
    close_window(&clock);

    let report = engine.process_dues(None).unwrap();
    assert_eq!(report.houses_processed, 3);
    assert_eq!(report.members_processed, 0);
    assert_eq!(
        due_entities(&engine, &ob.obligation_id),
        vec![house("h-1"), house("h-2"), house("h-4")]
    );
}

#[test]
fn zero_minimum_creates_no_dues_but_is_processed() {
    let (engine, clock) = build();
    let ob = engine.create_obligation(&campaign(TargetType::PerMember, 0)).unwrap();
    close_window(&clock);

    let report = engine.process_dues(None).unwrap();
    assert_eq!(report.obligations_processed, 1);
    assert_eq!(report.members_processed, 0);
    assert!(engine.store.dues_for_obligation(&ob.obligation_id).unwrap().is_empty());
    assert!(engine.obligation(&ob.obligation_id).unwrap().processed);
}

#[test]
fn zero_custom_amount_targets_are_skipped() {
    let (engine, clock) = build();
    let ob = engine
        .create_obligation(&targeted(&[(member("m-1"), 0), (member("m-2"), 300)]))
        .unwrap();
    close_window(&clock);

    let report = engine.process_dues(None).unwrap();
    assert_eq!(report.members_processed, 1);
    assert_eq!(due_entities(&engine, &ob.obligation_id), vec![member("m-2")]);
}

#[test]
fn member_and_house_sharing_an_id_are_each_charged() {
    let (engine, clock) = build();
    engine.store.register_member("x-1", CHURCH, Some("h-1"), "Xavier").unwrap();
    engine.store.register_house("x-1", "g-1", "Xavier house").unwrap();
    let ob = engine
        .create_obligation(&targeted(&[(member("x-1"), 100), (house("x-1"), 200)]))
        .unwrap();
    close_window(&clock);

    let report = engine.process_dues(None).unwrap();
    assert_eq!(report.members_processed, 1);
    assert_eq!(report.houses_processed, 1);
    assert_eq!(report.obligations_failed, 0);

    assert_eq!(
        due_entities(&engine, &ob.obligation_id),
        vec![house("x-1"), member("x-1")]
    );
    assert_eq!(engine.wallet(&member("x-1")).unwrap().balance, 100);
    assert_eq!(engine.wallet(&house("x-1")).unwrap().balance, 200);
    let house_due = engine.store.due_for(&ob.obligation_id, &house("x-1")).unwrap().unwrap();
    assert_eq!(house_due.amount, 200);
    assert!(engine.obligation(&ob.obligation_id).unwrap().processed);
    assert!(engine.audit().unwrap().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: idempotency
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn rerunning_the_sweep_is_a_no_op() {
    let (engine, clock) = build();
    let ob = engine.create_obligation(&campaign(TargetType::PerMember, 1_000)).unwrap();
    close_window(&clock);

    let first = engine.process_dues(None).unwrap();
    assert_eq!(first.members_processed, 3);

    clock.advance(Duration::days(1));
    let second = engine.process_dues(None).unwrap();
    assert_eq!(second, SweepReport::default());

    let again = engine.process_dues(Some(&ob.obligation_id)).unwrap();
    assert_eq!(again, SweepReport::default());

    assert_eq!(engine.store.dues_for_obligation(&ob.obligation_id).unwrap().len(), 3);
    for id in ["m-1", "m-2", "m-3"] {
        let wallet = engine.wallet(&member(id)).unwrap();
        assert_eq!(wallet.balance, 1_000);
        assert_eq!(wallet.entries.len(), 1);
    }

    let processed_events = engine
        .events_for_obligation(&ob.obligation_id)
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == "obligation_processed")
        .count();
    assert_eq!(processed_events, 1);
}

#[test]
fn existing_due_from_an_interrupted_run_is_not_charged_twice() {
    let (engine, clock) = build();
    let ob = engine.create_obligation(&campaign(TargetType::PerMember, 1_000)).unwrap();
    close_window(&clock);

    // m-2's unit committed before the previous run died.
    engine
        .store
        .immediate(|store| {
            store.insert_due_if_absent(&DueRow {
                due_id: "due-from-earlier-run".into(),
                obligation_id: ob.obligation_id.clone(),
                obligation_name: ob.name.clone(),
                entity: member("m-2"),
                name_snapshot: "Biju".into(),
                amount: 1_000,
                paid_amount: 0,
                balance: 1_000,
                is_paid: false,
                transaction_id: None,
                due_date: ob.end_at,
                created_at: at(CLOSES),
            })?;
            store.post_wallet_entry(&WalletEntryRow {
                entry_id: None,
                entity: member("m-2"),
                transaction_id: None,
                obligation_id: Some(ob.obligation_id.clone()),
                amount: 1_000,
                entry_type: "campaign_per_member_due".into(),
                created_at: at(CLOSES),
            })
        })
        .unwrap();

    let report = engine.process_dues(None).unwrap();
    assert_eq!(report.members_processed, 2, "only m-1 and m-3 are new");
    assert_eq!(engine.wallet(&member("m-2")).unwrap().balance, 1_000);
    assert_eq!(
        engine.store.due_for(&ob.obligation_id, &member("m-2")).unwrap().unwrap().due_id,
        "due-from-earlier-run"
    );
    assert!(engine.audit().unwrap().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: weekly collections
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn collection_dues_use_the_average_contribution() {
    let (engine, clock) = build();
    clock.set(at("2026-10-07T10:00:00Z")); // Wednesday of 2026-W41
    let ob = engine.open_weekly_collection(CHURCH, engine.now()).unwrap();
    assert_eq!(ob.week_number, Some(41));
    assert_eq!(ob.start_at, at("2026-10-05T00:00:00Z"));
    assert_eq!(ob.end_at, at("2026-10-12T00:00:00Z"));

    for (h, amount) in [("h-1", 50), ("h-2", 100), ("h-3", 150)] {
        engine
            .record_contribution(&ob.obligation_id, &house(h), amount, PaymentMethod::Cash)
            .unwrap();
    }
    let ob = engine.obligation(&ob.obligation_id).unwrap();
    assert_eq!((ob.total_collected, ob.participant_count), (300, 3));

    clock.set(at("2026-10-12T00:05:00Z"));
    let report = engine.process_dues(None).unwrap();
    assert_eq!(report.houses_processed, 1);

    let due = engine.store.due_for(&ob.obligation_id, &house("h-4")).unwrap().unwrap();
    assert_eq!(due.amount, 100, "average, not the 10000 default");

    let wallet = engine.wallet(&house("h-4")).unwrap();
    assert_eq!(wallet.entries[0].entry_type, "collection_week41_due");
}

#[test]
fn collection_without_contributors_uses_the_default_amount() {
    let (engine, clock) = build();
    let ob = engine.open_weekly_collection(CHURCH, engine.now()).unwrap();
    clock.set(ob.end_at);

    let report = engine.process_dues(None).unwrap();
    assert_eq!(report.houses_processed, 4);
    for due in engine.store.dues_for_obligation(&ob.obligation_id).unwrap() {
        assert_eq!(due.amount, engine.config.collections.default_weekly_amount);
    }
}

#[test]
fn weekly_collection_opens_once_per_week() {
    let (engine, clock) = build();
    let first = engine.open_weekly_collection(CHURCH, engine.now()).unwrap();
    clock.advance(Duration::days(1));
    let again = engine.open_weekly_collection(CHURCH, engine.now()).unwrap();
    assert_eq!(first.obligation_id, again.obligation_id);

    let next_week = engine
        .open_weekly_collection(CHURCH, engine.now() + Duration::days(7))
        .unwrap();
    assert_ne!(first.obligation_id, next_week.obligation_id);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: eligibility
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn open_obligations_are_not_swept() {
    let (engine, _clock) = build();
    let ob = engine.create_obligation(&campaign(TargetType::PerMember, 100)).unwrap();

    let report = engine.process_dues(None).unwrap();
    assert_eq!(report, SweepReport::default());
    assert!(!engine.obligation(&ob.obligation_id).unwrap().processed);
}

#[test]
fn explicit_request_ignores_the_due_date() {
    let (engine, _clock) = build();
    let ob = engine.create_obligation(&campaign(TargetType::PerMember, 100)).unwrap();

    let report = engine.process_dues(Some(&ob.obligation_id)).unwrap();
    assert_eq!(report.obligations_processed, 1);
    assert_eq!(report.members_processed, 3);
}

#[test]
fn deactivated_obligations_are_not_swept() {
    let (engine, clock) = build();
    let ob = engine.create_obligation(&campaign(TargetType::PerMember, 100)).unwrap();
    engine.deactivate_obligation(&ob.obligation_id).unwrap();
    close_window(&clock);

    let report = engine.process_dues(None).unwrap();
    assert_eq!(report.obligations_processed, 0);
    assert!(engine.store.dues_for_obligation(&ob.obligation_id).unwrap().is_empty());

    let err = engine.process_dues(Some(&ob.obligation_id)).unwrap_err();
    assert!(matches!(err, DuesError::ObligationInactive { .. }));
}

#[test]
fn unknown_obligation_request_is_not_found() {
    let (engine, _clock) = build();
    let err = engine.process_dues(Some("missing")).unwrap_err();
    assert!(matches!(err, DuesError::NotFound { kind: "obligation", .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: fixed obligations
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn fixed_obligation_is_materialized_on_creation() {
    let (engine, _clock) = build();
    let mut spec = targeted(&[(member("m-1"), 250), (house("h-2"), 400)]);
    spec.amount_mode = AmountMode::Fixed;

    let ob = engine.create_obligation(&spec).unwrap();
    assert!(ob.processed);
    assert_eq!(engine.wallet(&member("m-1")).unwrap().balance, 250);
    assert_eq!(engine.wallet(&house("h-2")).unwrap().balance, 400);

    let report = engine.process_dues(None).unwrap();
    assert_eq!(report, SweepReport::default());
    assert_eq!(engine.store.dues_for_obligation(&ob.obligation_id).unwrap().len(), 2);
}

#[test]
fn fixed_obligation_for_everyone_charges_the_minimum() {
    let (engine, _clock) = build();
    let mut spec = campaign(TargetType::PerHouse, 1_200);
    spec.amount_mode = AmountMode::Fixed;

    let ob = engine.create_obligation(&spec).unwrap();
    let dues = engine.store.dues_for_obligation(&ob.obligation_id).unwrap();
    assert_eq!(dues.len(), 4);
    assert!(dues.iter().all(|d| d.amount == 1_200));
}
