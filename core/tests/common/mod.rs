//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use dues_core::{
    clock::ManualClock,
    engine::DuesEngine,
    obligation_registry::{NewObligation, TargetSpec},
    store::DuesStore,
    types::{Amount, AmountMode, DueAmountPolicy, EntityRef, ObligationKind, TargetType},
};
use std::sync::Arc;

pub const CHURCH: &str = "c-1";
pub const OPENS: &str = "2026-10-01T00:00:00Z";
pub const CLOSES: &str = "2026-10-08T00:00:00Z";

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

/// In-memory engine on a manual clock set inside the default campaign window,
/// with the standard population registered.
pub fn build() -> (DuesEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(at("2026-10-02T09:00:00Z")));
    let engine = DuesEngine::build_test(clock.clone()).expect("build_test failed");
    seed_population(&engine.store);
    (engine, clock)
}

/// One church, one unit, one group, four houses.
/// Members m-1..m-3 live in h-1..h-3 and are active; m-4 (in h-3) is
/// inactive; h-4 has nobody registered.
pub fn seed_population(store: &DuesStore) {
    store.register_church(CHURCH, "St. Thomas").unwrap();
    store.register_unit("u-1", CHURCH, "North unit").unwrap();
    store.register_group("g-1", "u-1", "Family group 1").unwrap();
    for (house, name) in [
        ("h-1", "Kuriakose"),
        ("h-2", "Varghese"),
        ("h-3", "Mathew"),
        ("h-4", "Joseph"),
    ] {
        store.register_house(house, "g-1", name).unwrap();
    }
    store.register_member("m-1", CHURCH, Some("h-1"), "Anna").unwrap();
    store.register_member("m-2", CHURCH, Some("h-2"), "Biju").unwrap();
    store.register_member("m-3", CHURCH, Some("h-3"), "Celine").unwrap();
    store.register_member("m-4", CHURCH, Some("h-3"), "Dominic").unwrap();
    store.set_member_status("m-4", false).unwrap();
}

pub fn campaign(target_type: TargetType, minimum_amount: Amount) -> NewObligation {
    NewObligation {
        church_id: CHURCH.into(),
        name: "Roof fund".into(),
        kind: ObligationKind::Campaign,
        amount_mode: AmountMode::Variable,
        target_type,
        targets: Vec::new(),
        minimum_amount,
        due_amount_policy: DueAmountPolicy::Static,
        start_at: at(OPENS),
        end_at: at(CLOSES),
    }
}

pub fn targeted(entities: &[(EntityRef, Amount)]) -> NewObligation {
    NewObligation {
        target_type: TargetType::Flexible,
        targets: entities
            .iter()
            .map(|(entity, amount)| TargetSpec {
                entity: entity.clone(),
                custom_amount: *amount,
            })
            .collect(),
        ..campaign(TargetType::Flexible, 0)
    }
}

pub fn member(id: &str) -> EntityRef {
    EntityRef::member(id)
}

pub fn house(id: &str) -> EntityRef {
    EntityRef::house(id)
}
