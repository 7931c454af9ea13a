//! Non-contributor resolver: who owes a due when the window closes.
//!
//! Population:
//!   - specific scope     → the explicit target list, priced per target
//!   - all + per_member   → every active member of the church
//!   - all + per_house    → every house under church → unit → group
//!
//! Result = population minus the contributor set, compared on (kind, id).

use crate::{
    error::DuesResult,
    store::{DuesStore, ObligationRow},
    types::{Amount, EntityRef, TargetScope, TargetType},
};
use std::collections::BTreeSet;

/// One entity that is obligated but has not contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonContributor {
    pub entity: EntityRef,
    pub name: String,
    /// Per-target amount from the explicit list; None means "use the
    /// obligation's computed amount".
    pub custom_amount: Option<Amount>,
}

pub struct NonContributorResolver<'a> {
    store: &'a DuesStore,
}

impl<'a> NonContributorResolver<'a> {
    pub fn new(store: &'a DuesStore) -> Self {
        Self { store }
    }

    /// The obligation's full target population, contributors included.
    pub fn population(&self, obligation: &ObligationRow) -> DuesResult<Vec<NonContributor>> {
        let population = match (obligation.target_scope, obligation.target_type) {
            (TargetScope::Specific, _) => {
                let mut out = Vec::new();
                for target in self.store.obligation_targets(&obligation.obligation_id)? {
                    let name = self
                        .store
                        .entity_name(&target.entity)?
                        .unwrap_or_else(|| target.entity.id.clone());
                    out.push(NonContributor {
                        entity: target.entity,
                        name,
                        custom_amount: Some(target.custom_amount),
                    });
                }
                out
            }
            (TargetScope::All, TargetType::PerMember) => self
                .store
                .active_members(&obligation.church_id)?
                .into_iter()
                .map(|m| NonContributor {
                    entity: EntityRef::member(m.member_id),
                    name: m.name,
                    custom_amount: None,
                })
                .collect(),
            (TargetScope::All, TargetType::PerHouse) => self
                .store
                .houses_for_church(&obligation.church_id)?
                .into_iter()
                .map(|h| NonContributor {
                    entity: EntityRef::house(h.house_id),
                    name: h.name,
                    custom_amount: None,
                })
                .collect(),
            (TargetScope::All, TargetType::Flexible) => {
                // Rejected at creation; an empty population keeps old rows harmless.
                log::warn!(
                    "obligation {} is flexible without targets; nobody is obligated",
                    obligation.obligation_id
                );
                Vec::new()
            }
        };
        Ok(population)
    }

    /// Population minus contributors, sorted by (kind, id).
    pub fn resolve(&self, obligation: &ObligationRow) -> DuesResult<Vec<NonContributor>> {
        let contributors: BTreeSet<EntityRef> = self
            .store
            .contributors(&obligation.obligation_id)?
            .into_iter()
            .map(|c| c.entity)
            .collect();

        let mut pending: Vec<NonContributor> = self
            .population(obligation)?
            .into_iter()
            .filter(|candidate| !contributors.contains(&candidate.entity))
            .collect();
        pending.sort_by(|a, b| a.entity.cmp(&b.entity));

        log::debug!(
            "obligation {}: {} non-contributors ({} contributors)",
            obligation.obligation_id,
            pending.len(),
            contributors.len()
        );
        Ok(pending)
    }
}
