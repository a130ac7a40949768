//! # Cluster Merger
//!
//! Resolves matched contacts to their owning primaries, picks the single
//! ultimate primary, and computes the full mutation set that unifies the
//! implicated clusters.
//!
//! This stage is a pure computation over the request's snapshot: it decides
//! every demotion, re-link, and promotion up front and returns them as a
//! [`MergePlan`], which the coalescer later commits in one atomic step. The
//! one-hop invariant (no secondary ever points at another secondary) is
//! actively maintained here by re-pointing every secondary of a demoted
//! primary at the new ultimate.

use crate::model::{Contact, ContactId, ContactUpdate, LinkPrecedence};
use crate::store::{ContactStore, StoreError};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// The computed unification of every cluster implicated by a match set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// The single surviving primary, with any in-place promotion applied.
    pub ultimate: Contact,
    /// Every demotion, re-link, and promotion required to unify the clusters.
    pub updates: Vec<ContactUpdate>,
    /// Full post-merge cluster membership (ultimate included), with the
    /// pending updates already reflected in the copies, ascending by
    /// `(created_at, id)`.
    pub members: Vec<Contact>,
}

impl MergePlan {
    /// Members other than the ultimate primary.
    pub fn secondaries(&self) -> impl Iterator<Item = &Contact> {
        let ultimate_id = self.ultimate.id;
        self.members.iter().filter(move |m| m.id != ultimate_id)
    }
}

/// Compute the merge plan for a non-empty, age-ordered match set.
///
/// Resolution follows each matched secondary's link exactly one hop. When no
/// live primary resolves at all, the oldest matched contact is promoted in
/// place and treated as the sole primary; matched secondaries left without a
/// live primary are re-pointed at the ultimate so no dangling link survives
/// the operation.
pub fn plan_merge(
    store: &dyn ContactStore,
    matches: &[Contact],
) -> Result<MergePlan, StoreError> {
    debug_assert!(!matches.is_empty(), "plan_merge requires at least one match");

    let mut primaries: Vec<Contact> = Vec::new();
    let mut resolved: FxHashSet<ContactId> = FxHashSet::default();
    let mut orphans: Vec<Contact> = Vec::new();

    for matched in matches {
        if matched.is_primary() {
            if resolved.insert(matched.id) {
                primaries.push(matched.clone());
            }
            continue;
        }

        let owner = match matched.linked_id {
            Some(primary_id) => store.find_by_id(primary_id)?,
            None => None,
        };
        match owner {
            Some(owner) if owner.is_primary() => {
                if resolved.insert(owner.id) {
                    primaries.push(owner);
                }
            }
            // Missing, deleted, or (invariant breach) secondary owner: the
            // matched contact is an orphan and gets re-homed below.
            _ => orphans.push(matched.clone()),
        }
    }

    let mut updates: Vec<ContactUpdate> = Vec::new();

    let ultimate = if primaries.is_empty() {
        // Orphan fallback: promote the oldest matched contact in place.
        let mut promoted = matches[0].clone();
        promoted.link_precedence = LinkPrecedence::Primary;
        promoted.linked_id = None;
        updates.push(ContactUpdate::promote(promoted.id));
        orphans.retain(|orphan| orphan.id != promoted.id);
        debug!(promoted = %promoted.id, "no primary resolved, promoting oldest match");
        promoted
    } else {
        primaries.sort_by_key(Contact::age_key);
        primaries.remove(0)
    };

    let mut members: FxHashMap<ContactId, Contact> = FxHashMap::default();
    members.insert(ultimate.id, ultimate.clone());
    for member in store.cluster_members(ultimate.id)? {
        members.entry(member.id).or_insert(member);
    }

    // Demote every losing primary and re-point its whole cluster, so no
    // secondary is left one hop behind a now-secondary record.
    for losing in primaries {
        let adopted = store.cluster_members(losing.id)?;
        let mut demoted = losing.clone();
        demoted.link_precedence = LinkPrecedence::Secondary;
        demoted.linked_id = Some(ultimate.id);
        updates.push(ContactUpdate::demote(losing.id, ultimate.id));
        debug!(demoted = %losing.id, ultimate = %ultimate.id, "demoting primary");
        members.insert(demoted.id, demoted);

        for secondary in adopted {
            let mut moved = secondary;
            moved.linked_id = Some(ultimate.id);
            updates.push(ContactUpdate::relink(moved.id, ultimate.id));
            members.insert(moved.id, moved);
        }
    }

    for orphan in orphans {
        let mut moved = orphan;
        moved.linked_id = Some(ultimate.id);
        updates.push(ContactUpdate::relink(moved.id, ultimate.id));
        members.insert(moved.id, moved);
    }

    let mut members: Vec<Contact> = members.into_values().collect();
    members.sort_by_key(Contact::age_key);

    Ok(MergePlan {
        ultimate,
        updates,
        members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewContact;
    use crate::store::{ManualClock, MemoryStore};
    use std::sync::Arc;

    struct Fixture {
        store: MemoryStore,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::starting_at(1_000));
            Self {
                store: MemoryStore::with_clock(clock.clone()),
                clock,
            }
        }

        fn primary(&self, email: &str) -> Contact {
            self.clock.advance(10);
            let creation = NewContact::primary(Some(email.to_string()), None);
            self.store
                .apply(self.store.snapshot_version(), &[], Some(&creation))
                .unwrap()
                .unwrap()
        }

        fn secondary(&self, email: &str, primary: ContactId) -> Contact {
            self.clock.advance(10);
            let creation = NewContact::secondary(Some(email.to_string()), None, primary);
            self.store
                .apply(self.store.snapshot_version(), &[], Some(&creation))
                .unwrap()
                .unwrap()
        }
    }

    #[test]
    fn test_single_primary_needs_no_updates() {
        let fx = Fixture::new();
        let p = fx.primary("a@x.com");

        let plan = plan_merge(&fx.store, &[p.clone()]).unwrap();
        assert_eq!(plan.ultimate.id, p.id);
        assert!(plan.updates.is_empty());
        assert_eq!(plan.members.len(), 1);
    }

    #[test]
    fn test_matched_secondary_resolves_to_its_primary() {
        let fx = Fixture::new();
        let p = fx.primary("a@x.com");
        let s = fx.secondary("b@x.com", p.id);

        let plan = plan_merge(&fx.store, &[s.clone()]).unwrap();
        assert_eq!(plan.ultimate.id, p.id);
        assert!(plan.updates.is_empty());
        let ids: Vec<ContactId> = plan.members.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![p.id, s.id]);
    }

    #[test]
    fn test_two_primaries_oldest_wins() {
        let fx = Fixture::new();
        let older = fx.primary("a@x.com");
        let newer = fx.primary("b@x.com");

        let plan = plan_merge(&fx.store, &[older.clone(), newer.clone()]).unwrap();
        assert_eq!(plan.ultimate.id, older.id);
        assert_eq!(plan.updates, vec![ContactUpdate::demote(newer.id, older.id)]);

        let demoted = plan
            .members
            .iter()
            .find(|m| m.id == newer.id)
            .expect("demoted primary stays in membership");
        assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(demoted.linked_id, Some(older.id));
    }

    #[test]
    fn test_oldest_wins_regardless_of_match_order() {
        let fx = Fixture::new();
        let older = fx.primary("a@x.com");
        let newer = fx.primary("b@x.com");

        let plan = plan_merge(&fx.store, &[newer, older.clone()]).unwrap();
        assert_eq!(plan.ultimate.id, older.id);
    }

    #[test]
    fn test_secondaries_of_demoted_primary_are_repointed() {
        let fx = Fixture::new();
        let older = fx.primary("a@x.com");
        let newer = fx.primary("b@x.com");
        let adopted = fx.secondary("c@x.com", newer.id);

        let plan = plan_merge(&fx.store, &[older.clone(), newer.clone()]).unwrap();
        assert!(plan
            .updates
            .contains(&ContactUpdate::relink(adopted.id, older.id)));

        // One-hop invariant across the planned membership.
        for member in plan.secondaries() {
            assert_eq!(member.linked_id, Some(older.id));
        }
    }

    #[test]
    fn test_orphan_fallback_promotes_oldest_match() {
        let fx = Fixture::new();
        let p = fx.primary("a@x.com");
        let s1 = fx.secondary("b@x.com", p.id);
        let s2 = fx.secondary("c@x.com", p.id);
        fx.store.soft_delete(p.id).unwrap();

        let s1 = fx.store.find_by_id(s1.id).unwrap().unwrap();
        let s2 = fx.store.find_by_id(s2.id).unwrap().unwrap();
        let plan = plan_merge(&fx.store, &[s1.clone(), s2.clone()]).unwrap();

        assert_eq!(plan.ultimate.id, s1.id);
        assert!(plan.ultimate.is_primary());
        assert!(plan.updates.contains(&ContactUpdate::promote(s1.id)));
        assert!(plan.updates.contains(&ContactUpdate::relink(s2.id, s1.id)));
    }

    #[test]
    fn test_three_way_merge_keeps_all_members() {
        let fx = Fixture::new();
        let a = fx.primary("a@x.com");
        let b = fx.primary("b@x.com");
        let c = fx.primary("c@x.com");
        let b_side = fx.secondary("b2@x.com", b.id);
        let c_side = fx.secondary("c2@x.com", c.id);

        let plan = plan_merge(&fx.store, &[a.clone(), b.clone(), c.clone()]).unwrap();
        assert_eq!(plan.ultimate.id, a.id);

        let ids: FxHashSet<ContactId> = plan.members.iter().map(|m| m.id).collect();
        for id in [a.id, b.id, c.id, b_side.id, c_side.id] {
            assert!(ids.contains(&id));
        }
        for member in plan.secondaries() {
            assert_eq!(member.linked_id, Some(a.id));
        }
    }
}
