//! # Idlink
//!
//! An identity consolidation engine: clusters fragmentary identity signals
//! (an email address and/or a phone number) into groups representing the same
//! real-world customer, and answers "who is this" queries against that
//! clustering.
//!
//! Each identify request runs a strictly linear pipeline over the backing
//! store: match resolution, merge planning, one atomic write, and result
//! building. Clusters keep exactly one primary (the oldest member); when two
//! previously separate clusters turn out to be the same person, the younger
//! primary is demoted and its whole cluster re-pointed at the survivor.

pub mod coalescer;
pub mod config;
pub mod linker;
pub mod model;
pub mod query;
pub mod resolver;
pub mod store;

// Re-export main types for convenience
pub use config::{ConfigError, EngineConfig, EngineTuning};
pub use linker::MergePlan;
pub use model::{
    Contact, ContactId, ContactUpdate, Fragment, LinkPrecedence, NewContact, Timestamp,
};
pub use query::ConsolidatedIdentity;
pub use store::{Clock, ContactStore, ManualClock, MemoryStore, StoreError, SystemClock};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

/// Main API for identity consolidation.
///
/// Stateless apart from the store it operates on; safe to share across
/// concurrent requests.
pub struct IdentityEngine {
    store: Box<dyn ContactStore>,
    tuning: EngineTuning,
}

impl IdentityEngine {
    /// Create an engine over a store with default tuning.
    pub fn new(store: Box<dyn ContactStore>) -> Self {
        Self::with_tuning(store, EngineTuning::default())
    }

    pub fn with_tuning(store: Box<dyn ContactStore>, tuning: EngineTuning) -> Self {
        Self { store, tuning }
    }

    /// The backing store, for inspection and operational tooling.
    pub fn store(&self) -> &dyn ContactStore {
        self.store.as_ref()
    }

    /// Consolidate the fragment into its cluster and return the merged view.
    ///
    /// Runs match, merge-compute, atomic write, and result building as one
    /// logical unit. A conflicting concurrent commit restarts the whole
    /// sequence from the match step, up to the configured retry bound; every
    /// other store failure propagates unchanged.
    pub fn identify(&self, fragment: &Fragment) -> Result<ConsolidatedIdentity> {
        if fragment.is_empty() {
            bail!("identify requires at least one of email or phone number");
        }

        let mut attempt = 0;
        loop {
            match self.try_identify(fragment) {
                Ok(view) => return Ok(view),
                Err(err) if is_conflict(&err) && attempt < self.tuning.max_retries => {
                    attempt += 1;
                    warn!(%fragment, attempt, "conflicting concurrent commit, retrying identify");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One pass of the pipeline against a single store snapshot.
    fn try_identify(&self, fragment: &Fragment) -> Result<ConsolidatedIdentity> {
        let store = self.store.as_ref();
        let snapshot = store.snapshot_version();

        let matches = resolver::find_matches(store, fragment)?;
        debug!(%fragment, matched = matches.len(), "resolved fragment matches");

        if matches.is_empty() {
            let creation =
                NewContact::primary(fragment.email.clone(), fragment.phone_number.clone());
            let created = store
                .apply(snapshot, &[], Some(&creation))?
                .context("store did not return the created contact")?;
            debug!(primary = %created.id, "created fresh primary");
            return Ok(query::consolidate(
                &created,
                std::slice::from_ref(&created),
            ));
        }

        let plan = linker::plan_merge(store, &matches)?;
        debug!(
            ultimate = %plan.ultimate.id,
            updates = plan.updates.len(),
            members = plan.members.len(),
            "computed merge plan"
        );

        let creation = coalescer::decide_creation(fragment, &plan);

        // A request with nothing to write is answered from the snapshot
        // alone; the atomic apply is the sole commit point and a pure read
        // must not count as a commit. The version check stands in for the
        // apply-side conflict detection: if a commit interleaved with our
        // reads, the assembled view may be torn and the request re-runs.
        if plan.updates.is_empty() && creation.is_none() {
            if store.snapshot_version() != snapshot {
                return Err(StoreError::Conflict.into());
            }
            return Ok(query::consolidate(&plan.ultimate, &plan.members));
        }

        let created = coalescer::commit(store, snapshot, &plan, creation.as_ref())?;

        // Reconcile the final membership from the committed plan: the plan's
        // copies already reflect every demotion and re-link, and the commit
        // succeeded against the same snapshot they were computed from.
        let mut members = plan.members;
        if let Some(created) = created {
            members.push(created);
        }
        Ok(query::consolidate(&plan.ultimate, &members))
    }
}

fn is_conflict(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Conflict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn engine() -> (IdentityEngine, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        (
            IdentityEngine::new(Box::new(store.clone())),
            store,
            clock,
        )
    }

    #[test]
    fn test_empty_fragment_is_rejected() {
        let (engine, _store, _clock) = engine();
        let err = engine.identify(&Fragment::default()).unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn test_fresh_fragment_creates_primary() {
        let (engine, store, _clock) = engine();
        let view = engine
            .identify(&Fragment::new(Some("a@x.com"), None))
            .unwrap();

        assert_eq!(view.primary_contact_id, ContactId(1));
        assert_eq!(view.emails, vec!["a@x.com"]);
        assert!(view.phone_numbers.is_empty());
        assert!(view.secondary_contact_ids.is_empty());
        assert_eq!(store.contact_count(), 1);
    }

    #[test]
    fn test_conflict_exhausting_retries_surfaces_store_error() {
        let (engine, store, _clock) = engine();

        // A store whose version never matches what the engine observed.
        struct AlwaysStale<S>(S);
        impl<S: ContactStore> ContactStore for AlwaysStale<S> {
            fn snapshot_version(&self) -> u64 {
                u64::MAX
            }
            fn find_matching(
                &self,
                email: Option<&str>,
                phone: Option<&str>,
            ) -> std::result::Result<Vec<Contact>, StoreError> {
                self.0.find_matching(email, phone)
            }
            fn find_by_id(
                &self,
                id: ContactId,
            ) -> std::result::Result<Option<Contact>, StoreError> {
                self.0.find_by_id(id)
            }
            fn cluster_members(
                &self,
                primary: ContactId,
            ) -> std::result::Result<Vec<Contact>, StoreError> {
                self.0.cluster_members(primary)
            }
            fn apply(
                &self,
                _expected_version: u64,
                _updates: &[ContactUpdate],
                _creation: Option<&NewContact>,
            ) -> std::result::Result<Option<Contact>, StoreError> {
                Err(StoreError::Conflict)
            }
        }

        drop(engine);
        let stale = IdentityEngine::with_tuning(
            Box::new(AlwaysStale(store)),
            EngineTuning { max_retries: 2 },
        );
        let err = stale
            .identify(&Fragment::new(Some("a@x.com"), None))
            .unwrap_err();
        assert!(is_conflict(&err));
    }
}
