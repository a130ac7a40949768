//! # Novelty Detector & Writer
//!
//! Decides whether the submitted fragment carries identity information the
//! merged cluster has not seen, and commits the merge plan plus the optional
//! new secondary as one atomic unit.

use crate::linker::MergePlan;
use crate::model::{Contact, Fragment, NewContact};
use crate::store::{ContactStore, StoreError};
use std::collections::HashSet;
use tracing::debug;

/// Decide whether the fragment warrants a new secondary in the merged cluster.
///
/// The fragment is novel when its email or its phone is present and absent
/// from the post-merge membership. Even then, nothing is created if some
/// member already carries exactly the fragment's `(email, phone)` pair,
/// `None`s included; that member already represents this combination.
pub fn decide_creation(fragment: &Fragment, plan: &MergePlan) -> Option<NewContact> {
    let mut known_emails: HashSet<&str> = HashSet::new();
    let mut known_phones: HashSet<&str> = HashSet::new();
    for member in &plan.members {
        if let Some(email) = member.email.as_deref() {
            known_emails.insert(email);
        }
        if let Some(phone) = member.phone_number.as_deref() {
            known_phones.insert(phone);
        }
    }

    let novel_email = fragment
        .email
        .as_deref()
        .is_some_and(|email| !known_emails.contains(email));
    let novel_phone = fragment
        .phone_number
        .as_deref()
        .is_some_and(|phone| !known_phones.contains(phone));
    if !novel_email && !novel_phone {
        return None;
    }

    let exact_duplicate = plan.members.iter().any(|member| {
        member.email == fragment.email && member.phone_number == fragment.phone_number
    });
    if exact_duplicate {
        return None;
    }

    debug!(fragment = %fragment, ultimate = %plan.ultimate.id, "fragment is novel, creating secondary");
    Some(NewContact::secondary(
        fragment.email.clone(),
        fragment.phone_number.clone(),
        plan.ultimate.id,
    ))
}

/// Commit the plan's mutations plus the optional creation atomically against
/// the snapshot the plan was computed from. Returns the created contact, if any.
pub fn commit(
    store: &dyn ContactStore,
    snapshot_version: u64,
    plan: &MergePlan,
    creation: Option<&NewContact>,
) -> Result<Option<Contact>, StoreError> {
    store.apply(snapshot_version, &plan.updates, creation)
}
