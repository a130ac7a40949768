//! # Match Resolver
//!
//! Finds every stored contact sharing the submitted email or phone number.
//! Read-only; the first stage of the identify pipeline.

use crate::model::{Contact, Fragment};
use crate::store::{ContactStore, StoreError};
use rustc_hash::FxHashSet;

/// All live contacts matching the fragment's email or phone, ascending by
/// `(created_at, id)`.
///
/// The ordering and dedup guarantees are enforced here rather than trusted
/// from the backing store, so every downstream precedence decision sees the
/// same deterministic sequence regardless of the store implementation.
pub fn find_matches(
    store: &dyn ContactStore,
    fragment: &Fragment,
) -> Result<Vec<Contact>, StoreError> {
    let mut matches = store.find_matching(
        fragment.email.as_deref(),
        fragment.phone_number.as_deref(),
    )?;

    let mut seen = FxHashSet::default();
    matches.retain(|contact| !contact.is_deleted() && seen.insert(contact.id));
    matches.sort_by_key(Contact::age_key);
    Ok(matches)
}
