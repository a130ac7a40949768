//! # Result Builder
//!
//! Assembles the consolidated identity view returned to callers: primary id,
//! deduplicated contact fields, and the ids of every secondary member.

use crate::model::{Contact, ContactId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The consolidated view of one identity cluster.
///
/// Serialized with camelCase field names, the shape the consuming HTTP layer
/// speaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedIdentity {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Build the consolidated view from the final cluster state.
///
/// Per field, the primary's own value leads (when present) and the remaining
/// distinct values follow in ascending lexicographic order. Secondary ids are
/// ascending numeric. Every member contributes exactly once no matter how
/// many merge steps produced the cluster.
pub fn consolidate(primary: &Contact, members: &[Contact]) -> ConsolidatedIdentity {
    let emails = field_values(primary.email.as_deref(), members, |m| m.email.as_deref());
    let phone_numbers = field_values(primary.phone_number.as_deref(), members, |m| {
        m.phone_number.as_deref()
    });

    let mut secondary_contact_ids: Vec<ContactId> = members
        .iter()
        .filter(|m| m.id != primary.id)
        .map(|m| m.id)
        .collect();
    secondary_contact_ids.sort();
    secondary_contact_ids.dedup();

    ConsolidatedIdentity {
        primary_contact_id: primary.id,
        emails,
        phone_numbers,
        secondary_contact_ids,
    }
}

fn field_values<'a>(
    primary_value: Option<&'a str>,
    members: &'a [Contact],
    field: impl Fn(&'a Contact) -> Option<&'a str>,
) -> Vec<String> {
    let rest: BTreeSet<&str> = members
        .iter()
        .filter_map(&field)
        .filter(|value| Some(*value) != primary_value)
        .collect();

    primary_value
        .into_iter()
        .chain(rest)
        .map(str::to_string)
        .collect()
}
