//! # Data Model
//!
//! Core data structures for identity consolidation: contacts, link precedence,
//! request fragments, and the typed mutation/creation payloads applied by the store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact identifier for contacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactId(pub u32);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Milliseconds since the Unix epoch.
///
/// `created_at` is the sole ordering key for precedence decisions; ties are
/// broken by ascending [`ContactId`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Whether a contact is the canonical representative of its cluster or a linked member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkPrecedence::Primary => write!(f, "primary"),
            LinkPrecedence::Secondary => write!(f, "secondary"),
        }
    }
}

/// A stored identity record.
///
/// Invariants (hold after every completed operation):
/// - `Primary` implies `linked_id == None`
/// - `Secondary` implies `linked_id` points at a live primary, never another
///   secondary (link chains are exactly one hop)
/// - at least one of `email` / `phone_number` is set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Unique identifier, assigned by the store at creation
    pub id: ContactId,
    /// Email address, exact-match only
    pub email: Option<String>,
    /// Phone number, digits only, exact-match only
    pub phone_number: Option<String>,
    /// The primary this contact links to, when secondary
    pub linked_id: Option<ContactId>,
    /// Primary or secondary standing within the cluster
    pub link_precedence: LinkPrecedence,
    /// Creation time; the precedence ordering key
    pub created_at: Timestamp,
    /// Refreshed on every mutation
    pub updated_at: Timestamp,
    /// Soft-delete marker; set means excluded from matching and clustering
    pub deleted_at: Option<Timestamp>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Ordering key for precedence decisions: oldest wins, ties by ascending id.
    pub fn age_key(&self) -> (Timestamp, ContactId) {
        (self.created_at, self.id)
    }
}

/// The email/phone pair submitted with an identify request.
///
/// At-least-one-present is a caller precondition; the engine rejects an empty
/// fragment with an error rather than re-validating field shapes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fragment {
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl Fragment {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone_number.is_none()
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.email.as_deref().unwrap_or("-"),
            self.phone_number.as_deref().unwrap_or("-")
        )
    }
}

/// Fully typed creation payload for a new contact.
///
/// Kept as an explicit shape rather than a loose field map so the novelty and
/// exact-duplicate checks in the coalescer operate against a fixed structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// Creation payload for a fresh primary (no existing fragment overlap).
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// Creation payload for a secondary linked to an existing primary.
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        linked_id: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            linked_id: Some(linked_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone_number.is_none()
    }
}

/// A field-level mutation against one stored contact.
///
/// `None` leaves a field unchanged; for `linked_id`, `Some(None)` clears the
/// link (promotion) and `Some(Some(id))` re-points it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdate {
    pub id: ContactId,
    pub linked_id: Option<Option<ContactId>>,
    pub link_precedence: Option<LinkPrecedence>,
}

impl ContactUpdate {
    /// Demote a primary into the cluster owned by `ultimate`.
    pub fn demote(id: ContactId, ultimate: ContactId) -> Self {
        Self {
            id,
            linked_id: Some(Some(ultimate)),
            link_precedence: Some(LinkPrecedence::Secondary),
        }
    }

    /// Re-point an existing secondary at a new ultimate primary.
    pub fn relink(id: ContactId, ultimate: ContactId) -> Self {
        Self {
            id,
            linked_id: Some(Some(ultimate)),
            link_precedence: None,
        }
    }

    /// Promote an orphaned secondary in place to primary.
    pub fn promote(id: ContactId) -> Self {
        Self {
            id,
            linked_id: Some(None),
            link_precedence: Some(LinkPrecedence::Primary),
        }
    }

    /// Apply this mutation to an in-memory contact copy.
    pub fn apply_to(&self, contact: &mut Contact) {
        if let Some(linked_id) = self.linked_id {
            contact.linked_id = linked_id;
        }
        if let Some(precedence) = self.link_precedence {
            contact.link_precedence = precedence;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: u32, created_at: i64) -> Contact {
        Contact {
            id: ContactId(id),
            email: Some(format!("c{}@example.com", id)),
            phone_number: None,
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
            created_at: Timestamp(created_at),
            updated_at: Timestamp(created_at),
            deleted_at: None,
        }
    }

    #[test]
    fn test_age_key_orders_by_created_at_then_id() {
        let older = contact(7, 100);
        let newer = contact(2, 200);
        assert!(older.age_key() < newer.age_key());

        let tie_low = contact(1, 100);
        let tie_high = contact(9, 100);
        assert!(tie_low.age_key() < tie_high.age_key());
    }

    #[test]
    fn test_update_demote_and_promote_roundtrip() {
        let mut c = contact(3, 50);
        ContactUpdate::demote(c.id, ContactId(1)).apply_to(&mut c);
        assert_eq!(c.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(c.linked_id, Some(ContactId(1)));

        ContactUpdate::promote(c.id).apply_to(&mut c);
        assert!(c.is_primary());
        assert_eq!(c.linked_id, None);
    }

    #[test]
    fn test_relink_leaves_precedence_untouched() {
        let mut c = contact(4, 50);
        c.link_precedence = LinkPrecedence::Secondary;
        c.linked_id = Some(ContactId(2));

        ContactUpdate::relink(c.id, ContactId(1)).apply_to(&mut c);
        assert_eq!(c.linked_id, Some(ContactId(1)));
        assert_eq!(c.link_precedence, LinkPrecedence::Secondary);
    }

    #[test]
    fn test_fragment_emptiness() {
        assert!(Fragment::new(None, None).is_empty());
        assert!(!Fragment::new(Some("a@x.com"), None).is_empty());
        assert!(!Fragment::new(None, Some("111")).is_empty());
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(ContactId(12).to_string(), "C12");
        assert_eq!(LinkPrecedence::Primary.to_string(), "primary");
        assert_eq!(
            Fragment::new(Some("a@x.com"), None).to_string(),
            "a@x.com/-"
        );
    }
}
