//! # Store Module
//!
//! The narrow store contract the engine consumes, plus the in-memory
//! reference implementation with optimistic snapshot-versioned commits.
//!
//! Serializability contract: every read is served from a consistent snapshot,
//! [`ContactStore::snapshot_version`] captures the version a request observed,
//! and [`ContactStore::apply`] commits all-or-nothing only if no other commit
//! landed in between. A stale snapshot fails with [`StoreError::Conflict`] and
//! the engine re-runs the whole match/merge/write sequence.

use crate::model::{Contact, ContactId, ContactUpdate, NewContact, Timestamp};
use hashbrown::HashMap;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by a [`ContactStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A concurrent commit landed after this request's snapshot was taken.
    #[error("concurrent commit detected, snapshot is stale")]
    Conflict,
    /// A mutation referenced a contact that does not exist (or is deleted).
    #[error("contact {0} not found")]
    NotFound(ContactId),
    /// A creation or re-link targeted a contact that is not a live primary.
    #[error("contact {0} is not a primary and cannot be linked to")]
    InvalidLink(ContactId),
    /// A creation carried neither email nor phone number.
    #[error("refusing to create a contact with neither email nor phone number")]
    EmptyContact,
    /// Backend failure; propagated verbatim to the caller.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Time source for `created_at` / `updated_at` assignment.
///
/// A seam rather than a direct `SystemTime` call so tests can drive creation
/// order deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time in milliseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Timestamp::from_millis(millis)
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: parking_lot::Mutex<i64>,
}

impl ManualClock {
    pub fn starting_at(millis: i64) -> Self {
        Self {
            now: parking_lot::Mutex::new(millis),
        }
    }

    /// Move the clock forward and return the new time.
    pub fn advance(&self, millis: i64) -> Timestamp {
        let mut now = self.now.lock();
        *now += millis;
        Timestamp::from_millis(*now)
    }

    pub fn set(&self, millis: i64) {
        *self.now.lock() = millis;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(*self.now.lock())
    }
}

/// The record-store contract consumed by the identity engine.
///
/// All read methods exclude soft-deleted contacts. Implementations must keep
/// reads consistent within one snapshot version and make `apply` atomic.
pub trait ContactStore: Send + Sync {
    /// The commit version the current state reflects.
    fn snapshot_version(&self) -> u64;

    /// All live contacts whose email equals `email` or phone equals `phone`,
    /// ascending by `(created_at, id)`.
    fn find_matching(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, StoreError>;

    /// Fetch one live contact by id.
    fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StoreError>;

    /// All live contacts whose `linked_id` equals `primary`, ascending by
    /// `(created_at, id)`.
    fn cluster_members(&self, primary: ContactId) -> Result<Vec<Contact>, StoreError>;

    /// Commit `updates` plus the optional `creation` as one atomic unit
    /// against `expected_version`. Returns the created contact, with id and
    /// timestamps assigned, when a creation was requested. Any failure leaves
    /// the store exactly as it was.
    fn apply(
        &self,
        expected_version: u64,
        updates: &[ContactUpdate],
        creation: Option<&NewContact>,
    ) -> Result<Option<Contact>, StoreError>;
}

impl<S: ContactStore> ContactStore for Arc<S> {
    fn snapshot_version(&self) -> u64 {
        (**self).snapshot_version()
    }

    fn find_matching(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, StoreError> {
        (**self).find_matching(email, phone)
    }

    fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StoreError> {
        (**self).find_by_id(id)
    }

    fn cluster_members(&self, primary: ContactId) -> Result<Vec<Contact>, StoreError> {
        (**self).cluster_members(primary)
    }

    fn apply(
        &self,
        expected_version: u64,
        updates: &[ContactUpdate],
        creation: Option<&NewContact>,
    ) -> Result<Option<Contact>, StoreError> {
        (**self).apply(expected_version, updates, creation)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    contacts: FxHashMap<ContactId, Contact>,
    by_email: HashMap<String, Vec<ContactId>>,
    by_phone: HashMap<String, Vec<ContactId>>,
    by_primary: FxHashMap<ContactId, Vec<ContactId>>,
    next_id: u32,
    version: u64,
}

/// In-memory contact store with optimistic concurrency.
///
/// State lives behind one `RwLock`; the commit version increases on every
/// successful `apply` (and on soft deletes), which is what makes stale
/// snapshots detectable.
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            }),
            clock,
        }
    }

    /// Number of live contacts.
    pub fn contact_count(&self) -> usize {
        self.state
            .read()
            .contacts
            .values()
            .filter(|c| !c.is_deleted())
            .count()
    }

    /// Mark a contact deleted, excluding it from all matching and clustering.
    /// Counts as a commit so in-flight requests re-run against fresh state.
    pub fn soft_delete(&self, id: ContactId) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let now = self.clock.now();
        let contact = state
            .contacts
            .get_mut(&id)
            .filter(|c| !c.is_deleted())
            .ok_or(StoreError::NotFound(id))?;
        contact.deleted_at = Some(now);
        contact.updated_at = now;
        state.version += 1;
        Ok(())
    }

    /// Snapshot of every live contact, ascending by `(created_at, id)`.
    /// Inspection helper for tests and operational tooling.
    pub fn all_contacts(&self) -> Vec<Contact> {
        let state = self.state.read();
        let mut contacts: Vec<Contact> = state
            .contacts
            .values()
            .filter(|c| !c.is_deleted())
            .cloned()
            .collect();
        contacts.sort_by_key(Contact::age_key);
        contacts
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn live(&self, id: ContactId) -> Option<&Contact> {
        self.contacts.get(&id).filter(|c| !c.is_deleted())
    }

    /// Validate one update against current state without mutating anything.
    fn check_update(&self, update: &ContactUpdate) -> Result<(), StoreError> {
        let contact = self.live(update.id).ok_or(StoreError::NotFound(update.id))?;
        if let Some(Some(target)) = update.linked_id {
            // A secondary must end up pointing at a live contact. The target
            // being primary is the engine's responsibility within the same
            // batch (a demotion batch re-points before the demoted row is
            // observable), so only liveness is enforced here.
            if self.live(target).is_none() {
                return Err(StoreError::NotFound(target));
            }
            if target == contact.id {
                return Err(StoreError::InvalidLink(target));
            }
        }
        Ok(())
    }

    fn check_creation(&self, creation: &NewContact) -> Result<(), StoreError> {
        if creation.is_empty() {
            return Err(StoreError::EmptyContact);
        }
        if let Some(target) = creation.linked_id {
            if self.live(target).is_none() {
                return Err(StoreError::NotFound(target));
            }
        }
        Ok(())
    }

    fn unlink(&mut self, id: ContactId, old_primary: ContactId) {
        if let Some(members) = self.by_primary.get_mut(&old_primary) {
            members.retain(|&m| m != id);
        }
    }
}

impl ContactStore for MemoryStore {
    fn snapshot_version(&self) -> u64 {
        self.state.read().version
    }

    fn find_matching(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, StoreError> {
        let state = self.state.read();
        let mut ids: FxHashSet<ContactId> = FxHashSet::default();
        if let Some(email) = email {
            if let Some(matched) = state.by_email.get(email) {
                ids.extend(matched.iter().copied());
            }
        }
        if let Some(phone) = phone {
            if let Some(matched) = state.by_phone.get(phone) {
                ids.extend(matched.iter().copied());
            }
        }

        let mut contacts: Vec<Contact> = ids
            .into_iter()
            .filter_map(|id| state.live(id).cloned())
            .collect();
        contacts.sort_by_key(Contact::age_key);
        Ok(contacts)
    }

    fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StoreError> {
        Ok(self.state.read().live(id).cloned())
    }

    fn cluster_members(&self, primary: ContactId) -> Result<Vec<Contact>, StoreError> {
        let state = self.state.read();
        let mut members: Vec<Contact> = state
            .by_primary
            .get(&primary)
            .map(|ids| {
                ids.iter()
                    .filter_map(|&id| state.live(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        members.sort_by_key(Contact::age_key);
        Ok(members)
    }

    fn apply(
        &self,
        expected_version: u64,
        updates: &[ContactUpdate],
        creation: Option<&NewContact>,
    ) -> Result<Option<Contact>, StoreError> {
        let mut state = self.state.write();
        if state.version != expected_version {
            return Err(StoreError::Conflict);
        }

        // Validate the whole batch before touching anything so a failure
        // leaves the store exactly as it was.
        for update in updates {
            state.check_update(update)?;
        }
        if let Some(creation) = creation {
            state.check_creation(creation)?;
        }

        let now = self.clock.now();

        for update in updates {
            let previous_link = state
                .contacts
                .get(&update.id)
                .and_then(|c| c.linked_id);
            if let Some(new_link) = update.linked_id {
                if let Some(old_primary) = previous_link {
                    if new_link != Some(old_primary) {
                        state.unlink(update.id, old_primary);
                    }
                }
                if let Some(new_primary) = new_link {
                    if previous_link != Some(new_primary) {
                        state
                            .by_primary
                            .entry(new_primary)
                            .or_default()
                            .push(update.id);
                    }
                }
            }
            if let Some(contact) = state.contacts.get_mut(&update.id) {
                update.apply_to(contact);
                contact.updated_at = now;
            }
        }

        let created = creation.map(|creation| {
            let id = ContactId(state.next_id);
            state.next_id += 1;
            let contact = Contact {
                id,
                email: creation.email.clone(),
                phone_number: creation.phone_number.clone(),
                linked_id: creation.linked_id,
                link_precedence: creation.link_precedence,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            if let Some(email) = &contact.email {
                state.by_email.entry(email.clone()).or_default().push(id);
            }
            if let Some(phone) = &contact.phone_number {
                state.by_phone.entry(phone.clone()).or_default().push(id);
            }
            if let Some(primary) = contact.linked_id {
                state.by_primary.entry(primary).or_default().push(id);
            }
            state.contacts.insert(id, contact.clone());
            contact
        });

        state.version += 1;
        Ok(created)
    }
}
