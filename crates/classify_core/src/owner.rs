//! Non-owning references from in-flight requests back to whoever shows the results.
//!
//! Requests only carry an [`OwnerId`]. The owner itself lives in an [`OwnerRegistry`] on the
//! consumer context as a weak reference, and is resolved when an event is delivered.

use crate::label::Outcome;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Receiver of pipeline notifications. Only ever called on the consumer context.
pub trait Owner {
    /// A request has been accepted and is about to run.
    fn on_progress_start(&self);
    /// The single terminal notification for a request (or for a failed model load).
    fn on_result(&self, outcome: Outcome);
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Token that stands in for an owner off the consumer context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}

#[derive(Default)]
pub struct OwnerRegistry {
    owners: HashMap<OwnerId, Weak<dyn Owner>>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `owner` without extending its lifetime.
    pub fn register<O: Owner + 'static>(&mut self, owner: &Rc<O>) -> OwnerId {
        let id = OwnerId(NEXT_OWNER.fetch_add(1, Ordering::Relaxed));
        let owner: Rc<dyn Owner> = owner.clone();
        self.owners.insert(id, Rc::downgrade(&owner));
        id
    }

    pub fn unregister(&mut self, id: OwnerId) -> bool {
        self.owners.remove(&id).is_some()
    }

    /// Upgrades the owner if it is still alive. Dead entries are removed on the way.
    pub fn resolve(&mut self, id: OwnerId) -> Option<Rc<dyn Owner>> {
        let owner = self.owners.get(&id)?.upgrade();
        if owner.is_none() {
            self.owners.remove(&id);
        }
        owner
    }

    /// Drops entries whose owner is gone; returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.owners.len();
        self.owners.retain(|_, w| w.strong_count() > 0);
        before - self.owners.len()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
