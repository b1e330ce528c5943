//! Change notifications.
//!
//! `ObjectsDidChange` is what a persistence context posts to its notification
//! source. `ChangeEvent` is the store-filtered shape handed to watchers.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::object::{ContextId, CoordinatorId, ObjectId};

/// Raw "objects changed" notification, tagged with its origin.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectsDidChange {
    pub origin: ContextId,
    /// Coordinator backing the originating context, if any.
    pub coordinator: Option<CoordinatorId>,
    pub inserted: HashSet<ObjectId>,
    pub updated: HashSet<ObjectId>,
    pub deleted: HashSet<ObjectId>,
    pub refreshed: HashSet<ObjectId>,
    pub posted_at: DateTime<Utc>,
}

impl ObjectsDidChange {
    /// Creates an empty notification for the given origin.
    #[must_use]
    pub fn new(origin: ContextId, coordinator: Option<CoordinatorId>) -> Self {
        Self {
            origin,
            coordinator,
            inserted: HashSet::new(),
            updated: HashSet::new(),
            deleted: HashSet::new(),
            refreshed: HashSet::new(),
            posted_at: Utc::now(),
        }
    }

    /// Sets the inserted identifiers.
    #[must_use]
    pub fn with_inserted(mut self, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        self.inserted = ids.into_iter().collect();
        self
    }

    /// Sets the updated identifiers.
    #[must_use]
    pub fn with_updated(mut self, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        self.updated = ids.into_iter().collect();
        self
    }

    /// Sets the deleted identifiers.
    #[must_use]
    pub fn with_deleted(mut self, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        self.deleted = ids.into_iter().collect();
        self
    }

    /// Sets the refreshed identifiers.
    #[must_use]
    pub fn with_refreshed(mut self, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        self.refreshed = ids.into_iter().collect();
        self
    }
}

/// Snapshot of one notification cycle, as seen by watchers.
///
/// The sets come from one source notification. They are disjoint in
/// well-formed input but consumers must not rely on it.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEvent {
    pub inserted: HashSet<ObjectId>,
    pub updated: HashSet<ObjectId>,
    pub deleted: HashSet<ObjectId>,
    pub refreshed: HashSet<ObjectId>,
    /// When the source notification was posted. `None` for hand-built events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    /// Extracts the identifier sets of a raw notification.
    #[must_use]
    pub fn from_notification(notification: &ObjectsDidChange) -> Self {
        Self {
            inserted: notification.inserted.clone(),
            updated: notification.updated.clone(),
            deleted: notification.deleted.clone(),
            refreshed: notification.refreshed.clone(),
            posted_at: Some(notification.posted_at),
        }
    }

    /// True if the event inserts or deletes anything.
    #[must_use]
    pub fn changes_membership(&self) -> bool {
        !self.inserted.is_empty() || !self.deleted.is_empty()
    }

    /// True if all four sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.refreshed.is_empty()
    }
}
