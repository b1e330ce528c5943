//! Relationship closure.
//!
//! The closure of an object is every identifier reachable from it through
//! relationships, following related objects that still resolve in the
//! context. Traversal is an explicit work-list with a visited set, so cyclic
//! graphs terminate and memory is bounded by the graph size.

use std::collections::HashSet;

use crate::context::PersistenceContext;
use crate::object::{ManagedObject, ObjectId};

/// Identifiers transitively reachable from `root`, excluding `root` itself.
///
/// Identifiers that no longer resolve are included but not traversed.
pub fn relationship_closure<C: PersistenceContext>(context: &C, root: &C::Object) -> HashSet<ObjectId> {
    let root_id = root.object_id();
    let mut visited = HashSet::from([root_id]);
    let mut reached = HashSet::new();
    let mut pending = vec![root.clone()];

    while let Some(object) = pending.pop() {
        for relationship in object.relationship_names() {
            for id in object.related_ids(&relationship) {
                if !visited.insert(id) {
                    continue;
                }
                reached.insert(id);
                if let Some(next) = context.object_with_id(id) {
                    pending.push(next);
                }
            }
        }
    }

    reached
}

/// Identifiers whose update makes an object watcher re-emit its root.
///
/// Computed once, from the graph as it is at subscription time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterestSet {
    root: ObjectId,
    ids: HashSet<ObjectId>,
}

impl InterestSet {
    /// `{root} ∪ relationship_closure(root)`.
    pub fn compute<C: PersistenceContext>(context: &C, root: &C::Object) -> Self {
        let root_id = root.object_id();
        let mut ids = relationship_closure(context, root);
        ids.insert(root_id);
        Self { root: root_id, ids }
    }

    /// The watched root.
    #[must_use]
    pub const fn root(&self) -> ObjectId {
        self.root
    }

    /// True if `id` is the root or reachable from it.
    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.ids.contains(id)
    }

    /// True if any identifier in `other` is of interest.
    #[must_use]
    pub fn intersects(&self, other: &HashSet<ObjectId>) -> bool {
        if other.len() <= self.ids.len() {
            other.iter().any(|id| self.ids.contains(id))
        } else {
            self.ids.iter().any(|id| other.contains(id))
        }
    }

    /// Number of identifiers, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always false: the root is a member.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
