//! In-memory persistence context.
//!
//! A reference `PersistenceContext` for embedded use and tests. Objects hold
//! JSON fields and to-many relationships. Mutations are recorded as pending
//! changes and coalesced until `process_pending_changes`, which is one turn of
//! the context's serial queue: it runs the tasks scheduled before the turn,
//! then posts a single `ObjectsDidChange` notification.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::debug;

use crate::change::ObjectsDidChange;
use crate::context::{ContextTask, PersistenceContext};
use crate::error::{StoreError, StoreResult};
use crate::notification::{NotificationCenter, NotificationSource};
use crate::object::{ContextId, CoordinatorId, ManagedObject, ObjectId};

use super::fetch::FetchRequest;
use super::schema::Schema;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(m: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    m.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(m: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    m.write().unwrap_or_else(PoisonError::into_inner)
}

/// Stored state of one object.
#[derive(Debug, Clone)]
pub(crate) struct ObjectRecord {
    pub(crate) seq: u64,
    pub(crate) entity: String,
    pub(crate) fields: BTreeMap<String, Value>,
    pub(crate) relationships: BTreeMap<String, BTreeSet<ObjectId>>,
}

#[derive(Debug, Default)]
struct ObjectTable {
    rows: HashMap<ObjectId, ObjectRecord>,
    next_seq: u64,
}

/// Changes recorded since the last processed turn.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct PendingChanges {
    inserted: HashSet<ObjectId>,
    updated: HashSet<ObjectId>,
    deleted: HashSet<ObjectId>,
    refreshed: HashSet<ObjectId>,
}

impl PendingChanges {
    fn record_insert(&mut self, id: ObjectId) {
        self.inserted.insert(id);
    }

    fn record_update(&mut self, id: ObjectId) {
        if self.inserted.contains(&id) || self.deleted.contains(&id) {
            return;
        }
        self.refreshed.remove(&id);
        self.updated.insert(id);
    }

    fn record_delete(&mut self, id: ObjectId) {
        self.updated.remove(&id);
        self.refreshed.remove(&id);
        // Inserted and deleted within one turn: the object never existed.
        if !self.inserted.remove(&id) {
            self.deleted.insert(id);
        }
    }

    fn record_refresh(&mut self, id: ObjectId) {
        if self.inserted.contains(&id) || self.updated.contains(&id) || self.deleted.contains(&id) {
            return;
        }
        self.refreshed.insert(id);
    }

    fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty() && self.refreshed.is_empty()
    }
}

struct ContextState {
    id: ContextId,
    coordinator: Option<CoordinatorId>,
    schema: Arc<Schema>,
    center: Arc<NotificationCenter>,
    objects: RwLock<ObjectTable>,
    pending: Mutex<PendingChanges>,
    tasks: Mutex<VecDeque<ContextTask>>,
}

impl ContextState {
    fn record(&self, f: impl FnOnce(&mut PendingChanges)) {
        f(&mut lock(&self.pending));
    }
}

/// Backing store identity shared by contexts, plus their schema.
#[derive(Debug)]
pub struct MemoryCoordinator {
    id: CoordinatorId,
    schema: Arc<Schema>,
}

impl MemoryCoordinator {
    /// New coordinator with a fresh identity.
    #[must_use]
    pub fn new(schema: Schema) -> Arc<Self> {
        Arc::new(Self {
            id: CoordinatorId::new(),
            schema: Arc::new(schema),
        })
    }

    /// Coordinator identity.
    #[must_use]
    pub const fn id(&self) -> CoordinatorId {
        self.id
    }

    /// Shared schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// In-memory persistence context.
pub struct MemoryContext {
    state: Arc<ContextState>,
}

impl fmt::Debug for MemoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryContext")
            .field("id", &self.state.id)
            .field("coordinator", &self.state.coordinator)
            .field("objects", &self.object_count())
            .finish_non_exhaustive()
    }
}

impl MemoryContext {
    /// Context backed by `coordinator`, posting to `center`.
    #[must_use]
    pub fn new(coordinator: &MemoryCoordinator, center: Arc<NotificationCenter>) -> Arc<Self> {
        Self::build(Some(coordinator.id), Arc::clone(&coordinator.schema), center)
    }

    /// Context with no coordinator. Bridges never forward its notifications.
    #[must_use]
    pub fn detached(schema: Schema, center: Arc<NotificationCenter>) -> Arc<Self> {
        Self::build(None, Arc::new(schema), center)
    }

    fn build(coordinator: Option<CoordinatorId>, schema: Arc<Schema>, center: Arc<NotificationCenter>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(ContextState {
                id: ContextId::new(),
                coordinator,
                schema,
                center,
                objects: RwLock::new(ObjectTable::default()),
                pending: Mutex::new(PendingChanges::default()),
                tasks: Mutex::new(VecDeque::new()),
            }),
        })
    }

    /// Context identity.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.state.id
    }

    /// Insert a new, empty object of `entity`.
    pub fn insert(&self, entity: &str) -> StoreResult<MemoryObject> {
        self.state.schema.require(entity)?;

        let id = ObjectId::new();
        {
            let mut table = write(&self.state.objects);
            let seq = table.next_seq;
            table.next_seq += 1;
            table.rows.insert(
                id,
                ObjectRecord {
                    seq,
                    entity: entity.to_string(),
                    fields: BTreeMap::new(),
                    relationships: BTreeMap::new(),
                },
            );
        }
        self.state.record(|p| p.record_insert(id));

        Ok(MemoryObject {
            id,
            state: Arc::clone(&self.state),
        })
    }

    /// Delete `object`, removing it from every relationship that references it.
    ///
    /// Objects that referenced it are recorded as updated.
    pub fn delete(&self, object: &MemoryObject) -> StoreResult<()> {
        self.check_owner(object)?;

        let referrers: Vec<ObjectId> = {
            let mut table = write(&self.state.objects);
            if table.rows.remove(&object.id).is_none() {
                return Err(StoreError::ObjectNotFound(object.id));
            }
            table
                .rows
                .iter_mut()
                .filter_map(|(id, record)| {
                    let mut touched = false;
                    for targets in record.relationships.values_mut() {
                        touched |= targets.remove(&object.id);
                    }
                    touched.then_some(*id)
                })
                .collect()
        };

        self.state.record(|p| {
            p.record_delete(object.id);
            for id in referrers {
                p.record_update(id);
            }
        });
        Ok(())
    }

    /// Record that `object` was reloaded without any field change.
    pub fn refresh(&self, object: &MemoryObject) -> StoreResult<()> {
        self.check_owner(object)?;
        if !read(&self.state.objects).rows.contains_key(&object.id) {
            return Err(StoreError::ObjectNotFound(object.id));
        }
        self.state.record(|p| p.record_refresh(object.id));
        Ok(())
    }

    /// Run one turn of the context queue.
    ///
    /// Runs every task scheduled before the turn, then posts the coalesced
    /// pending changes. Returns true if a notification was posted.
    pub fn process_pending_changes(&self) -> bool {
        let tasks: Vec<ContextTask> = lock(&self.state.tasks).drain(..).collect();
        for task in tasks {
            task();
        }

        let changes = std::mem::take(&mut *lock(&self.state.pending));
        if changes.is_empty() {
            return false;
        }

        debug!(
            context = %self.state.id,
            inserted = changes.inserted.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            refreshed = changes.refreshed.len(),
            "posting objects-did-change"
        );

        let notification = ObjectsDidChange::new(self.state.id, self.state.coordinator)
            .with_inserted(changes.inserted)
            .with_updated(changes.updated)
            .with_deleted(changes.deleted)
            .with_refreshed(changes.refreshed);
        self.state.center.post(notification);
        true
    }

    /// True if changes are waiting for the next turn.
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        !lock(&self.state.pending).is_empty()
    }

    /// Tasks waiting for the next turn.
    #[must_use]
    pub fn scheduled_tasks(&self) -> usize {
        lock(&self.state.tasks).len()
    }

    /// Number of live objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        read(&self.state.objects).rows.len()
    }

    fn check_owner(&self, object: &MemoryObject) -> StoreResult<()> {
        if Arc::ptr_eq(&self.state, &object.state) {
            Ok(())
        } else {
            Err(StoreError::ForeignObject(object.id))
        }
    }
}

impl PersistenceContext for MemoryContext {
    type Object = MemoryObject;
    type Request = FetchRequest;

    fn context_id(&self) -> ContextId {
        self.state.id
    }

    fn coordinator_id(&self) -> Option<CoordinatorId> {
        self.state.coordinator
    }

    fn object_with_id(&self, id: ObjectId) -> Option<MemoryObject> {
        read(&self.state.objects).rows.contains_key(&id).then(|| MemoryObject {
            id,
            state: Arc::clone(&self.state),
        })
    }

    fn fetch(&self, request: &FetchRequest) -> StoreResult<Vec<MemoryObject>> {
        let entity = self.state.schema.require(&request.entity)?;
        let predicate = request
            .predicate
            .as_ref()
            .map(|p| p.compile(entity))
            .transpose()?;

        let table = read(&self.state.objects);
        let mut rows: Vec<(&ObjectId, &ObjectRecord)> = table
            .rows
            .iter()
            .filter(|(_, record)| record.entity == request.entity)
            .filter(|(_, record)| predicate.as_ref().map_or(true, |p| p.evaluate(record)))
            .collect();
        rows.sort_by(|(_, a), (_, b)| request.compare(a, b));
        if let Some(limit) = request.limit {
            rows.truncate(limit);
        }

        Ok(rows
            .into_iter()
            .map(|(id, _)| MemoryObject {
                id: *id,
                state: Arc::clone(&self.state),
            })
            .collect())
    }

    fn notification_source(&self) -> Arc<dyn NotificationSource> {
        self.state.center.clone()
    }

    fn schedule(&self, task: ContextTask) {
        lock(&self.state.tasks).push_back(task);
    }
}

/// Live handle to an object in a `MemoryContext`.
///
/// Reads always see the current state of the context.
#[derive(Clone)]
pub struct MemoryObject {
    id: ObjectId,
    state: Arc<ContextState>,
}

impl fmt::Debug for MemoryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryObject")
            .field("id", &self.id)
            .field("entity", &self.entity())
            .finish()
    }
}

impl PartialEq for MemoryObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for MemoryObject {}

impl MemoryObject {
    /// Object identity.
    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    /// Entity name, or `None` once deleted.
    #[must_use]
    pub fn entity(&self) -> Option<String> {
        read(&self.state.objects).rows.get(&self.id).map(|r| r.entity.clone())
    }

    /// True once the object has been deleted from its context.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        !read(&self.state.objects).rows.contains_key(&self.id)
    }

    /// Current value of `field`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        read(&self.state.objects)
            .rows
            .get(&self.id)
            .and_then(|r| r.fields.get(field).cloned())
    }

    /// Current value of a string field.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<String> {
        self.get(field).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Set `field`. Always records an update, even if the value is unchanged.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> StoreResult<()> {
        {
            let mut table = write(&self.state.objects);
            let record = table
                .rows
                .get_mut(&self.id)
                .ok_or(StoreError::ObjectNotFound(self.id))?;
            record.fields.insert(field.to_string(), value.into());
        }
        self.state.record(|p| p.record_update(self.id));
        Ok(())
    }

    /// Live objects the relationship points at.
    #[must_use]
    pub fn related(&self, relationship: &str) -> Vec<MemoryObject> {
        let table = read(&self.state.objects);
        let Some(record) = table.rows.get(&self.id) else {
            return Vec::new();
        };
        record
            .relationships
            .get(relationship)
            .into_iter()
            .flatten()
            .filter(|id| table.rows.contains_key(id))
            .map(|id| MemoryObject {
                id: *id,
                state: Arc::clone(&self.state),
            })
            .collect()
    }

    /// Replace the targets of `relationship`.
    pub fn set_related(&self, relationship: &str, targets: &[&MemoryObject]) -> StoreResult<()> {
        self.mutate_relationship(relationship, targets, |set, ids| {
            set.clear();
            set.extend(ids);
        })
    }

    /// Add one target to `relationship`.
    pub fn add_related(&self, relationship: &str, target: &MemoryObject) -> StoreResult<()> {
        self.mutate_relationship(relationship, &[target], |set, ids| set.extend(ids))
    }

    /// Remove one target from `relationship`.
    pub fn remove_related(&self, relationship: &str, target: &MemoryObject) -> StoreResult<()> {
        self.mutate_relationship(relationship, &[target], |set, ids| {
            for id in ids {
                set.remove(&id);
            }
        })
    }

    fn mutate_relationship(
        &self,
        relationship: &str,
        targets: &[&MemoryObject],
        apply: impl FnOnce(&mut BTreeSet<ObjectId>, Vec<ObjectId>),
    ) -> StoreResult<()> {
        for target in targets {
            if !Arc::ptr_eq(&self.state, &target.state) {
                return Err(StoreError::ForeignObject(target.id));
            }
        }

        {
            let mut table = write(&self.state.objects);
            for target in targets {
                if !table.rows.contains_key(&target.id) {
                    return Err(StoreError::ObjectNotFound(target.id));
                }
            }

            let record = table
                .rows
                .get_mut(&self.id)
                .ok_or(StoreError::ObjectNotFound(self.id))?;
            self.state
                .schema
                .require(&record.entity)?
                .require_relationship(relationship)?;

            let ids = targets.iter().map(|t| t.id).collect();
            apply(record.relationships.entry(relationship.to_string()).or_default(), ids);
        }

        self.state.record(|p| p.record_update(self.id));
        Ok(())
    }
}

impl ManagedObject for MemoryObject {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn relationship_names(&self) -> Vec<String> {
        self.entity()
            .and_then(|entity| self.state.schema.get(&entity).cloned())
            .map(|description| description.relationships.into_iter().collect())
            .unwrap_or_default()
    }

    fn related_ids(&self, relationship: &str) -> Vec<ObjectId> {
        read(&self.state.objects)
            .rows
            .get(&self.id)
            .and_then(|r| r.relationships.get(relationship))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}
