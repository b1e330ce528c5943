//! The persistence-context contract consumed by the observer.
//!
//! Field storage, relationship storage, fetch execution and saving all belong
//! to the implementation. The observer only needs identity, object
//! resolution, query execution, a notification source, and a way to run
//! work on the context's serial queue.

use std::sync::Arc;

use crate::error::StoreResult;
use crate::notification::NotificationSource;
use crate::object::{ContextId, CoordinatorId, ManagedObject, ObjectId};

/// A unit of work scheduled on a context's serial queue.
pub type ContextTask = Box<dyn FnOnce() + Send + 'static>;

/// A mutable in-memory scope holding live managed objects.
///
/// # Concurrency
/// Notifications for one context are assumed to be delivered serially, on
/// the same logical queue that `schedule` runs tasks on.
pub trait PersistenceContext: Send + Sync + 'static {
    /// Live object handle type.
    type Object: ManagedObject + Clone + 'static;

    /// Query description type accepted by `fetch`.
    type Request: Send + Sync + 'static;

    /// Identity of this context.
    fn context_id(&self) -> ContextId;

    /// Coordinator backing this context, if it has one.
    fn coordinator_id(&self) -> Option<CoordinatorId>;

    /// Resolve an identifier to a live object in this context.
    ///
    /// Returns `None` for identifiers that are unknown or already deleted.
    fn object_with_id(&self, id: ObjectId) -> Option<Self::Object>;

    /// Execute a query and return its ordered results.
    fn fetch(&self, request: &Self::Request) -> StoreResult<Vec<Self::Object>>;

    /// Source this context's change notifications are posted to.
    fn notification_source(&self) -> Arc<dyn NotificationSource>;

    /// Run `task` on a later turn of this context's serial queue.
    ///
    /// The task must not run before `schedule` returns.
    fn schedule(&self, task: ContextTask);
}
