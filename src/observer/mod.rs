//! Observer subsystem: turns raw change notifications into subscriber streams.
//!
//! Three entry points, all on `ContextObserver`:
//! - `observe_context`: every same-store `ChangeEvent`.
//! - `observe_object`: a root object, re-emitted when it or anything reachable
//!   from it is updated; fails with `ObjectDeleted` when the root is deleted.
//! - `observe_result`: a query, re-executed whenever objects are inserted or
//!   deleted.
//!
//! Each stream owns a private `NotificationBridge`. Dropping or disposing the
//! stream releases it.

/// Store-filtering notification bridge.
pub mod bridge;
/// Relationship closure and interest sets.
pub mod closure;
/// Per-object watcher.
pub mod object;
/// Per-query watcher.
pub mod query;
/// Subscriber stream handles.
pub mod stream;

use std::sync::Arc;

use crate::context::PersistenceContext;
use crate::error::{StoreError, WatchResult};
use crate::object::ObjectId;

pub use bridge::{is_same_store, ChangeStream, NotificationBridge};
pub use closure::{relationship_closure, InterestSet};
pub use object::{ObjectDecision, ObjectStream, ObjectWatcher};
pub use query::{requires_refetch, QueryWatcher, ResultStream};
pub use stream::{Disposable, WatchStream};

/// Observer configuration.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Per-stream buffer capacity. When full, the oldest item is dropped and counted.
    pub stream_capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            stream_capacity: 1024,
        }
    }
}

/// Entry point for observing one persistence context.
#[derive(Debug)]
pub struct ContextObserver<C: PersistenceContext> {
    context: Arc<C>,
    config: ObserverConfig,
}

impl<C: PersistenceContext> Clone for ContextObserver<C> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            config: self.config.clone(),
        }
    }
}

impl<C: PersistenceContext> ContextObserver<C> {
    /// Observer with the default configuration.
    #[must_use]
    pub fn new(context: Arc<C>) -> Self {
        Self::with_config(context, ObserverConfig::default())
    }

    /// Observer with an explicit configuration.
    #[must_use]
    pub fn with_config(context: Arc<C>, config: ObserverConfig) -> Self {
        Self { context, config }
    }

    /// The observed context.
    #[must_use]
    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Stream every change event from contexts sharing this context's coordinator.
    #[must_use]
    pub fn observe_context(&self) -> ChangeStream {
        NotificationBridge::observe(self.context.as_ref(), &self.config)
    }

    /// Stream `object` whenever it or anything reachable from it is updated.
    #[must_use]
    pub fn observe_object(&self, object: &C::Object) -> ObjectStream<C::Object> {
        ObjectWatcher::observe(self.context.as_ref(), object, &self.config)
    }

    /// Resolve `id` in the observed context and watch it like `observe_object`.
    ///
    /// Fails with `StoreError::ObjectNotFound` if the identifier does not resolve.
    pub fn observe_object_with_id(&self, id: ObjectId) -> WatchResult<ObjectStream<C::Object>> {
        let object = self
            .context
            .object_with_id(id)
            .ok_or(StoreError::ObjectNotFound(id))?;
        Ok(self.observe_object(&object))
    }

    /// Stream the results of `request` initially and after every insert or delete.
    #[must_use]
    pub fn observe_result(&self, request: C::Request) -> ResultStream<C::Object> {
        QueryWatcher::observe(&self.context, request, &self.config)
    }
}

/// Shorthand for building a `ContextObserver` from a shared context.
pub trait Reactive {
    /// The observed context type.
    type Context: PersistenceContext;

    /// Observer over this context with the default configuration.
    fn reactive(&self) -> ContextObserver<Self::Context>;
}

impl<C: PersistenceContext> Reactive for Arc<C> {
    type Context = C;

    fn reactive(&self) -> ContextObserver<C> {
        ContextObserver::new(Arc::clone(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = ObserverConfig::default();
        assert_eq!(cfg.stream_capacity, 1024);
    }
}
