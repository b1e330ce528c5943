//! Notification bridge.
//!
//! The bridge holds exactly one registration on a context's notification
//! source. It drops notifications that come from contexts backed by another
//! coordinator and republishes the rest as `ChangeEvent`s, one per raw
//! notification, in arrival order.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::change::{ChangeEvent, ObjectsDidChange};
use crate::context::PersistenceContext;
use crate::notification::{NotificationHandler, NotificationSource, ObserverToken};
use crate::object::{ContextId, CoordinatorId};

use super::stream::{self, WatchStream};
use super::ObserverConfig;

/// Stream of change events for one observed context. Never fails.
pub type ChangeStream = WatchStream<ChangeEvent>;

/// True if `notification` comes from a context sharing the observed coordinator.
///
/// A missing coordinator on either side never matches.
#[must_use]
pub fn is_same_store(observed: Option<CoordinatorId>, notification: &ObjectsDidChange) -> bool {
    match (observed, notification.coordinator) {
        (Some(ours), Some(theirs)) => ours == theirs,
        _ => false,
    }
}

/// A filtered registration on a notification source.
///
/// Detached on drop.
pub struct NotificationBridge {
    source: Arc<dyn NotificationSource>,
    token: ObserverToken,
    context: ContextId,
    attached: AtomicBool,
}

impl fmt::Debug for NotificationBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBridge")
            .field("token", &self.token)
            .field("context", &self.context)
            .field("attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

impl NotificationBridge {
    /// Register on `source` and forward same-store events to `sink`.
    pub fn attach<F>(
        source: Arc<dyn NotificationSource>,
        context: ContextId,
        coordinator: Option<CoordinatorId>,
        sink: F,
    ) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let handler: NotificationHandler = Arc::new(move |notification: &ObjectsDidChange| {
            if !is_same_store(coordinator, notification) {
                trace!(
                    %context,
                    origin = %notification.origin,
                    "discarding notification from another store"
                );
                return;
            }
            trace!(
                %context,
                origin = %notification.origin,
                posted_at = %notification.posted_at,
                lag_us = (chrono::Utc::now() - notification.posted_at).num_microseconds(),
                "forwarding change event"
            );
            sink(&ChangeEvent::from_notification(notification));
        });

        let token = source.subscribe(handler);
        debug!(%context, %token, "notification bridge attached");

        Self {
            source,
            token,
            context,
            attached: AtomicBool::new(true),
        }
    }

    /// Attach to the notification source of `context`.
    pub fn for_context<C, F>(context: &C, sink: F) -> Self
    where
        C: PersistenceContext,
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        Self::attach(
            context.notification_source(),
            context.context_id(),
            context.coordinator_id(),
            sink,
        )
    }

    /// Observe every same-store change event of `context`.
    pub fn observe<C: PersistenceContext>(context: &C, config: &ObserverConfig) -> ChangeStream {
        let (outlet, stream) = stream::open::<ChangeEvent>("context_stream", config.stream_capacity);
        let bridge = Self::for_context(context, move |event| {
            outlet.send(event.clone());
        });
        stream.disposable().install_bridge(bridge);
        stream
    }

    /// Release the source registration. Returns true only for the call that did it.
    pub fn detach(&self) -> bool {
        if !self.attached.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.source.unsubscribe(self.token);
        debug!(context = %self.context, token = %self.token, "notification bridge detached");
        true
    }

    /// True until `detach` has run.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }
}

impl Drop for NotificationBridge {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use crate::notification::NotificationCenter;
    use crate::object::ObjectId;

    fn collecting_bridge(
        center: &Arc<NotificationCenter>,
        coordinator: Option<CoordinatorId>,
    ) -> (NotificationBridge, Arc<Mutex<Vec<ChangeEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let source: Arc<dyn NotificationSource> = center.clone();
        let bridge = NotificationBridge::attach(source, ContextId::new(), coordinator, move |e| {
            s.lock().unwrap().push(e.clone());
        });
        (bridge, seen)
    }

    #[test]
    fn same_store_requires_both_coordinators() {
        let coordinator = CoordinatorId::new();
        let note = ObjectsDidChange::new(ContextId::new(), Some(coordinator));
        assert!(is_same_store(Some(coordinator), &note));
        assert!(!is_same_store(Some(CoordinatorId::new()), &note));
        assert!(!is_same_store(None, &note));

        let orphan = ObjectsDidChange::new(ContextId::new(), None);
        assert!(!is_same_store(Some(coordinator), &orphan));
        assert!(!is_same_store(None, &orphan));
    }

    #[test]
    fn forwards_same_store_and_drops_foreign_notifications() {
        let center = NotificationCenter::shared();
        let coordinator = CoordinatorId::new();
        let (_bridge, seen) = collecting_bridge(&center, Some(coordinator));

        let ours = ObjectId::new();
        center.post(ObjectsDidChange::new(ContextId::new(), Some(coordinator)).with_updated([ours]));
        center.post(ObjectsDidChange::new(ContextId::new(), Some(CoordinatorId::new())).with_updated([ObjectId::new()]));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].updated.contains(&ours));
    }

    #[test]
    fn preserves_arrival_order_without_coalescing() {
        let center = NotificationCenter::shared();
        let coordinator = CoordinatorId::new();
        let (_bridge, seen) = collecting_bridge(&center, Some(coordinator));

        let ids: Vec<ObjectId> = (0..5).map(|_| ObjectId::new()).collect();
        for id in &ids {
            center.post(ObjectsDidChange::new(ContextId::new(), Some(coordinator)).with_inserted([*id]));
        }

        let seen = seen.lock().unwrap();
        let order: Vec<ObjectId> = seen.iter().flat_map(|e| e.inserted.iter().copied()).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn detach_unregisters_once() {
        let center = NotificationCenter::shared();
        let (bridge, seen) = collecting_bridge(&center, Some(CoordinatorId::new()));
        assert_eq!(center.observer_count(), 1);

        assert!(bridge.detach());
        assert!(!bridge.detach());
        assert!(!bridge.is_attached());
        assert_eq!(center.observer_count(), 0);

        drop(bridge);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn drop_unregisters() {
        let center = NotificationCenter::shared();
        let (bridge, _seen) = collecting_bridge(&center, None);
        drop(bridge);
        assert_eq!(center.observer_count(), 0);
    }
}
