//! Per-object watcher.
//!
//! Emits the root handle whenever the root or anything in its interest set is
//! updated, and fails with `ObjectDeleted` (terminal) when the root itself is
//! deleted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::change::ChangeEvent;
use crate::context::PersistenceContext;
use crate::error::ObserverError;
use crate::object::{ManagedObject, ObjectId};

use super::bridge::NotificationBridge;
use super::closure::InterestSet;
use super::stream::{self, Outlet, WatchStream, WeakDisposable};
use super::ObserverConfig;

/// Stream of root handles, ending in at most one `ObjectDeleted` failure.
pub type ObjectStream<O> = WatchStream<Result<O, ObserverError>>;

/// Outcome of one change event for one watched root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectDecision {
    /// The root was deleted.
    Deleted,
    /// Something of interest was updated.
    Changed,
    /// Nothing of interest happened.
    Unchanged,
}

/// Classify `event` for a watcher on `root`.
///
/// Root deletion wins over any update in the same event. Deleting a related
/// object, inserting, and refreshing never count as a change by themselves.
#[must_use]
pub fn decide(root: ObjectId, interest: &InterestSet, event: &ChangeEvent) -> ObjectDecision {
    if event.deleted.contains(&root) {
        ObjectDecision::Deleted
    } else if interest.intersects(&event.updated) {
        ObjectDecision::Changed
    } else {
        ObjectDecision::Unchanged
    }
}

/// Watches one root object and everything reachable from it.
pub struct ObjectWatcher<O> {
    root: O,
    interest: InterestSet,
    outlet: Arc<Outlet<Result<O, ObserverError>>>,
    subscription: WeakDisposable,
    terminated: AtomicBool,
}

impl<O> ObjectWatcher<O>
where
    O: ManagedObject + Clone + 'static,
{
    /// Start watching `root` in `context`.
    ///
    /// The interest set is computed here, once, before the bridge attaches.
    pub fn observe<C>(context: &C, root: &O, config: &ObserverConfig) -> ObjectStream<O>
    where
        C: PersistenceContext<Object = O>,
    {
        let interest = InterestSet::compute(context, root);
        let (outlet, stream) = stream::open("object_stream", config.stream_capacity);
        let disposable = stream.disposable();

        debug!(
            root = %root.object_id(),
            interest = interest.len(),
            "object watcher subscribed"
        );

        let watcher = Arc::new(Self {
            root: root.clone(),
            interest,
            outlet,
            subscription: disposable.downgrade(),
            terminated: AtomicBool::new(false),
        });

        let bridge = NotificationBridge::for_context(context, move |event| watcher.on_change(event));
        disposable.install_bridge(bridge);
        stream
    }

    fn on_change(&self, event: &ChangeEvent) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }

        let root_id = self.root.object_id();
        match decide(root_id, &self.interest, event) {
            ObjectDecision::Deleted => {
                if self.terminated.swap(true, Ordering::AcqRel) {
                    return;
                }
                debug!(root = %root_id, "watched object deleted, terminating stream");
                self.outlet.send(Err(ObserverError::ObjectDeleted { id: root_id }));
                self.subscription.dispose();
            }
            ObjectDecision::Changed => {
                trace!(root = %root_id, "watched object graph updated");
                self.outlet.send(Ok(self.root.clone()));
            }
            ObjectDecision::Unchanged => {
                trace!(root = %root_id, "change event outside interest set");
            }
        }
    }
}
