//! Per-query watcher.
//!
//! Runs the query once on the context's next queue turn after subscription,
//! then again for every change event that inserts or deletes something.
//! Update-only and refresh-only events never re-run the query.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, trace, warn};

use crate::change::ChangeEvent;
use crate::context::PersistenceContext;
use crate::error::ObserverError;

use super::bridge::NotificationBridge;
use super::stream::{self, Outlet, WatchStream, WeakDisposable};
use super::ObserverConfig;

/// Stream of full query results. Fetch failures do not end the stream.
pub type ResultStream<O> = WatchStream<Result<Vec<O>, ObserverError>>;

/// True if `event` can change the membership of a query result.
#[must_use]
pub fn requires_refetch(event: &ChangeEvent) -> bool {
    event.changes_membership()
}

/// Re-executes one request whenever the result set may have changed.
pub struct QueryWatcher<C: PersistenceContext> {
    context: Weak<C>,
    request: C::Request,
    outlet: Arc<Outlet<Result<Vec<C::Object>, ObserverError>>>,
    subscription: WeakDisposable,
    fetches: AtomicU64,
}

impl<C: PersistenceContext> QueryWatcher<C> {
    /// Start watching `request` in `context`.
    ///
    /// The bridge attaches first and the initial fetch is scheduled on the
    /// context queue afterwards, so no change between the two is lost.
    pub fn observe(context: &Arc<C>, request: C::Request, config: &ObserverConfig) -> ResultStream<C::Object> {
        let (outlet, stream) = stream::open("result_stream", config.stream_capacity);
        let disposable = stream.disposable();

        let watcher = Arc::new(Self {
            context: Arc::downgrade(context),
            request,
            outlet,
            subscription: disposable.downgrade(),
            fetches: AtomicU64::new(0),
        });

        let on_change = Arc::clone(&watcher);
        let bridge = NotificationBridge::for_context(context.as_ref(), move |event| on_change.on_change(event));
        disposable.install_bridge(bridge);

        debug!(context = %context.context_id(), "query watcher subscribed, scheduling initial fetch");
        context.schedule(Box::new(move || watcher.execute_fetch()));

        stream
    }

    fn on_change(&self, event: &ChangeEvent) {
        if !requires_refetch(event) {
            trace!("change event without inserts or deletes, skipping refetch");
            return;
        }
        self.execute_fetch();
    }

    fn execute_fetch(&self) {
        if !self.outlet.is_open() {
            return;
        }

        let Some(context) = self.context.upgrade() else {
            debug!("observed context dropped, completing result stream");
            self.subscription.dispose();
            return;
        };

        let fetch_no = self.fetches.fetch_add(1, Ordering::Relaxed) + 1;
        let result = context.fetch(&self.request).map_err(|e| ObserverError::Fetch(e.into()));
        match &result {
            Ok(rows) => trace!(fetch_no, rows = rows.len(), "query fetch completed"),
            Err(err) => warn!(fetch_no, error = %err, "query fetch failed"),
        }
        self.outlet.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    use crate::object::ObjectId;

    #[test]
    fn refetch_only_on_membership_changes() {
        let id = ObjectId::new();

        let updated = ChangeEvent {
            updated: HashSet::from([id]),
            ..ChangeEvent::default()
        };
        assert!(!requires_refetch(&updated));

        let refreshed = ChangeEvent {
            refreshed: HashSet::from([id]),
            ..ChangeEvent::default()
        };
        assert!(!requires_refetch(&refreshed));

        let inserted = ChangeEvent {
            inserted: HashSet::from([id]),
            ..ChangeEvent::default()
        };
        assert!(requires_refetch(&inserted));

        let deleted = ChangeEvent {
            deleted: HashSet::from([id]),
            updated: HashSet::from([ObjectId::new()]),
            ..ChangeEvent::default()
        };
        assert!(requires_refetch(&deleted));
    }
}
