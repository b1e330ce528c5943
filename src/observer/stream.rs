//! Subscriber stream handles.
//!
//! A `WatchStream` is the receiving end of one watcher. Items are buffered in
//! a bounded channel, so nothing published after the stream is returned can
//! be missed by a consumer that starts receiving later. Completion is the
//! channel disconnecting after the last buffered item.
//!
//! A full buffer evicts its oldest item. The newest item, and therefore a
//! terminal failure or the latest query result, is always enqueued.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use tracing::{debug, warn};

use crate::error::{ObserverError, WatchError, WatchResult};

use super::bridge::NotificationBridge;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sending half of a stream, owned by the watcher.
pub(crate) struct Outlet<T> {
    name: &'static str,
    tx: Mutex<Option<Sender<T>>>,
    /// Receiving handle used only to evict the oldest item of a full buffer.
    evict: Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Outlet<T> {
    /// Non-blocking send. Returns false only once the outlet is closed.
    ///
    /// If the buffer is full the oldest buffered item is dropped and counted.
    pub(crate) fn send(&self, item: T) -> bool {
        let guard = lock(&self.tx);
        let Some(tx) = guard.as_ref() else {
            return false;
        };

        let mut item = item;
        loop {
            match tx.try_send(item) {
                Ok(()) => return true,
                Err(TrySendError::Full(rejected)) => {
                    // The subscriber may drain concurrently; then nothing is evicted.
                    if self.evict.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(stream = self.name, "subscriber stream full, dropping oldest item");
                    }
                    item = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    /// Drop the sender so the receiver completes once drained.
    pub(crate) fn close(&self) {
        lock(&self.tx).take();
    }

    pub(crate) fn is_open(&self) -> bool {
        lock(&self.tx).is_some()
    }
}

struct SubscriptionState {
    stream: &'static str,
    disposed: AtomicBool,
    bridge: Mutex<Option<NotificationBridge>>,
    close_outlet: Box<dyn Fn() + Send + Sync>,
}

/// Disposal handle for one watcher.
///
/// Disposal stops delivery to the subscriber, completes the stream and
/// releases the watcher's bridge. It is idempotent and may be called from any
/// thread, including from inside a notification handler.
#[derive(Clone)]
pub struct Disposable {
    state: Arc<SubscriptionState>,
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("stream", &self.state.stream)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Disposable {
    /// Dispose the subscription. Returns true only for the call that did it.
    pub fn dispose(&self) -> bool {
        if self.state.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }

        (self.state.close_outlet)();

        let bridge = lock(&self.state.bridge).take();
        if let Some(bridge) = bridge {
            bridge.detach();
        }

        debug!(stream = self.state.stream, "subscription disposed");
        true
    }

    /// True once `dispose` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::Acquire)
    }

    /// Hand the watcher's bridge to this subscription.
    ///
    /// If disposal already happened the bridge is detached immediately.
    pub(crate) fn install_bridge(&self, bridge: NotificationBridge) {
        let mut slot = lock(&self.state.bridge);
        if self.is_disposed() {
            drop(slot);
            bridge.detach();
            return;
        }
        *slot = Some(bridge);
    }

    pub(crate) fn downgrade(&self) -> WeakDisposable {
        WeakDisposable(Arc::downgrade(&self.state))
    }
}

/// Non-owning disposal handle held by watchers.
#[derive(Clone)]
pub(crate) struct WeakDisposable(Weak<SubscriptionState>);

impl WeakDisposable {
    pub(crate) fn dispose(&self) {
        if let Some(state) = self.0.upgrade() {
            Disposable { state }.dispose();
        }
    }
}

/// Receiving end of a watcher.
///
/// Dropping the stream disposes its subscription.
pub struct WatchStream<T> {
    rx: Receiver<T>,
    disposable: Disposable,
    dropped: Arc<AtomicU64>,
}

impl<T> fmt::Debug for WatchStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStream")
            .field("stream", &self.disposable.state.stream)
            .field("buffered", &self.rx.len())
            .field("disposed", &self.disposable.is_disposed())
            .finish()
    }
}

/// Open a stream with the given buffer capacity.
pub(crate) fn open<T: Send + 'static>(name: &'static str, capacity: usize) -> (Arc<Outlet<T>>, WatchStream<T>) {
    let (tx, rx) = bounded::<T>(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));

    let outlet = Arc::new(Outlet {
        name,
        tx: Mutex::new(Some(tx)),
        evict: rx.clone(),
        dropped: Arc::clone(&dropped),
    });

    let closer = Arc::clone(&outlet);
    let state = Arc::new(SubscriptionState {
        stream: name,
        disposed: AtomicBool::new(false),
        bridge: Mutex::new(None),
        close_outlet: Box::new(move || closer.close()),
    });

    let stream = WatchStream {
        rx,
        disposable: Disposable { state },
        dropped,
    };
    (outlet, stream)
}

impl<T> WatchStream<T> {
    /// Receive the next item (blocking).
    ///
    /// Returns `Disconnected` once the stream has completed and is drained.
    pub fn recv(&self) -> WatchResult<T> {
        self.rx
            .recv()
            .map_err(|_| WatchError::disconnected(self.disposable.state.stream))
    }

    /// Receive the next item with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> WatchResult<T> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => WatchError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            },
            RecvTimeoutError::Disconnected => WatchError::disconnected(self.disposable.state.stream),
        })
    }

    /// Receive a buffered item without blocking.
    pub fn try_recv(&self) -> WatchResult<Option<T>> {
        match self.rx.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WatchError::disconnected(self.disposable.state.stream)),
        }
    }

    /// Receive up to `count` items, waiting at most `timeout` overall.
    ///
    /// Returns fewer items if the stream completes or the deadline passes.
    pub fn take(&self, count: usize, timeout: Duration) -> Vec<T> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(item) => out.push(item),
                Err(_) => break,
            }
        }
        out
    }

    /// Items currently buffered.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Dispose this stream's subscription. Buffered items stay readable.
    pub fn dispose(&self) -> bool {
        self.disposable.dispose()
    }

    /// True once the subscription has been disposed or has terminated.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposable.is_disposed()
    }

    /// A cloneable disposal handle for this stream.
    #[must_use]
    pub fn disposable(&self) -> Disposable {
        self.disposable.clone()
    }

    /// Items dropped because the buffer was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Blocking iterator that ends when the stream completes.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.iter()
    }
}

impl<T> WatchStream<Result<T, ObserverError>> {
    /// Receive the next value, surfacing an in-stream failure as `WatchError::Observer`.
    pub fn recv_value_timeout(&self, timeout: Duration) -> WatchResult<T> {
        self.recv_timeout(timeout)?.map_err(WatchError::from)
    }
}

impl<T> Drop for WatchStream<T> {
    fn drop(&mut self) {
        self.disposable.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::object::ObjectId;

    #[test]
    fn items_sent_before_receiving_are_buffered() {
        let (outlet, stream) = open::<u32>("test_stream", 4);
        assert!(outlet.send(1));
        assert!(outlet.send(2));

        assert_eq!(stream.recv().unwrap(), 1);
        assert_eq!(stream.try_recv().unwrap(), Some(2));
        assert_eq!(stream.try_recv().unwrap(), None);
    }

    #[test]
    fn full_buffer_evicts_oldest_and_counts() {
        let (outlet, stream) = open::<u32>("test_stream", 2);
        assert!(outlet.send(1));
        assert!(outlet.send(2));
        assert!(outlet.send(3));
        assert!(outlet.send(4));

        assert_eq!(stream.dropped_events(), 2);
        assert_eq!(stream.pending(), 2);
        assert_eq!(stream.take(2, Duration::from_millis(10)), vec![3, 4]);
    }

    #[test]
    fn last_item_before_close_survives_full_buffer() {
        let (outlet, stream) = open::<u32>("test_stream", 1);
        outlet.send(1);
        outlet.send(99);
        stream.dispose();

        assert_eq!(stream.recv().unwrap(), 99);
        assert!(stream.recv().unwrap_err().is_disconnected());
    }

    #[test]
    fn dispose_completes_after_buffered_items() {
        let (outlet, stream) = open::<u32>("test_stream", 4);
        outlet.send(7);

        assert!(stream.dispose());
        assert!(!stream.dispose());
        assert!(stream.is_disposed());
        assert!(!outlet.is_open());
        assert!(!outlet.send(8));

        assert_eq!(stream.recv().unwrap(), 7);
        assert!(stream.recv().unwrap_err().is_disconnected());
    }

    #[test]
    fn weak_handle_disposes_and_outlives_stream() {
        let (outlet, stream) = open::<u32>("test_stream", 4);
        let weak = stream.disposable().downgrade();

        weak.dispose();
        assert!(stream.is_disposed());
        assert!(!outlet.is_open());

        drop(stream);
        weak.dispose();
    }

    #[test]
    fn take_stops_at_deadline_or_completion() {
        let (outlet, stream) = open::<u32>("test_stream", 4);
        outlet.send(1);
        assert_eq!(stream.take(3, Duration::from_millis(20)), vec![1]);

        outlet.send(2);
        outlet.send(3);
        stream.dispose();
        assert_eq!(stream.take(3, Duration::from_secs(5)), vec![2, 3]);
    }

    #[test]
    fn recv_value_surfaces_observer_failures() {
        let (outlet, stream) = open::<Result<u32, ObserverError>>("test_stream", 4);
        outlet.send(Ok(1));
        outlet.send(Err(ObserverError::ObjectDeleted { id: ObjectId::new() }));

        assert_eq!(stream.recv_value_timeout(Duration::from_millis(10)).unwrap(), 1);
        let err = stream.recv_value_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, WatchError::Observer(ObserverError::ObjectDeleted { .. })));
        assert!(stream.recv_value_timeout(Duration::from_millis(10)).unwrap_err().is_timeout());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (outlet, stream) = open::<u32>("test_stream", 0);
        assert!(outlet.send(1));
        assert_eq!(stream.recv_timeout(Duration::from_millis(10)).unwrap(), 1);
    }
}
