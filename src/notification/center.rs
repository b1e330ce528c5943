//! In-process notification center.
//!
//! Posting is non-blocking with respect to other posters: the first thread to
//! post becomes the drainer and delivers every queued notification in order.
//! Posts made while a drain is in progress (from a handler, or from another
//! thread) are queued and delivered by that drainer. This serializes delivery
//! without holding any lock while a handler runs.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::change::ObjectsDidChange;

use super::source::{NotificationHandler, NotificationSource, ObserverToken};

struct Registration {
    handler: NotificationHandler,
    active: Arc<AtomicBool>,
}

/// Serializing, in-process `NotificationSource`.
#[derive(Default)]
pub struct NotificationCenter {
    registrations: Mutex<BTreeMap<ObserverToken, Registration>>,
    queue: Mutex<VecDeque<ObjectsDidChange>>,
    draining: AtomicBool,
    next_token: AtomicU64,
    delivered: AtomicU64,
}

impl std::fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("observers", &self.observer_count())
            .field("delivered", &self.delivered())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the draining flag even if a handler panics.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl NotificationCenter {
    /// Creates an empty center.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty center behind an `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Post a notification to every registered handler.
    ///
    /// Returns once the notification has been queued. If no other drain is in
    /// progress it has also been delivered.
    pub fn post(&self, notification: ObjectsDidChange) {
        lock(&self.queue).push_back(notification);

        loop {
            if self.draining.swap(true, Ordering::AcqRel) {
                // The active drainer picks our notification up.
                return;
            }

            {
                let _guard = DrainGuard(&self.draining);
                loop {
                    let next = lock(&self.queue).pop_front();
                    let Some(notification) = next else {
                        break;
                    };
                    self.deliver(&notification);
                }
            }

            // A post may have landed between the last pop and the flag reset.
            if lock(&self.queue).is_empty() {
                return;
            }
        }
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        lock(&self.registrations).len()
    }

    /// Total notifications delivered since creation.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn deliver(&self, notification: &ObjectsDidChange) {
        let snapshot: Vec<(Arc<AtomicBool>, NotificationHandler)> = lock(&self.registrations)
            .values()
            .map(|r| (Arc::clone(&r.active), Arc::clone(&r.handler)))
            .collect();

        trace!(
            origin = %notification.origin,
            observers = snapshot.len(),
            "delivering objects-did-change notification"
        );

        for (active, handler) in snapshot {
            // An earlier handler may have unsubscribed this one.
            if active.load(Ordering::Acquire) {
                handler(notification);
            }
        }

        self.delivered.fetch_add(1, Ordering::Relaxed);
    }
}

impl NotificationSource for NotificationCenter {
    fn subscribe(&self, handler: NotificationHandler) -> ObserverToken {
        let token = ObserverToken::from_raw(self.next_token.fetch_add(1, Ordering::Relaxed));
        lock(&self.registrations).insert(
            token,
            Registration {
                handler,
                active: Arc::new(AtomicBool::new(true)),
            },
        );
        token
    }

    fn unsubscribe(&self, token: ObserverToken) -> bool {
        let removed = lock(&self.registrations).remove(&token);
        match removed {
            Some(registration) => {
                registration.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }
}
