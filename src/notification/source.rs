//! The notification source contract.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::change::ObjectsDidChange;

/// Callback invoked for every notification posted to a source.
pub type NotificationHandler = Arc<dyn Fn(&ObjectsDidChange) + Send + Sync>;

/// Handle returned by `NotificationSource::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverToken(u64);

impl ObserverToken {
    /// Wrap a raw token value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw token value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Source of raw change notifications.
///
/// # Contract
/// - Handlers are invoked one notification at a time, in posting order.
/// - After `unsubscribe` returns, the handler is not invoked again, including
///   for the remainder of a notification currently being delivered.
/// - `unsubscribe` may be called from inside a handler.
pub trait NotificationSource: Send + Sync {
    /// Register a handler for every subsequent notification.
    fn subscribe(&self, handler: NotificationHandler) -> ObserverToken;

    /// Remove a handler. Returns false if the token was not registered.
    fn unsubscribe(&self, token: ObserverToken) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_notification_source_object_safe(_: &dyn NotificationSource) {}

    #[test]
    fn test_token_display() {
        let token = ObserverToken::from_raw(7);
        assert_eq!(token.as_u64(), 7);
        assert_eq!(token.to_string(), "observer#7");
    }
}
