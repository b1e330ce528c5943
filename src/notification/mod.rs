//! Notification sources.
//!
//! A notification source delivers raw `ObjectsDidChange` notifications to
//! registered handlers. It is injected into each persistence context instead
//! of being process-wide state, so tests can post synthetic notifications.

/// In-process notification center.
pub mod center;
/// Source trait and subscription tokens.
pub mod source;

pub use center::NotificationCenter;
pub use source::{NotificationHandler, NotificationSource, ObserverToken};
