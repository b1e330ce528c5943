//! # kyrowatch - change notifications for object stores
//!
//! kyrowatch turns the raw "objects changed" notifications of a persistence
//! context into typed streams that consumers can subscribe to.
//!
//! ## Core Concepts
//!
//! - **ChangeEvent**: the inserted/updated/deleted/refreshed identifiers of one notification
//! - **NotificationBridge**: one filtered registration on a context's notification source
//! - **Relationship closure**: every identifier reachable from an object through relationships
//! - **ObjectWatcher**: re-emits an object when it or anything reachable from it is updated
//! - **QueryWatcher**: re-executes a query whenever objects are inserted or deleted
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use kyrowatch::notification::NotificationCenter;
//! use kyrowatch::storage::{MemoryContext, MemoryCoordinator, Schema};
//! use kyrowatch::Reactive;
//!
//! let schema = Schema::new().entity("Group", ["contacts"]).leaf("Contact");
//! let coordinator = MemoryCoordinator::new(schema);
//! let ctx = MemoryContext::new(&coordinator, NotificationCenter::shared());
//!
//! let group = ctx.insert("Group").unwrap();
//! group.set("name", "Test group").unwrap();
//! ctx.process_pending_changes();
//!
//! let stream = ctx.reactive().observe_object(&group);
//! group.set("name", "Updated test group").unwrap();
//! ctx.process_pending_changes();
//!
//! let updated = stream.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
//! assert_eq!(updated.get_str("name").as_deref(), Some("Updated test group"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod change;
pub mod context;
pub mod error;
pub mod notification;
pub mod object;
pub mod observer;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use change::{ChangeEvent, ObjectsDidChange};
pub use context::{ContextTask, PersistenceContext};
pub use error::{FetchError, ObserverError, StoreError, StoreResult, WatchError, WatchResult};
pub use notification::{NotificationCenter, NotificationSource, ObserverToken};
pub use object::{ContextId, CoordinatorId, ManagedObject, ObjectId};
pub use observer::{
	relationship_closure, ChangeStream, ContextObserver, Disposable, InterestSet, NotificationBridge,
	ObjectStream, ObjectWatcher, ObserverConfig, QueryWatcher, Reactive, ResultStream, WatchStream,
};
