//! In-memory reference persistence context.
//!
//! `MemoryContext` implements `PersistenceContext` so the observer can be
//! embedded without an external store, and exercised end to end in tests.

/// Fetch requests and predicates.
pub mod fetch;
/// Object storage and the context itself.
pub mod memory;
/// Entity schema.
pub mod schema;

pub use fetch::{FetchRequest, Predicate, SortDescriptor};
pub use memory::{MemoryContext, MemoryCoordinator, MemoryObject};
pub use schema::{EntityDescription, Schema};
