//! Group / Contact / PhoneNumber fixtures shared by the end-to-end tests.

#![allow(dead_code)]

use std::sync::Arc;

use kyrowatch::storage::{FetchRequest, MemoryContext, MemoryCoordinator, MemoryObject, Predicate, Schema};
use kyrowatch::NotificationCenter;

pub struct Fixture {
    pub center: Arc<NotificationCenter>,
    pub coordinator: Arc<MemoryCoordinator>,
    pub ctx: Arc<MemoryContext>,
}

pub fn contacts_schema() -> Schema {
    Schema::new()
        .entity("Group", ["contacts"])
        .entity("Contact", ["phone_numbers"])
        .leaf("PhoneNumber")
}

pub fn fixture() -> Fixture {
    let center = NotificationCenter::shared();
    let coordinator = MemoryCoordinator::new(contacts_schema());
    let ctx = MemoryContext::new(&coordinator, Arc::clone(&center));
    Fixture {
        center,
        coordinator,
        ctx,
    }
}

pub fn group(ctx: &MemoryContext, name: &str) -> MemoryObject {
    let group = ctx.insert("Group").unwrap();
    group.set("name", name).unwrap();
    group
}

pub fn contact(ctx: &MemoryContext, name: &str) -> MemoryObject {
    let contact = ctx.insert("Contact").unwrap();
    contact.set("name", name).unwrap();
    contact
}

pub fn phone_number(ctx: &MemoryContext, number: &str, title: &str) -> MemoryObject {
    let phone = ctx.insert("PhoneNumber").unwrap();
    phone.set("phone_number", number).unwrap();
    phone.set("title", title).unwrap();
    phone
}

/// Groups with at least one contact.
pub fn groups_with_contacts() -> FetchRequest {
    FetchRequest::new("Group").with_predicate(Predicate::count_at_least("contacts", 1))
}
