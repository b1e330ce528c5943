mod common;

use std::sync::Arc;
use std::time::Duration;

use kyrowatch::storage::{FetchRequest, MemoryContext, Predicate};
use kyrowatch::{FetchError, ObserverError, Reactive};

use common::{contact, fixture, group, groups_with_contacts};

const WAIT: Duration = Duration::from_secs(1);
const QUIET: Duration = Duration::from_millis(50);

fn names(rows: &[kyrowatch::storage::MemoryObject]) -> Vec<String> {
    rows.iter().filter_map(|r| r.get_str("name")).collect()
}

#[test]
fn initial_fetch_runs_on_next_turn() {
    let f = fixture();
    let stream = f.ctx.reactive().observe_result(groups_with_contacts());

    assert_eq!(f.ctx.scheduled_tasks(), 1);
    assert!(stream.try_recv().unwrap().is_none());

    f.ctx.process_pending_changes();
    let rows = stream.recv_timeout(WAIT).unwrap().unwrap();
    assert!(rows.is_empty());
}

#[test]
fn insertion_triggers_refetch() {
    let f = fixture();
    let stream = f.ctx.reactive().observe_result(groups_with_contacts());
    f.ctx.process_pending_changes();
    assert_eq!(stream.recv_timeout(WAIT).unwrap().unwrap().len(), 0);

    let c = contact(&f.ctx, "John Doe");
    let g = group(&f.ctx, "Test group");
    g.set_related("contacts", &[&c]).unwrap();
    f.ctx.process_pending_changes();

    let rows = stream.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(rows, vec![g]);

    // Exactly one refetch per insert-only event.
    assert!(stream.recv_timeout(QUIET).unwrap_err().is_timeout());
    assert_eq!(stream.pending(), 0);
}

#[test]
fn deletion_triggers_refetch() {
    let f = fixture();
    let c = contact(&f.ctx, "John Doe");
    let g = group(&f.ctx, "Test group");
    g.set_related("contacts", &[&c]).unwrap();
    f.ctx.process_pending_changes();

    let stream = f.ctx.reactive().observe_result(groups_with_contacts());
    f.ctx.process_pending_changes();
    assert_eq!(stream.recv_timeout(WAIT).unwrap().unwrap().len(), 1);

    f.ctx.delete(&g).unwrap();
    f.ctx.process_pending_changes();

    let rows = stream.recv_timeout(WAIT).unwrap().unwrap();
    assert!(rows.is_empty());

    // Exactly one refetch per delete-only event.
    assert!(stream.recv_timeout(QUIET).unwrap_err().is_timeout());
    assert_eq!(stream.pending(), 0);
}

#[test]
fn deleting_a_member_changes_predicate_result() {
    let f = fixture();
    let c = contact(&f.ctx, "John Doe");
    let g = group(&f.ctx, "Test group");
    g.set_related("contacts", &[&c]).unwrap();
    f.ctx.process_pending_changes();

    let stream = f.ctx.reactive().observe_result(groups_with_contacts());
    f.ctx.process_pending_changes();
    assert_eq!(stream.recv_timeout(WAIT).unwrap().unwrap().len(), 1);

    f.ctx.delete(&c).unwrap();
    f.ctx.process_pending_changes();
    assert!(stream.recv_timeout(WAIT).unwrap().unwrap().is_empty());
}

#[test]
fn update_only_events_do_not_refetch() {
    let f = fixture();
    let c = contact(&f.ctx, "John Doe");
    let g = group(&f.ctx, "Test group");
    g.set_related("contacts", &[&c]).unwrap();
    f.ctx.process_pending_changes();

    let stream = f.ctx.reactive().observe_result(groups_with_contacts());
    f.ctx.process_pending_changes();
    stream.recv_timeout(WAIT).unwrap().unwrap();

    g.set("name", "Renamed").unwrap();
    f.ctx.process_pending_changes();
    f.ctx.refresh(&g).unwrap();
    f.ctx.process_pending_changes();

    assert!(stream.recv_timeout(QUIET).unwrap_err().is_timeout());
}

#[test]
fn refetch_is_sorted_and_limited() {
    let f = fixture();
    let request = FetchRequest::new("Group").sorted_by("name", true).with_limit(2);
    let stream = f.ctx.reactive().observe_result(request);

    for name in ["c", "a", "b"] {
        group(&f.ctx, name);
    }
    f.ctx.process_pending_changes();

    // The initial fetch runs before the turn's changes are posted.
    let initial = stream.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(names(&initial), vec!["a", "b"]);
    let refetched = stream.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(names(&refetched), vec!["a", "b"]);
}

#[test]
fn fetch_errors_are_reported_without_terminating() {
    let f = fixture();
    let request = FetchRequest::new("Group").with_predicate(Predicate::matches("name", "("));
    let stream = f.ctx.reactive().observe_result(request);
    f.ctx.process_pending_changes();

    let err = stream.recv_timeout(WAIT).unwrap().unwrap_err();
    assert!(matches!(err, ObserverError::Fetch(FetchError::InvalidRequest { .. })));
    assert!(!err.is_terminal());

    group(&f.ctx, "Test group");
    f.ctx.process_pending_changes();

    let err = stream.recv_timeout(WAIT).unwrap().unwrap_err();
    assert!(matches!(err, ObserverError::Fetch(FetchError::InvalidRequest { .. })));
    assert!(!stream.is_disposed());
}

#[test]
fn unknown_entity_is_an_invalid_request() {
    let f = fixture();
    let stream = f.ctx.reactive().observe_result(FetchRequest::new("Nope"));
    f.ctx.process_pending_changes();

    let err = stream.recv_timeout(WAIT).unwrap().unwrap_err();
    assert!(matches!(err, ObserverError::Fetch(FetchError::InvalidRequest { .. })));
}

#[test]
fn dropped_context_completes_stream() {
    let f = fixture();
    let sibling = MemoryContext::new(&f.coordinator, Arc::clone(&f.center));
    let stream = sibling.reactive().observe_result(groups_with_contacts());
    drop(sibling);

    // Another context on the same store inserts; the watcher finds its
    // context gone and completes.
    group(&f.ctx, "Test group");
    f.ctx.process_pending_changes();

    assert!(stream.recv_timeout(WAIT).unwrap_err().is_disconnected());
    assert_eq!(f.center.observer_count(), 0);
}

#[test]
fn disposed_stream_never_fetches() {
    let f = fixture();
    let stream = f.ctx.reactive().observe_result(groups_with_contacts());
    stream.dispose();

    f.ctx.process_pending_changes();
    assert!(stream.recv().unwrap_err().is_disconnected());
}

#[test]
fn slow_subscriber_keeps_latest_result() {
    let f = fixture();
    let observer = kyrowatch::ContextObserver::with_config(
        Arc::clone(&f.ctx),
        kyrowatch::ObserverConfig { stream_capacity: 1 },
    );
    let stream = observer.observe_result(FetchRequest::new("Group"));
    f.ctx.process_pending_changes();

    group(&f.ctx, "one");
    f.ctx.process_pending_changes();
    group(&f.ctx, "two");
    f.ctx.process_pending_changes();

    // Older results were evicted; the one left is the latest.
    assert_eq!(stream.pending(), 1);
    assert_eq!(stream.dropped_events(), 2);
    let rows = stream.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(names(&rows), vec!["one", "two"]);
}
