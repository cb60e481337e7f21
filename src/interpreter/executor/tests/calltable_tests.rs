//! Tests for slot allocation, naming and reclaim

use crate::config::CallTableConfig;
use crate::interpreter::executor::{CallTable, CallTableEntry, ExecError, Val};

fn table(initial: usize, max: usize) -> CallTable {
    CallTable::new(CallTableConfig {
        initial_capacity: initial,
        max_capacity: max,
        gc_interval: 1000,
        ..Default::default()
    })
}

#[test]
fn test_slot_zero_is_reserved() {
    let ct = table(4, 8);

    let (id, name) = ct.allocate("main", None).unwrap();

    assert_eq!(id, 1);
    assert_eq!(name, "main");
    assert_eq!(ct.find("main"), Some(1));
    assert_eq!(ct.name_of(1).as_deref(), Some("main"));
}

#[test]
fn test_unique_marker_appends_slot_id() {
    let ct = table(4, 8);
    ct.allocate("main", None).unwrap();

    let (id, name) = ct.allocate("f@", None).unwrap();

    assert_eq!(id, 2);
    assert_eq!(name, "f@2");
}

#[test]
fn test_prepared_entry_is_kept() {
    let ct = table(4, 8);

    let (id, _) = ct
        .allocate("f@", Some(CallTableEntry::invocation(7, 3, 12)))
        .unwrap();

    let entry = ct.entry(id).unwrap();
    assert_eq!(entry.base, 7);
    assert_eq!(entry.caller, 3);
    assert_eq!(entry.call_line, 12);
    assert!(entry.prepared);
    assert!(entry.in_use);
    assert_eq!(ct.base_of(id), Some(7));
}

#[test]
fn test_table_doubles_until_max() {
    let ct = table(2, 4);

    assert_eq!(ct.allocate("a", None).unwrap().0, 1);
    assert_eq!(ct.allocate("b", None).unwrap().0, 2);
    assert_eq!(ct.capacity(), 4);
    assert_eq!(ct.allocate("c", None).unwrap().0, 3);

    let err = ct.allocate("d", None).unwrap_err();
    assert_eq!(err, ExecError::CallTableExhausted(4));
    assert!(err.is_hard());
}

#[test]
fn test_release_waits_out_shyness() {
    let ct = table(4, 8);
    let (id, _) = ct.allocate("f@", None).unwrap();

    ct.release(id, 1);
    assert_eq!(ct.sweep(), 0);
    assert!(ct.entry(id).is_some());

    assert_eq!(ct.sweep(), 1);
    assert!(ct.entry(id).is_none());
    assert_eq!(ct.name_of(id), None);

    // the freed slot is the first one handed out again
    assert_eq!(ct.allocate("g@", None).unwrap().0, id);
}

#[test]
fn test_disposable_without_release_is_kept() {
    let ct = table(4, 8);
    let (id, _) = ct.allocate("task@", None).unwrap();

    ct.mark_disposable(id, 0);

    assert_eq!(ct.sweep(), 0);
    assert!(ct.entry(id).is_some());
}

#[test]
fn test_allocation_sweeps_on_interval() {
    let ct = CallTable::new(CallTableConfig {
        initial_capacity: 4,
        max_capacity: 4,
        gc_interval: 2,
        ..Default::default()
    });
    let (first, _) = ct.allocate("a@", None).unwrap();
    ct.release(first, 0);

    // the second allocation triggers a sweep and gets the reclaimed slot
    let (second, _) = ct.allocate("b@", None).unwrap();

    assert_eq!(second, first);
    assert_eq!(ct.live(), 1);
}

#[test]
fn test_retvals_taken_once() {
    let ct = table(4, 8);
    let (id, _) = ct.allocate("f@", None).unwrap();

    ct.finish_invocation(id, vec![Val::Int(1)], true);

    assert_eq!(ct.take_retvals(id), Some(vec![Val::Int(1)]));
    assert_eq!(ct.take_retvals(id), None);
    assert!(ct.entry(id).unwrap().disposable);
}

#[test]
fn test_lock_allows_grouped_updates() {
    let ct = table(4, 8);

    let id = {
        let mut state = ct.lock();
        let (id, _) = state.allocate("def", None).unwrap();
        state.entry_mut(id).unwrap().base = id;
        id
    };

    assert_eq!(ct.base_of(id), Some(id));
}

#[test]
fn test_released_batch_is_reused_before_growth() {
    const N: usize = 7;
    let ct = table(N + 1, 64);

    let first: Vec<u32> = (0..N).map(|_| ct.allocate("f@", None).unwrap().0).collect();
    assert_eq!(ct.capacity(), N + 1);

    for &id in &first {
        ct.release(id, 2);
    }
    assert_eq!(ct.sweep(), 0);
    assert_eq!(ct.sweep(), 0);
    assert_eq!(ct.sweep(), N);

    let mut second: Vec<u32> = (0..N).map(|_| ct.allocate("g@", None).unwrap().0).collect();
    second.sort_unstable();
    assert_eq!(second, first);
    assert_eq!(ct.capacity(), N + 1);

    // only the next allocation has to grow the table
    ct.allocate("h@", None).unwrap();
    assert_eq!(ct.capacity(), 2 * (N + 1));
}

#[test]
fn test_depth_follows_the_caller() {
    let ct = table(4, 8);
    let (outer, _) = ct
        .allocate("main@", Some(CallTableEntry::invocation(1, 0, 0).at_depth(1)))
        .unwrap();

    assert_eq!(ct.depth_of(outer), 1);
    assert_eq!(ct.depth_of(0), 0);
    assert_eq!(ct.depth_of(99), 0);
}
