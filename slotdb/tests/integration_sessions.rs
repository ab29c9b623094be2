//! Integration tests for session aggregation through the public API.

use std::sync::Arc;
use std::thread;

use slotdb::{OpenSessions, Store};
use tempfile::tempdir;

/// 2017-04-15T12:00:00Z.
const T0: u32 = 1_492_257_600;

fn slots_of(store: &Store, target: &str) -> Vec<(u32, u32)> {
    let (starts, durations) = store.get_slots(target, 0, 0).unwrap();
    starts
        .into_iter()
        .flatten()
        .zip(durations.into_iter().flatten())
        .collect()
}

#[test]
fn test_active_then_inactive() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(temp_dir.path()).unwrap();

    store.add_action("t", true, T0).unwrap();
    store.add_action("t", false, T0 + 2).unwrap();

    assert_eq!(slots_of(&store, "t"), vec![(T0, 2)]);
    assert!(store.get_actions().unwrap().is_empty());
}

#[test]
fn test_lone_inactive_pulse() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(temp_dir.path()).unwrap();

    store.add_action("t", false, T0).unwrap();

    assert_eq!(slots_of(&store, "t"), vec![(T0, 1)]);
    assert!(store.get_actions().unwrap().is_empty());
}

#[test]
fn test_late_inactive_uses_latest_pulse() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(temp_dir.path()).unwrap();

    store.add_action("t", true, T0).unwrap();
    store.add_action("t", true, T0 + 3).unwrap();
    store.add_action("t", false, T0 + 2).unwrap();

    assert_eq!(slots_of(&store, "t"), vec![(T0, 3)]);
}

#[test]
fn test_stale_inactive_flushes_both() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(temp_dir.path()).unwrap();

    store.add_action("t", true, T0).unwrap();
    store.add_action("t", false, T0 + 17).unwrap();

    assert_eq!(slots_of(&store, "t"), vec![(T0, 1), (T0 + 17, 1)]);
    assert!(store.get_actions().unwrap().is_empty());
}

#[test]
fn test_stale_active_starts_new_session() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(temp_dir.path()).unwrap();

    store.add_action("t", true, T0).unwrap();
    store.add_action("t", true, T0 + 17).unwrap();

    assert_eq!(slots_of(&store, "t"), vec![(T0, 1)]);
    assert_eq!(store.get_actions().unwrap(), OpenSessions {
        targets: vec!["t".to_string()],
        starts: vec![T0 + 17],
        lasts: vec![T0 + 18],
    });
}

#[test]
fn test_expiration_sweep() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(temp_dir.path()).unwrap();

    store.add_action("t", true, T0).unwrap();
    store.add_action("t", true, T0 + 4).unwrap();

    assert!(!store.check_expirations(T0 + 19).unwrap());
    assert_eq!(store.get_actions().unwrap().len(), 1);

    assert!(store.check_expirations(T0 + 20).unwrap());
    assert_eq!(slots_of(&store, "t"), vec![(T0, 4)]);
    assert!(store.get_actions().unwrap().is_empty());

    // Nothing left to expire.
    assert!(!store.check_expirations(T0 + 1000).unwrap());
}

#[test]
fn test_wall_clock_sweep_expires_old_sessions() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(temp_dir.path()).unwrap();

    store.add_action("t", true, T0).unwrap();
    assert!(store.check_expirations_now().unwrap());
    assert_eq!(slots_of(&store, "t"), vec![(T0, 1)]);
}

#[test]
fn test_concurrent_identical_pulses() {
    let temp_dir = tempdir().unwrap();
    let store = Arc::new(Store::open(temp_dir.path()).unwrap());

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.add_action("t", true, T0).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.get_actions().unwrap(), OpenSessions {
        targets: vec!["t".to_string()],
        starts: vec![T0],
        lasts: vec![T0 + 1],
    });
    assert!(slots_of(&store, "t").is_empty());
}

#[test]
fn test_reopen_preserves_sessions_and_slots() {
    let temp_dir = tempdir().unwrap();
    let store_path = temp_dir.path().join("reopen");

    let (before_actions, before_slots) = {
        let store = Store::open(&store_path).unwrap();
        store.add_action("a", true, T0).unwrap();
        store.add_action("a", true, T0 + 20).unwrap();
        store.add_action("b", true, T0 + 5).unwrap();
        store.add_action("b", true, T0 + 11).unwrap();
        (store.get_actions().unwrap(), slots_of(&store, "a"))
    };
    assert_eq!(before_slots, vec![(T0, 1)]);

    let store = Store::open(&store_path).unwrap();
    assert_eq!(store.get_actions().unwrap(), before_actions);
    assert_eq!(slots_of(&store, "a"), before_slots);

    // The reloaded session continues where it left off.
    store.add_action("b", false, T0 + 12).unwrap();
    assert_eq!(slots_of(&store, "b"), vec![(T0 + 5, 7)]);
}
