//! Integration tests for the full store lifecycle.
//!
//! These tests exercise the public API end to end: direct slot writes,
//! range reads, reopen persistence, repair of damaged buckets, projects
//! and metadata.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use slotdb::error::{SlotDbError, SlotIoError, StoreError};
use slotdb::{BucketId, Slot, Store};
use tempfile::tempdir;

/// 2017-04-15T12:00:00Z.
const T0: u32 = 1_492_257_600;
const DAY: u32 = 86_400;

/// Returns the offset file of the bucket holding `ts` for the store's only
/// target.
fn offset_file(store_path: &Path, ts: u32) -> PathBuf {
    let aliases: Vec<_> = fs::read_dir(store_path.join("slots"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(aliases.len(), 1);

    let (folder, file) = BucketId::from_unix(ts).path();
    aliases[0].join(folder).join(format!("{file}.idx"))
}

#[test]
fn test_full_store_lifecycle() {
    let temp_dir = tempdir().unwrap();
    let store_path = temp_dir.path().join("lifecycle_test");

    // Phase 1: write slots and leave a session open
    {
        let store = Store::open(&store_path).unwrap();
        for day in 0..5 {
            store.add_slot("/work/a.rs", T0 + day * DAY, 60 + day).unwrap();
        }
        store.add_slot("/work/b.rs", T0, 1).unwrap();
        store.add_action("/work/c.rs", true, T0).unwrap();
        store.add_action("/work/c.rs", true, T0 + 9).unwrap();
    }

    // Phase 2: reopen and verify everything survived
    let store = Store::open(&store_path).unwrap();
    assert_eq!(
        store.get_targets(),
        vec!["/work/a.rs".to_string(), "/work/b.rs".to_string()]
    );

    let (starts, durations) = store.get_slots("/work/a.rs", 0, 0).unwrap();
    assert_eq!(starts.len(), 5);
    for (day, (bucket_starts, bucket_durations)) in starts.iter().zip(&durations).enumerate() {
        let day = u32::try_from(day).unwrap();
        assert_eq!(bucket_starts, &vec![T0 + day * DAY]);
        assert_eq!(bucket_durations, &vec![60 + day]);
    }

    let open = store.get_actions().unwrap();
    assert_eq!(open.targets, vec!["/work/c.rs".to_string()]);
    assert_eq!(open.starts, vec![T0]);
    assert_eq!(open.lasts, vec![T0 + 9]);
}

#[test]
fn test_other_targets_unaffected() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(temp_dir.path()).unwrap();

    store.add_slot("a", T0, 3).unwrap();
    let before = store.get_slots("b", 0, 0).unwrap();
    store.add_slot("a", T0 + 1, 4).unwrap();

    assert_eq!(store.get_slots("b", 0, 0).unwrap(), before);
    assert!(before.0.is_empty());
    assert_eq!(store.get_targets(), vec!["a".to_string()]);
}

#[test]
fn test_range_bounds() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(temp_dir.path()).unwrap();

    for day in 0..10 {
        store.add_slot("t", T0 + day * DAY, 1).unwrap();
    }

    let (starts, _) = store.get_slots("t", T0 + 2 * DAY, T0 + 4 * DAY).unwrap();
    assert_eq!(
        starts,
        vec![vec![T0 + 2 * DAY], vec![T0 + 3 * DAY], vec![T0 + 4 * DAY]]
    );

    // Zero end bound is open-ended.
    let (starts, _) = store.get_slots("t", T0 + 8 * DAY, 0).unwrap();
    assert_eq!(starts, vec![vec![T0 + 8 * DAY], vec![T0 + 9 * DAY]]);

    // Zero start bound is open-ended.
    let (starts, _) = store.get_slots("t", 0, T0).unwrap();
    assert_eq!(starts, vec![vec![T0]]);

    // Bounds filter within a bucket too.
    store.add_slot("t", T0 + 600, 1).unwrap();
    let buckets = store.bucket_slots("t", T0 + 1, T0 + 1000).unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].slots, vec![Slot::new(T0 + 600, 1)]);
}

#[test]
fn test_open_on_regular_file() {
    let temp_dir = tempdir().unwrap();
    let file = temp_dir.path().join("plain");
    fs::write(&file, b"data").unwrap();

    let result = Store::open(&file);
    assert!(matches!(
        result,
        Err(SlotDbError::Store(StoreError::PathIsNotDirectory { .. }))
    ));
}

#[test]
fn test_desynced_bucket_detected_and_repaired() {
    let temp_dir = tempdir().unwrap();
    let store_path = temp_dir.path().join("repair");
    let store = Store::open(&store_path).unwrap();

    store.add_slot("t", T0, 5).unwrap();

    // Simulate a crash between the offset write and the duration write.
    let idx = offset_file(&store_path, T0);
    OpenOptions::new()
        .append(true)
        .open(&idx)
        .unwrap()
        .write_all(&7u16.to_le_bytes())
        .unwrap();

    assert!(matches!(
        store.get_slots("t", 0, 0),
        Err(SlotDbError::SlotIo(SlotIoError::CorruptedBucket { .. }))
    ));

    assert_eq!(store.repair().unwrap(), 1);
    assert_eq!(store.repair().unwrap(), 0);
    assert_eq!(store.get_slots("t", 0, 0).unwrap(), (vec![vec![T0]], vec![vec![5]]));
}

#[test]
fn test_append_repairs_before_writing() {
    let temp_dir = tempdir().unwrap();
    let store_path = temp_dir.path().join("repair_on_append");
    let store = Store::open(&store_path).unwrap();

    store.add_slot("t", T0, 5).unwrap();

    // A partial offset record left behind by an interrupted append.
    let idx = offset_file(&store_path, T0);
    OpenOptions::new()
        .append(true)
        .open(&idx)
        .unwrap()
        .write_all(&[0x01])
        .unwrap();

    store.add_slot("t", T0 + 30, 6).unwrap();
    assert_eq!(
        store.get_slots("t", 0, 0).unwrap(),
        (vec![vec![T0, T0 + 30]], vec![vec![5, 6]])
    );
}

#[test]
fn test_projects_track_new_targets() {
    let temp_dir = tempdir().unwrap();
    let store_path = temp_dir.path().join("projects");

    {
        let store = Store::open(&store_path).unwrap();
        store.add_slot("/home/u/app/main.rs", T0, 1).unwrap();
        store.create_project("/home/u/app/").unwrap();
        store.add_action("/home/u/app/lib.rs", false, T0).unwrap();
        store.add_slot("/home/u/application/x.rs", T0, 1).unwrap();
    }

    let store = Store::open(&store_path).unwrap();
    assert_eq!(store.list_projects(), vec!["/home/u/app".to_string()]);
    assert_eq!(
        store.project_targets("/home/u/app").unwrap(),
        vec![
            "/home/u/app/main.rs".to_string(),
            "/home/u/app/lib.rs".to_string()
        ]
    );

    store
        .add_target_to_project("/home/u/app", "/home/u/app/never_written.rs")
        .unwrap();
    assert_eq!(store.project_targets("/home/u/app").unwrap().len(), 3);
}

#[test]
fn test_metadata_is_stable_across_reopen() {
    let temp_dir = tempdir().unwrap();
    let store_path = temp_dir.path().join("meta");

    let first = Store::open(&store_path).unwrap().metadata().clone();
    let store = Store::open(&store_path).unwrap();

    assert_eq!(store.metadata(), &first);
    assert_eq!(store.tag().unwrap(), first.tag);
    assert_eq!(store.created_at().unwrap(), first.created_at().unwrap());
}
