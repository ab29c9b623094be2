//! Slot storage on disk.
//!
//! Slots are `(start, duration)` activity intervals owned by a target. Each
//! target gets a random directory alias under `slots/`, and each half-day
//! bucket of that target is a pair of sibling files:
//!
//! ```text
//! slots/
//! └── k3x9a0/                 <- alias of one target
//!     └── 201704/             <- year-month folder
//!         ├── 015.idx         <- u16 LE offsets from the bucket origin
//!         └── 015.slt         <- u32 LE durations in seconds
//! ```
//!
//! Record *i* of the `.idx` file and record *i* of the `.slt` file together
//! form slot *i* of the bucket.
//!
//! # Locking
//!
//! Appends to the current bucket (or a later one) hold that bucket's write
//! lock from the per-store [`KeyLockRegistry`]; reads hold its read lock.
//! Both also hold the store-wide backfill lock shared. Buckets in the past
//! never enter the registry. Appends to them take the backfill lock
//! exclusively and reads take it shared, so a historical write excludes
//! every other bucket access. A writer that picked the live path just before
//! the bucket rolled over therefore still excludes a backfill writer of the
//! same bucket.
//!
//! Idle registry locks are pruned whenever an append first observes a new
//! current bucket, so the registry holds at most the locks in use plus those
//! created since the last rollover.
//!
//! # Repair
//!
//! The two files of a bucket are appended separately. If the process dies
//! between the writes the pair is left with different record counts. Every
//! append first truncates such a pair back to its common length; reads
//! report the mismatch as [`SlotIoError::CorruptedBucket`] instead.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::thread;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::Rng;
use tracing::{debug, warn};

use crate::bucket::{BucketId, BucketRange};
use crate::error::{Result, SlotIoError};
use crate::index::KeyValueIndex;
use crate::lock::{KeyLockRegistry, KeyReadGuard, KeyWriteGuard};
use crate::project::ProjectIndex;

/// Name of the directory holding per-target slot folders.
pub(crate) const SLOTS_DIR: &str = "slots";

/// Name of the target → alias index file in the store directory.
pub(crate) const SLOT_INDEX_FILE: &str = "slot_index.json";

/// Extension of the offset file of a bucket.
pub const OFFSET_EXT: &str = "idx";

/// Extension of the duration file of a bucket.
pub const DURATION_EXT: &str = "slt";

const OFFSET_WIDTH: usize = 2;
const DURATION_WIDTH: usize = 4;

const ALIAS_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A stored activity interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    /// Unix timestamp (seconds) at which the interval starts.
    pub start: u32,
    /// Length of the interval in seconds.
    pub duration: u32,
}

impl Slot {
    /// Creates a slot.
    pub const fn new(start: u32, duration: u32) -> Self {
        Self { start, duration }
    }
}

/// Slots read from one bucket, in append order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSlots {
    /// The bucket the slots were read from.
    pub bucket: BucketId,
    /// Slots whose start lies in the queried range.
    pub slots: Vec<Slot>,
}

/// Splits per-bucket slots into parallel start and duration columns.
pub fn into_columns(buckets: Vec<BucketSlots>) -> (Vec<Vec<u32>>, Vec<Vec<u32>>) {
    buckets
        .into_iter()
        .map(|b| {
            b.slots
                .iter()
                .map(|slot| (slot.start, slot.duration))
                .unzip::<u32, u32, Vec<u32>, Vec<u32>>()
        })
        .unzip()
}

/// Owner of every target's slot files.
#[derive(Debug)]
pub struct SlotStore {
    root: PathBuf,
    aliases: KeyValueIndex<String>,
    projects: Arc<ProjectIndex>,
    bucket_locks: KeyLockRegistry,
    alias_locks: KeyLockRegistry,
    backfill: RwLock<()>,
    rolled_to: AtomicU32,
    alias_len: usize,
    read_parallelism: usize,
}

impl SlotStore {
    /// Opens the slot store of the store directory `dir`.
    ///
    /// Creates the `slots/` directory if needed and loads the alias index.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the alias
    /// index cannot be loaded.
    pub fn open(
        dir: &Path,
        projects: Arc<ProjectIndex>,
        alias_len: usize,
        read_parallelism: usize,
    ) -> Result<Self> {
        let root = dir.join(SLOTS_DIR);
        fs::create_dir_all(&root).map_err(|e| SlotIoError::DirectoryAccess {
            path: root.clone(),
            source: e,
        })?;

        Ok(Self {
            root,
            aliases: KeyValueIndex::open(dir.join(SLOT_INDEX_FILE))?,
            projects,
            bucket_locks: KeyLockRegistry::new(),
            alias_locks: KeyLockRegistry::new(),
            backfill: RwLock::new(()),
            rolled_to: AtomicU32::new(0),
            alias_len,
            read_parallelism: read_parallelism.max(1),
        })
    }

    /// All targets that have an alias, in sorted order.
    pub fn list_targets(&self) -> Vec<String> {
        self.aliases.keys()
    }

    /// The directory alias of `target`, if it has been written before.
    pub fn alias(&self, target: &str) -> Option<String> {
        self.aliases.get(target)
    }

    /// Number of bucket locks currently registered.
    pub fn live_lock_count(&self) -> usize {
        self.bucket_locks.len()
    }

    /// Returns `(alias, home directory)` of `target`, creating both on first use.
    ///
    /// Creation is guarded by a per-target lock, so concurrent first writers
    /// agree on a single alias.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the alias index cannot be written.
    pub fn resolve_home(&self, target: &str) -> Result<(String, PathBuf)> {
        if let Some(home) = self.lookup_home(target) {
            return Ok(home);
        }

        let _creating = self.alias_locks.write(target);
        if let Some(home) = self.lookup_home(target) {
            return Ok(home);
        }

        let (alias, home) = self.create_alias_dir()?;
        if let Err(e) = self.aliases.insert(target.to_string(), alias.clone()) {
            let _ = fs::remove_dir(&home);
            return Err(e);
        }
        debug!(target_name = target, alias = %alias, "assigned slot alias");

        self.projects.register_target(target)?;
        Ok((alias, home))
    }

    fn lookup_home(&self, target: &str) -> Option<(String, PathBuf)> {
        self.aliases.get(target).map(|alias| {
            let home = self.root.join(&alias);
            (alias, home)
        })
    }

    // `create_dir` fails on an existing directory, which rules out two
    // targets claiming the same alias.
    fn create_alias_dir(&self) -> Result<(String, PathBuf)> {
        let mut rng = rand::thread_rng();
        loop {
            let alias: String = (0..self.alias_len)
                .map(|_| char::from(ALIAS_CHARSET[rng.gen_range(0..ALIAS_CHARSET.len())]))
                .collect();
            let home = self.root.join(&alias);

            match fs::create_dir(&home) {
                Ok(()) => return Ok((alias, home)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(SlotIoError::DirectoryAccess {
                        path: home,
                        source: e,
                    }
                    .into());
                }
            }
        }
    }

    /// Appends one slot for `target`.
    ///
    /// The slot is stored in the bucket containing `start`. Appends to the
    /// same bucket are recorded in the order their locks were acquired.
    ///
    /// # Errors
    ///
    /// Returns an error if the target home cannot be resolved or a file
    /// write fails. A failure after the offset write leaves the pair to be
    /// repaired by the next append.
    pub fn append(&self, target: &str, start: u32, duration: u32) -> Result<()> {
        let (alias, home) = self.resolve_home(target)?;
        let bucket = BucketId::from_unix(start);
        let offset = bucket.offset_of(start)?;

        let current = BucketId::current();
        self.prune_on_rollover(current);
        let _guard = self.lock_bucket(&alias, bucket, bucket >= current, true);

        let (folder, file) = bucket.path();
        let dir = home.join(folder);
        fs::create_dir_all(&dir).map_err(|e| SlotIoError::DirectoryAccess {
            path: dir.clone(),
            source: e,
        })?;

        let offset_path = dir.join(format!("{file}.{OFFSET_EXT}"));
        let duration_path = dir.join(format!("{file}.{DURATION_EXT}"));

        repair_pair(&offset_path, &duration_path)?;
        append_bytes(&offset_path, &offset.to_le_bytes())?;
        append_bytes(&duration_path, &duration.to_le_bytes())?;

        Ok(())
    }

    /// Reads the slots of `target` whose start lies in `[start_unix, end_unix]`.
    ///
    /// A zero bound is unbounded. Buckets are returned in ascending order and
    /// slots within a bucket in append order; buckets with no matching slot
    /// are omitted. A target that was never written yields no buckets.
    ///
    /// Buckets are read concurrently by up to `read_parallelism` threads.
    /// Either every bucket is read successfully or an error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidTimeRange`](crate::error::QueryError) if
    /// both bounds are set and `start_unix > end_unix`, or an I/O error if a
    /// bucket cannot be read or its file pair is inconsistent.
    pub fn read_range(&self, target: &str, start_unix: u32, end_unix: u32) -> Result<Vec<BucketSlots>> {
        let range = BucketRange::new(start_unix, end_unix)?;
        let Some((alias, home)) = self.lookup_home(target) else {
            return Ok(Vec::new());
        };

        let buckets = list_buckets(&home, &range)?;
        let bounds = (start_unix, if end_unix == 0 { u32::MAX } else { end_unix });
        let current = BucketId::current();
        debug!(target_name = target, buckets = buckets.len(), "reading slot buckets");

        let read_one = |bucket: BucketId| -> Result<Vec<Slot>> {
            let _guard = self.lock_bucket(&alias, bucket, bucket >= current, false);
            read_bucket(&home, bucket, bounds)
        };

        let workers = self.read_parallelism.min(buckets.len());
        let per_bucket = if workers <= 1 {
            buckets
                .iter()
                .map(|&bucket| read_one(bucket))
                .collect::<Result<Vec<_>>>()?
        } else {
            read_parallel(&buckets, workers, &read_one, &home)?
        };

        Ok(buckets
            .into_iter()
            .zip(per_bucket)
            .filter(|(_, slots)| !slots.is_empty())
            .map(|(bucket, slots)| BucketSlots { bucket, slots })
            .collect())
    }

    /// Truncates every desynchronized bucket file pair back to its common
    /// record count. Returns the number of buckets repaired.
    ///
    /// # Errors
    ///
    /// Returns an error if a slot directory cannot be listed or a file
    /// cannot be truncated.
    pub fn repair(&self) -> Result<usize> {
        let range = BucketRange::new(0, 0)?;
        let mut repaired = 0;

        for (_, alias) in self.aliases.entries() {
            let home = self.root.join(&alias);
            if !home.is_dir() {
                continue;
            }

            for bucket in list_buckets(&home, &range)? {
                let _guard = self.lock_bucket(&alias, bucket, false, true);

                let (folder, file) = bucket.path();
                let dir = home.join(folder);
                if repair_pair(
                    &dir.join(format!("{file}.{OFFSET_EXT}")),
                    &dir.join(format!("{file}.{DURATION_EXT}")),
                )? {
                    repaired += 1;
                }
            }
        }

        Ok(repaired)
    }
}

/// Locks held while one bucket's file pair is read or written.
///
/// Every live guard also holds the backfill lock shared, so a backfill
/// writer (which holds it exclusively) excludes live readers and writers of
/// any bucket, including one that was still current when they locked it.
enum BucketGuard<'a> {
    LiveWrite {
        _key: KeyWriteGuard,
        _shared: RwLockReadGuard<'a, ()>,
    },
    LiveRead {
        _key: KeyReadGuard,
        _shared: RwLockReadGuard<'a, ()>,
    },
    BackfillWrite {
        _exclusive: RwLockWriteGuard<'a, ()>,
    },
    BackfillRead {
        _shared: RwLockReadGuard<'a, ()>,
    },
}

impl SlotStore {
    /// Acquires the locks for `bucket` of `alias`.
    ///
    /// Live buckets take the backfill lock shared and then the bucket's
    /// registry lock; historical buckets take only the backfill lock.
    fn lock_bucket(&self, alias: &str, bucket: BucketId, live: bool, write: bool) -> BucketGuard<'_> {
        match (live, write) {
            (true, true) => {
                let shared = self.backfill.read();
                BucketGuard::LiveWrite {
                    _key: self.bucket_locks.write(&lock_key(alias, bucket)),
                    _shared: shared,
                }
            }
            (true, false) => {
                let shared = self.backfill.read();
                BucketGuard::LiveRead {
                    _key: self.bucket_locks.read(&lock_key(alias, bucket)),
                    _shared: shared,
                }
            }
            (false, true) => BucketGuard::BackfillWrite {
                _exclusive: self.backfill.write(),
            },
            (false, false) => BucketGuard::BackfillRead {
                _shared: self.backfill.read(),
            },
        }
    }

    /// Drops idle registry locks the first time an append sees a new
    /// current bucket.
    fn prune_on_rollover(&self, current: BucketId) {
        if self.rolled_to.swap(current.raw(), Ordering::Relaxed) == current.raw() {
            return;
        }
        let buckets = self.bucket_locks.prune_idle();
        let aliases = self.alias_locks.prune_idle();
        debug!(bucket = %current, buckets, aliases, "pruned idle slot locks");
    }
}

/// Lock registry key of one bucket of one alias.
fn lock_key(alias: &str, bucket: BucketId) -> String {
    format!("{alias}{bucket}")
}

/// Lists the buckets of a target home that fall in `range`, ascending.
fn list_buckets(home: &Path, range: &BucketRange) -> Result<Vec<BucketId>> {
    let mut folders: Vec<String> = read_dir_names(home)?
        .into_iter()
        .filter(|name| range.folder_in_range(name))
        .collect();
    folders.sort();

    let mut buckets = Vec::new();
    for folder in folders {
        let dir = home.join(&folder);
        let mut in_folder: Vec<BucketId> = Vec::new();

        for name in read_dir_names(&dir)? {
            let Some(stem) = name.strip_suffix(&format!(".{OFFSET_EXT}")) else {
                continue;
            };
            match BucketId::from_path(&folder, stem) {
                Ok(bucket) if range.file_in_range(bucket) => in_folder.push(bucket),
                Ok(_) => {}
                Err(e) => debug!(path = %dir.join(&name).display(), error = %e, "skipping foreign file"),
            }
        }

        in_folder.sort();
        buckets.extend(in_folder);
    }

    Ok(buckets)
}

fn read_dir_names(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| SlotIoError::DirectoryAccess {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SlotIoError::DirectoryAccess {
            path: dir.to_path_buf(),
            source: e,
        })?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Reads buckets on `workers` scoped threads, preserving input order.
fn read_parallel<F>(buckets: &[BucketId], workers: usize, read_one: &F, home: &Path) -> Result<Vec<Vec<Slot>>>
where
    F: Fn(BucketId) -> Result<Vec<Slot>> + Sync,
{
    let next = &AtomicUsize::new(0);
    let failed = &AtomicBool::new(false);

    let outcomes = thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                s.spawn(move || -> Result<Vec<(usize, Vec<Slot>)>> {
                    let mut done = Vec::new();
                    while !failed.load(Ordering::Relaxed) {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(&bucket) = buckets.get(i) else {
                            break;
                        };
                        match read_one(bucket) {
                            Ok(slots) => done.push((i, slots)),
                            Err(e) => {
                                failed.store(true, Ordering::Relaxed);
                                return Err(e);
                            }
                        }
                    }
                    Ok(done)
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
    });

    let mut results: Vec<Vec<Slot>> = vec![Vec::new(); buckets.len()];
    for outcome in outcomes {
        let done = outcome.map_err(|_| SlotIoError::ReaderPanicked {
            path: home.to_path_buf(),
        })??;
        for (i, slots) in done {
            results[i] = slots;
        }
    }

    Ok(results)
}

/// Reads one bucket, keeping slots whose start lies in `bounds` (inclusive).
fn read_bucket(home: &Path, bucket: BucketId, bounds: (u32, u32)) -> Result<Vec<Slot>> {
    let (folder, file) = bucket.path();
    let dir = home.join(folder);
    let offset_path = dir.join(format!("{file}.{OFFSET_EXT}"));
    let duration_path = dir.join(format!("{file}.{DURATION_EXT}"));

    let offsets = fs::read(&offset_path).map_err(|e| SlotIoError::ReadFailed {
        path: offset_path.clone(),
        source: e,
    })?;
    let durations = match fs::read(&duration_path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            return Err(SlotIoError::ReadFailed {
                path: duration_path,
                source: e,
            }
            .into());
        }
    };

    let corrupted = |reason: String| SlotIoError::CorruptedBucket {
        path: offset_path.clone(),
        reason,
    };
    if offsets.len() % OFFSET_WIDTH != 0 {
        return Err(corrupted(format!("truncated offset record ({} bytes)", offsets.len())).into());
    }
    if durations.len() % DURATION_WIDTH != 0 {
        return Err(corrupted(format!("truncated duration record ({} bytes)", durations.len())).into());
    }
    let count = offsets.len() / OFFSET_WIDTH;
    if count != durations.len() / DURATION_WIDTH {
        return Err(corrupted(format!(
            "{count} offsets but {} durations",
            durations.len() / DURATION_WIDTH
        ))
        .into());
    }

    let origin = bucket.origin()?;
    let (low, high) = bounds;

    Ok(offsets
        .chunks_exact(OFFSET_WIDTH)
        .zip(durations.chunks_exact(DURATION_WIDTH))
        .map(|(o, d)| Slot {
            start: origin.saturating_add(u32::from(u16::from_le_bytes([o[0], o[1]]))),
            duration: u32::from_le_bytes([d[0], d[1], d[2], d[3]]),
        })
        .filter(|slot| slot.start >= low && slot.start <= high)
        .collect())
}

/// Truncates a desynchronized file pair to its common record count.
///
/// Returns whether anything was truncated. Missing files count as empty.
fn repair_pair(offset_path: &Path, duration_path: &Path) -> Result<bool> {
    let offset_len = file_len(offset_path)?;
    let duration_len = file_len(duration_path)?;

    let width = |w: usize| w as u64;
    let records = (offset_len / width(OFFSET_WIDTH)).min(duration_len / width(DURATION_WIDTH));
    let offset_keep = records * width(OFFSET_WIDTH);
    let duration_keep = records * width(DURATION_WIDTH);

    if offset_len == offset_keep && duration_len == duration_keep {
        return Ok(false);
    }

    warn!(
        path = %offset_path.display(),
        offset_bytes = offset_len,
        duration_bytes = duration_len,
        records,
        "repairing desynchronized slot bucket"
    );
    truncate(offset_path, offset_keep)?;
    truncate(duration_path, duration_keep)?;
    Ok(true)
}

fn file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(SlotIoError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        }
        .into()),
    }
}

fn truncate(path: &Path, len: u64) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(len))
        .map_err(|e| SlotIoError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(())
}

fn append_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(bytes))
        .map_err(|e| SlotIoError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(())
}
