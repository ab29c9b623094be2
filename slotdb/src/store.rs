//! Store module: the top-level handle of a slotdb directory.
//!
//! The Store ties the components together:
//! - [`SlotStore`] owns the per-target slot files and the alias index
//! - [`SessionAggregator`] turns activity pulses into slots
//! - [`ProjectIndex`] groups targets by path prefix
//! - [`StoreMetadata`] records where and when the store was created
//!
//! All operations take `&self`, so a single `Store` can be shared between
//! threads (for example behind an `Arc`).
//!
//! # File Layout
//!
//! ```text
//! store_dir/
//! ├── meta.json              <- version, tag, host, arch, username, os
//! ├── slot_index.json        <- target -> alias
//! ├── action_index.json      <- target -> open session record
//! ├── projects.json          <- project -> member targets
//! └── slots/
//!     └── <alias>/
//!         └── <yyyymm>/
//!             ├── <ddp>.idx
//!             └── <ddp>.slt
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use slotdb::Store;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open("./activity")?;
//!
//! // Heartbeats from an editor
//! store.add_action("/work/app/src/main.rs", true, 1_700_000_000)?;
//! store.add_action("/work/app/src/main.rs", true, 1_700_000_010)?;
//! store.add_action("/work/app/src/main.rs", false, 1_700_000_012)?;
//!
//! // Direct slot writes
//! store.add_slot("/work/app/README.md", 1_700_000_100, 30)?;
//!
//! let (starts, durations) = store.get_slots("/work/app/src/main.rs", 0, 0)?;
//! assert_eq!(starts, vec![vec![1_700_000_000]]);
//! assert_eq!(durations, vec![vec![12]]);
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::meta::StoreMetadata;
use crate::options::StoreOptions;
use crate::project::{PROJECT_INDEX_FILE, ProjectIndex};
use crate::session::{ACTION_INDEX_FILE, OpenSessions, SessionAggregator};
use crate::slot::{BucketSlots, SlotStore, into_columns};

/// Top-level store handle.
#[derive(Debug)]
pub struct Store {
    /// Path to the store directory.
    path: PathBuf,
    /// Options the store was opened with.
    options: StoreOptions,
    /// Metadata loaded from (or written to) meta.json.
    metadata: StoreMetadata,
    /// Slot files and alias index.
    slots: SlotStore,
    /// Open sessions per target.
    sessions: SessionAggregator,
    /// Project membership, shared with the slot store for registration.
    projects: Arc<ProjectIndex>,
}

impl Store {
    /// Opens the store at `path` with default options, creating it if needed.
    ///
    /// # Errors
    ///
    /// See [`Store::open_with`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Opens the store at `path` with explicit options.
    ///
    /// If the directory doesn't exist it is created together with its
    /// metadata. Index files are loaded when present. Open sessions from a
    /// previous run are restored as-is; no expiration sweep runs on open.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidOptions`] if `options` fail validation
    /// - [`StoreError::PathIsNotDirectory`] if `path` exists and is not a directory
    /// - [`StoreError::DirectoryAccess`] if the directory cannot be created
    /// - [`StoreError::CorruptedMetadata`] if meta.json is invalid
    /// - index and session errors if a persisted file cannot be loaded
    pub fn open_with<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        options.validate()?;

        if path.exists() && !path.is_dir() {
            return Err(StoreError::PathIsNotDirectory { path }.into());
        }

        fs::create_dir_all(&path).map_err(|e| StoreError::DirectoryAccess {
            path: path.clone(),
            source: e,
        })?;

        let metadata = StoreMetadata::load_or_create(&path)?;
        let projects = Arc::new(ProjectIndex::open(path.join(PROJECT_INDEX_FILE))?);
        let slots = SlotStore::open(
            &path,
            Arc::clone(&projects),
            options.alias_len,
            options.read_parallelism,
        )?;
        let sessions =
            SessionAggregator::open(path.join(ACTION_INDEX_FILE), options.session_expiry_secs)?;

        info!(
            path = %path.display(),
            tag = %metadata.tag,
            targets = slots.list_targets().len(),
            "opened store"
        );

        Ok(Self {
            path,
            options,
            metadata,
            slots,
            sessions,
            projects,
        })
    }

    /// Returns the store directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the options the store was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Returns the store metadata.
    pub fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    /// Records an activity pulse for `target` at `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if a flushed slot cannot be written or the session
    /// table cannot be persisted.
    pub fn add_action(&self, target: &str, active: bool, timestamp: u32) -> Result<()> {
        self.sessions.pulse(&self.slots, target, active, timestamp)
    }

    /// Closes every session idle for longer than the expiry gap at `now`.
    ///
    /// Returns whether any session was closed.
    ///
    /// # Errors
    ///
    /// Returns an error if a flushed slot cannot be written or the session
    /// table cannot be persisted.
    pub fn check_expirations(&self, now: u32) -> Result<bool> {
        self.sessions.sweep_expired(&self.slots, now)
    }

    /// [`check_expirations`](Self::check_expirations) at the current wall
    /// clock time.
    ///
    /// # Errors
    ///
    /// See [`Store::check_expirations`].
    pub fn check_expirations_now(&self) -> Result<bool> {
        let now = u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX);
        self.check_expirations(now)
    }

    /// Snapshot of all open sessions as `(targets, starts, lasts)` columns.
    ///
    /// # Errors
    ///
    /// Returns an error if a persisted session record is invalid.
    pub fn get_actions(&self) -> Result<OpenSessions> {
        self.sessions.open_sessions()
    }

    /// Appends a slot for `target` directly, bypassing session aggregation.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot files cannot be written.
    pub fn add_slot(&self, target: &str, start: u32, duration: u32) -> Result<()> {
        self.slots.append(target, start, duration)
    }

    /// Reads `target`'s slots starting in `[start_unix, end_unix]` as
    /// per-bucket start and duration columns. A zero bound is unbounded.
    ///
    /// # Errors
    ///
    /// Returns an error for an inverted range or if a bucket cannot be read.
    pub fn get_slots(
        &self,
        target: &str,
        start_unix: u32,
        end_unix: u32,
    ) -> Result<(Vec<Vec<u32>>, Vec<Vec<u32>>)> {
        Ok(into_columns(self.bucket_slots(target, start_unix, end_unix)?))
    }

    /// Like [`get_slots`](Self::get_slots) but keeps the bucket of each group.
    ///
    /// # Errors
    ///
    /// See [`Store::get_slots`].
    pub fn bucket_slots(
        &self,
        target: &str,
        start_unix: u32,
        end_unix: u32,
    ) -> Result<Vec<BucketSlots>> {
        self.slots.read_range(target, start_unix, end_unix)
    }

    /// All targets that have slot storage, sorted.
    pub fn get_targets(&self) -> Vec<String> {
        self.slots.list_targets()
    }

    /// Truncates desynchronized bucket file pairs. Returns how many were fixed.
    ///
    /// # Errors
    ///
    /// Returns an error if a slot directory cannot be listed or a file
    /// cannot be truncated.
    pub fn repair(&self) -> Result<usize> {
        self.slots.repair()
    }

    /// Creates `project` (idempotent), seeding it with existing member targets.
    ///
    /// # Errors
    ///
    /// Returns an error if the project index cannot be persisted.
    pub fn create_project(&self, project: &str) -> Result<()> {
        self.projects.create(project, || self.slots.list_targets())
    }

    /// Member targets of `project`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectError::NotFound`](crate::error::ProjectError) for an
    /// unknown project.
    pub fn project_targets(&self, project: &str) -> Result<Vec<String>> {
        self.projects.targets(project)
    }

    /// Adds `target` to `project`.
    ///
    /// # Errors
    ///
    /// Returns an error if the project is unknown, the target is not below
    /// it, or the index cannot be persisted.
    pub fn add_target_to_project(&self, project: &str, target: &str) -> Result<()> {
        self.projects.add_target(project, target)
    }

    /// All project paths, sorted.
    pub fn list_projects(&self) -> Vec<String> {
        self.projects.list()
    }

    /// Metadata format version.
    pub fn version(&self) -> u8 {
        self.metadata.version
    }

    /// Unique tag (ULID) assigned when the store was created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MetadataField`] if no tag was recorded.
    pub fn tag(&self) -> Result<&str> {
        StoreMetadata::field(&self.metadata.tag, "tag")
    }

    /// Creation time of the store in unix seconds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptedMetadata`] if the tag is not a ULID.
    pub fn created_at(&self) -> Result<u32> {
        self.metadata.created_at()
    }

    /// Hostname of the machine that created the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MetadataField`] if no hostname was recorded.
    pub fn host(&self) -> Result<&str> {
        StoreMetadata::field(&self.metadata.host, "host")
    }

    /// CPU architecture of the process that created the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MetadataField`] if none was recorded.
    pub fn arch(&self) -> Result<&str> {
        StoreMetadata::field(&self.metadata.arch, "arch")
    }

    /// User that created the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MetadataField`] if none was recorded.
    pub fn username(&self) -> Result<&str> {
        StoreMetadata::field(&self.metadata.username, "username")
    }

    /// Operating system of the process that created the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MetadataField`] if none was recorded.
    pub fn os(&self) -> Result<&str> {
        StoreMetadata::field(&self.metadata.os, "os")
    }
}
