//! Error types for the slotdb activity store.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all slotdb operations.
///
/// Each variant wraps a concern-specific error so callers can match on the
/// layer that failed while still using a single `Result` alias.
#[derive(Error, Debug)]
pub enum SlotDbError {
    /// Error opening a store or reading its metadata.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error loading or persisting one of the key-value index files.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Error decoding a bucket path or timestamp.
    #[error("bucket error: {0}")]
    Bucket(#[from] BucketError),

    /// Error validating a range query.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Error reading or writing slot files.
    #[error("slot I/O error: {0}")]
    SlotIo(#[from] SlotIoError),

    /// Error decoding persisted session state.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Error managing projects.
    #[error("project error: {0}")]
    Project(#[from] ProjectError),
}

/// Errors that can occur when opening a store or reading its metadata.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store path exists but is not a directory.
    #[error("store path '{}' is not a directory", path.display())]
    PathIsNotDirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// The store directory could not be created or accessed.
    #[error("failed to access store directory '{}': {source}", path.display())]
    DirectoryAccess {
        /// The path that could not be accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The metadata file is structurally invalid.
    #[error("corrupted metadata file: {reason}")]
    CorruptedMetadata {
        /// Description of what was invalid about the metadata.
        reason: String,
    },

    /// Failed to serialize or parse metadata JSON.
    #[error("failed to serialize metadata: {0}")]
    MetadataSerialize(#[from] serde_json::Error),

    /// A metadata field has no recorded value.
    #[error("metadata field '{field}' not found")]
    MetadataField {
        /// The missing field name.
        field: &'static str,
    },

    /// A store option is out of range.
    #[error("invalid store option: {reason}")]
    InvalidOptions {
        /// Why the options were rejected.
        reason: String,
    },
}

/// Errors that can occur when loading or saving an index file.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The index path exists but is a directory.
    #[error("index path '{}' is not a file", path.display())]
    PathIsNotFile {
        /// The offending path.
        path: PathBuf,
    },

    /// Failed to read the index file.
    #[error("failed to load index from '{}': {source}", path.display())]
    Load {
        /// The index file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the index file.
    #[error("failed to parse index from '{}': {source}", path.display())]
    Parse {
        /// The index file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to write the index file.
    #[error("failed to save index to '{}': {source}", path.display())]
    Save {
        /// The index file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize the index contents.
    #[error("failed to serialize index: {source}")]
    Serialize {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur when decoding bucket identifiers.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BucketError {
    /// A folder or file name does not encode a bucket.
    #[error("invalid bucket path '{folder}/{file}': {reason}")]
    InvalidPath {
        /// The year-month folder name.
        folder: String,
        /// The bucket file base name.
        file: String,
        /// Why the path was rejected.
        reason: &'static str,
    },

    /// A bucket's calendar fields do not form a representable local time.
    #[error("bucket {bucket} has no representable local origin")]
    Timestamp {
        /// The raw bucket identifier.
        bucket: u32,
    },
}

/// Errors that can occur when validating a range query.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueryError {
    /// Both bounds are set and start is after end.
    #[error("invalid time range: start {start} > end {end}")]
    InvalidTimeRange {
        /// The start time.
        start: u32,
        /// The end time.
        end: u32,
    },
}

/// Errors that can occur when reading or writing slot files.
#[derive(Error, Debug)]
pub enum SlotIoError {
    /// Failed to read a slot file.
    #[error("failed to read '{}': {source}", path.display())]
    ReadFailed {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to append to or truncate a slot file.
    #[error("failed to write '{}': {source}", path.display())]
    WriteFailed {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or list a slot directory.
    #[error("failed to access slot directory '{}': {source}", path.display())]
    DirectoryAccess {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The offset and duration files of a bucket disagree.
    #[error("bucket '{}' is corrupted: {reason}", path.display())]
    CorruptedBucket {
        /// The offset file path of the bucket.
        path: PathBuf,
        /// Description of the mismatch.
        reason: String,
    },

    /// A reader thread panicked while scanning a bucket.
    #[error("bucket reader for '{}' panicked", path.display())]
    ReaderPanicked {
        /// The bucket folder being read.
        path: PathBuf,
    },
}

/// Errors that can occur when decoding persisted session state.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    /// An action record does not have the fixed 8-byte layout.
    #[error("invalid action record for target '{target}': expected 8 bytes, found {len}")]
    InvalidActionRecord {
        /// The target the record belongs to.
        target: String,
        /// The actual record length.
        len: usize,
    },
}

/// Errors that can occur when managing projects.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProjectError {
    /// The project has not been created.
    #[error("project '{project}' not found")]
    NotFound {
        /// The project path.
        project: String,
    },

    /// The target name does not live under the project path.
    #[error("target '{target}' does not belong to project '{project}'")]
    TargetNotInProject {
        /// The project path.
        project: String,
        /// The rejected target.
        target: String,
    },
}

/// Type alias for `Result<T, SlotDbError>`.
pub type Result<T> = std::result::Result<T, SlotDbError>;
