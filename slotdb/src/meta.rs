//! Store metadata (`meta.json`).
//!
//! Generated once when a store directory is first opened and read-only
//! afterwards. The tag is a ULID, so it doubles as the creation timestamp.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Result, StoreError};

/// Name of the metadata file in the store directory.
pub(crate) const METADATA_FILE: &str = "meta.json";

/// Metadata format version.
pub const METADATA_VERSION: u8 = 1;

/// Host and creation information recorded with a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Metadata format version.
    pub version: u8,
    /// ULID assigned at creation.
    pub tag: String,
    /// Hostname of the creating machine.
    pub host: String,
    /// CPU architecture of the creating process.
    pub arch: String,
    /// User that created the store.
    pub username: String,
    /// Operating system of the creating process.
    pub os: String,
}

impl StoreMetadata {
    /// Captures metadata for the current process.
    pub fn capture() -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();

        Self {
            version: METADATA_VERSION,
            tag: Ulid::new().to_string(),
            host: sysinfo::System::host_name().unwrap_or_default(),
            arch: std::env::consts::ARCH.to_string(),
            username,
            os: std::env::consts::OS.to_string(),
        }
    }

    /// Loads metadata from `dir`, generating and writing it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or written, or if
    /// the stored version is not supported.
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILE);

        if !path.exists() {
            let meta = Self::capture();
            let json = serde_json::to_string_pretty(&meta).map_err(StoreError::MetadataSerialize)?;
            fs::write(&path, json).map_err(|e| StoreError::DirectoryAccess {
                path: path.clone(),
                source: e,
            })?;
            return Ok(meta);
        }

        let json = fs::read_to_string(&path).map_err(|e| StoreError::DirectoryAccess {
            path: path.clone(),
            source: e,
        })?;
        let meta: Self = serde_json::from_str(&json).map_err(StoreError::MetadataSerialize)?;

        if meta.version != METADATA_VERSION {
            return Err(StoreError::CorruptedMetadata {
                reason: format!(
                    "unsupported metadata version: expected {METADATA_VERSION}, found {}",
                    meta.version
                ),
            }
            .into());
        }

        Ok(meta)
    }

    /// Creation time in unix seconds, decoded from the tag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptedMetadata`] if the tag is not a ULID.
    pub fn created_at(&self) -> Result<u32> {
        let ulid = Ulid::from_string(&self.tag).map_err(|e| StoreError::CorruptedMetadata {
            reason: format!("invalid tag '{}': {e}", self.tag),
        })?;
        let secs = ulid.timestamp_ms() / 1000;
        u32::try_from(secs).map_err(|_| {
            StoreError::CorruptedMetadata {
                reason: format!("tag timestamp {secs} out of range"),
            }
            .into()
        })
    }

    /// Returns `value`, or a not-found error naming `field` if it is empty.
    pub(crate) fn field<'a>(value: &'a str, field: &'static str) -> Result<&'a str> {
        if value.is_empty() {
            return Err(StoreError::MetadataField { field }.into());
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SlotDbError;
    use tempfile::tempdir;

    #[test]
    fn test_generated_once() {
        let dir = tempdir().unwrap();
        let first = StoreMetadata::load_or_create(dir.path()).unwrap();
        let second = StoreMetadata::load_or_create(dir.path()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.version, METADATA_VERSION);
        assert_eq!(first.arch, std::env::consts::ARCH);
        assert_eq!(first.os, std::env::consts::OS);
    }

    #[test]
    fn test_created_at_from_tag() {
        let before = chrono::Utc::now().timestamp();
        let meta = StoreMetadata::capture();
        let after = chrono::Utc::now().timestamp();

        let created = i64::from(meta.created_at().unwrap());
        assert!(created >= before - 1 && created <= after);
    }

    #[test]
    fn test_unsupported_version() {
        let dir = tempdir().unwrap();
        let mut meta = StoreMetadata::capture();
        meta.version = 9;
        fs::write(
            dir.path().join(METADATA_FILE),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            StoreMetadata::load_or_create(dir.path()),
            Err(SlotDbError::Store(StoreError::CorruptedMetadata { .. }))
        ));
    }

    #[test]
    fn test_empty_field_is_not_found() {
        assert!(matches!(
            StoreMetadata::field("", "host"),
            Err(SlotDbError::Store(StoreError::MetadataField { field: "host" }))
        ));
        assert_eq!(StoreMetadata::field("box", "host").unwrap(), "box");
    }
}
