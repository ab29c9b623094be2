//! Persisted string-keyed index files.
//!
//! A [`KeyValueIndex`] mirrors a small JSON map file in memory. Reads are
//! served from the in-memory map; every update rewrites the whole file.
//!
//! # Locking
//!
//! Two locks are involved:
//!
//! - the *content* lock guards the in-memory map (many readers, one writer);
//! - the *file* lock serializes loads and overwrites of the backing file.
//!
//! An update takes the file lock first, mutates and snapshots the map under
//! the content lock, then releases the content lock before touching the
//! disk. Map readers therefore never wait on disk I/O, while updates stay
//! totally ordered with respect to each other and to loads.
//!
//! Files are replaced atomically via a temporary file in the same directory.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{IndexError, Result};

/// In-memory mirror of a JSON map file keyed by strings.
#[derive(Debug)]
pub struct KeyValueIndex<V> {
    path: PathBuf,
    content: RwLock<BTreeMap<String, V>>,
    file: RwLock<()>,
}

impl<V> KeyValueIndex<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Opens the index at `path`, loading it if the file exists.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::PathIsNotFile`] if `path` is a directory, or a
    /// load/parse error if the file cannot be read.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let index = Self {
            path,
            content: RwLock::new(BTreeMap::new()),
            file: RwLock::new(()),
        };

        match fs::metadata(&index.path) {
            Ok(meta) if meta.is_dir() => {
                return Err(IndexError::PathIsNotFile { path: index.path }.into());
            }
            Ok(_) => index.reload()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(IndexError::Load {
                    path: index.path,
                    source: e,
                }
                .into());
            }
        }

        Ok(index)
    }

    /// Replaces the in-memory map with the file contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn reload(&self) -> Result<()> {
        let loaded: BTreeMap<String, V> = {
            let _file = self.file.read();
            let data = fs::read(&self.path).map_err(|e| IndexError::Load {
                path: self.path.clone(),
                source: e,
            })?;
            serde_json::from_slice(&data).map_err(|e| IndexError::Parse {
                path: self.path.clone(),
                source: e,
            })?
        };

        *self.content.write() = loaded;
        Ok(())
    }

    /// Returns a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        self.content.read().get(key).cloned()
    }

    /// Whether `key` has a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.content.read().contains_key(key)
    }

    /// Snapshot of all keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.content.read().keys().cloned().collect()
    }

    /// Snapshot of all entries in key order.
    pub fn entries(&self) -> Vec<(String, V)> {
        self.content
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.content.read().len()
    }

    /// Whether the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.content.read().is_empty()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores `value` under `key` and persists the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn insert(&self, key: String, value: V) -> Result<()> {
        self.update(|map| {
            map.insert(key, value);
        })
    }

    /// Removes `key` and persists the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn remove(&self, key: &str) -> Result<Option<V>> {
        self.update(|map| map.remove(key))
    }

    /// Applies `f` to the map and persists the result.
    ///
    /// If persisting fails the map is restored to its previous contents, so a
    /// failed update leaves no trace in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails.
    pub fn update<R>(&self, f: impl FnOnce(&mut BTreeMap<String, V>) -> R) -> Result<R> {
        let _file = self.file.write();

        let (result, previous, snapshot) = {
            let mut content = self.content.write();
            let previous = content.clone();
            let result = f(&mut content);
            let snapshot = serde_json::to_string_pretty(&*content)
                .map_err(|e| IndexError::Serialize { source: e });
            (result, previous, snapshot)
        };

        let written = snapshot.and_then(|data| self.write_file(&data));
        if let Err(e) = written {
            *self.content.write() = previous;
            return Err(e.into());
        }

        Ok(result)
    }

    fn write_file(&self, data: &str) -> std::result::Result<(), IndexError> {
        let save_err = |source| IndexError::Save {
            path: self.path.clone(),
            source,
        };

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(save_err)?;
        tmp.write_all(data.as_bytes()).map_err(save_err)?;
        tmp.flush().map_err(save_err)?;
        tmp.persist(&self.path).map_err(|e| save_err(e.error))?;
        Ok(())
    }
}
