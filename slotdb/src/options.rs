//! Store configuration.
//!
//! [`StoreOptions`] controls alias generation, session expiry, and how many
//! bucket readers a range query may run at once. Options are not persisted;
//! a store can be reopened with different values.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Default length of generated target aliases.
pub const DEFAULT_ALIAS_LEN: usize = 6;

/// Default maximum gap, in seconds, between pulses of one session.
pub const DEFAULT_SESSION_EXPIRY_SECS: u32 = 15;

/// Upper bound on the default number of concurrent bucket readers.
const MAX_DEFAULT_READ_PARALLELISM: usize = 8;

/// Tunables for an open [`Store`](crate::Store).
///
/// # Example
///
/// ```rust
/// use slotdb::StoreOptions;
///
/// let options = StoreOptions {
///     read_parallelism: 2,
///     ..StoreOptions::default()
/// };
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Length of the random directory alias assigned to each target.
    pub alias_len: usize,
    /// Maximum gap between pulses that still belongs to one session.
    pub session_expiry_secs: u32,
    /// Maximum number of buckets read concurrently by a range query.
    pub read_parallelism: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        let read_parallelism = std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .min(MAX_DEFAULT_READ_PARALLELISM);

        Self {
            alias_len: DEFAULT_ALIAS_LEN,
            session_expiry_secs: DEFAULT_SESSION_EXPIRY_SECS,
            read_parallelism,
        }
    }
}

impl StoreOptions {
    /// Checks that every option is usable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidOptions`] for a zero alias length or zero
    /// read parallelism.
    pub fn validate(&self) -> Result<()> {
        if self.alias_len == 0 {
            return Err(StoreError::InvalidOptions {
                reason: "alias_len must be > 0".to_string(),
            }
            .into());
        }

        if self.read_parallelism == 0 {
            return Err(StoreError::InvalidOptions {
                reason: "read_parallelism must be > 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}
