//! # slotdb
//!
//! Embedded activity-slot storage engine.
//!
//! slotdb records *when* something was worked on. Clients send activity
//! pulses for named targets (usually file paths); pulses arriving close
//! together are merged into sessions, and each closed session is stored as a
//! `(start, duration)` slot. Slots can also be written directly.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Append-only slot files, one pair per target and half-day bucket
//! - 6 bytes per slot on disk (u16 offset + u32 duration)
//! - Range reads prune by bucket and read buckets in parallel
//! - Open sessions are persisted after every change and survive restarts
//! - All locking state is owned by the [`Store`] instance
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slotdb::Store;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open("./activity")?;
//!
//! store.add_action("/src/main.rs", true, 1_700_000_000)?;
//! store.add_action("/src/main.rs", false, 1_700_000_004)?;
//!
//! let (starts, durations) = store.get_slots("/src/main.rs", 0, 0)?;
//! for (bucket_starts, bucket_durations) in starts.iter().zip(&durations) {
//!     for (start, duration) in bucket_starts.iter().zip(bucket_durations) {
//!         println!("{start}: {duration}s");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`]: Top-level handle; opens a directory, owns every component
//! - [`StoreOptions`]: Alias length, session expiry, read parallelism
//! - [`Slot`]: A stored `(start, duration)` interval
//! - [`OpenSessions`]: Column snapshot of sessions still in progress
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`store`]: Store lifecycle and the public operations
//! - [`slot`]: Slot files, aliases, range reads, repair
//! - [`session`]: Pulse aggregation state machine
//! - [`bucket`]: Half-day bucket identifiers and ranges
//! - [`lock`]: Per-key reader/writer lock registry
//! - [`index`]: Persisted JSON key-value index files
//! - [`project`]: Project membership by path prefix
//! - [`meta`]: Store metadata
//! - [`options`]: Store configuration
//! - [`error`]: Error types

pub mod bucket;
pub mod error;
pub mod index;
pub mod lock;
pub mod meta;
pub mod options;
pub mod project;
pub mod session;
pub mod slot;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use bucket::BucketId;
pub use error::{Result, SlotDbError};
pub use meta::StoreMetadata;
pub use options::StoreOptions;
pub use session::{OpenSessions, Session};
pub use slot::{BucketSlots, Slot};
pub use store::Store;
