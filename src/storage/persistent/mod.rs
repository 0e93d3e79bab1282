//! Durable single-process storage.
//!
//! A store directory holds:
//! ```text
//! <dir>/
//!   .lock              exclusive process lock (holder pid)
//!   coletor.wal        write-ahead log of mutations since the last checkpoint
//!   segments/
//!     segment_00007.seg  full snapshots, newest wins
//! ```
//!
//! Every mutation is logged before it is applied. Opening a directory loads
//! the newest segment and replays the log on top. Compaction snapshots both
//! stores into a new segment and truncates the log.

mod codec;
mod file_lock;
mod segment;
mod stores;
mod wal;

use std::path::Path;

use crate::error::{ColetorError, ColetorResult, ValidationError};

pub use stores::{PersistentCanonicalStore, PersistentProgressLedger, PersistentStores};
pub use wal::SyncPolicy;

/// Tuning for the persistent backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistentConfig {
    /// Log size in bytes above which compaction is due.
    pub max_wal_size: u64,
    /// When log appends are fsynced.
    pub sync: SyncPolicy,
    /// Snapshots retained after compaction, at least 1.
    pub keep_segments: usize,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024,
            sync: SyncPolicy::Commit,
            keep_segments: 2,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Checks the limits.
    ///
    /// # Errors
    /// `InvalidConfig` when `max_wal_size` is below 4 KiB or `keep_segments` is 0.
    pub fn validate(self) -> ColetorResult<Self> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            }
            .into());
        }
        if self.keep_segments == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "keep_segments must be at least 1".to_string(),
            }
            .into());
        }
        Ok(self)
    }
}

/// Opens or creates a store directory.
///
/// # Errors
/// - `Validation` for an invalid config
/// - `Storage` if the directory is locked, unreadable, or corrupted
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use coletor::storage::{open_database, CanonicalStore};
///
/// let stores = open_database("./coletor-data", None)?;
/// let entities: Arc<dyn CanonicalStore> = stores.entities.clone();
/// println!("{} entities", entities.count()?);
/// # Ok::<(), coletor::ColetorError>(())
/// ```
pub fn open_database(path: impl AsRef<Path>, config: Option<PersistentConfig>) -> ColetorResult<PersistentStores> {
    let config = config.unwrap_or_default().validate()?;
    PersistentStores::open(path.as_ref(), config).map_err(ColetorError::from)
}
