//! Abstract storage traits for coletor.
//!
//! These traits define the contract that storage backends must implement.
//! By using traits, we enable:
//! - In-memory backends for tests and embedded use
//! - The persistent WAL + segment backend for long runs

use std::path::PathBuf;

use thiserror::Error;

use crate::entity::{CanonicalEntity, EntityId, EntityType};
use crate::similarity::SimilarityScorer;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store cannot be reached or written.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Entity not found.
    #[error("Entity not found: {0}")]
    NotFound(EntityId),

    /// On-disk data failed validation.
    #[error("Corrupted storage: {0}")]
    Corrupted(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Storage trait for canonical entities.
///
/// # Concurrency
/// Implementations are thread-safe, but `upsert` and
/// `consolidate_duplicates` must be driven by a single writer: two writers
/// racing on the same unseen name can both insert it.
pub trait CanonicalStore: Send + Sync {
    /// Inserts or merges an entity and returns the stored row.
    ///
    /// - An assigned id replaces that row.
    /// - An unassigned entity whose `(canonical_name, entity_type)` already
    ///   exists is merged into the earliest such row.
    /// - Otherwise the entity is inserted under a fresh id.
    ///
    /// # Errors
    /// `NotFound` if an assigned id does not exist.
    fn upsert(&self, entity: CanonicalEntity) -> Result<CanonicalEntity, StorageError>;

    /// Get an entity by id.
    fn get(&self, id: EntityId) -> Result<Option<CanonicalEntity>, StorageError>;

    /// Entities whose canonical name equals `name` case-insensitively, oldest first.
    fn find_exact(&self, name: &str, entity_type: EntityType) -> Result<Vec<CanonicalEntity>, StorageError>;

    /// Exact matches at score 1.0, then fuzzy matches scoring at least
    /// `threshold`, best first.
    fn find_similar(
        &self,
        name: &str,
        entity_type: EntityType,
        threshold: f64,
        scorer: &SimilarityScorer,
    ) -> Result<Vec<(CanonicalEntity, f64)>, StorageError>;

    /// All entities ordered by id.
    fn get_all(&self) -> Result<Vec<CanonicalEntity>, StorageError>;

    /// All entities of one type ordered by id.
    fn get_all_by_type(&self, entity_type: EntityType) -> Result<Vec<CanonicalEntity>, StorageError>;

    /// Number of stored entities.
    fn count(&self) -> Result<usize, StorageError>;

    /// Merges rows sharing `(canonical_name, entity_type)` into the earliest
    /// one and deletes the rest. Returns the number of groups merged.
    fn consolidate_duplicates(&self) -> Result<usize, StorageError>;

    /// All entities with same-key rows merged, without modifying the store.
    fn export_deduplicated(&self) -> Result<Vec<CanonicalEntity>, StorageError>;

    /// Removes every entity.
    fn clear(&self) -> Result<(), StorageError>;
}

/// Storage trait for the resumable progress ledger.
pub trait ProgressLedger: Send + Sync {
    /// True if `record_id` was already processed.
    fn is_processed(&self, record_id: &str) -> Result<bool, StorageError>;

    /// Records `ids` under `batch_number` as one atomic step. Ids already
    /// present are ignored. Returns the number of newly recorded ids.
    fn mark_batch_processed(&self, ids: &[String], batch_number: u64) -> Result<usize, StorageError>;

    /// Total processed records.
    fn total_processed(&self) -> Result<u64, StorageError>;

    /// Highest batch number recorded, if any.
    fn latest_batch_number(&self) -> Result<Option<u64>, StorageError>;

    /// Records first marked in `batch_number`.
    fn processed_in_batch(&self, batch_number: u64) -> Result<u64, StorageError>;

    /// Stores a run metadata value.
    fn set_metadata(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Reads a run metadata value.
    fn get_metadata(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Clears all ledger state.
    fn reset(&self) -> Result<(), StorageError>;
}

/// Outcome of folding a backend's log into a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// Entity rows plus ledger records written to the snapshot.
    pub entries_compacted: usize,
    /// Snapshot file, if one was written.
    pub segment_path: Option<PathBuf>,
    /// Log size before compaction.
    pub wal_size_before: u64,
    /// Log size after compaction.
    pub wal_size_after: u64,
}

/// Backends whose log can be checkpointed between batches.
pub trait Compactable: Send + Sync {
    /// Writes a snapshot of current state and truncates the log.
    ///
    /// A no-op returning the default result when nothing was logged since the
    /// last checkpoint.
    fn compact(&self) -> Result<CompactionResult, StorageError>;

    /// True when the log has outgrown the backend's size limit.
    fn needs_compaction(&self) -> Result<bool, StorageError> {
        Ok(false)
    }
}
