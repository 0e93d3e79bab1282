//! In-memory storage backend.
//!
//! Thread-safe implementations of the storage traits, used for embedded
//! runs, tests, and as the reference the persistent backend is checked against.

use std::sync::RwLock;

use chrono::Utc;

use crate::entity::{CanonicalEntity, EntityId, EntityType};
use crate::similarity::SimilarityScorer;

use super::table::{EntityTable, LedgerTable};
use super::traits::{CanonicalStore, ProgressLedger, StorageError};

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// In-memory [`CanonicalStore`].
#[derive(Debug, Default)]
pub struct InMemoryCanonicalStore {
    table: RwLock<EntityTable>,
}

impl InMemoryCanonicalStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CanonicalStore for InMemoryCanonicalStore {
    fn upsert(&self, entity: CanonicalEntity) -> Result<CanonicalEntity, StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("entity.upsert"))?;
        let row = table.resolve_upsert(entity)?;
        table.put(row.clone());
        Ok(row)
    }

    fn get(&self, id: EntityId) -> Result<Option<CanonicalEntity>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("entity.get"))?;
        Ok(table.get(id).cloned())
    }

    fn find_exact(&self, name: &str, entity_type: EntityType) -> Result<Vec<CanonicalEntity>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("entity.find_exact"))?;
        Ok(table.find_exact(name, entity_type))
    }

    fn find_similar(
        &self,
        name: &str,
        entity_type: EntityType,
        threshold: f64,
        scorer: &SimilarityScorer,
    ) -> Result<Vec<(CanonicalEntity, f64)>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("entity.find_similar"))?;
        Ok(table.find_similar(name, entity_type, threshold, scorer))
    }

    fn get_all(&self) -> Result<Vec<CanonicalEntity>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("entity.get_all"))?;
        Ok(table.all())
    }

    fn get_all_by_type(&self, entity_type: EntityType) -> Result<Vec<CanonicalEntity>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("entity.get_all_by_type"))?;
        Ok(table.all_by_type(entity_type))
    }

    fn count(&self) -> Result<usize, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("entity.count"))?;
        Ok(table.len())
    }

    fn consolidate_duplicates(&self) -> Result<usize, StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("entity.consolidate"))?;
        let merges = table.duplicate_merges();
        let groups = merges.len();
        for (survivor, absorbed) in merges {
            table.apply_merge(survivor, &absorbed);
        }
        Ok(groups)
    }

    fn export_deduplicated(&self) -> Result<Vec<CanonicalEntity>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("entity.export"))?;
        Ok(table.deduplicated())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.table.write().map_err(|_| lock_err("entity.clear"))?.clear();
        Ok(())
    }
}

/// In-memory [`ProgressLedger`].
#[derive(Debug, Default)]
pub struct InMemoryProgressLedger {
    table: RwLock<LedgerTable>,
}

impl InMemoryProgressLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressLedger for InMemoryProgressLedger {
    fn is_processed(&self, record_id: &str) -> Result<bool, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("ledger.is_processed"))?;
        Ok(table.contains(record_id))
    }

    fn mark_batch_processed(&self, ids: &[String], batch_number: u64) -> Result<usize, StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("ledger.mark"))?;
        Ok(table.mark(ids, batch_number, Utc::now()))
    }

    fn total_processed(&self) -> Result<u64, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("ledger.total"))?;
        Ok(table.total())
    }

    fn latest_batch_number(&self) -> Result<Option<u64>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("ledger.latest_batch"))?;
        Ok(table.latest_batch())
    }

    fn processed_in_batch(&self, batch_number: u64) -> Result<u64, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("ledger.in_batch"))?;
        Ok(table.in_batch(batch_number))
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.table
            .write()
            .map_err(|_| lock_err("ledger.set_metadata"))?
            .set_metadata(key, value);
        Ok(())
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("ledger.get_metadata"))?;
        Ok(table.metadata(key).map(str::to_string))
    }

    fn reset(&self) -> Result<(), StorageError> {
        self.table.write().map_err(|_| lock_err("ledger.reset"))?.clear();
        Ok(())
    }
}
