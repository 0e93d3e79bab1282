//! WAL-backed canonical store and progress ledger.
//!
//! Both stores share one log. Each mutation resolves its final row under the
//! table's write lock, appends it to the log, and only then applies it in
//! memory, so replaying the log never has to re-run matching or id assignment.

use std::fs;
use std::io::Error as IoError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use log::{debug, info};

use crate::entity::{CanonicalEntity, EntityId, EntityType};
use crate::similarity::SimilarityScorer;
use crate::storage::memory::lock_err;
use crate::storage::table::{EntityTable, LedgerTable};
use crate::storage::traits::{CanonicalStore, Compactable, CompactionResult, ProgressLedger, StorageError};

use super::file_lock::FileLock;
use super::segment::{SegmentData, SegmentManager};
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "coletor.wal";
const SEGMENTS_DIR: &str = "segments";

fn unavailable(context: &'static str) -> impl Fn(IoError) -> StorageError {
    move |e| StorageError::Unavailable(format!("{context}: {e}"))
}

/// Durable [`CanonicalStore`].
#[derive(Debug)]
pub struct PersistentCanonicalStore {
    wal: Arc<WriteAheadLog>,
    table: RwLock<EntityTable>,
}

impl CanonicalStore for PersistentCanonicalStore {
    fn upsert(&self, entity: CanonicalEntity) -> Result<CanonicalEntity, StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("entity.upsert"))?;
        let row = table.resolve_upsert(entity)?;
        self.wal
            .append(WalEntryKind::EntityPut(row.clone()))
            .map_err(unavailable("WAL append failed"))?;
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
            self.wal
                .append(WalEntryKind::EntityMerge {
                    survivor: survivor.clone(),
                    absorbed: absorbed.clone(),
                })
                .map_err(unavailable("WAL append failed"))?;
            table.apply_merge(survivor, &absorbed);
        }
        Ok(groups)
    }

    fn export_deduplicated(&self) -> Result<Vec<CanonicalEntity>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("entity.export"))?;
        Ok(table.deduplicated())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("entity.clear"))?;
        self.wal
            .append(WalEntryKind::EntitiesCleared)
            .map_err(unavailable("WAL append failed"))?;
        table.clear();
        Ok(())
    }
}

/// Durable [`ProgressLedger`].
#[derive(Debug)]
pub struct PersistentProgressLedger {
    wal: Arc<WriteAheadLog>,
    table: RwLock<LedgerTable>,
}

impl ProgressLedger for PersistentProgressLedger {
    fn is_processed(&self, record_id: &str) -> Result<bool, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("ledger.is_processed"))?;
        Ok(table.contains(record_id))
    }

    fn mark_batch_processed(&self, ids: &[String], batch_number: u64) -> Result<usize, StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("ledger.mark"))?;
        if ids.iter().all(|id| table.contains(id)) {
            return Ok(0);
        }
        let processed_at = Utc::now();
        self.wal
            .append(WalEntryKind::LedgerBatch {
                ids: ids.to_vec(),
                batch_number,
                processed_at,
            })
            .map_err(unavailable("WAL append failed"))?;
        Ok(table.mark(ids, batch_number, processed_at))
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
        let mut table = self.table.write().map_err(|_| lock_err("ledger.set_metadata"))?;
        self.wal
            .append(WalEntryKind::LedgerMetadata {
                key: key.to_string(),
                value: value.to_string(),
            })
            .map_err(unavailable("WAL append failed"))?;
        table.set_metadata(key, value);
        Ok(())
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("ledger.get_metadata"))?;
        Ok(table.metadata(key).map(str::to_string))
    }

    fn reset(&self) -> Result<(), StorageError> {
        let mut table = self.table.write().map_err(|_| lock_err("ledger.reset"))?;
        self.wal
            .append(WalEntryKind::LedgerReset)
            .map_err(unavailable("WAL append failed"))?;
        table.clear();
        Ok(())
    }
}

/// An open store directory: the lock, the log, the segments, and both stores.
///
/// Dropping it releases the directory lock.
#[derive(Debug)]
pub struct PersistentStores {
    dir: PathBuf,
    _lock: FileLock,
    wal: Arc<WriteAheadLog>,
    segments: RwLock<SegmentManager>,
    config: PersistentConfig,
    /// Canonical entities.
    pub entities: Arc<PersistentCanonicalStore>,
    /// Processed-record ledger.
    pub ledger: Arc<PersistentProgressLedger>,
}

impl PersistentStores {
    /// Opens `dir`, loading the newest segment and replaying the log on top.
    ///
    /// # Errors
    /// - `Unavailable` if the directory cannot be created or is locked
    /// - `Corrupted` if a segment or log entry fails its checksum
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(unavailable("failed to create store directory"))?;
        let lock = FileLock::acquire(dir).map_err(unavailable("failed to acquire lock"))?;

        let segments = SegmentManager::open(&dir.join(SEGMENTS_DIR))
            .map_err(|e| StorageError::Corrupted(format!("failed to open segments: {e}")))?;
        let SegmentData { entities, ledger } = segments
            .load_latest()
            .map_err(|e| StorageError::Corrupted(format!("failed to load segment: {e}")))?;
        let mut entities = EntityTable::from_snapshot(entities);
        let mut ledger = ledger;

        let wal = Arc::new(
            WriteAheadLog::open(&dir.join(WAL_FILE), config.sync)
                .map_err(unavailable("failed to open WAL"))?,
        );
        let replayed = replay(&wal, &mut entities, &mut ledger)?;
        info!(
            "opened store {} ({} entities, {} processed records, {replayed} WAL entries replayed)",
            dir.display(),
            entities.len(),
            ledger.total(),
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            entities: Arc::new(PersistentCanonicalStore {
                wal: Arc::clone(&wal),
                table: RwLock::new(entities),
            }),
            ledger: Arc::new(PersistentProgressLedger {
                wal: Arc::clone(&wal),
                table: RwLock::new(ledger),
            }),
            wal,
            segments: RwLock::new(segments),
            config,
        })
    }

    /// Store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current log size in bytes.
    pub fn wal_size(&self) -> Result<u64, StorageError> {
        self.wal.size_bytes().map_err(unavailable("failed to stat WAL"))
    }

    /// Number of segment files on disk.
    pub fn segment_count(&self) -> Result<usize, StorageError> {
        let segments = self.segments.read().map_err(|_| lock_err("segments.count"))?;
        Ok(segments.segments().len())
    }
}

impl Compactable for PersistentStores {
    fn compact(&self) -> Result<CompactionResult, StorageError> {
        // Both write locks are held until the log is truncated so no mutation
        // can land between the snapshot and the truncation.
        let entities = self
            .entities
            .table
            .write()
            .map_err(|_| lock_err("entity.compact"))?;
        let ledger = self.ledger.table.write().map_err(|_| lock_err("ledger.compact"))?;

        let current_seq = self
            .wal
            .current_sequence()
            .map_err(unavailable("failed to read WAL sequence"))?;
        if current_seq == 0 {
            return Ok(CompactionResult::default());
        }
        let wal_size_before = self.wal_size()?;

        let data = SegmentData {
            entities: entities.snapshot(),
            ledger: ledger.clone(),
        };
        let entries_compacted = data.entry_count();

        let mut segments = self.segments.write().map_err(|_| lock_err("segments.compact"))?;
        let persisted = segments.persisted_sequence();
        let up_to_sequence = persisted + current_seq;

        let mut writer = segments
            .create_segment_writer(persisted + 1)
            .map_err(unavailable("failed to create segment"))?;
        writer
            .write_data(&data, up_to_sequence)
            .map_err(unavailable("failed to write segment"))?;
        let segment = writer.finalize().map_err(unavailable("failed to finalize segment"))?;
        let segment_path = segment.path().to_path_buf();
        segments.add_segment(segment);

        self.wal
            .append(WalEntryKind::Checkpoint { up_to_sequence })
            .map_err(unavailable("WAL append failed"))?;
        self.wal.truncate().map_err(unavailable("failed to truncate WAL"))?;

        let pruned = segments
            .prune(self.config.keep_segments)
            .map_err(unavailable("failed to prune segments"))?;
        let wal_size_after = self.wal_size()?;
        debug!(
            "compacted {entries_compacted} entries into {} (WAL {wal_size_before} -> {wal_size_after} bytes, {pruned} old segments pruned)",
            segment_path.display(),
        );

        Ok(CompactionResult {
            entries_compacted,
            segment_path: Some(segment_path),
            wal_size_before,
            wal_size_after,
        })
    }

    fn needs_compaction(&self) -> Result<bool, StorageError> {
        Ok(self.wal_size()? > self.config.max_wal_size)
    }
}

fn replay(wal: &WriteAheadLog, entities: &mut EntityTable, ledger: &mut LedgerTable) -> Result<u64, StorageError> {
    let mut applied = 0;
    for entry in wal.iter().map_err(unavailable("failed to read WAL"))? {
        let entry = entry.map_err(|e| StorageError::Corrupted(format!("corrupted WAL entry: {e}")))?;
        match entry.kind {
            WalEntryKind::EntityPut(row) => entities.put(row),
            WalEntryKind::EntityMerge { survivor, absorbed } => entities.apply_merge(survivor, &absorbed),
            WalEntryKind::EntitiesCleared => entities.clear(),
            WalEntryKind::LedgerBatch {
                ids,
                batch_number,
                processed_at,
            } => {
                ledger.mark(&ids, batch_number, processed_at);
            }
            WalEntryKind::LedgerMetadata { key, value } => ledger.set_metadata(&key, &value),
            WalEntryKind::LedgerReset => ledger.clear(),
            WalEntryKind::Checkpoint { .. } => {}
        }
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::persistent::SyncPolicy;
    use tempfile::tempdir;

    fn config() -> PersistentConfig {
        PersistentConfig {
            sync: SyncPolicy::Never,
            ..PersistentConfig::default()
        }
    }

    fn person(name: &str) -> CanonicalEntity {
        CanonicalEntity::seed(name, EntityType::Pessoa, 0.9, name.to_uppercase())
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let stores = PersistentStores::open(dir.path(), config()).unwrap();
            let row = stores.entities.upsert(person("Silva, J.")).unwrap();
            stores
                .ledger
                .mark_batch_processed(&["r1".to_string(), "r2".to_string()], 1)
                .unwrap();
            stores.ledger.set_metadata("source", "occurrences.jsonl").unwrap();
            row.id
        };

        let stores = PersistentStores::open(dir.path(), config()).unwrap();
        assert_eq!(stores.entities.get(id).unwrap().unwrap().canonical_name, "Silva, J.");
        assert_eq!(stores.ledger.total_processed().unwrap(), 2);
        assert_eq!(stores.ledger.latest_batch_number().unwrap(), Some(1));
        assert_eq!(
            stores.ledger.get_metadata("source").unwrap().as_deref(),
            Some("occurrences.jsonl")
        );

        let next = stores.entities.upsert(person("Lima, A.")).unwrap();
        assert!(next.id > id);
    }

    #[test]
    fn test_compaction_writes_segment_and_truncates() {
        let dir = tempdir().unwrap();
        {
            let stores = PersistentStores::open(dir.path(), config()).unwrap();
            stores.entities.upsert(person("Silva, J.")).unwrap();
            stores.entities.upsert(person("Lima, A.")).unwrap();
            stores.ledger.mark_batch_processed(&["r1".to_string()], 1).unwrap();

            let result = stores.compact().unwrap();
            assert_eq!(result.entries_compacted, 3);
            assert!(result.segment_path.as_ref().unwrap().exists());
            assert!(result.wal_size_after < result.wal_size_before);
            assert_eq!(stores.segment_count().unwrap(), 1);

            stores.entities.upsert(person("Souza, M.")).unwrap();
        }

        let stores = PersistentStores::open(dir.path(), config()).unwrap();
        assert_eq!(stores.entities.count().unwrap(), 3);
        assert!(stores.ledger.is_processed("r1").unwrap());
    }

    #[test]
    fn test_compaction_of_empty_log_is_noop() {
        let dir = tempdir().unwrap();
        let stores = PersistentStores::open(dir.path(), config()).unwrap();
        let result = stores.compact().unwrap();
        assert_eq!(result, CompactionResult::default());
        assert_eq!(stores.segment_count().unwrap(), 0);
    }

    #[test]
    fn test_old_segments_pruned() {
        let dir = tempdir().unwrap();
        let stores = PersistentStores::open(dir.path(), config()).unwrap();
        for name in ["Silva, J.", "Lima, A.", "Souza, M."] {
            stores.entities.upsert(person(name)).unwrap();
            stores.compact().unwrap();
        }
        assert_eq!(stores.segment_count().unwrap(), 2);
    }

    #[test]
    fn test_consolidation_and_clear_replay() {
        let dir = tempdir().unwrap();
        {
            let stores = PersistentStores::open(dir.path(), config()).unwrap();
            stores.entities.upsert(person("Silva, J.")).unwrap();
            let mut renamed = stores.entities.upsert(person("Lima, A.")).unwrap();
            renamed.canonical_name = "Silva, J.".to_string();
            stores.entities.upsert(renamed).unwrap();
            assert_eq!(stores.entities.consolidate_duplicates().unwrap(), 1);
        }
        {
            let stores = PersistentStores::open(dir.path(), config()).unwrap();
            assert_eq!(stores.entities.count().unwrap(), 1);
            stores.entities.clear().unwrap();
            stores.ledger.mark_batch_processed(&["r9".to_string()], 4).unwrap();
            stores.ledger.reset().unwrap();
        }
        let stores = PersistentStores::open(dir.path(), config()).unwrap();
        assert_eq!(stores.entities.count().unwrap(), 0);
        assert_eq!(stores.ledger.total_processed().unwrap(), 0);
    }

    #[test]
    fn test_second_open_is_refused() {
        let dir = tempdir().unwrap();
        let _held = PersistentStores::open(dir.path(), config()).unwrap();
        let err = PersistentStores::open(dir.path(), config()).unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }

    #[test]
    fn test_size_trigger() {
        let dir = tempdir().unwrap();
        let stores = PersistentStores::open(
            dir.path(),
            PersistentConfig {
                max_wal_size: 4 * 1024,
                ..config()
            },
        )
        .unwrap();
        assert!(!stores.needs_compaction().unwrap());
        for i in 0..100 {
            stores.entities.upsert(person(&format!("Pessoa{i}, A."))).unwrap();
        }
        assert!(stores.needs_compaction().unwrap());
        stores.compact().unwrap();
        assert!(!stores.needs_compaction().unwrap());
    }
}
