//! Indexed in-memory tables shared by the storage backends.
//!
//! Backends wrap these in a lock. Mutations are split into a pure
//! "resolve" step and an "apply" step so the persistent backend can log the
//! resolved row before applying it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{CanonicalEntity, EntityId, EntityType};
use crate::similarity::SimilarityScorer;

use super::traits::StorageError;

type NameKey = (String, EntityType);

fn name_key(name: &str, entity_type: EntityType) -> NameKey {
    (name.trim().to_uppercase(), entity_type)
}

/// Serializable form of an [`EntityTable`]. Indexes are rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Highest id ever assigned.
    pub last_id: u64,
    /// Rows ordered by id.
    pub entities: Vec<CanonicalEntity>,
}

/// Canonical entities with the name-key and type indexes.
#[derive(Debug, Clone, Default)]
pub struct EntityTable {
    by_id: BTreeMap<EntityId, CanonicalEntity>,
    by_key: HashMap<NameKey, BTreeSet<EntityId>>,
    by_type: HashMap<EntityType, BTreeSet<EntityId>>,
    last_id: u64,
}

impl EntityTable {
    /// Rebuilds a table from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: EntitySnapshot) -> Self {
        let mut table = Self {
            last_id: snapshot.last_id,
            ..Self::default()
        };
        for entity in snapshot.entities {
            table.put(entity);
        }
        table
    }

    /// Snapshot of every row.
    #[must_use]
    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            last_id: self.last_id,
            entities: self.by_id.values().cloned().collect(),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Row by id.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&CanonicalEntity> {
        self.by_id.get(&id)
    }

    /// Computes the row `upsert(entity)` would store, without storing it.
    ///
    /// # Errors
    /// `NotFound` when an assigned id is not in the table.
    pub fn resolve_upsert(&self, mut entity: CanonicalEntity) -> Result<CanonicalEntity, StorageError> {
        if !entity.id.is_unassigned() {
            if !self.by_id.contains_key(&entity.id) {
                return Err(StorageError::NotFound(entity.id));
            }
            return Ok(entity);
        }

        let existing = self
            .by_key
            .get(&name_key(&entity.canonical_name, entity.entity_type))
            .and_then(|ids| ids.iter().next())
            .and_then(|id| self.by_id.get(id));
        if let Some(existing) = existing {
            let mut merged = existing.clone();
            merged.absorb(&entity);
            merged.classification_confidence = merged
                .classification_confidence
                .max(entity.classification_confidence);
            return Ok(merged);
        }

        entity.id = EntityId::new(self.last_id + 1);
        Ok(entity)
    }

    /// Stores `entity` under its id, replacing and reindexing any previous row.
    pub fn put(&mut self, entity: CanonicalEntity) {
        if let Some(old) = self.by_id.remove(&entity.id) {
            self.unindex(&old);
        }
        self.last_id = self.last_id.max(entity.id.get());
        self.by_key
            .entry(name_key(&entity.canonical_name, entity.entity_type))
            .or_default()
            .insert(entity.id);
        self.by_type.entry(entity.entity_type).or_default().insert(entity.id);
        self.by_id.insert(entity.id, entity);
    }

    /// Removes a row.
    pub fn remove(&mut self, id: EntityId) -> Option<CanonicalEntity> {
        let old = self.by_id.remove(&id)?;
        self.unindex(&old);
        Some(old)
    }

    fn unindex(&mut self, entity: &CanonicalEntity) {
        let key = name_key(&entity.canonical_name, entity.entity_type);
        if let Some(ids) = self.by_key.get_mut(&key) {
            ids.remove(&entity.id);
            if ids.is_empty() {
                self.by_key.remove(&key);
            }
        }
        if let Some(ids) = self.by_type.get_mut(&entity.entity_type) {
            ids.remove(&entity.id);
        }
    }

    /// Removes every row. Ids keep increasing after a clear.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_key.clear();
        self.by_type.clear();
    }

    /// Exact name-key matches, oldest first.
    #[must_use]
    pub fn find_exact(&self, name: &str, entity_type: EntityType) -> Vec<CanonicalEntity> {
        self.by_key
            .get(&name_key(name, entity_type))
            .map(|ids| ids.iter().filter_map(|id| self.by_id.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// Exact matches at 1.0 followed by fuzzy matches at or above
    /// `threshold`, best first with ties broken by id.
    #[must_use]
    pub fn find_similar(
        &self,
        name: &str,
        entity_type: EntityType,
        threshold: f64,
        scorer: &SimilarityScorer,
    ) -> Vec<(CanonicalEntity, f64)> {
        let (probe, _) = name_key(name, entity_type);
        if probe.is_empty() {
            return Vec::new();
        }
        let Some(ids) = self.by_type.get(&entity_type) else {
            return Vec::new();
        };

        let mut hits: Vec<(CanonicalEntity, f64)> = ids
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .filter_map(|entity| {
                let key = entity.name_key();
                let score = if key == probe { 1.0 } else { scorer.score(&probe, &key) };
                (score >= threshold).then(|| (entity.clone(), score))
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.id.cmp(&b.0.id)));
        hits
    }

    /// All rows ordered by id.
    #[must_use]
    pub fn all(&self) -> Vec<CanonicalEntity> {
        self.by_id.values().cloned().collect()
    }

    /// Rows of one type ordered by id.
    #[must_use]
    pub fn all_by_type(&self, entity_type: EntityType) -> Vec<CanonicalEntity> {
        self.by_type
            .get(&entity_type)
            .map(|ids| ids.iter().filter_map(|id| self.by_id.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// One `(survivor, absorbed ids)` pair per name key held by more than
    /// one row. The survivor is the lowest id with the others folded in by id.
    #[must_use]
    pub fn duplicate_merges(&self) -> Vec<(CanonicalEntity, Vec<EntityId>)> {
        let mut merges: Vec<(CanonicalEntity, Vec<EntityId>)> = self
            .by_key
            .values()
            .filter(|ids| ids.len() > 1)
            .filter_map(|ids| {
                let mut rows = ids.iter().filter_map(|id| self.by_id.get(id));
                let mut survivor = rows.next()?.clone();
                let mut absorbed = Vec::new();
                for row in rows {
                    survivor.absorb(row);
                    survivor.classification_confidence =
                        survivor.classification_confidence.max(row.classification_confidence);
                    absorbed.push(row.id);
                }
                Some((survivor, absorbed))
            })
            .collect();
        merges.sort_by_key(|(survivor, _)| survivor.id);
        merges
    }

    /// Applies one merge produced by [`Self::duplicate_merges`].
    pub fn apply_merge(&mut self, survivor: CanonicalEntity, absorbed: &[EntityId]) {
        for id in absorbed {
            self.remove(*id);
        }
        self.put(survivor);
    }

    /// All rows with duplicates merged, leaving the table untouched.
    #[must_use]
    pub fn deduplicated(&self) -> Vec<CanonicalEntity> {
        let mut rows = self.by_id.clone();
        for (survivor, absorbed) in self.duplicate_merges() {
            for id in absorbed {
                rows.remove(&id);
            }
            rows.insert(survivor.id, survivor);
        }
        rows.into_values().collect()
    }
}

/// One processed source record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Batch that first recorded it.
    pub batch_number: u64,
    /// When it was recorded.
    pub processed_at: DateTime<Utc>,
}

/// Processed record ids, per-batch counts and run metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerTable {
    records: HashMap<String, LedgerRecord>,
    per_batch: BTreeMap<u64, u64>,
    metadata: BTreeMap<String, String>,
}

impl LedgerTable {
    /// True if `record_id` is recorded.
    #[must_use]
    pub fn contains(&self, record_id: &str) -> bool {
        self.records.contains_key(record_id)
    }

    /// Records `ids`, ignoring those already present. Returns the number added.
    pub fn mark(&mut self, ids: &[String], batch_number: u64, now: DateTime<Utc>) -> usize {
        let mut added = 0;
        for id in ids {
            if self.records.contains_key(id) {
                continue;
            }
            self.records.insert(
                id.clone(),
                LedgerRecord {
                    batch_number,
                    processed_at: now,
                },
            );
            added += 1;
        }
        if added > 0 {
            *self.per_batch.entry(batch_number).or_default() += added as u64;
        }
        added
    }

    /// Number of recorded ids.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.records.len() as u64
    }

    /// Highest batch that recorded at least one id.
    #[must_use]
    pub fn latest_batch(&self) -> Option<u64> {
        self.per_batch.keys().next_back().copied()
    }

    /// Ids first recorded by `batch_number`.
    #[must_use]
    pub fn in_batch(&self, batch_number: u64) -> u64 {
        self.per_batch.get(&batch_number).copied().unwrap_or(0)
    }

    /// Sets a metadata value.
    pub fn set_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    /// Reads a metadata value.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Clears everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
