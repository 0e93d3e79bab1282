//! Batch orchestration.
//!
//! A run streams batches from a [`RecordSource`], skips records the progress
//! ledger already holds, prepares the rest on the stage pool and hands them to
//! the store writer. The report is always exported at the end, including after
//! a source failure, so an interrupted run still leaves its partial output.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use coletor::config::PipelineConfig;
//! use coletor::pipeline::Pipeline;
//! use coletor::source::VecSource;
//! use coletor::storage::{InMemoryCanonicalStore, InMemoryProgressLedger};
//!
//! # fn main() -> coletor::ColetorResult<()> {
//! let pipeline = Pipeline::new(
//!     PipelineConfig::default(),
//!     Arc::new(InMemoryCanonicalStore::new()),
//!     Arc::new(InMemoryProgressLedger::new()),
//! )?;
//! let report = pipeline.run(&VecSource::from_collectors(["Forzza, R.C.", "R.C. Forzza"]))?;
//! assert_eq!(report.processed, 2);
//! # Ok(())
//! # }
//! ```

mod runtime;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::atomizer::Atomizer;
use crate::canonicalizer::Canonicalizer;
use crate::classifier::{ClassificationResult, Classifier, ClassifierStats, EntityRecognizer};
use crate::config::PipelineConfig;
use crate::entity::EntityType;
use crate::error::{ColetorError, ColetorResult};
use crate::export::{export_store, ExportSummary};
use crate::normalizer::Normalizer;
use crate::similarity::SimilarityScorer;
use crate::source::{RecordSource, SourceRecord};
use crate::storage::{CanonicalStore, Compactable, ProgressLedger};

use runtime::{StagePool, StoreWriter, WriterParts, WriterTally};

/// Ledger metadata key holding the start time of the latest run.
pub const META_LAST_RUN_STARTED: &str = "last_run_started";
/// Ledger metadata key holding the end time of the latest completed run.
pub const META_LAST_RUN_FINISHED: &str = "last_run_finished";

/// A normalized name ready for canonicalization.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFragment {
    /// Normalized text.
    pub normalized: String,
    /// Type the entity is stored under.
    pub entity_type: EntityType,
    /// Classification confidence of the whole string.
    pub confidence: f64,
}

/// Result of the pure stages for one record.
#[derive(Debug)]
pub enum Prepared {
    /// The record has no collector text.
    Empty,
    /// The classifier marked the text as noise.
    Discarded,
    /// Names to canonicalize, plus fragments that normalized to nothing.
    Fragments {
        /// Usable fragments in order of appearance.
        fragments: Vec<PreparedFragment>,
        /// Fragments dropped by the normalizer.
        dropped: u64,
    },
    /// A stage rejected the record.
    Failed(ColetorError),
}

/// One record after classify, atomize and normalize.
#[derive(Debug)]
pub struct PreparedRecord {
    /// Ledger key.
    pub id: String,
    /// Classification, when the classifier ran.
    pub classification: Option<ClassificationResult>,
    /// What the store writer should do.
    pub outcome: Prepared,
}

/// The stateless stages shared by every worker.
#[derive(Debug, Default)]
pub struct Stages {
    classifier: Classifier,
    atomizer: Atomizer,
    normalizer: Normalizer,
}

impl Stages {
    /// Stages around `classifier`.
    #[must_use]
    pub const fn new(classifier: Classifier) -> Self {
        Self {
            classifier,
            atomizer: Atomizer::new(),
            normalizer: Normalizer::new(),
        }
    }

    /// Runs classify, atomize and normalize over one record.
    #[must_use]
    pub fn prepare(&self, record: SourceRecord) -> PreparedRecord {
        let SourceRecord { id, collector } = record;
        let Some(collector) = collector else {
            return PreparedRecord {
                id,
                classification: None,
                outcome: Prepared::Empty,
            };
        };

        let classification = match self.classifier.classify(&collector) {
            Ok(classification) => classification,
            Err(err) => {
                return PreparedRecord {
                    id,
                    classification: None,
                    outcome: Prepared::Failed(err),
                }
            }
        };
        if classification.is_discard() {
            debug!("discarding '{}' ({id})", classification.original_text);
            return PreparedRecord {
                id,
                classification: Some(classification),
                outcome: Prepared::Discarded,
            };
        }

        let names: Vec<String> = if classification.should_atomize {
            self.atomizer
                .atomize(&classification.sanitized_text, classification.category)
                .into_iter()
                .map(|fragment| fragment.text)
                .collect()
        } else {
            Vec::new()
        };
        let names = if names.is_empty() {
            vec![classification.sanitized_text.clone()]
        } else {
            names
        };

        let entity_type = classification.category.entity_type();
        let mut fragments = Vec::with_capacity(names.len());
        let mut dropped = 0;
        for name in names {
            let normalized = self.normalizer.normalize(&name);
            if normalized.is_discarded() {
                debug!("fragment '{name}' of {id} normalized to nothing");
                dropped += 1;
                continue;
            }
            fragments.push(PreparedFragment {
                normalized: normalized.normalized,
                entity_type,
                confidence: classification.confidence,
            });
        }

        PreparedRecord {
            id,
            classification: Some(classification),
            outcome: Prepared::Fragments { fragments, dropped },
        }
    }
}

/// Counts for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Records pulled from the source, including skipped ones.
    pub records_seen: u64,
    /// Records committed to the ledger by this run.
    pub processed: u64,
    /// Records already in the ledger, or repeated within the run.
    pub skipped: u64,
    /// Records without collector text.
    pub empty: u64,
    /// Records classified as noise.
    pub discarded: u64,
    /// Skipped records and fragments, by error kind.
    pub errors: BTreeMap<&'static str, u64>,
    /// Fragments attached to an entity.
    pub fragments: u64,
    /// Fragments the normalizer reduced to nothing.
    pub fragments_dropped: u64,
    /// Entities created.
    pub entities_created: u64,
    /// Existing entities that gained an occurrence.
    pub entities_updated: u64,
    /// Ledger batches committed.
    pub batches: u64,
    /// Store compactions performed.
    pub compactions: u64,
    /// Duplicate groups merged by the closing consolidation sweep.
    pub consolidated: usize,
    /// Classification counters, including recognizer invocations.
    pub classifier: ClassifierStats,
    /// Report written at the end, if the export succeeded.
    pub export: Option<ExportSummary>,
    /// Source failure that ended the run early.
    pub source_error: Option<String>,
    /// Wall time.
    pub elapsed: Duration,
}

impl RunReport {
    /// Processed records per second.
    #[must_use]
    pub fn records_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }

    /// Total skipped records and fragments.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.errors.values().sum()
    }

    fn absorb(&mut self, tally: WriterTally) {
        self.processed += tally.processed;
        self.empty += tally.empty;
        self.discarded += tally.discarded;
        for (kind, count) in tally.errors {
            *self.errors.entry(kind).or_default() += count;
        }
        self.fragments += tally.fragments;
        self.fragments_dropped += tally.fragments_dropped;
        self.entities_created += tally.entities_created;
        self.entities_updated += tally.entities_updated;
        self.batches += tally.batches;
        self.compactions += tally.compactions;
        self.classifier.merge(&tally.classifier);
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Processed: {} records ({} already done)", self.processed, self.skipped)?;
        writeln!(
            f,
            "Time: {:.1}s, rate {:.1} rec/sec",
            self.elapsed.as_secs_f64(),
            self.records_per_sec()
        )?;
        writeln!(
            f,
            "Entities: {} created, {} updated from {} fragments",
            self.entities_created, self.entities_updated, self.fragments
        )?;
        writeln!(f, "Empty: {}, discarded: {}", self.empty, self.discarded)?;
        for (category, count) in &self.classifier.by_category {
            writeln!(f, "  {category}: {count}")?;
        }
        writeln!(f, "NER fallback used: {} times", self.classifier.ner_invocations)?;
        if !self.errors.is_empty() {
            let kinds: Vec<String> = self.errors.iter().map(|(k, n)| format!("{k}={n}")).collect();
            writeln!(f, "Skipped on error: {}", kinds.join(", "))?;
        }
        if let Some(export) = &self.export {
            writeln!(f, "Exported: {} entities, {} variations", export.rows, export.variations)?;
        }
        if let Some(err) = &self.source_error {
            writeln!(f, "Source stopped early: {err}")?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Feed {
    records_seen: u64,
    skipped: u64,
    taken: u64,
    seen: HashSet<String>,
    source_error: Option<String>,
}

/// Runs the four stages over a record source.
pub struct Pipeline {
    config: PipelineConfig,
    stages: Arc<Stages>,
    canonicalizer: Canonicalizer,
    ledger: Arc<dyn ProgressLedger>,
    compactor: Option<Arc<dyn Compactable>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("stages", &self.stages)
            .field("canonicalizer", &self.canonicalizer)
            .field("compacting", &self.compactor.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline writing to `store` and `ledger`.
    ///
    /// # Errors
    /// `InvalidConfig` if `config` does not validate.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn CanonicalStore>,
        ledger: Arc<dyn ProgressLedger>,
    ) -> ColetorResult<Self> {
        let config = config.validate()?;
        let canonicalizer = Canonicalizer::new(store, SimilarityScorer::new(config.similarity_weights))
            .with_threshold(config.confidence_threshold);
        Ok(Self {
            config,
            stages: Arc::new(Stages::default()),
            canonicalizer,
            ledger,
            compactor: None,
        })
    }

    /// Consults `recognizer` for strings the rules classify below the
    /// configured NER threshold.
    #[must_use]
    pub fn with_recognizer(mut self, recognizer: Arc<dyn EntityRecognizer>) -> Self {
        self.stages = Arc::new(Stages::new(Classifier::with_recognizer(
            recognizer,
            self.config.ner_threshold,
        )));
        self
    }

    /// Compacts `compactor` every `compact_every_batches` batches, and
    /// whenever it reports its log has outgrown its limit.
    #[must_use]
    pub fn with_compactor(mut self, compactor: Arc<dyn Compactable>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The canonical store being written.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CanonicalStore> {
        self.canonicalizer.store()
    }

    /// The progress ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn ProgressLedger> {
        &self.ledger
    }

    /// Clears the store and the ledger for a run that does not resume.
    ///
    /// # Errors
    /// `Storage` when either backend fails.
    pub fn reset(&self) -> ColetorResult<()> {
        self.ledger.reset()?;
        self.store().clear()?;
        info!("store and progress ledger cleared");
        Ok(())
    }

    /// Merges same-key duplicates in the store.
    ///
    /// # Errors
    /// `Storage` when the store fails.
    pub fn consolidate(&self) -> ColetorResult<usize> {
        let merged = self.store().consolidate_duplicates()?;
        if merged > 0 {
            info!("consolidated {merged} duplicate groups");
        }
        Ok(merged)
    }

    /// Processes every record of `source` not yet in the ledger, then
    /// consolidates and exports the store.
    ///
    /// A source failure ends the run early but still yields a report; its
    /// message is kept in [`RunReport::source_error`].
    ///
    /// # Errors
    /// `Storage` when a backend fails, `Export` when the report cannot be
    /// written, `Internal` when a worker thread dies. The export is attempted
    /// before a storage failure is returned.
    pub fn run(&self, source: &dyn RecordSource) -> ColetorResult<RunReport> {
        let started = Instant::now();
        self.ledger
            .set_metadata(META_LAST_RUN_STARTED, &Utc::now().to_rfc3339())?;
        match source.total_count() {
            Ok(total) => {
                let total = self.config.max_records.map_or(total, |cap| cap.min(total));
                info!("records to examine: {total}");
            }
            Err(e) => warn!("source cannot count its records: {e}"),
        }

        let pool = StagePool::start(
            self.config.workers,
            self.config.queue_capacity,
            Arc::clone(&self.stages),
        )?;
        let writer = match StoreWriter::start(WriterParts {
            canonicalizer: self.canonicalizer.clone(),
            ledger: Arc::clone(&self.ledger),
            compactor: self.compactor.clone(),
            compact_every: self.config.compact_every_batches,
        }) {
            Ok(writer) => writer,
            Err(e) => {
                pool.shutdown();
                return Err(e);
            }
        };

        let mut feed = Feed::default();
        let feed_result = self.feed(source, &pool, &writer, &mut feed);
        pool.shutdown();
        let (tally, writer_error) = writer.finish();

        let mut report = RunReport {
            records_seen: feed.records_seen,
            skipped: feed.skipped,
            source_error: feed.source_error,
            ..RunReport::default()
        };
        report.absorb(tally);

        // The writer's failure is the cause of any feed failure after it.
        let failure = writer_error.or(feed_result.err());
        if failure.is_none() {
            report.consolidated = self.consolidate()?;
        }

        match export_store(self.store().as_ref(), &self.config.output_path, self.config.export_format) {
            Ok(summary) => report.export = Some(summary),
            Err(e) => {
                error!("export to {} failed: {e}", self.config.output_path.display());
                if failure.is_none() {
                    return Err(e);
                }
            }
        }
        report.elapsed = started.elapsed();

        if let Some(err) = failure {
            error!("run stopped after {} records: {err}", report.processed);
            return Err(err);
        }
        self.ledger
            .set_metadata(META_LAST_RUN_FINISHED, &Utc::now().to_rfc3339())?;
        info!(
            "run complete: {} processed, {} skipped, {} errors in {:.1}s",
            report.processed,
            report.skipped,
            report.error_count(),
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    fn feed(
        &self,
        source: &dyn RecordSource,
        pool: &StagePool,
        writer: &StoreWriter,
        feed: &mut Feed,
    ) -> ColetorResult<()> {
        let mut next_batch = self.ledger.latest_batch_number()?.map_or(1, |n| n + 1);
        let batches = match source.stream_batches(self.config.batch_size) {
            Ok(batches) => batches,
            Err(e) => {
                warn!("source failed before the first batch: {e}");
                feed.source_error = Some(e.to_string());
                return Ok(());
            }
        };

        for batch in batches {
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("source failed after {} records, stopping: {e}", feed.records_seen);
                    feed.source_error = Some(e.to_string());
                    break;
                }
            };

            let mut capped = false;
            let mut fresh = Vec::with_capacity(batch.len());
            for record in batch {
                if self.config.max_records.is_some_and(|cap| feed.taken >= cap) {
                    capped = true;
                    break;
                }
                feed.records_seen += 1;
                if !feed.seen.insert(record.id.clone()) || self.ledger.is_processed(&record.id)? {
                    feed.skipped += 1;
                    continue;
                }
                feed.taken += 1;
                fresh.push(record);
            }

            if !fresh.is_empty() {
                let count = fresh.len();
                let prepared = pool.prepare_batch(fresh)?;
                writer.submit(next_batch, prepared)?;
                info!("batch {next_batch}: {count} records queued ({} seen)", feed.records_seen);
                next_batch += 1;
            }
            if capped {
                info!("record cap reached after {} records", feed.taken);
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Category;
    use crate::source::VecSource;
    use crate::storage::{InMemoryCanonicalStore, InMemoryProgressLedger};

    fn pipeline(dir: &tempfile::TempDir, config: PipelineConfig) -> Pipeline {
        let config = PipelineConfig {
            output_path: dir.path().join("report.csv"),
            ..config
        };
        Pipeline::new(
            config,
            Arc::new(InMemoryCanonicalStore::new()),
            Arc::new(InMemoryProgressLedger::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_prepare_splits_compound_strings() {
        let prepared = Stages::default().prepare(SourceRecord::new("r1", Some("Silva, J.; Santos, M.")));
        let Prepared::Fragments { fragments, dropped } = prepared.outcome else {
            panic!("expected fragments");
        };
        assert_eq!(dropped, 0);
        assert_eq!(fragments.len(), 2);
        assert!(fragments.iter().all(|f| f.entity_type == EntityType::Pessoa));
        assert_eq!(
            prepared.classification.map(|c| c.category),
            Some(Category::ConjuntoPessoas)
        );
    }

    #[test]
    fn test_prepare_empty_and_discard() {
        let stages = Stages::default();
        assert!(matches!(
            stages.prepare(SourceRecord::new("a", None)).outcome,
            Prepared::Empty
        ));
        assert!(matches!(
            stages.prepare(SourceRecord::new("b", Some("---"))).outcome,
            Prepared::Discarded
        ));
        // Undetermined literals classify with full confidence but leave no usable name.
        assert!(matches!(
            stages.prepare(SourceRecord::new("c", Some("?"))).outcome,
            Prepared::Fragments { ref fragments, dropped: 1 } if fragments.is_empty()
        ));
    }

    #[test]
    fn test_run_counts_and_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(
            &dir,
            PipelineConfig {
                batch_size: 2,
                workers: 2,
                ..PipelineConfig::default()
            },
        );
        let source = VecSource::from_collectors(["Forzza, R.C.", "R.C. Forzza", "---", "EMBRAPA", "Forzza, R."]);
        let report = p.run(&source).unwrap();

        assert_eq!(report.records_seen, 5);
        assert_eq!(report.processed, 5);
        assert_eq!(report.discarded, 1);
        assert_eq!(report.batches, 3);
        assert_eq!(report.classifier.classified, 5);
        assert_eq!(p.ledger().total_processed().unwrap(), 5);
        assert_eq!(p.ledger().latest_batch_number().unwrap(), Some(3));
        assert_eq!(p.store().count().unwrap(), 2);
        assert!(report.export.is_some());
        assert!(dir.path().join("report.csv").exists());
    }

    #[test]
    fn test_rerun_skips_processed_records() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&dir, PipelineConfig::default());
        let source = VecSource::from_collectors(["Silva, J.", "Santos, M."]);
        p.run(&source).unwrap();
        let again = p.run(&source).unwrap();
        assert_eq!(again.processed, 0);
        assert_eq!(again.skipped, 2);
        let entity = p.store().get_all().unwrap().into_iter().next().unwrap();
        assert_eq!(entity.total_occurrences(), 1);
    }

    #[test]
    fn test_max_records_cap() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(
            &dir,
            PipelineConfig {
                batch_size: 2,
                max_records: Some(3),
                ..PipelineConfig::default()
            },
        );
        let report = p
            .run(&VecSource::from_collectors(["A. Lima", "B. Rocha", "C. Souza", "D. Prado"]))
            .unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(p.ledger().total_processed().unwrap(), 3);
    }

    #[test]
    fn test_reset_clears_state() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&dir, PipelineConfig::default());
        p.run(&VecSource::from_collectors(["Silva, J."])).unwrap();
        p.reset().unwrap();
        assert_eq!(p.store().count().unwrap(), 0);
        assert_eq!(p.ledger().total_processed().unwrap(), 0);
    }

    #[test]
    fn test_report_rate_and_display() {
        let report = RunReport {
            processed: 100,
            elapsed: Duration::from_secs(4),
            ..RunReport::default()
        };
        assert!((report.records_per_sec() - 25.0).abs() < f64::EPSILON);
        assert!(report.to_string().contains("Processed: 100 records"));
        assert!(RunReport::default().records_per_sec().abs() < f64::EPSILON);
    }
}
