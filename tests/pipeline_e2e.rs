//! Pipeline runs end to end: recognizer fallback, source failures, resume and
//! durable stores.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use coletor::classifier::{NerEntity, NerLabel, RecognizerError};
use coletor::error::SourceError;
use coletor::source::RecordBatches;
use coletor::storage::{InMemoryCanonicalStore, InMemoryProgressLedger};
use coletor::{
    CanonicalStore, EntityRecognizer, EntityType, Pipeline, PipelineConfig, ProgressLedger, RecordSource,
    SourceRecord, VecSource,
};
use tempfile::{tempdir, TempDir};

/// Recognizer answering from a fixed table and counting its calls.
#[derive(Default)]
struct StubRecognizer {
    calls: AtomicUsize,
}

impl EntityRecognizer for StubRecognizer {
    fn classify_entities(&self, text: &str) -> Result<Vec<NerEntity>, RecognizerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(match text {
            "Alisson Nogueira Braz" => vec![NerEntity::new(text, NerLabel::Person, 0.97)],
            "Rio Negro Amazonas" => vec![NerEntity::new(text, NerLabel::Other("LOC".to_string()), 0.9)],
            _ => Vec::new(),
        })
    }
}

/// Yields its records in one batch, then fails.
struct FlakySource {
    records: Vec<SourceRecord>,
}

impl RecordSource for FlakySource {
    fn stream_batches(&self, _batch_size: usize) -> Result<RecordBatches<'_>, SourceError> {
        let batches = vec![
            Ok(self.records.clone()),
            Err(SourceError::Failed {
                message: "connection reset".to_string(),
            }),
            Ok(vec![SourceRecord::new("never", Some("Lima, A."))]),
        ];
        Ok(Box::new(batches.into_iter()))
    }

    fn total_count(&self) -> Result<u64, SourceError> {
        Err(SourceError::Failed {
            message: "count unsupported".to_string(),
        })
    }
}

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        batch_size: 3,
        workers: 2,
        output_path: dir.path().join("out").join("canonical_report.csv"),
        ..PipelineConfig::default()
    }
}

fn in_memory(config: PipelineConfig) -> Pipeline {
    Pipeline::new(
        config,
        Arc::new(InMemoryCanonicalStore::new()),
        Arc::new(InMemoryProgressLedger::new()),
    )
    .unwrap()
}

#[test]
fn test_recognizer_rescues_low_confidence_names() {
    let dir = tempdir().unwrap();
    let collectors = ["Alisson Nogueira Braz", "Rio Negro Amazonas", "Forzza, R.C."];

    let plain = in_memory(config(&dir)).run(&VecSource::from_collectors(collectors)).unwrap();
    assert_eq!(plain.errors.get("below_threshold"), Some(&2));
    assert_eq!(plain.classifier.ner_invocations, 0);

    let stub = Arc::new(StubRecognizer::default());
    let pipeline = in_memory(config(&dir)).with_recognizer(stub.clone());
    let report = pipeline.run(&VecSource::from_collectors(collectors)).unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.discarded, 1);
    assert_eq!(report.error_count(), 0);
    // "Forzza, R.C." classifies above the NER threshold.
    assert_eq!(report.classifier.ner_invocations, 2);
    assert_eq!(stub.calls.load(Ordering::SeqCst), 2);

    let names: Vec<String> = pipeline
        .store()
        .get_all_by_type(EntityType::Pessoa)
        .unwrap()
        .into_iter()
        .map(|e| e.canonical_name)
        .collect();
    assert_eq!(names, ["Braz, A.N.", "Forzza, R.C."]);
}

#[test]
fn test_source_failure_still_exports() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir);
    let report_path = cfg.output_path.clone();
    let pipeline = in_memory(cfg);
    let source = FlakySource {
        records: vec![
            SourceRecord::new("a", Some("Forzza, R.C.")),
            SourceRecord::new("b", Some("R.C. Forzza")),
            SourceRecord::new("c", None),
        ],
    };

    let report = pipeline.run(&source).unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.empty, 1);
    assert!(report.source_error.as_deref().unwrap().contains("connection reset"));
    assert!(!pipeline.ledger().is_processed("never").unwrap());

    let text = fs::read_to_string(report_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("\"Forzza, R.C.\",Pessoa,"));
}

#[test]
fn test_interrupted_run_resumes() {
    let dir = tempdir().unwrap();
    let store = Arc::new(InMemoryCanonicalStore::new());
    let ledger = Arc::new(InMemoryProgressLedger::new());
    let source = VecSource::from_collectors([
        "Silva, J.",
        "Silva, J.",
        "Santos, M.",
        "EMBRAPA",
        "Forzza, R.",
        "Forzza, R.C.",
    ]);

    let first = Pipeline::new(
        PipelineConfig {
            max_records: Some(2),
            ..config(&dir)
        },
        store.clone(),
        ledger.clone(),
    )
    .unwrap()
    .run(&source)
    .unwrap();
    assert_eq!(first.processed, 2);

    let second = Pipeline::new(config(&dir), store.clone(), ledger.clone())
        .unwrap()
        .run(&source)
        .unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(second.processed, 4);
    assert_eq!(ledger.total_processed().unwrap(), 6);
    assert!(ledger.latest_batch_number().unwrap().unwrap() > 1);

    let silva = store.find_exact("Silva, J.", EntityType::Pessoa).unwrap();
    assert_eq!(silva.len(), 1);
    assert_eq!(silva[0].total_occurrences(), 2);
    assert_eq!(store.count().unwrap(), 4);
}

#[test]
fn test_invalid_config_rejected() {
    let dir = tempdir().unwrap();
    let result = Pipeline::new(
        PipelineConfig {
            batch_size: 0,
            ..config(&dir)
        },
        Arc::new(InMemoryCanonicalStore::new()),
        Arc::new(InMemoryProgressLedger::new()),
    );
    assert!(result.is_err());
}

#[cfg(feature = "persistent")]
mod durable {
    use super::*;
    use coletor::storage::{open_database, Compactable};

    #[test]
    fn test_persistent_run_compacts_and_survives_reopen() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("coletor.db");
        let source = VecSource::from_collectors([
            "Forzza, R.C.",
            "R.C. Forzza",
            "Silva, J.; Santos, M.",
            "Equipe PPBio",
            "Vilela, M.",
            "EMBRAPA",
            "Forzza, R.",
        ]);

        let entities = {
            let stores = Arc::new(open_database(&db, None).unwrap());
            let pipeline = Pipeline::new(
                PipelineConfig {
                    batch_size: 2,
                    compact_every_batches: 2,
                    ..config(&dir)
                },
                stores.entities.clone(),
                stores.ledger.clone(),
            )
            .unwrap()
            .with_compactor(stores.clone() as Arc<dyn Compactable>);

            let report = pipeline.run(&source).unwrap();
            assert_eq!(report.processed, 7);
            assert_eq!(report.batches, 4);
            assert_eq!(report.compactions, 2);
            assert!(stores.segment_count().unwrap() >= 1);
            stores.entities.get_all().unwrap()
        };

        let stores = Arc::new(open_database(&db, None).unwrap());
        assert_eq!(stores.entities.get_all().unwrap(), entities);
        assert_eq!(stores.ledger.total_processed().unwrap(), 7);

        let again = Pipeline::new(config(&dir), stores.entities.clone(), stores.ledger.clone())
            .unwrap()
            .run(&source)
            .unwrap();
        assert_eq!(again.processed, 0);
        assert_eq!(again.skipped, 7);
        assert_eq!(stores.entities.get_all().unwrap(), entities);
    }
}
