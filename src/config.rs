//! Pipeline configuration.
//!
//! Defaults, overridden by `COLETOR_*` environment variables, overridden by
//! CLI flags in the binary.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;

use crate::classifier::DEFAULT_NER_THRESHOLD;
use crate::confidence::CONFIDENCE_FLOOR;
use crate::error::{ColetorResult, ValidationError};
use crate::export::ExportFormat;
use crate::similarity::SimilarityWeights;

/// Settings for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Records per source batch and per ledger commit.
    pub batch_size: usize,
    /// Stage workers (classify, atomize, normalize).
    pub workers: usize,
    /// Bound of the worker and writer queues.
    pub queue_capacity: usize,
    /// Minimum fuzzy score to attach a name to an entity.
    pub confidence_threshold: f64,
    /// Classification confidence under which the recognizer is consulted.
    pub ner_threshold: f64,
    /// Similarity signal weights.
    pub similarity_weights: SimilarityWeights,
    /// Persistent store directory.
    pub data_dir: PathBuf,
    /// Report written at the end of a run.
    pub output_path: PathBuf,
    /// Report delimiter.
    pub export_format: ExportFormat,
    /// Compact the store every this many batches; 0 disables.
    pub compact_every_batches: u64,
    /// Stop after this many records.
    pub max_records: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            workers: thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            queue_capacity: 1024,
            confidence_threshold: CONFIDENCE_FLOOR,
            ner_threshold: DEFAULT_NER_THRESHOLD,
            similarity_weights: SimilarityWeights::default(),
            data_dir: PathBuf::from("./data/coletor.db"),
            output_path: PathBuf::from("./output/canonical_report.csv"),
            export_format: ExportFormat::Csv,
            compact_every_batches: 10,
            max_records: None,
        }
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> ColetorResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| {
        ValidationError::InvalidConfig {
            reason: format!("{key}={raw}: {e}"),
        }
        .into()
    })
}

impl PipelineConfig {
    /// Defaults overridden by `COLETOR_*` variables from the process environment.
    ///
    /// # Errors
    /// `InvalidConfig` for unparseable values or a config failing [`Self::validate`].
    pub fn from_env() -> ColetorResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by the variables `lookup` returns.
    ///
    /// # Errors
    /// As [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ColetorResult<Self> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("COLETOR_BATCH_SIZE") {
            config.batch_size = parse("COLETOR_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("COLETOR_WORKERS") {
            config.workers = parse("COLETOR_WORKERS", &v)?;
        }
        if let Some(v) = get("COLETOR_QUEUE_CAPACITY") {
            config.queue_capacity = parse("COLETOR_QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = get("COLETOR_CONFIDENCE_THRESHOLD") {
            config.confidence_threshold = parse("COLETOR_CONFIDENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("COLETOR_NER_THRESHOLD") {
            config.ner_threshold = parse("COLETOR_NER_THRESHOLD", &v)?;
        }
        if let Some(v) = get("COLETOR_WEIGHT_LEVENSHTEIN") {
            config.similarity_weights.levenshtein = parse("COLETOR_WEIGHT_LEVENSHTEIN", &v)?;
        }
        if let Some(v) = get("COLETOR_WEIGHT_JARO_WINKLER") {
            config.similarity_weights.jaro_winkler = parse("COLETOR_WEIGHT_JARO_WINKLER", &v)?;
        }
        if let Some(v) = get("COLETOR_WEIGHT_PHONETIC") {
            config.similarity_weights.phonetic = parse("COLETOR_WEIGHT_PHONETIC", &v)?;
        }
        if let Some(v) = get("COLETOR_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("COLETOR_OUTPUT") {
            config.output_path = PathBuf::from(v);
        }
        if let Some(v) = get("COLETOR_EXPORT_FORMAT") {
            config.export_format = v.parse()?;
        }
        if let Some(v) = get("COLETOR_COMPACT_EVERY") {
            config.compact_every_batches = parse("COLETOR_COMPACT_EVERY", &v)?;
        }
        if let Some(v) = get("COLETOR_MAX_RECORDS") {
            config.max_records = Some(parse("COLETOR_MAX_RECORDS", &v)?);
        }

        config.validate()
    }

    /// Checks ranges and weights.
    ///
    /// # Errors
    /// `InvalidConfig` naming the first offending field.
    pub fn validate(self) -> ColetorResult<Self> {
        let invalid = |reason: String| Err(ValidationError::InvalidConfig { reason }.into());

        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1".to_string());
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1".to_string());
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1".to_string());
        }
        if !(CONFIDENCE_FLOOR..=1.0).contains(&self.confidence_threshold) {
            return invalid(format!(
                "confidence_threshold must be in [{CONFIDENCE_FLOOR}, 1.0] (got {})",
                self.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.ner_threshold) {
            return invalid(format!("ner_threshold must be in [0.0, 1.0] (got {})", self.ner_threshold));
        }
        self.similarity_weights.validate()?;
        if self.max_records == Some(0) {
            return invalid("max_records must be at least 1 when set".to_string());
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.batch_size, 10_000);
        assert!(config.workers >= 1);
        assert_eq!(config.export_format, ExportFormat::Csv);
        assert_eq!(config.max_records, None);
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("COLETOR_BATCH_SIZE", "500"),
            ("COLETOR_WORKERS", "3"),
            ("COLETOR_EXPORT_FORMAT", "tsv"),
            ("COLETOR_MAX_RECORDS", "1000"),
            ("COLETOR_WEIGHT_LEVENSHTEIN", "0.3"),
            ("COLETOR_WEIGHT_PHONETIC", "0.3"),
            ("COLETOR_DATA_DIR", "/tmp/coletor"),
        ]))
        .unwrap();
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.workers, 3);
        assert_eq!(config.export_format, ExportFormat::Tsv);
        assert_eq!(config.max_records, Some(1000));
        assert!((config.similarity_weights.phonetic - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/coletor"));
    }

    #[test]
    fn test_unparseable_value_named() {
        let err = PipelineConfig::from_lookup(lookup(&[("COLETOR_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("COLETOR_BATCH_SIZE"));
    }

    #[test]
    fn test_validation() {
        let zero_batch = PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        };
        assert!(zero_batch.validate().is_err());

        let lax = PipelineConfig {
            confidence_threshold: 0.5,
            ..PipelineConfig::default()
        };
        assert!(lax.validate().is_err());

        let skewed = PipelineConfig::from_lookup(lookup(&[("COLETOR_WEIGHT_PHONETIC", "0.5")]));
        assert!(skewed.is_err());
    }
}
