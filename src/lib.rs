//! # coletor - entity resolution for specimen collector strings
//!
//! Herbarium and museum records name their collectors in free text:
//! `"FORZZA, R.C."`, `"R.C. Forzza"`, `"Forzza, R.; Silva, J. et al."`,
//! `"EMBRAPA"`, `"?"`. coletor turns that text into a deduplicated set of
//! canonical entities, each with every spelling it was seen under.
//!
//! ## Stages
//!
//! - **Classifier**: person, set of people, group, company or undetermined,
//!   with a confidence and an optional entity-recognizer fallback
//! - **Atomizer**: splits a set of people into individual names
//! - **Normalizer**: canonical spacing, punctuation and case for matching
//! - **Canonicalizer**: attaches a name to its entity, or creates one
//!
//! The first three are pure and run on a worker pool. Canonicalization and
//! the progress ledger are driven by one writer, so a run of millions of
//! records can be interrupted and resumed at any point.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use coletor::{Canonicalizer, Classifier, EntityType, Normalizer, SimilarityScorer};
//! use coletor::storage::InMemoryCanonicalStore;
//!
//! # fn main() -> coletor::ColetorResult<()> {
//! let classifier = Classifier::new();
//! let canonicalizer = Canonicalizer::new(Arc::new(InMemoryCanonicalStore::new()), SimilarityScorer::default());
//!
//! for raw in ["FORZZA, R.C.", "R.C. Forzza"] {
//!     let class = classifier.classify(raw)?;
//!     let name = Normalizer::new().normalize(&class.sanitized_text);
//!     canonicalizer.canonicalize(&name.normalized, EntityType::Pessoa, class.confidence)?;
//! }
//! assert_eq!(canonicalizer.store().count()?, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod atomizer;
pub mod canonicalizer;
pub mod classifier;
pub mod confidence;
pub mod config;
pub mod entity;
pub mod error;
pub mod export;
pub mod normalizer;
pub mod pipeline;
pub mod similarity;
pub mod source;
pub mod storage;

mod text;

pub use atomizer::{AtomizedFragment, Atomizer, SeparatorKind};
pub use canonicalizer::{CanonicalizationOutcome, Canonicalizer, NameFormat};
pub use classifier::{
    Category, ClassificationResult, Classifier, ClassifierStats, EntityRecognizer, HeuristicRecognizer, NerEntity,
    NerLabel,
};
pub use config::PipelineConfig;
pub use entity::{CanonicalEntity, EntityId, EntityType, Variation};
pub use error::{ColetorError, ColetorResult, SourceError, ValidationError};
pub use export::ExportFormat;
pub use normalizer::{NormalizationResult, Normalizer};
pub use pipeline::{Pipeline, RunReport};
pub use similarity::{SimilarityScorer, SimilarityWeights};
pub use source::{JsonLinesSource, RecordSource, SourceRecord, VecSource};
pub use storage::{CanonicalStore, ProgressLedger, StorageError};
