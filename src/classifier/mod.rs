//! Classification of raw collector strings.
//!
//! `classify` runs three steps:
//! 1. strip trailing specimen codes,
//! 2. evaluate the rule cascade ([`rules::CASCADE`]),
//! 3. when the verdict is weaker than the fallback threshold, consult the
//!    injected [`EntityRecognizer`].
//!
//! A result is either a discard (`NaoDeterminado` at confidence 0.0) or has a
//! confidence at or above the 0.70 floor; anything else is returned as
//! `BelowThreshold`. Classification holds no mutable state. Per-run counters
//! live in [`ClassifierStats`], which the caller folds results into.

mod heuristic;
mod ner;
pub mod rules;
mod sanitize;

pub use heuristic::HeuristicRecognizer;
pub use ner::{EntityRecognizer, NerEntity, NerLabel, RecognizerError};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::confidence::enforce_floor;
use crate::entity::EntityType;
use crate::error::{ColetorResult, ValidationError};

/// Default cutoff under which the recognizer is consulted.
pub const DEFAULT_NER_THRESHOLD: f64 = 0.85;

/// Semantic category of a collector string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// One person.
    Pessoa,
    /// Several people in one string; split by the atomizer.
    ConjuntoPessoas,
    /// A named group or team.
    GrupoPessoas,
    /// An institution or company.
    Empresa,
    /// Unknown collector, or noise when the confidence is 0.
    NaoDeterminado,
}

impl Category {
    /// All categories.
    pub const ALL: [Self; 5] = [
        Self::Pessoa,
        Self::ConjuntoPessoas,
        Self::GrupoPessoas,
        Self::Empresa,
        Self::NaoDeterminado,
    ];

    /// Returns the stable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pessoa => "Pessoa",
            Self::ConjuntoPessoas => "ConjuntoPessoas",
            Self::GrupoPessoas => "GrupoPessoas",
            Self::Empresa => "Empresa",
            Self::NaoDeterminado => "NaoDeterminado",
        }
    }

    /// Entity type persisted for this category. Fragments of a
    /// `ConjuntoPessoas` string are people.
    #[must_use]
    pub const fn entity_type(self) -> EntityType {
        match self {
            Self::Pessoa | Self::ConjuntoPessoas => EntityType::Pessoa,
            Self::GrupoPessoas => EntityType::GrupoPessoas,
            Self::Empresa => EntityType::Empresa,
            Self::NaoDeterminado => EntityType::NaoDeterminado,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::InvalidConfig {
                reason: format!("unknown category '{s}'"),
            })
    }
}

/// Outcome of classifying one raw string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Trimmed input.
    pub original_text: String,
    /// Input with trailing specimen codes removed.
    pub sanitized_text: String,
    /// Category.
    pub category: Category,
    /// Confidence in [0, 1]; 0.0 only for discards.
    pub confidence: f64,
    /// Tags of the rules that matched, in order.
    pub matched_rules: Vec<String>,
    /// True iff the category is `ConjuntoPessoas`.
    pub should_atomize: bool,
    /// True when the recognizer was consulted.
    pub ner_invoked: bool,
}

impl ClassificationResult {
    /// True when the string is noise and must not be canonicalized.
    #[must_use]
    pub fn is_discard(&self) -> bool {
        self.category == Category::NaoDeterminado && self.confidence <= 0.0
    }
}

/// Counters for one run, folded from classification results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierStats {
    /// Strings classified.
    pub classified: u64,
    /// Recognizer consultations.
    pub ner_invocations: u64,
    /// Results per category.
    pub by_category: BTreeMap<Category, u64>,
}

impl ClassifierStats {
    /// Folds one result into the counters.
    pub fn record(&mut self, result: &ClassificationResult) {
        self.classified += 1;
        if result.ner_invoked {
            self.ner_invocations += 1;
        }
        *self.by_category.entry(result.category).or_default() += 1;
    }

    /// Adds another run's counters.
    pub fn merge(&mut self, other: &Self) {
        self.classified += other.classified;
        self.ner_invocations += other.ner_invocations;
        for (category, count) in &other.by_category {
            *self.by_category.entry(*category).or_default() += count;
        }
    }

    /// Count for `category`.
    #[must_use]
    pub fn count(&self, category: Category) -> u64 {
        self.by_category.get(&category).copied().unwrap_or(0)
    }
}

/// Rule-cascade classifier with an optional recognizer fallback.
#[derive(Clone)]
pub struct Classifier {
    ner_threshold: f64,
    recognizer: Option<Arc<dyn EntityRecognizer>>,
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("ner_threshold", &self.ner_threshold)
            .field("recognizer", &self.recognizer.is_some())
            .finish()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// Creates a classifier without a fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ner_threshold: DEFAULT_NER_THRESHOLD,
            recognizer: None,
        }
    }

    /// Creates a classifier consulting `recognizer` below `ner_threshold`.
    #[must_use]
    pub fn with_recognizer(recognizer: Arc<dyn EntityRecognizer>, ner_threshold: f64) -> Self {
        Self {
            ner_threshold,
            recognizer: Some(recognizer),
        }
    }

    /// True when a recognizer is installed.
    #[must_use]
    pub fn has_recognizer(&self) -> bool {
        self.recognizer.is_some()
    }

    /// Classifies `raw`.
    ///
    /// # Errors
    /// - `EmptyInput` if `raw` is blank.
    /// - `BelowThreshold` if the final confidence of a non-discard is under 0.70.
    pub fn classify(&self, raw: &str) -> ColetorResult<ClassificationResult> {
        let original = raw.trim();
        if original.is_empty() {
            return Err(ValidationError::EmptyInput { stage: "classifier" }.into());
        }

        let sanitized = sanitize::strip_specimen_codes(original);
        let signals = rules::Signals::new(&sanitized);
        let verdict = rules::evaluate(&signals);

        let mut category = verdict.category;
        let mut confidence = verdict.confidence;
        let mut matched_rules: Vec<String> = verdict.tags.iter().map(|t| (*t).to_string()).collect();
        let mut ner_invoked = false;

        let discard = category == Category::NaoDeterminado && confidence <= 0.0;
        if let Some(recognizer) = &self.recognizer {
            if !discard && confidence < self.ner_threshold {
                ner_invoked = true;
                match recognizer.classify_entities(&sanitized) {
                    Ok(entities) => {
                        let adjusted = ner::adjust(category, confidence, &entities);
                        debug!(
                            "NER fallback on '{sanitized}': {category} {confidence:.2} -> {} {:.2} ({} entities)",
                            adjusted.category,
                            adjusted.confidence,
                            entities.len()
                        );
                        category = adjusted.category;
                        confidence = adjusted.confidence;
                        matched_rules.push(adjusted.tag.to_string());
                    }
                    Err(e) => warn!("{e}; keeping rule verdict for '{sanitized}'"),
                }
            }
        }

        let result = ClassificationResult {
            original_text: original.to_string(),
            sanitized_text: sanitized,
            category,
            confidence,
            matched_rules,
            should_atomize: category == Category::ConjuntoPessoas,
            ner_invoked,
        };
        if result.is_discard() {
            return Ok(result);
        }
        let confidence = enforce_floor("classification", result.confidence)?;
        Ok(ClassificationResult { confidence, ..result })
    }
}
