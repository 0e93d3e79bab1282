//! Named-entity recognition fallback seam.
//!
//! A recognizer is injected into the classifier at construction. The
//! classifier owns the policy turning its output into a new category and
//! confidence; the recognizer only reports entities.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Category;

/// Recognizer failure. The classifier logs it and keeps the rule verdict.
#[derive(Debug, Error)]
#[error("entity recognizer failed: {0}")]
pub struct RecognizerError(pub String);

/// Label attached to a recognized span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NerLabel {
    /// A person.
    Person,
    /// An organization or institution.
    Org,
    /// Anything else (location, date, ...).
    Other(String),
}

impl NerLabel {
    /// Maps a model tag (`PER`, `B-PER`, `PESSOA`, `ORGANIZACAO`, ...) to a label.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        let upper = tag.trim().to_uppercase();
        let bare = upper
            .strip_prefix("B-")
            .or_else(|| upper.strip_prefix("I-"))
            .unwrap_or(&upper);
        match bare {
            "PER" | "PERSON" | "PESSOA" => Self::Person,
            "ORG" | "ORGANIZATION" | "ORGANIZACAO" | "ORGANIZAÇÃO" => Self::Org,
            _ => Self::Other(bare.to_string()),
        }
    }
}

/// One recognized span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NerEntity {
    /// Span text.
    pub text: String,
    /// Label.
    pub label: NerLabel,
    /// Model score in [0, 1].
    pub score: f64,
}

impl NerEntity {
    /// Creates an entity.
    #[must_use]
    pub fn new(text: impl Into<String>, label: NerLabel, score: f64) -> Self {
        Self {
            text: text.into(),
            label,
            score,
        }
    }
}

/// Pluggable recognizer.
///
/// Implementations must be stateless from the caller's point of view; model
/// loading and caching are their own concern.
pub trait EntityRecognizer: Send + Sync {
    /// Recognizes entities in `text`.
    ///
    /// # Errors
    /// Returns `RecognizerError` if inference fails.
    fn classify_entities(&self, text: &str) -> Result<Vec<NerEntity>, RecognizerError>;
}

const EMPTY_PENALTY: f64 = 0.05;
const EMPTY_FLOOR: f64 = 0.65;
const CAP: f64 = 0.95;

/// Category and confidence after the fallback.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Adjustment {
    pub category: Category,
    pub confidence: f64,
    pub tag: &'static str,
}

/// Applies the fallback policy to a rule verdict.
pub(crate) fn adjust(category: Category, confidence: f64, entities: &[NerEntity]) -> Adjustment {
    if entities.is_empty() {
        return Adjustment {
            category,
            confidence: (confidence - EMPTY_PENALTY).max(EMPTY_FLOOR),
            tag: "ner_no_entities",
        };
    }

    let persons: Vec<&NerEntity> = entities.iter().filter(|e| e.label == NerLabel::Person).collect();
    let has_org = entities.iter().any(|e| e.label == NerLabel::Org);

    if persons.is_empty() && !has_org {
        return Adjustment {
            category: Category::NaoDeterminado,
            confidence: 0.0,
            tag: "ner_discard",
        };
    }

    let mut boosted = confidence;
    if let Some(best) = persons.iter().map(|e| e.score).reduce(f64::max) {
        boosted += if best > 0.85 {
            0.15
        } else if best > 0.70 {
            0.10
        } else {
            0.05
        };
    }
    if has_org {
        boosted += 0.05;
    }
    let boosted = boosted.min(CAP);

    let (category, tag) = match persons.len() {
        0 => (Category::Empresa, "ner_org"),
        1 => (category, "ner_person"),
        _ => (Category::ConjuntoPessoas, "ner_multiple_persons"),
    };
    Adjustment {
        category,
        confidence: boosted,
        tag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(score: f64) -> NerEntity {
        NerEntity::new("x", NerLabel::Person, score)
    }

    #[test]
    fn test_label_mapping() {
        assert_eq!(NerLabel::from_tag("B-PER"), NerLabel::Person);
        assert_eq!(NerLabel::from_tag("pessoa"), NerLabel::Person);
        assert_eq!(NerLabel::from_tag("ORGANIZACAO"), NerLabel::Org);
        assert_eq!(NerLabel::from_tag("LOC"), NerLabel::Other("LOC".to_string()));
    }

    #[test]
    fn test_no_entities_penalized_to_floor() {
        let a = adjust(Category::Pessoa, 0.60, &[]);
        assert!((a.confidence - 0.65).abs() < 1e-9);
        let a = adjust(Category::Pessoa, 0.80, &[]);
        assert!((a.confidence - 0.75).abs() < 1e-9);
        assert_eq!(a.category, Category::Pessoa);
    }

    #[test]
    fn test_person_boosts() {
        assert!((adjust(Category::Pessoa, 0.60, &[person(0.92)]).confidence - 0.75).abs() < 1e-9);
        assert!((adjust(Category::Pessoa, 0.60, &[person(0.80)]).confidence - 0.70).abs() < 1e-9);
        assert!((adjust(Category::Pessoa, 0.60, &[person(0.50)]).confidence - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_boost_is_capped() {
        let a = adjust(
            Category::Pessoa,
            0.84,
            &[person(0.99), NerEntity::new("USP", NerLabel::Org, 0.9)],
        );
        assert!((a.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_org_only_becomes_empresa() {
        let a = adjust(Category::Pessoa, 0.60, &[NerEntity::new("Herbário", NerLabel::Org, 0.9)]);
        assert_eq!(a.category, Category::Empresa);
        assert!((a.confidence - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_two_persons_escalate() {
        let a = adjust(Category::Pessoa, 0.60, &[person(0.9), person(0.9)]);
        assert_eq!(a.category, Category::ConjuntoPessoas);
    }

    #[test]
    fn test_other_labels_discard() {
        let a = adjust(
            Category::Pessoa,
            0.60,
            &[NerEntity::new("Rio", NerLabel::Other("LOC".into()), 0.9)],
        );
        assert_eq!(a.category, Category::NaoDeterminado);
        assert!(a.confidence.abs() < f64::EPSILON);
    }
}
