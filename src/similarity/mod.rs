//! Pairwise string similarity.
//!
//! The combined score is a weighted sum of three signals:
//! - normalized Levenshtein similarity, `1 - distance / max(len_a, len_b)`
//! - Jaro-Winkler similarity
//! - Metaphone code equality (1.0 or 0.0)
//!
//! Equal strings score 1.0 and an empty side scores 0.0. Lengths are counted
//! in `char`s so accented names are not penalized by their UTF-8 width.

mod phonetic;

pub use phonetic::{metaphone, phonetic_match};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Weights for the three similarity signals. They must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    /// Weight of normalized edit-distance similarity.
    pub levenshtein: f64,
    /// Weight of Jaro-Winkler similarity.
    pub jaro_winkler: f64,
    /// Weight of phonetic-code equality.
    pub phonetic: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            levenshtein: 0.4,
            jaro_winkler: 0.4,
            phonetic: 0.2,
        }
    }
}

impl SimilarityWeights {
    const SUM_TOLERANCE: f64 = 0.001;

    /// Validates that weights are non-negative and sum to 1.0.
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the offending weights.
    pub fn validate(self) -> Result<Self, ValidationError> {
        let parts = [self.levenshtein, self.jaro_winkler, self.phonetic];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("similarity weights must be non-negative: {self:?}"),
            });
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(ValidationError::InvalidConfig {
                reason: format!("similarity weights must sum to 1.0 (got {sum:.3})"),
            });
        }
        Ok(self)
    }
}

/// Per-signal scores behind a combined similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityBreakdown {
    /// Normalized edit-distance similarity.
    pub levenshtein: f64,
    /// Jaro-Winkler similarity.
    pub jaro_winkler: f64,
    /// Whether the phonetic codes matched.
    pub phonetic: bool,
    /// Weighted combination.
    pub combined: f64,
}

/// Stateless scorer combining the three signals with fixed weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityScorer {
    weights: SimilarityWeights,
}

impl SimilarityScorer {
    /// Creates a scorer with the given weights.
    #[must_use]
    pub const fn new(weights: SimilarityWeights) -> Self {
        Self { weights }
    }

    /// Returns the configured weights.
    #[must_use]
    pub const fn weights(&self) -> SimilarityWeights {
        self.weights
    }

    /// Scores `a` against `b` in [0, 1].
    #[must_use]
    pub fn score(&self, a: &str, b: &str) -> f64 {
        self.breakdown(a, b).combined
    }

    /// Scores `a` against `b`, keeping the individual signals.
    #[must_use]
    pub fn breakdown(&self, a: &str, b: &str) -> SimilarityBreakdown {
        if a.is_empty() || b.is_empty() {
            return SimilarityBreakdown {
                levenshtein: 0.0,
                jaro_winkler: 0.0,
                phonetic: false,
                combined: 0.0,
            };
        }
        if a == b {
            return SimilarityBreakdown {
                levenshtein: 1.0,
                jaro_winkler: 1.0,
                phonetic: true,
                combined: 1.0,
            };
        }

        let levenshtein = levenshtein_similarity(a, b);
        let jaro_winkler = strsim::jaro_winkler(a, b);
        let phonetic = phonetic_match(a, b);

        let w = self.weights;
        let combined = levenshtein * w.levenshtein
            + jaro_winkler * w.jaro_winkler
            + if phonetic { w.phonetic } else { 0.0 };

        SimilarityBreakdown {
            levenshtein,
            jaro_winkler,
            phonetic,
            combined: combined.clamp(0.0, 1.0),
        }
    }
}

/// Normalized Levenshtein similarity, 0.0 when either side is empty.
#[must_use]
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    #[allow(clippy::cast_precision_loss)]
    let sim = 1.0 - strsim::levenshtein(a, b) as f64 / max_len as f64;
    sim
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings_score_one() {
        let s = SimilarityScorer::default();
        assert!((s.score("SILVA, J.", "SILVA, J.") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_scores_zero() {
        let s = SimilarityScorer::default();
        assert!(s.score("", "SILVA").abs() < f64::EPSILON);
        assert!(s.score("SILVA", "").abs() < f64::EPSILON);
        assert!(s.score("", "").abs() < f64::EPSILON);
    }

    #[test]
    fn test_levenshtein_similarity() {
        assert!(levenshtein_similarity("Forzza", "Forza") > 0.80);
        assert!((levenshtein_similarity("Silva", "Silva") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_jaro_winkler_prefers_shared_prefix() {
        assert!(strsim::jaro_winkler("Silva, J.", "Silva, J.C.") > 0.85);
    }

    #[test]
    fn test_truncated_initials_clear_grouping_threshold() {
        let s = SimilarityScorer::default();
        let b = s.breakdown("FORZZA, R.", "FORZZA, R.C.");
        assert!(!b.phonetic);
        assert!(b.combined >= 0.70, "combined = {}", b.combined);
        assert!(b.combined < 0.80);
    }

    #[test]
    fn test_unrelated_names_stay_low() {
        let s = SimilarityScorer::default();
        assert!(s.score("SILVA, J.", "COSTA, M.") < 0.70);
    }

    #[test]
    fn test_custom_weights() {
        let s = SimilarityScorer::new(SimilarityWeights {
            levenshtein: 0.0,
            jaro_winkler: 0.0,
            phonetic: 1.0,
        });
        assert!((s.score("Silva", "Sylva") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weights_validation() {
        assert!(SimilarityWeights::default().validate().is_ok());
        let alt = SimilarityWeights {
            levenshtein: 0.3,
            jaro_winkler: 0.4,
            phonetic: 0.3,
        };
        assert!(alt.validate().is_ok());
        let bad = SimilarityWeights {
            levenshtein: 0.5,
            jaro_winkler: 0.5,
            phonetic: 0.5,
        };
        assert!(bad.validate().is_err());
        let negative = SimilarityWeights {
            levenshtein: 1.2,
            jaro_winkler: -0.2,
            phonetic: 0.0,
        };
        assert!(negative.validate().is_err());
    }
}
