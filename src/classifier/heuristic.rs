//! Rule-based entity recognizer.
//!
//! Splits the text on list separators and labels each segment from its
//! shape: capitalized words and dotted initials make a person, an
//! institution word makes an organization. No model is loaded, so it can
//! stand in for a learned recognizer and runs in microseconds.

use std::sync::OnceLock;

use regex::Regex;

use super::ner::{EntityRecognizer, NerEntity, NerLabel, RecognizerError};
use crate::text::{cached, fold_lower};

static SEGMENT_SPLIT: OnceLock<Regex> = OnceLock::new();

const ORG_WORDS: &[&str] = &[
    "herbario",
    "instituto",
    "universidade",
    "faculdade",
    "museu",
    "fundacao",
    "embrapa",
    "empresa",
    "ltda",
    "jardim",
    "departamento",
    "secretaria",
    "prefeitura",
    "associacao",
];

const PARTICLES: &[&str] = &["de", "da", "do", "dos", "das", "e", "del", "van", "von"];

/// Shape-based recognizer for collector strings.
#[derive(Debug, Clone)]
pub struct HeuristicRecognizer {
    threshold: f64,
}

impl Default for HeuristicRecognizer {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl HeuristicRecognizer {
    /// Creates a recognizer with the default threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recognizer dropping spans scored below `threshold`.
    #[must_use]
    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }

    fn label_segment(segment: &str) -> Option<NerEntity> {
        let folded = fold_lower(segment);
        let words: Vec<&str> = folded.split(|c: char| !c.is_alphabetic()).filter(|w| !w.is_empty()).collect();
        if words.iter().any(|w| ORG_WORDS.contains(w)) {
            return Some(NerEntity::new(segment, NerLabel::Org, 0.90));
        }
        if segment.chars().any(|c| c.is_ascii_digit()) {
            return None;
        }

        let mut full = 0usize;
        let mut initials = 0usize;
        for token in segment.split(|c: char| c.is_whitespace() || c == ',') {
            let token = token.trim_matches(|c: char| c == '.' || c == '\'' || c == '-');
            if token.is_empty() {
                continue;
            }
            if PARTICLES.iter().any(|p| p.eq_ignore_ascii_case(token)) {
                continue;
            }
            if is_initials(token) {
                initials += 1;
                continue;
            }
            if !token.chars().next().is_some_and(char::is_uppercase) {
                return None;
            }
            full += 1;
        }

        let score = match (full, initials) {
            (0, _) => return None,
            (1, 0) => 0.60,
            (1, _) => 0.80,
            _ => 0.92,
        };
        Some(NerEntity::new(segment, NerLabel::Person, score))
    }
}

/// `"R"`, `"R.C"` and `"RC"` count as initials; longer all-caps words do not.
fn is_initials(token: &str) -> bool {
    let letters: Vec<char> = token.chars().filter(|c| *c != '.').collect();
    !letters.is_empty()
        && letters.iter().all(|c| c.is_uppercase())
        && (letters.len() == 1 || (token.contains('.') && letters.len() <= 4))
}

impl EntityRecognizer for HeuristicRecognizer {
    fn classify_entities(&self, text: &str) -> Result<Vec<NerEntity>, RecognizerError> {
        let splitter = cached(&SEGMENT_SPLIT, r"(?i)[;&|:]|\s+(?:e|and)\s+|\bet\.?\s*al\b\.?");
        Ok(splitter
            .split(text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(Self::label_segment)
            .filter(|e| e.score >= self.threshold)
            .collect())
    }
}
