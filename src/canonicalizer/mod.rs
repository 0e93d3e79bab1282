//! Grouping of normalized names into canonical entities.
//!
//! The canonicalizer finds the stored entity a normalized name belongs to,
//! or creates one. Lookup is exact first, then fuzzy over every entity of the
//! same type. A person name is probed both as written and in its display
//! form, so `R.C. FORZZA` and `FORZZA, R.C.` land on the same entity.
//!
//! The canonicalizer mutates the store and must be driven by a single writer.

pub mod format;

use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::confidence::{enforce_floor, validate_unit, CLAMP_TOLERANCE, CONFIDENCE_FLOOR};
use crate::entity::{CanonicalEntity, EntityType};
use crate::error::{ColetorResult, ValidationError};
use crate::similarity::SimilarityScorer;
use crate::storage::CanonicalStore;
use crate::text::token_count;

pub use format::{display_name, format_person, NameFormat};

/// Result of canonicalizing one name.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalizationOutcome {
    /// The stored entity after the update.
    pub entity: CanonicalEntity,
    /// True when the entity was created by this call.
    pub is_new: bool,
    /// Score of the accepted match, 1.0 for exact and new entities.
    pub match_score: f64,
}

/// Finds or creates the canonical entity for normalized names.
#[derive(Clone)]
pub struct Canonicalizer {
    store: Arc<dyn CanonicalStore>,
    scorer: SimilarityScorer,
    threshold: f64,
}

impl std::fmt::Debug for Canonicalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canonicalizer")
            .field("scorer", &self.scorer)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl Canonicalizer {
    /// Creates a canonicalizer accepting matches at the confidence floor.
    #[must_use]
    pub fn new(store: Arc<dyn CanonicalStore>, scorer: SimilarityScorer) -> Self {
        Self {
            store,
            scorer,
            threshold: CONFIDENCE_FLOOR,
        }
    }

    /// Raises the match acceptance threshold. Values below the floor are lifted to it.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.max(CONFIDENCE_FLOOR);
        self
    }

    /// The store being written.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CanonicalStore> {
        &self.store
    }

    /// The scorer used for fuzzy lookup.
    #[must_use]
    pub const fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    /// Attaches `normalized` to its canonical entity, creating one if no
    /// stored entity of `entity_type` scores at least the threshold.
    ///
    /// # Errors
    /// - `EmptyInput` for an empty name
    /// - `ConfidenceOutOfRange` for a classification confidence outside [0, 1]
    /// - `BelowThreshold` for a classification confidence under the floor
    /// - `Storage` when the store fails
    pub fn canonicalize(
        &self,
        normalized: &str,
        entity_type: EntityType,
        classification_confidence: f64,
    ) -> ColetorResult<CanonicalizationOutcome> {
        let normalized = normalized.trim();
        if normalized.is_empty() {
            return Err(ValidationError::EmptyInput { stage: "canonicalizer" }.into());
        }
        let classification_confidence = enforce_floor("classification", validate_unit(classification_confidence)?)?;
        let display = display_name(normalized, entity_type);

        let Some((mut entity, score)) = self.best_match(normalized, &display, entity_type)? else {
            let created = self.store.upsert(CanonicalEntity::seed(
                display,
                entity_type,
                classification_confidence,
                normalized,
            ))?;
            debug!("new {} entity {} '{}'", entity_type, created.id, created.canonical_name);
            return Ok(CanonicalizationOutcome {
                entity: created,
                is_new: true,
                match_score: 1.0,
            });
        };

        let score = enforce_floor("grouping", score)?;
        let now = Utc::now();
        entity.observe(normalized, score, now);
        entity.grouping_confidence = score;
        entity.classification_confidence = entity.classification_confidence.max(classification_confidence);
        if token_count(normalized) > token_count(&entity.canonical_name) {
            debug!("refreshing '{}' to '{display}'", entity.canonical_name);
            entity.canonical_name = display;
        }

        let stored = self.store.upsert(entity)?;
        debug!(
            "attached '{normalized}' to {} '{}' at {score:.3}",
            stored.id, stored.canonical_name
        );
        Ok(CanonicalizationOutcome {
            entity: stored,
            is_new: false,
            match_score: score,
        })
    }

    /// Best stored entity for the name, exact probes first.
    fn best_match(
        &self,
        normalized: &str,
        display: &str,
        entity_type: EntityType,
    ) -> ColetorResult<Option<(CanonicalEntity, f64)>> {
        let probes = self.probes(normalized, display, entity_type);

        for probe in &probes {
            if let Some(hit) = self.store.find_exact(probe, entity_type)?.into_iter().next() {
                return Ok(Some((hit, 1.0)));
            }
        }

        let cutoff = self.threshold - CLAMP_TOLERANCE;
        let mut best: Option<(CanonicalEntity, f64)> = None;
        for probe in &probes {
            let hit = self
                .store
                .find_similar(probe, entity_type, cutoff, &self.scorer)?
                .into_iter()
                .next();
            if let Some((entity, score)) = hit {
                if best.as_ref().map_or(true, |(_, b)| score > *b) {
                    best = Some((entity, score));
                }
            }
        }
        Ok(best)
    }

    fn probes(&self, normalized: &str, display: &str, entity_type: EntityType) -> Vec<String> {
        let mut probes = vec![normalized.to_uppercase()];
        if entity_type == EntityType::Pessoa {
            let formatted = display.to_uppercase();
            if formatted != probes[0] {
                probes.push(formatted);
            }
        }
        probes
    }

    /// How well `variation_text` is supported by `canonical_name`: 1.0 when
    /// either form of the variation equals the canonical name, otherwise the
    /// best similarity of those forms.
    #[must_use]
    pub fn support(&self, variation_text: &str, canonical_name: &str, entity_type: EntityType) -> f64 {
        let target = canonical_name.to_uppercase();
        let display = display_name(variation_text, entity_type);
        self.probes(variation_text, &display, entity_type)
            .iter()
            .map(|probe| if *probe == target { 1.0 } else { self.scorer.score(probe, &target) })
            .fold(0.0, f64::max)
    }
}
