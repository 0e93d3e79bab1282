//! Canonical entities and their observed variations.
//!
//! A [`CanonicalEntity`] is the deduplicated record for one real collector
//! (person, institution or group). Each distinct spelling seen for it is kept
//! as a [`Variation`] with its own occurrence count and timestamps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned entity identifier.
///
/// Identifiers are assigned monotonically by the store on insert and are
/// never reused. `EntityId::UNASSIGNED` marks an entity that has not been
/// persisted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Sentinel for entities not yet inserted.
    pub const UNASSIGNED: Self = Self(0);

    /// Creates an entity ID from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns true if the store has not assigned this ID yet.
    #[must_use]
    pub const fn is_unassigned(self) -> bool {
        self.0 == 0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted entity types.
///
/// `ConjuntoPessoas` is a classification outcome only; its fragments are
/// stored as `Pessoa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    /// A single person.
    Pessoa,
    /// A team, project or expedition named as a group.
    GrupoPessoas,
    /// An institution or company.
    Empresa,
    /// Collector unknown or not determinable.
    NaoDeterminado,
}

impl EntityType {
    /// All persisted types, in report order.
    pub const ALL: [Self; 4] = [
        Self::Pessoa,
        Self::GrupoPessoas,
        Self::Empresa,
        Self::NaoDeterminado,
    ];

    /// Returns the stable label used in reports and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pessoa => "Pessoa",
            Self::GrupoPessoas => "GrupoPessoas",
            Self::Empresa => "Empresa",
            Self::NaoDeterminado => "NaoDeterminado",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// One distinct spelling observed for a canonical entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    /// The normalized text as observed.
    pub variation_text: String,
    /// Number of times this exact text was attached, at least 1.
    pub occurrence_count: u64,
    /// Score of the match that first attached this text.
    pub association_confidence: f64,
    /// First observation.
    pub first_seen: DateTime<Utc>,
    /// Most recent observation.
    pub last_seen: DateTime<Utc>,
}

impl Variation {
    /// Creates a variation seen once at `now`.
    #[must_use]
    pub fn new(text: impl Into<String>, confidence: f64, now: DateTime<Utc>) -> Self {
        Self {
            variation_text: text.into(),
            occurrence_count: 1,
            association_confidence: confidence,
            first_seen: now,
            last_seen: now,
        }
    }

    fn absorb(&mut self, other: &Self) {
        self.occurrence_count += other.occurrence_count;
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
        self.association_confidence = self.association_confidence.max(other.association_confidence);
    }
}

/// The deduplicated record for one real collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    /// Store-assigned identifier.
    pub id: EntityId,
    /// Display-formatted representative spelling.
    pub canonical_name: String,
    /// Persisted type.
    pub entity_type: EntityType,
    /// Confidence of the classification that created or last refreshed this entity.
    pub classification_confidence: f64,
    /// Score of the most recent match that attached a variation, 1.0 when self-created.
    pub grouping_confidence: f64,
    /// Observed spellings, never empty.
    pub variations: Vec<Variation>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl CanonicalEntity {
    /// Creates an unassigned entity seeded with one variation at confidence 1.0.
    #[must_use]
    pub fn seed(
        canonical_name: impl Into<String>,
        entity_type: EntityType,
        classification_confidence: f64,
        variation_text: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::UNASSIGNED,
            canonical_name: canonical_name.into(),
            entity_type,
            classification_confidence,
            grouping_confidence: 1.0,
            variations: vec![Variation::new(variation_text, 1.0, now)],
            created_at: now,
            updated_at: now,
        }
    }

    /// Upper-cased canonical name, the case-insensitive half of the identity key.
    #[must_use]
    pub fn name_key(&self) -> String {
        self.canonical_name.to_uppercase()
    }

    /// Returns the variation with exactly this text.
    #[must_use]
    pub fn variation(&self, text: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.variation_text == text)
    }

    /// Records one observation of `text` attached with `score`.
    ///
    /// Returns true when `text` was not seen before on this entity.
    pub fn observe(&mut self, text: &str, score: f64, now: DateTime<Utc>) -> bool {
        self.updated_at = now;
        if let Some(existing) = self.variations.iter_mut().find(|v| v.variation_text == text) {
            existing.occurrence_count += 1;
            existing.last_seen = now;
            return false;
        }
        self.variations.push(Variation::new(text, score, now));
        true
    }

    /// Folds every variation of `other` into this entity.
    ///
    /// Counts of equal texts are summed; first/last seen take min/max.
    pub fn absorb(&mut self, other: &Self) {
        for incoming in &other.variations {
            match self
                .variations
                .iter_mut()
                .find(|v| v.variation_text == incoming.variation_text)
            {
                Some(existing) => existing.absorb(incoming),
                None => self.variations.push(incoming.clone()),
            }
        }
        self.created_at = self.created_at.min(other.created_at);
        self.updated_at = self.updated_at.max(other.updated_at);
    }

    /// Sum of occurrence counts over all variations.
    #[must_use]
    pub fn total_occurrences(&self) -> u64 {
        self.variations.iter().map(|v| v.occurrence_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    #[test]
    fn test_seed_has_one_full_confidence_variation() {
        let e = CanonicalEntity::seed("Forzza, R.C.", EntityType::Pessoa, 0.9, "FORZZA, R.C.");
        assert!(e.id.is_unassigned());
        assert_eq!(e.variations.len(), 1);
        assert!((e.grouping_confidence - 1.0).abs() < f64::EPSILON);
        assert!((e.variations[0].association_confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(e.name_key(), "FORZZA, R.C.");
    }

    #[test]
    fn test_observe_increments_existing_text() {
        let mut e = CanonicalEntity::seed("Forzza, R.C.", EntityType::Pessoa, 0.9, "FORZZA, R.C.");
        let later = e.created_at + Duration::seconds(5);

        assert!(!e.observe("FORZZA, R.C.", 1.0, later));
        assert_eq!(e.variations.len(), 1);
        assert_eq!(e.variations[0].occurrence_count, 2);
        assert_eq!(e.variations[0].last_seen, later);

        assert!(e.observe("FORZZA, R.", 0.8, later));
        assert_eq!(e.variations.len(), 2);
        assert!((e.variation("FORZZA, R.").unwrap().association_confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_absorb_sums_counts_and_widens_window() {
        let mut a = CanonicalEntity::seed("EMBRAPA", EntityType::Empresa, 0.9, "EMBRAPA");
        let mut b = CanonicalEntity::seed("EMBRAPA", EntityType::Empresa, 0.9, "EMBRAPA");
        b.variations[0].first_seen = a.variations[0].first_seen - Duration::days(1);
        b.variations[0].occurrence_count = 3;
        b.observe("EMBRAPA CENARGEN", 0.75, Utc::now());

        a.absorb(&b);
        assert_eq!(a.variations.len(), 2);
        let v = a.variation("EMBRAPA").unwrap();
        assert_eq!(v.occurrence_count, 4);
        assert_eq!(v.first_seen, b.variations[0].first_seen);
        assert_eq!(a.total_occurrences(), 5);
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!("pessoa".parse::<EntityType>().unwrap(), EntityType::Pessoa);
        assert_eq!("Empresa".parse::<EntityType>().unwrap(), EntityType::Empresa);
        assert!("ConjuntoPessoas".parse::<EntityType>().is_err());
    }
}
