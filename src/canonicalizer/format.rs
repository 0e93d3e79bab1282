//! Display formatting of canonical names.
//!
//! Person names are rendered as `Surname, I.I.` whatever shape they arrived
//! in. The shape is detected once into a [`NameFormat`] and each variant
//! renders itself.

use std::sync::OnceLock;

use regex::Regex;

use crate::entity::EntityType;
use crate::text::{cached, title_case};

/// Name particles that never contribute an initial.
const PARTICLES: &[&str] = &[
    "DA", "DAS", "DE", "DI", "DO", "DOS", "DU", "DEL", "DELLA", "E", "LA", "LE", "VAN", "VON", "Y",
];

/// Generational suffixes kept with the surname.
const SUFFIXES: &[&str] = &["FILHO", "NETO", "SOBRINHO", "JUNIOR", "JÚNIOR", "JR"];

static INITIALS_TOKEN: OnceLock<Regex> = OnceLock::new();

/// Shape of a person name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFormat {
    /// `SURNAME, INITIALS` or `SURNAME INITIALS`.
    AlreadyFormatted {
        /// Surname as written.
        surname: String,
        /// Initial letters in order.
        initials: Vec<char>,
    },
    /// `INITIALS SURNAME`.
    InitialsFirst {
        /// Initial letters in order.
        initials: Vec<char>,
        /// Surname as written.
        surname: String,
    },
    /// Full given names followed by the surname, no initials.
    FullName {
        /// Given names, particles removed.
        given: Vec<String>,
        /// Surname as written.
        surname: String,
    },
    /// Full given names and initials mixed, surname last.
    Mixed {
        /// Given names and initials, particles removed.
        given: Vec<String>,
        /// Surname as written.
        surname: String,
    },
    /// A lone surname.
    SurnameOnly(String),
}

impl NameFormat {
    /// Detects the shape of an upper-cased normalized name.
    ///
    /// Returns `None` when the text holds no letters.
    #[must_use]
    pub fn detect(name: &str) -> Option<Self> {
        if let Some((surname, rest)) = name.split_once(',') {
            let surname = clean_token(surname);
            if !has_letters(&surname) {
                return Self::detect(rest);
            }
            let initials = rest.split_whitespace().flat_map(token_initials).collect();
            return Some(Self::AlreadyFormatted { surname, initials });
        }

        let tokens: Vec<String> = name
            .split_whitespace()
            .map(clean_token)
            .filter(|t| has_letters(t))
            .collect();
        let last = tokens.last()?;

        if is_initials(last) {
            let first_initial = tokens.iter().position(|t| is_initials(t)).unwrap_or(0);
            let mut initials: Vec<char> = tokens[first_initial..].iter().flat_map(|t| token_initials(t)).collect();
            let surname = if first_initial == 0 {
                // Only initials: the last one stands in for the surname.
                initials.pop()?.to_string()
            } else {
                tokens[..first_initial].join(" ")
            };
            return Some(Self::AlreadyFormatted { surname, initials });
        }

        let mut start = tokens.len() - 1;
        if start > 0 && SUFFIXES.contains(&last.as_str()) {
            start -= 1;
        }
        let surname = tokens[start..].join(" ");
        let given: Vec<String> = tokens[..start]
            .iter()
            .filter(|t| !PARTICLES.contains(&t.as_str()))
            .cloned()
            .collect();

        let initial_count = given.iter().filter(|t| is_initials(t)).count();
        Some(if given.is_empty() {
            Self::SurnameOnly(surname)
        } else if initial_count == given.len() {
            Self::InitialsFirst {
                initials: given.iter().flat_map(|t| token_initials(t)).collect(),
                surname,
            }
        } else if initial_count == 0 {
            Self::FullName { given, surname }
        } else {
            Self::Mixed { given, surname }
        })
    }

    /// Renders `Surname, I.I.`, or the bare surname when there are no initials.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::AlreadyFormatted { surname, initials } | Self::InitialsFirst { initials, surname } => {
                with_initials(surname, initials)
            }
            Self::FullName { given, surname } | Self::Mixed { given, surname } => {
                let initials: Vec<char> = given.iter().filter_map(|t| t.chars().next()).collect();
                with_initials(surname, &initials)
            }
            Self::SurnameOnly(surname) => title_case(surname),
        }
    }
}

fn with_initials(surname: &str, initials: &[char]) -> String {
    let surname = title_case(surname);
    if initials.is_empty() {
        return surname;
    }
    let mut out = surname;
    out.push_str(", ");
    for c in initials {
        out.extend(c.to_uppercase());
        out.push('.');
    }
    out
}

fn has_letters(s: &str) -> bool {
    s.chars().any(char::is_alphabetic)
}

fn clean_token(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '.')
        .trim()
        .to_string()
}

/// `"R."`, `"R.C."` and single letters are initials; an undotted cluster such
/// as `"RC"` reads as a word.
fn is_initials(token: &str) -> bool {
    let re = cached(&INITIALS_TOKEN, r"^(?:\p{L}\.)+\p{L}?$|^\p{L}$");
    re.is_match(token)
}

fn token_initials(token: &str) -> Vec<char> {
    if is_initials(token) {
        token.chars().filter(|c| c.is_alphabetic()).collect()
    } else {
        token
            .split(|c: char| !c.is_alphabetic())
            .filter(|part| !part.is_empty() && !PARTICLES.contains(part))
            .filter_map(|part| part.chars().next())
            .collect()
    }
}

/// Formats `normalized` as a person's display name.
#[must_use]
pub fn format_person(normalized: &str) -> String {
    NameFormat::detect(&normalized.to_uppercase())
        .map_or_else(|| normalized.trim().to_string(), |format| format.render())
}

/// Display name for a stored entity of `entity_type`.
#[must_use]
pub fn display_name(normalized: &str, entity_type: EntityType) -> String {
    match entity_type {
        EntityType::Pessoa => format_person(normalized),
        EntityType::Empresa | EntityType::GrupoPessoas => normalized.trim().to_uppercase(),
        EntityType::NaoDeterminado => normalized.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_each_shape() {
        assert!(matches!(
            NameFormat::detect("FORZZA, R.C."),
            Some(NameFormat::AlreadyFormatted { .. })
        ));
        assert!(matches!(
            NameFormat::detect("R.C. FORZZA"),
            Some(NameFormat::InitialsFirst { .. })
        ));
        assert!(matches!(
            NameFormat::detect("ALISSON NOGUEIRA BRAZ"),
            Some(NameFormat::FullName { .. })
        ));
        assert!(matches!(
            NameFormat::detect("RAFAELA C. FORZZA"),
            Some(NameFormat::Mixed { .. })
        ));
        assert!(matches!(
            NameFormat::detect("FORZZA R.C."),
            Some(NameFormat::AlreadyFormatted { .. })
        ));
        assert!(matches!(NameFormat::detect("VILELA"), Some(NameFormat::SurnameOnly(_))));
        assert_eq!(NameFormat::detect("..."), None);
    }

    #[test]
    fn test_all_shapes_render_the_same_person() {
        for raw in ["FORZZA, R.C.", "R.C. FORZZA", "RAFAELA C. FORZZA", "R. C. FORZZA", "FORZZA R.C."] {
            assert_eq!(format_person(raw), "Forzza, R.C.", "input {raw}");
        }
    }

    #[test]
    fn test_full_name() {
        assert_eq!(format_person("ALISSON NOGUEIRA BRAZ"), "Braz, A.N.");
        assert_eq!(format_person("JOSÉ DA SILVA"), "Silva, J.");
        assert_eq!(format_person("JOÃO SOUZA FILHO"), "Souza Filho, J.");
    }

    #[test]
    fn test_surname_particles_kept_in_formatted_shape() {
        assert_eq!(format_person("DA SILVA, J."), "Da Silva, J.");
        assert_eq!(format_person("SILVA, JOÃO CARLOS"), "Silva, J.C.");
    }

    #[test]
    fn test_bare_surname() {
        assert_eq!(format_person("VILELA"), "Vilela");
        assert_eq!(format_person("SILVA,"), "Silva");
    }

    #[test]
    fn test_display_name_by_type() {
        assert_eq!(display_name("embrapa", EntityType::Empresa), "EMBRAPA");
        assert_eq!(display_name("EQUIPE PPBIO", EntityType::GrupoPessoas), "EQUIPE PPBIO");
        assert_eq!(display_name("S/C ?", EntityType::NaoDeterminado), "S/C ?");
        assert_eq!(display_name("SILVA, J.", EntityType::Pessoa), "Silva, J.");
    }
}
