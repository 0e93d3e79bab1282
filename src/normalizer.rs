//! Deterministic cleanup producing the comparison form of a name.
//!
//! Rules run in a fixed order and each is recorded only when it changed the
//! text. An empty `normalized` means the fragment is not a usable name and
//! must be discarded. Normalization is idempotent.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::text::{cached, trim_trailing_separators};

static NUMBER_INITIALS: OnceLock<Regex> = OnceLock::new();
static ET_AL: OnceLock<Regex> = OnceLock::new();
static PARENTHETICAL: OnceLock<Regex> = OnceLock::new();
static SPACE_BEFORE_PUNCT: OnceLock<Regex> = OnceLock::new();
static SPACED_INITIALS: OnceLock<Regex> = OnceLock::new();

const SPACED: [char; 5] = [',', ';', '.', '&', '|'];

/// A normalization rule, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationRule {
    /// Input is a specimen code or starts with a pipe; output is empty.
    RejectInvalid,
    /// Leading and trailing punctuation removed.
    TrimEdges,
    /// "et al." / "et alli" removed.
    RemoveEtAl,
    /// Whitespace runs collapsed and trimmed.
    CollapseWhitespace,
    /// One space after each of `,;.&|`, none before.
    SpacePunctuation,
    /// Uppercased.
    Uppercase,
    /// Residual separators and a leading conjunctive "E " removed.
    StripResidualSeparators,
    /// Parenthetical annotations such as "(PAI)" removed.
    RemoveParentheticals,
    /// Spaces between consecutive initials removed.
    JoinInitials,
}

impl NormalizationRule {
    /// Returns the stable tag for this rule.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RejectInvalid => "reject_invalid",
            Self::TrimEdges => "trim_edges",
            Self::RemoveEtAl => "remove_et_al",
            Self::CollapseWhitespace => "collapse_whitespace",
            Self::SpacePunctuation => "space_punctuation",
            Self::Uppercase => "uppercase",
            Self::StripResidualSeparators => "strip_residual_separators",
            Self::RemoveParentheticals => "remove_parentheticals",
            Self::JoinInitials => "join_initials",
        }
    }
}

impl fmt::Display for NormalizationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of [`Normalizer::normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationResult {
    /// Input as given.
    pub original: String,
    /// Comparison form; empty means discard.
    pub normalized: String,
    /// Rules that changed the text, in order.
    pub rules_applied: Vec<NormalizationRule>,
}

impl NormalizationResult {
    /// True when the fragment must be discarded.
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.normalized.is_empty()
    }

    /// True when `rule` changed the text.
    #[must_use]
    pub fn applied(&self, rule: NormalizationRule) -> bool {
        self.rules_applied.contains(&rule)
    }
}

/// Stateless name normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    /// Creates a normalizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Normalizes `name`.
    #[must_use]
    pub fn normalize(&self, name: &str) -> NormalizationResult {
        let mut rules = Vec::new();

        if is_invalid(name.trim()) {
            return rejected(name, rules);
        }

        let mut text = name.to_string();
        let mut step = |rule: NormalizationRule, text: &mut String, next: String| {
            if *text != next {
                rules.push(rule);
                *text = next;
            }
        };

        let next = trim_edges(&text);
        step(NormalizationRule::TrimEdges, &mut text, next);

        let next = cached(
            &ET_AL,
            r"(?i)\s*&?\s*[;,]?\s*\bet\.?\s*al(?:l?i+)?\b\.?\s*[;,]?\s*",
        )
        .replace_all(&text, " ")
        .into_owned();
        step(NormalizationRule::RemoveEtAl, &mut text, next);

        let next = collapse_whitespace(&text);
        step(NormalizationRule::CollapseWhitespace, &mut text, next);

        let next = space_punctuation(&text);
        step(NormalizationRule::SpacePunctuation, &mut text, next);

        let next = text.to_uppercase();
        step(NormalizationRule::Uppercase, &mut text, next);

        let next = strip_residual(&text);
        step(NormalizationRule::StripResidualSeparators, &mut text, next);

        let next = remove_parentheticals(&text);
        step(NormalizationRule::RemoveParentheticals, &mut text, next);

        let next = join_initials(&text);
        step(NormalizationRule::JoinInitials, &mut text, next);

        // Cleanup can expose a leading specimen number, e.g. "(PAI) 123".
        if is_invalid(&text) {
            return rejected(name, rules);
        }

        NormalizationResult {
            original: name.to_string(),
            normalized: text,
            rules_applied: rules,
        }
    }
}

fn rejected(name: &str, mut rules: Vec<NormalizationRule>) -> NormalizationResult {
    rules.push(NormalizationRule::RejectInvalid);
    NormalizationResult {
        original: name.to_string(),
        normalized: String::new(),
        rules_applied: rules,
    }
}

fn is_invalid(text: &str) -> bool {
    text.starts_with(|c: char| c.is_ascii_digit())
        || text.starts_with('|')
        || cached(&NUMBER_INITIALS, r"^\d+\s*[,;-]\s*[A-Z]\.(?:[A-Z]\.)*\s*$").is_match(text)
}

fn trim_edges(text: &str) -> String {
    let mut out = text;
    let head = out.trim_start();
    if head.starts_with(['.', ',', ';', ':']) {
        out = head.trim_start_matches(|c: char| c.is_whitespace() || ".,;:".contains(c));
    }
    let tail = trim_trailing_separators(out);
    if tail.len() == out.trim_end().len() {
        out.to_string()
    } else {
        tail
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn space_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if !SPACED.contains(&c) {
            out.push(c);
            continue;
        }
        while out.ends_with(' ') {
            out.pop();
        }
        out.push(c);
        while chars.peek().is_some_and(|n| n.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_some_and(|n| !SPACED.contains(n)) {
            out.push(' ');
        }
    }
    out
}

fn strip_residual(text: &str) -> String {
    let mut out = text.to_string();
    loop {
        let before = out.len();
        let trimmed = out.trim_start_matches(|c: char| c.is_whitespace() || ".,;:&|-".contains(c));
        out = trimmed.strip_prefix("E ").unwrap_or(trimmed).to_string();
        if out.len() == before {
            break;
        }
    }
    trim_trailing_separators(&out)
}

fn remove_parentheticals(text: &str) -> String {
    let re = cached(&PARENTHETICAL, r"\s*\([^()]*\)");
    if !re.is_match(text) {
        return text.to_string();
    }
    let removed = re.replace_all(text, "");
    let tidied = cached(&SPACE_BEFORE_PUNCT, r"\s+([,;.&|])").replace_all(&removed, "$1");
    strip_residual(&collapse_whitespace(&tidied))
}

fn join_initials(text: &str) -> String {
    let re = cached(&SPACED_INITIALS, r"\b(\p{Lu})\. (\p{Lu})\.");
    let mut out = text.to_string();
    loop {
        let next = re.replace_all(&out, "$1.$2.").into_owned();
        if next == out {
            return out;
        }
        out = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> String {
        Normalizer::new().normalize(s).normalized
    }

    #[test]
    fn test_spacing_and_uppercase() {
        let r = Normalizer::new().normalize("  Silva,J.C. ");
        assert_eq!(r.normalized, "SILVA, J.C.");
        assert!(r.applied(NormalizationRule::CollapseWhitespace));
        assert!(r.applied(NormalizationRule::SpacePunctuation));
        assert!(r.applied(NormalizationRule::Uppercase));
        assert!(!r.applied(NormalizationRule::RemoveEtAl));
    }

    #[test]
    fn test_rejects_specimen_codes() {
        for input in ["1214", "12196, M.B.", "1214, I.E.S.", "|Amanda", "  42 Silva"] {
            let r = Normalizer::new().normalize(input);
            assert!(r.is_discarded(), "{input} should be discarded");
            assert_eq!(r.rules_applied, vec![NormalizationRule::RejectInvalid]);
        }
    }

    #[test]
    fn test_removes_et_al_variants() {
        assert_eq!(norm("Santos, M. et al."), "SANTOS, M.");
        assert_eq!(norm("Botelho, R.D. ET. AL."), "BOTELHO, R.D.");
        assert_eq!(norm("Lima, A. et alli"), "LIMA, A.");
        assert_eq!(norm("Lima, A. & et al"), "LIMA, A.");
        assert_eq!(norm("Metallo, R."), "METALLO, R.");
    }

    #[test]
    fn test_leading_punctuation_and_conjunction() {
        assert_eq!(norm(". L. Azevedo, L.O."), "L. AZEVEDO, L.O.");
        assert_eq!(norm("e Souza, V.C."), "SOUZA, V.C.");
        assert_eq!(norm("; Silva, J."), "SILVA, J.");
    }

    #[test]
    fn test_parentheticals_removed() {
        assert_eq!(norm("Eduardo (Tziu)"), "EDUARDO");
        assert_eq!(norm("Silva (Pai), J."), "SILVA, J.");
        assert_eq!(norm("Santos, A. (Irmão)"), "SANTOS, A.");
    }

    #[test]
    fn test_initials_joined() {
        assert_eq!(norm("Andrade, I. R."), "ANDRADE, I.R.");
        assert_eq!(norm("I. R. S. Costa"), "I.R.S. COSTA");
        assert_eq!(norm("R.C. Forzza"), "R.C. FORZZA");
        assert_eq!(norm("Silva ,J . C ."), "SILVA, J.C.");
    }

    #[test]
    fn test_exposed_number_is_rejected() {
        assert!(Normalizer::new().normalize("(Pai) 123").is_discarded());
    }

    #[test]
    fn test_idempotent_over_samples() {
        let samples = [
            "  Silva,J.C. ",
            "Forzza, R.C.",
            "Rafaela C. Forzza",
            "Andrade, I. R.",
            ". L. Azevedo, L.O.",
            "Eduardo (Tziu)",
            "Silva Jr. (Pai)",
            "Silva. (Pai)",
            "G.M. Antar Et. Al.",
            "DÉBORA G. TAKAKI",
            "Lima, A.;",
            "A & B",
            "Silva, J., Costa, M.",
            "e E Souza",
            "Equipe do Herbário",
        ];
        for s in samples {
            let once = norm(s);
            assert!(!once.is_empty(), "{s} unexpectedly discarded");
            assert_eq!(norm(&once), once, "not idempotent for {s:?}");
        }
    }
}
