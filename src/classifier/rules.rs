//! The classification rule cascade.
//!
//! [`CASCADE`] is evaluated top to bottom against the sanitized text and the
//! first rule that returns a [`Verdict`] decides the category. The last rule
//! always matches.

use std::sync::OnceLock;

use regex::Regex;

use super::Category;
use crate::text::{cached, fold_lower};

static ACRONYM: OnceLock<Regex> = OnceLock::new();
static INSTITUTION: OnceLock<Regex> = OnceLock::new();
static GROUP_KEYWORD: OnceLock<Regex> = OnceLock::new();
static SEPARATOR: OnceLock<Regex> = OnceLock::new();
static INITIAL: OnceLock<Regex> = OnceLock::new();
static SURNAME_INITIALS: OnceLock<Regex> = OnceLock::new();
static SURNAME_INITIALS_EXACT: OnceLock<Regex> = OnceLock::new();
static BARE_INITIALS: OnceLock<Regex> = OnceLock::new();
static NUMBER_BETWEEN_NAMES: OnceLock<Regex> = OnceLock::new();
static ROLE_AFTER_COMMA: OnceLock<Regex> = OnceLock::new();
static AMPERSAND_NAMES: OnceLock<Regex> = OnceLock::new();
static CONJUNCTION_NAMES: OnceLock<Regex> = OnceLock::new();

/// Folded literals that mean "collector unknown".
const UNDETERMINED_LITERALS: [&str; 14] = [
    "?",
    "??",
    "sem coletor",
    "s/c",
    "s.c.",
    "s/col",
    "s/col.",
    "nao identificado",
    "desconhecido",
    "anonimo",
    "sem informacao",
    "indeterminado",
    "n/a",
    "nd",
];

const CONJUNTO_CONFIDENCE: f64 = 0.82;

/// Outcome of a matching rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Category assigned.
    pub category: Category,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Tags describing what matched, in order.
    pub tags: Vec<&'static str>,
}

impl Verdict {
    fn new(category: Category, confidence: f64, tag: &'static str) -> Self {
        Self {
            category,
            confidence,
            tags: vec![tag],
        }
    }
}

/// Precomputed views of the text shared by every rule.
#[derive(Debug)]
pub struct Signals<'a> {
    /// Sanitized text.
    pub text: &'a str,
    /// Lowercased, accent-folded text.
    pub folded: String,
}

impl<'a> Signals<'a> {
    /// Builds the views for `text`.
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            folded: fold_lower(text.trim()),
        }
    }

    fn is_single_token(&self) -> bool {
        !self.text.contains(',') && self.text.split_whitespace().count() == 1
    }
}

/// One step of the cascade.
#[derive(Clone, Copy)]
pub struct CascadeRule {
    /// Stable rule name, used in logs.
    pub name: &'static str,
    evaluate: fn(&Signals<'_>) -> Option<Verdict>,
}

impl CascadeRule {
    /// Applies the rule.
    #[must_use]
    pub fn evaluate(&self, signals: &Signals<'_>) -> Option<Verdict> {
        (self.evaluate)(signals)
    }
}

impl std::fmt::Debug for CascadeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeRule").field("name", &self.name).finish()
    }
}

/// Rules in priority order.
pub const CASCADE: [CascadeRule; 8] = [
    CascadeRule {
        name: "undetermined_literal",
        evaluate: undetermined_literal,
    },
    CascadeRule {
        name: "no_letters",
        evaluate: no_letters,
    },
    CascadeRule {
        name: "institution",
        evaluate: institution,
    },
    CascadeRule {
        name: "conjunto",
        evaluate: conjunto,
    },
    CascadeRule {
        name: "person_pattern",
        evaluate: person_pattern,
    },
    CascadeRule {
        name: "single_token",
        evaluate: single_token,
    },
    CascadeRule {
        name: "group_keyword",
        evaluate: group_keyword,
    },
    CascadeRule {
        name: "ambiguous",
        evaluate: ambiguous,
    },
];

/// Runs the cascade and returns the first verdict.
#[must_use]
pub fn evaluate(signals: &Signals<'_>) -> Verdict {
    CASCADE
        .iter()
        .find_map(|rule| rule.evaluate(signals))
        .unwrap_or_else(|| Verdict::new(Category::Pessoa, 0.60, "ambiguous"))
}

fn surname_initials() -> &'static Regex {
    cached(&SURNAME_INITIALS, r"\p{Lu}[\p{L}'\-]+,\s*\p{Lu}\b\.?")
}

fn undetermined_literal(s: &Signals<'_>) -> Option<Verdict> {
    UNDETERMINED_LITERALS
        .contains(&s.folded.as_str())
        .then(|| Verdict::new(Category::NaoDeterminado, 1.0, "undetermined_literal"))
}

fn no_letters(s: &Signals<'_>) -> Option<Verdict> {
    (!s.text.chars().any(char::is_alphabetic))
        .then(|| Verdict::new(Category::NaoDeterminado, 0.0, "no_letters"))
}

fn institution(s: &Signals<'_>) -> Option<Verdict> {
    let acronym = cached(&ACRONYM, r"^\p{Lu}{2,}$").is_match(s.text.trim());
    let keyword = cached(
        &INSTITUTION,
        r"\b(?:embrapa|usp|unicamp|unesp|ufrj|ufmg|ufpe|ufba|ufrgs|inpa|jbrj|ibama|icmbio|herbario|jardim botanico|instituto|universidade|faculdade|museu|fundacao|empresa|ltda)\b",
    )
    .is_match(&s.folded);

    match (acronym, keyword) {
        (true, true) => Some(Verdict {
            category: Category::Empresa,
            confidence: 0.95,
            tags: vec!["acronym", "institution_keyword"],
        }),
        (true, false) => Some(Verdict::new(Category::Empresa, 0.90, "acronym")),
        (false, true) => Some(Verdict::new(Category::Empresa, 0.85, "institution_keyword")),
        (false, false) => None,
    }
}

fn conjunto(s: &Signals<'_>) -> Option<Verdict> {
    let text = s.text;
    let mut tags = Vec::new();

    let has_separator = cached(&SEPARATOR, r"(?i)[;&|:]|\bet\.?\s*al\b|\s(?:e|and)\s").is_match(text);
    let has_initials = cached(&INITIAL, r"\b\p{Lu}\.").is_match(text)
        || surname_initials().is_match(text);
    if has_separator && has_initials {
        tags.push("separator_with_initials");
    }
    if surname_initials().find_iter(text).count() >= 2 {
        tags.push("repeated_surname_initials");
    }
    if text.matches(',').count() >= 3 {
        tags.push("many_commas");
    }
    if cached(&NUMBER_BETWEEN_NAMES, r"\p{L}{2,}\.?\s+\d+[A-Za-z]?\s*[,;]?\s+\p{Lu}").is_match(text) {
        tags.push("number_between_names");
    }
    if cached(
        &ROLE_AFTER_COMMA,
        r",\s*(?:equipe|grupo|alunos|estudantes|colaboradores|auxiliares|turma|cols?\b)",
    )
    .is_match(&s.folded)
    {
        tags.push("role_after_comma");
    }
    if cached(&AMPERSAND_NAMES, r"\p{L}\.?\s*&\s*\p{L}").is_match(text) {
        tags.push("ampersand_names");
    }
    if cached(&CONJUNCTION_NAMES, r"\p{Lu}\p{Ll}+\s+(?:e|and)\s+\p{Lu}").is_match(text) {
        tags.push("conjunction_names");
    }

    if tags.is_empty() {
        return None;
    }
    Some(Verdict {
        category: Category::ConjuntoPessoas,
        confidence: CONJUNTO_CONFIDENCE,
        tags,
    })
}

fn person_pattern(s: &Signals<'_>) -> Option<Verdict> {
    let text = s.text.trim();
    if cached(
        &SURNAME_INITIALS_EXACT,
        r"^\p{Lu}[\p{L}'\-]+(?:\s+\p{L}[\p{L}'\-]*)*,\s*(?:\p{Lu}\.\s*)+$",
    )
    .is_match(text)
    {
        return Some(Verdict::new(Category::Pessoa, 0.90, "surname_comma_initials"));
    }
    if surname_initials().is_match(text) {
        return Some(Verdict::new(Category::Pessoa, 0.80, "surname_comma_initials_partial"));
    }
    if cached(&BARE_INITIALS, r"^(?:\p{Lu}\.\s*)+$").is_match(text) {
        return Some(Verdict::new(Category::Pessoa, 0.55, "bare_initials"));
    }
    let has_word = text
        .split(|c: char| !c.is_alphabetic())
        .any(|w| w.chars().count() >= 2);
    if has_word && cached(&INITIAL, r"\b\p{Lu}\.").is_match(text) {
        return Some(Verdict::new(Category::Pessoa, 0.75, "initials_with_name"));
    }
    None
}

fn single_token(s: &Signals<'_>) -> Option<Verdict> {
    if !s.is_single_token() {
        return None;
    }
    let token = s.text.trim();
    let letters: Vec<char> = token.chars().filter(|c| c.is_alphabetic()).collect();
    let flat_case = letters.iter().all(|c| c.is_uppercase()) || letters.iter().all(|c| c.is_lowercase());
    if token.chars().count() <= 3 || flat_case {
        return Some(Verdict::new(Category::NaoDeterminado, 0.0, "noise_token"));
    }
    Some(Verdict::new(Category::Pessoa, 0.50, "surname_only"))
}

fn group_keyword(s: &Signals<'_>) -> Option<Verdict> {
    let re = cached(
        &GROUP_KEYWORD,
        r"\b(?:equipe|grupo|laboratorio|projeto|expedicao|levantamento|pesquisas|alunos|turma|excursao|curso)\b",
    );
    let hits = re.find_iter(&s.folded).count();
    match hits {
        0 => None,
        1 => Some(Verdict::new(Category::GrupoPessoas, 0.75, "group_keyword")),
        _ => Some(Verdict::new(Category::GrupoPessoas, 0.80, "group_keyword")),
    }
}

#[allow(clippy::unnecessary_wraps)]
fn ambiguous(_: &Signals<'_>) -> Option<Verdict> {
    Some(Verdict::new(Category::Pessoa, 0.60, "ambiguous"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> Verdict {
        evaluate(&Signals::new(text))
    }

    #[test]
    fn test_cascade_order_is_stable() {
        let names: Vec<&str> = CASCADE.iter().map(|r| r.name).collect();
        assert_eq!(names.first(), Some(&"undetermined_literal"));
        assert_eq!(names.last(), Some(&"ambiguous"));
        assert_eq!(names.len(), 8);
    }

    #[test]
    fn test_undetermined_literals() {
        for text in ["?", "sem coletor", "S/C", "Não identificado", "Sem Informação"] {
            let v = run(text);
            assert_eq!(v.category, Category::NaoDeterminado, "{text}");
            assert!((v.confidence - 1.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_no_letters_is_discard() {
        let v = run("1234");
        assert_eq!(v.category, Category::NaoDeterminado);
        assert!(v.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_institutions() {
        let v = run("EMBRAPA");
        assert_eq!(v.category, Category::Empresa);
        assert!((v.confidence - 0.95).abs() < f64::EPSILON);

        assert_eq!(run("CENARGEN").tags, vec!["acronym"]);
        let v = run("Herbário da Universidade de Brasília");
        assert_eq!(v.category, Category::Empresa);
        assert!((v.confidence - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_keyword_needs_word_boundary() {
        assert_ne!(run("Cuspidata, A.").category, Category::Empresa);
    }

    #[test]
    fn test_conjunto_signals() {
        let cases = [
            ("Silva, J. & R.C. Forzza; Santos, M. et al.", "separator_with_initials"),
            ("Fernandes, F. M, Nogueira, J. B", "repeated_surname_initials"),
            ("Assis, L, Gabrielli, A", "repeated_surname_initials"),
            ("I. E. Santo 410, M. F. CASTILHORI", "number_between_names"),
            ("Silva, J., equipe", "role_after_comma"),
            ("Maria & João", "ampersand_names"),
            ("Maria Souza e João Lima", "conjunction_names"),
        ];
        for (text, tag) in cases {
            let v = run(text);
            assert_eq!(v.category, Category::ConjuntoPessoas, "{text}");
            assert!(v.tags.contains(&tag), "{text}: {:?}", v.tags);
            assert!((v.confidence - 0.82).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_person_patterns_scale_by_strength() {
        let exact = run("Forzza, R.C.");
        assert_eq!(exact.category, Category::Pessoa);
        assert_eq!(exact.tags, vec!["surname_comma_initials"]);

        let initials_first = run("R.C. Forzza");
        assert_eq!(initials_first.tags, vec!["initials_with_name"]);
        assert!(initials_first.confidence < exact.confidence);

        let bare = run("R.C.");
        assert_eq!(bare.tags, vec!["bare_initials"]);
        assert!(bare.confidence < 0.70);
    }

    #[test]
    fn test_single_token_noise_and_surname() {
        assert_eq!(run("ab").tags, vec!["noise_token"]);
        assert_eq!(run("silva").tags, vec!["noise_token"]);
        let v = run("Silva");
        assert_eq!(v.category, Category::Pessoa);
        assert_eq!(v.tags, vec!["surname_only"]);
    }

    #[test]
    fn test_group_keyword() {
        let v = run("Equipe do Projeto Flora");
        assert_eq!(v.category, Category::GrupoPessoas);
        assert!((v.confidence - 0.80).abs() < f64::EPSILON);
        assert!((run("Alunos de Botânica").confidence - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_is_ambiguous_person() {
        let v = run("Maria Silva");
        assert_eq!(v.category, Category::Pessoa);
        assert_eq!(v.tags, vec!["ambiguous"]);
        assert!((v.confidence - 0.60).abs() < f64::EPSILON);
    }
}
