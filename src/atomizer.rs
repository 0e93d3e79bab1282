//! Splitting compound collector strings into individual name fragments.
//!
//! Split rules are tried in priority order. The first rule that applies
//! splits the text, and each resulting piece is split again with the rules
//! that follow it, so `"A, J. & B, K.; C, L."` yields three fragments.
//! A trailing "et al." marker is removed before any split.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classifier::Category;
use crate::text::cached;

static TRAILING_ET_AL: OnceLock<Regex> = OnceLock::new();
static INNER_ET_AL: OnceLock<Regex> = OnceLock::new();
static CONJUNCTION: OnceLock<Regex> = OnceLock::new();
static TRAILING_NUMBER: OnceLock<Regex> = OnceLock::new();

const PARTICLES: [&str; 6] = ["de", "da", "do", "dos", "das", "e"];

/// Separator that bounded a fragment on its left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparatorKind {
    /// First fragment.
    None,
    /// `et al.` in the middle of the string.
    EtAl,
    /// `;`
    Semicolon,
    /// `|`
    Pipe,
    /// `:`
    Colon,
    /// `&`
    Ampersand,
    /// A comma between "Surname, Initials" groups.
    Comma,
    /// `" e "` or `" and "`.
    Conjunction,
}

impl fmt::Display for SeparatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::EtAl => "et_al",
            Self::Semicolon => "semicolon",
            Self::Pipe => "pipe",
            Self::Colon => "colon",
            Self::Ampersand => "ampersand",
            Self::Comma => "comma",
            Self::Conjunction => "conjunction",
        };
        f.write_str(s)
    }
}

/// One name fragment of a compound string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomizedFragment {
    /// Trimmed fragment text.
    pub text: String,
    /// The fragment as it appeared, before trimming.
    pub original_formatting: String,
    /// 0-based order of appearance.
    pub position: usize,
    /// Separator on the fragment's left.
    pub separator_used: SeparatorKind,
}

#[derive(Debug, Clone, Copy)]
enum SplitRule {
    EtAl,
    Char(char, SeparatorKind),
    SurnameInitials,
    Conjunction,
}

const SPLIT_RULES: [SplitRule; 7] = [
    SplitRule::EtAl,
    SplitRule::Char(';', SeparatorKind::Semicolon),
    SplitRule::Char('|', SeparatorKind::Pipe),
    SplitRule::Char(':', SeparatorKind::Colon),
    SplitRule::Char('&', SeparatorKind::Ampersand),
    SplitRule::SurnameInitials,
    SplitRule::Conjunction,
];

const SURNAME_INITIALS_RULE: usize = 5;

impl SplitRule {
    /// First rule tried on the pieces this rule produced.
    fn resume_at(self, idx: usize) -> usize {
        match self {
            // Each side of "A, X. e B, Y." may still be a comma list.
            Self::Conjunction => SURNAME_INITIALS_RULE,
            _ => idx + 1,
        }
    }

    fn separator(self) -> SeparatorKind {
        match self {
            Self::EtAl => SeparatorKind::EtAl,
            Self::Char(_, kind) => kind,
            Self::SurnameInitials => SeparatorKind::Comma,
            Self::Conjunction => SeparatorKind::Conjunction,
        }
    }

    /// Returns the raw pieces when the rule applies, `None` otherwise.
    fn split(self, text: &str) -> Option<Vec<String>> {
        let pieces: Vec<String> = match self {
            Self::EtAl => {
                let re = cached(&INNER_ET_AL, r"(?i)\s*[;,]?\s*\bet\.?\s*al(?:l?i+)?\b\.?\s*[;,]?\s*");
                if !re.is_match(text) {
                    return None;
                }
                re.split(text).map(str::to_string).collect()
            }
            Self::Char(c, _) => {
                if !text.contains(c) {
                    return None;
                }
                text.split(c).map(str::to_string).collect()
            }
            Self::SurnameInitials => split_surname_initials(text)?,
            Self::Conjunction => {
                let re = cached(&CONJUNCTION, r"(?i)\s+(?:e|and)\s+");
                if !re.is_match(text) {
                    return None;
                }
                re.split(text).map(str::to_string).collect()
            }
        };
        let non_empty = pieces.iter().filter(|p| !p.trim().is_empty()).count();
        (non_empty > 1).then_some(pieces)
    }
}

/// Stateless splitter for `ConjuntoPessoas` strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Atomizer;

impl Atomizer {
    /// Creates an atomizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Splits `text` into fragments.
    ///
    /// Returns an empty list unless `category` is `ConjuntoPessoas`.
    #[must_use]
    pub fn atomize(&self, text: &str, category: Category) -> Vec<AtomizedFragment> {
        if category != Category::ConjuntoPessoas {
            return Vec::new();
        }

        let stripped = cached(
            &TRAILING_ET_AL,
            r"(?i)[\s,;&]*\bet\.?\s*al(?:l?i+)?\b\.?[\s.,;]*$",
        )
        .replace(text.trim(), "");

        let mut raw = Vec::new();
        split_from(&stripped, 0, SeparatorKind::None, &mut raw);

        raw.into_iter()
            .filter_map(|(piece, sep)| {
                let trimmed = piece.trim().to_string();
                if trimmed.is_empty() {
                    None
                } else {
                    Some((trimmed, piece, sep))
                }
            })
            .enumerate()
            .map(|(position, (text, original_formatting, separator_used))| AtomizedFragment {
                text,
                original_formatting,
                position,
                separator_used: if position == 0 { SeparatorKind::None } else { separator_used },
            })
            .collect()
    }
}

fn split_from(text: &str, from: usize, left: SeparatorKind, out: &mut Vec<(String, SeparatorKind)>) {
    for (idx, rule) in SPLIT_RULES.iter().enumerate().skip(from) {
        if let Some(pieces) = rule.split(text) {
            let mut first = true;
            for piece in pieces {
                if piece.trim().is_empty() {
                    continue;
                }
                let sep = if first { left } else { rule.separator() };
                first = false;
                split_from(&piece, rule.resume_at(idx), sep, out);
            }
            return;
        }
    }
    out.push((text.to_string(), left));
}

fn is_initials_like(part: &str) -> bool {
    let tokens: Vec<&str> = part
        .split(|c: char| c.is_whitespace() || c == '.')
        .filter(|t| !t.is_empty())
        .collect();
    let mut letters = 0;
    for token in &tokens {
        let chars = token.chars().count();
        if chars == 1 && token.chars().all(char::is_alphabetic) {
            letters += 1;
        } else if !PARTICLES.iter().any(|p| p.eq_ignore_ascii_case(token)) {
            return false;
        }
    }
    letters > 0
}

fn is_name_like(part: &str) -> bool {
    part.split(|c: char| !c.is_alphabetic())
        .any(|w| w.chars().count() >= 2)
}

/// Splits "Surname, I., Surname, I." lists into "Surname, I." fragments.
///
/// Applies only when every comma part is consumed by a surname/initials pair
/// or ends in a specimen number.
fn split_surname_initials(text: &str) -> Option<Vec<String>> {
    let trailing_number = cached(&TRAILING_NUMBER, r"\s+\d+[A-Za-z]?$");
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return None;
    }

    let mut fragments = Vec::new();
    let mut i = 0;
    while i < parts.len() {
        let part = parts[i];
        if let Some(m) = trailing_number.find(part) {
            fragments.push(part[..m.start()].to_string());
            i += 1;
        } else if is_name_like(part) && !is_initials_like(part) && i + 1 < parts.len() && is_initials_like(parts[i + 1]) {
            let initials = parts[i + 1];
            let initials = trailing_number
                .find(initials)
                .map_or(initials, |m| &initials[..m.start()]);
            fragments.push(format!("{part}, {initials}"));
            i += 2;
        } else {
            return None;
        }
    }

    (fragments.len() > 1).then_some(fragments)
}
