//! Metaphone phonetic encoding.
//!
//! Each whitespace-separated word is encoded independently and the codes are
//! joined with a single space. Accented Latin letters fold to their base
//! letter first, and characters other than ASCII letters are ignored.

/// Folds an accented Latin character to its unaccented ASCII base.
fn fold(c: char) -> Option<char> {
    let upper = c.to_uppercase().next().unwrap_or(c);
    let base = match upper {
        'A'..='Z' => upper,
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'Ç' => 'C',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'Ñ' => 'N',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'Ý' => 'Y',
        _ => return None,
    };
    Some(base)
}

const fn is_vowel(c: char) -> bool {
    matches!(c, 'A' | 'E' | 'I' | 'O' | 'U')
}

/// Encodes `text` with Metaphone.
#[must_use]
pub fn metaphone(text: &str) -> String {
    let mut out = String::new();
    for word in text.split_whitespace() {
        let letters: Vec<char> = word.chars().filter_map(fold).collect();
        let code = encode_word(&letters);
        if code.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&code);
    }
    out
}

/// Returns true when both strings are non-empty and share a Metaphone code.
#[must_use]
pub fn phonetic_match(a: &str, b: &str) -> bool {
    if a.trim().is_empty() || b.trim().is_empty() {
        return false;
    }
    let code_a = metaphone(a);
    !code_a.is_empty() && code_a == metaphone(b)
}

#[allow(clippy::too_many_lines)]
fn encode_word(w: &[char]) -> String {
    let mut code = String::with_capacity(w.len());
    if w.is_empty() {
        return code;
    }

    let at = |i: usize| w.get(i).copied();
    let mut start = 0;

    // Initial exceptions.
    match (at(0), at(1)) {
        (Some('A'), Some('E')) => {
            code.push('E');
            start = 2;
        }
        (Some('G' | 'K' | 'P'), Some('N')) => {
            code.push('N');
            start = 2;
        }
        (Some('W'), Some('R')) => {
            code.push('R');
            start = 2;
        }
        (Some('W'), Some('H')) => {
            code.push('W');
            start = 2;
        }
        (Some('X'), _) => {
            code.push('S');
            start = 1;
        }
        _ => {}
    }

    let last = w.len() - 1;
    for i in start..w.len() {
        let c = w[i];
        let prev = if i > 0 { at(i - 1) } else { None };
        let next = at(i + 1);
        let next2 = at(i + 2);

        // Doubled letters collapse, except C.
        if prev == Some(c) && c != 'C' {
            continue;
        }

        match c {
            'A' | 'E' | 'I' | 'O' | 'U' => {
                if i == 0 {
                    code.push(c);
                }
            }
            'B' => {
                if !(i == last && prev == Some('M')) {
                    code.push('B');
                }
            }
            'C' => {
                if next == Some('I') && next2 == Some('A') {
                    code.push('X');
                } else if next == Some('H') {
                    code.push(if prev == Some('S') { 'K' } else { 'X' });
                } else if matches!(next, Some('I' | 'E' | 'Y')) {
                    if prev != Some('S') {
                        code.push('S');
                    }
                } else {
                    code.push('K');
                }
            }
            'D' => {
                if next == Some('G') && matches!(next2, Some('E' | 'Y' | 'I')) {
                    code.push('J');
                } else {
                    code.push('T');
                }
            }
            'G' => {
                if next == Some('H') && !(i + 1 == last || next2.is_some_and(is_vowel)) {
                    continue;
                }
                if next == Some('N') && (i + 1 == last || (next2 == Some('E') && at(i + 3) == Some('D') && i + 3 == last)) {
                    continue;
                }
                if matches!(next, Some('I' | 'E' | 'Y')) && prev != Some('G') {
                    code.push('J');
                } else {
                    code.push('K');
                }
            }
            'H' => {
                let after_modifier = matches!(prev, Some('C' | 'S' | 'P' | 'T' | 'G'));
                let vowel_before = prev.is_some_and(is_vowel);
                let vowel_after = next.is_some_and(is_vowel);
                if !after_modifier && !(vowel_before && !vowel_after) {
                    code.push('H');
                }
            }
            'K' => {
                if prev != Some('C') {
                    code.push('K');
                }
            }
            'P' => code.push(if next == Some('H') { 'F' } else { 'P' }),
            'Q' => code.push('K'),
            'S' => {
                if next == Some('H') || (next == Some('I') && matches!(next2, Some('O' | 'A'))) {
                    code.push('X');
                } else {
                    code.push('S');
                }
            }
            'T' => {
                if next == Some('I') && matches!(next2, Some('O' | 'A')) {
                    code.push('X');
                } else if next == Some('H') {
                    code.push('0');
                } else if !(next == Some('C') && next2 == Some('H')) {
                    code.push('T');
                }
            }
            'V' => code.push('F'),
            'W' | 'Y' => {
                if next.is_some_and(is_vowel) {
                    code.push(c);
                }
            }
            'X' => code.push_str("KS"),
            'Z' => code.push('S'),
            _ => code.push(c),
        }
    }

    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vowel_variants_share_code() {
        assert!(phonetic_match("Silva", "Sylva"));
        assert!(!phonetic_match("Silva", "Costa"));
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(metaphone("FORZZA"), "FRS");
        assert_eq!(metaphone("knight"), "NT");
        assert_eq!(metaphone("Conceição"), "KNSK");
        assert_eq!(metaphone("Philips"), "FLPS");
    }

    #[test]
    fn test_words_encoded_separately() {
        assert_eq!(metaphone("R.C. FORZZA"), "RK FRS");
        assert_eq!(metaphone("  "), "");
    }

    #[test]
    fn test_empty_never_matches() {
        assert!(!phonetic_match("", ""));
        assert!(!phonetic_match("Silva", ""));
        assert!(!phonetic_match("...", "..."));
    }
}
