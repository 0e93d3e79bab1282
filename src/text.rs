//! Shared text helpers for the pipeline stages.

use std::sync::OnceLock;

use regex::Regex;

/// Returns the compiled built-in pattern, compiling it on first use.
///
/// Only used with literal patterns covered by unit tests.
pub(crate) fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("built-in pattern {pattern:?} does not compile: {e}"),
    })
}

/// Lowercases and strips Latin diacritics: `"Herbário"` becomes `"herbario"`.
pub(crate) fn fold_lower(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
            'ç' => 'c',
            'è' | 'é' | 'ê' | 'ë' => 'e',
            'ì' | 'í' | 'î' | 'ï' => 'i',
            'ñ' => 'n',
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
            'ù' | 'ú' | 'û' | 'ü' => 'u',
            'ý' | 'ÿ' => 'y',
            other => other,
        })
        .collect()
}

/// Counts alphabetic runs: `"FORZZA, R.C."` has three.
pub(crate) fn token_count(s: &str) -> usize {
    let mut count = 0;
    let mut in_run = false;
    for c in s.chars() {
        let alpha = c.is_alphabetic();
        if alpha && !in_run {
            count += 1;
        }
        in_run = alpha;
    }
    count
}

/// True when `s` ends with a dotted single-letter initial such as `"J."`.
pub(crate) fn ends_with_initial(s: &str) -> bool {
    let mut rev = s.chars().rev();
    if rev.next() != Some('.') {
        return false;
    }
    let mut rev = rev.skip_while(|c| c.is_whitespace());
    match rev.next() {
        Some(c) if c.is_alphabetic() => rev.next().map_or(true, |p| !p.is_alphabetic()),
        _ => false,
    }
}

/// Strips trailing `,;:&|` separators, whitespace, and a period that does not close an initial.
pub(crate) fn trim_trailing_separators(s: &str) -> String {
    let mut out = s.trim_end().to_string();
    loop {
        match out.chars().last() {
            Some(',' | ';' | ':' | '&' | '|' | '-') => {
                out.pop();
            }
            Some('.') if !ends_with_initial(&out) => {
                out.pop();
            }
            _ => break,
        }
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
    }
    out
}

/// Title-cases each alphabetic run: `"DA SILVA-COSTA"` becomes `"Da Silva-Costa"`.
pub(crate) fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_start = false;
        } else {
            out.push(c);
            at_start = c != '\'';
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_lower() {
        assert_eq!(fold_lower("Herbário"), "herbario");
        assert_eq!(fold_lower("NÃO IDENTIFICADO"), "nao identificado");
        assert_eq!(fold_lower("Expedição"), "expedicao");
    }

    #[test]
    fn test_token_count() {
        assert_eq!(token_count("FORZZA, R.C."), 3);
        assert_eq!(token_count("FORZZA, R."), 2);
        assert_eq!(token_count("RAFAELA C. FORZZA"), 3);
        assert_eq!(token_count("... 12"), 0);
    }

    #[test]
    fn test_ends_with_initial() {
        assert!(ends_with_initial("SILVA, J.C."));
        assert!(ends_with_initial("J."));
        assert!(ends_with_initial("SILVA ,J . C ."));
        assert!(!ends_with_initial("SILVA JR ."));
        assert!(!ends_with_initial("SILVA JR."));
        assert!(!ends_with_initial("SILVA"));
    }

    #[test]
    fn test_trim_trailing_separators() {
        assert_eq!(trim_trailing_separators("SILVA, J.C.;  "), "SILVA, J.C.");
        assert_eq!(trim_trailing_separators("SILVA JR."), "SILVA JR");
        assert_eq!(trim_trailing_separators("Silva ,J . C . ;"), "Silva ,J . C .");
        assert_eq!(trim_trailing_separators("SILVA &"), "SILVA");
        assert_eq!(trim_trailing_separators(""), "");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("DA SILVA-COSTA"), "Da Silva-Costa");
        assert_eq!(title_case("D'ÁVILA"), "D'ávila");
        assert_eq!(title_case("TAKAKI"), "Takaki");
    }
}
