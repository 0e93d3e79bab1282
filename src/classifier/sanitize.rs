//! Removal of trailing specimen and collection numbers.
//!
//! Only codes at the end of the string are removed. A number between two
//! names is kept because it marks a list of collectors.

use std::sync::OnceLock;

use regex::Regex;

use crate::text::cached;

static TRAILING_PAREN_NUMBER: OnceLock<Regex> = OnceLock::new();
static TRAILING_NUMBER: OnceLock<Regex> = OnceLock::new();

/// Strips trailing `(67)`, `1007`, `1092A` style codes.
pub(crate) fn strip_specimen_codes(text: &str) -> String {
    let paren = cached(&TRAILING_PAREN_NUMBER, r"\s*\(\s*\d+[A-Za-z]?\s*\)\s*$");
    let bare = cached(&TRAILING_NUMBER, r"\s+(?:n[º°o]\.?\s*)?\d+[A-Za-z]?\s*$");

    let mut out = text.trim().to_string();
    loop {
        let next = bare.replace(&paren.replace(&out, ""), "").trim_end().to_string();
        if next == out {
            return out;
        }
        out = next;
    }
}
