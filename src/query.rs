//! Tag-filter extraction from raw search input.
//!
//! A query may embed one bracketed tag filter anywhere in the text:
//! `"[rust] pointer safety"` searches for `"pointer safety"` restricted to
//! documents tagged `rust`. Only the first bracket expression is honored;
//! any further ones stay in the text as literal characters.

use std::sync::LazyLock;

use regex::Regex;

/// Non-greedy bracketed segment, e.g. `[rust]`
static BRACKET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(.*?)\]").unwrap());

/// A raw query split into its free-text term and optional tag filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Free-text term; may be empty when the query was only a tag filter
    pub text: String,

    /// Tag filter extracted from the first bracket expression, if any
    pub tag: Option<String>,
}

/// Split a raw query string into free text and an optional tag filter.
///
/// The first `[value]` segment becomes the tag filter and is removed from
/// the text (brackets included); the remainder is whitespace-trimmed.
/// Blank bracket contents yield no filter, but the brackets are still
/// removed. Without a match the input is returned untouched.
pub fn parse_query(raw: &str) -> ParsedQuery {
    match BRACKET.captures(raw) {
        Some(caps) => {
            let matched = caps.get(0).unwrap();
            let inner = caps.get(1).map(|g| g.as_str()).unwrap_or("");

            let mut text = String::with_capacity(raw.len());
            text.push_str(&raw[..matched.start()]);
            text.push_str(&raw[matched.end()..]);

            let tag = if inner.trim().is_empty() {
                None
            } else {
                Some(inner.to_string())
            };

            ParsedQuery {
                text: text.trim().to_string(),
                tag,
            }
        }
        None => ParsedQuery {
            text: raw.to_string(),
            tag: None,
        },
    }
}
