//! Label expression matching
//!
//! A category rule lists label expressions. Each expression is parsed once
//! into one of a closed set of forms and then matched against the label set
//! of a thread:
//!
//! - **Alias**: Gmail search syntax such as `is:important`, translated to the
//!   system label it stands for (`IMPORTANT`)
//! - **Exact**: a literal label name
//! - **Glob**: a shell-style wildcard pattern (`*`, `?`, `[...]`)
//!
//! Matching is case-sensitive, mirroring how the provider stores labels.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::warn;

/// Gmail search aliases and the system labels they resolve to
static GMAIL_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert("is:important", "IMPORTANT");
    map.insert("is:starred", "STARRED");
    map.insert("is:unread", "UNREAD");
    map.insert("is:read", "READ");
    map.insert("is:sent", "SENT");
    map.insert("is:draft", "DRAFT");
    map.insert("is:inbox", "INBOX");
    map.insert("is:spam", "SPAM");
    map.insert("is:trash", "TRASH");
    map.insert("is:chat", "CHAT");
    map
});

const ALIAS_PREFIX: &str = "is:";

/// One parsed label expression
#[derive(Debug, Clone)]
pub enum LabelExpression {
    /// Recognized alias, holding the resolved system label
    Alias { alias: String, label: &'static str },
    /// `is:` token with no known translation; never matches
    UnknownAlias(String),
    /// Literal label
    Exact(String),
    /// Wildcard pattern compiled to an anchored regex
    Glob { pattern: String, regex: Regex },
}

impl LabelExpression {
    /// Parse a configured expression
    ///
    /// Unrecognized aliases are logged and kept as an always-false
    /// expression instead of failing the configuration.
    pub fn parse(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with(ALIAS_PREFIX) {
            return match GMAIL_ALIASES.get(lower.as_str()) {
                Some(&label) => LabelExpression::Alias {
                    alias: raw.to_string(),
                    label,
                },
                None => {
                    warn!(
                        "Unrecognized label alias '{}' in category rules; it will never match",
                        raw
                    );
                    LabelExpression::UnknownAlias(raw.to_string())
                }
            };
        }

        if is_glob(raw) {
            match Regex::new(&glob_to_regex(raw)) {
                Ok(regex) => {
                    return LabelExpression::Glob {
                        pattern: raw.to_string(),
                        regex,
                    }
                }
                Err(e) => {
                    warn!(
                        "Label pattern '{}' could not be compiled ({}); matching it literally",
                        raw, e
                    );
                }
            }
        }

        LabelExpression::Exact(raw.to_string())
    }

    /// Check a single label
    pub fn matches_label(&self, label: &str) -> bool {
        match self {
            LabelExpression::Alias { label: target, .. } => label == *target,
            LabelExpression::UnknownAlias(_) => false,
            LabelExpression::Exact(expected) => label == expected,
            LabelExpression::Glob { regex, .. } => regex.is_match(label),
        }
    }

    /// True if any label matches this expression
    pub fn matches_any<'a, I>(&self, labels: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        labels.into_iter().any(|label| self.matches_label(label))
    }

    /// The expression as written in the configuration
    pub fn as_str(&self) -> &str {
        match self {
            LabelExpression::Alias { alias, .. } => alias,
            LabelExpression::UnknownAlias(raw) => raw,
            LabelExpression::Exact(label) => label,
            LabelExpression::Glob { pattern, .. } => pattern,
        }
    }
}

impl fmt::Display for LabelExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True if any expression matches any label
pub fn matches_labels(labels: &BTreeSet<String>, expressions: &[LabelExpression]) -> bool {
    expressions.iter().any(|expr| expr.matches_any(labels))
}

fn is_glob(raw: &str) -> bool {
    raw.contains(['*', '?', '['])
}

/// Translate a shell wildcard into an anchored regex
///
/// `*` matches any run of characters (including `/`), `?` one character,
/// `[...]` a character class with `!` for negation. An unterminated `[` is
/// taken literally.
fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("^(?s:");

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                out.push_str(".*");
                i += 1;
            }
            '?' => {
                out.push('.');
                i += 1;
            }
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    let mut body: String = chars[i + 1..end].iter().collect();
                    let negated = body.starts_with('!');
                    if negated {
                        body.remove(0);
                    }
                    out.push('[');
                    if negated {
                        out.push('^');
                    }
                    out.push_str(&escape_class_body(&body));
                    out.push(']');
                    i = end + 1;
                }
                None => {
                    out.push_str(r"\[");
                    i += 1;
                }
            },
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
                i += 1;
            }
        }
    }

    out.push_str(")$");
    out
}

/// Index of the `]` closing the class opened at `start`, if any
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if j < chars.len() && chars[j] == '!' {
        j += 1;
    }
    // A leading ']' is part of the class
    if j < chars.len() && chars[j] == ']' {
        j += 1;
    }
    while j < chars.len() {
        if chars[j] == ']' {
            return Some(j);
        }
        j += 1;
    }
    None
}

fn escape_class_body(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    for c in body.chars() {
        match c {
            '\\' | '[' | ']' | '^' | '&' | '~' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
