//! `StringMatchSpec` — string targeting values (exact, prefix, suffix, contains, regex)
//!
//! Dimensions such as a browser or user-agent signal rarely target one exact
//! string. A rule instead carries a match spec, and the dimension's predicate
//! tests the query string against it:
//!
//! ```yaml
//! targeting:
//!   browser: { regex: "Firefox/1[0-9]{2}" }
//! ```
//!
//! # Naming: Spec vs Matcher
//!
//! - [`StringMatchSpec`] = what the rule author wrote (serde-deserializable)
//! - [`StringMatcher`] = the compiled form used at evaluation time

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{MAX_PATTERN_LENGTH, MAX_REGEX_PATTERN_LENGTH};

/// A string match specification from a rule's targeting.
///
/// Serialized externally tagged, lowercase: `{"prefix": "Mozilla/"}`.
///
/// # Example
///
/// ```
/// use tailor::StringMatchSpec;
///
/// let spec = StringMatchSpec::Prefix("Mozilla/".into());
/// let matcher = spec.compile().unwrap();
/// assert!(matcher.matches("Mozilla/5.0"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringMatchSpec {
    /// Exact string equality.
    Exact(String),
    /// String starts with prefix.
    Prefix(String),
    /// String ends with suffix.
    Suffix(String),
    /// String contains substring.
    Contains(String),
    /// Regular expression match (Rust `regex` crate syntax, linear time).
    Regex(String),
}

impl StringMatchSpec {
    /// Parse a targeting value into a spec.
    ///
    /// # Errors
    ///
    /// Returns a message if the value is not a single-key `{kind: pattern}` object.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        serde_json::from_value(value.clone()).map_err(|e| format!("invalid string match: {e}"))
    }

    /// Check length limits, then compile into a runtime [`StringMatcher`].
    ///
    /// # Errors
    ///
    /// Returns a message if the pattern is too long or the regex does not compile.
    pub fn compile(&self) -> Result<StringMatcher, String> {
        self.check_pattern_length()?;
        Ok(match self {
            Self::Exact(v) => StringMatcher::Exact(v.clone()),
            Self::Prefix(v) => StringMatcher::Prefix(v.clone()),
            Self::Suffix(v) => StringMatcher::Suffix(v.clone()),
            Self::Contains(v) => StringMatcher::Contains(v.clone()),
            Self::Regex(v) => StringMatcher::Regex(
                Regex::new(v).map_err(|e| format!("invalid pattern \"{v}\": {e}"))?,
            ),
        })
    }

    fn check_pattern_length(&self) -> Result<(), String> {
        let (len, max) = match self {
            Self::Regex(pattern) => (pattern.len(), MAX_REGEX_PATTERN_LENGTH),
            Self::Exact(v) | Self::Prefix(v) | Self::Suffix(v) | Self::Contains(v) => {
                (v.len(), MAX_PATTERN_LENGTH)
            }
        };
        if len > max {
            return Err(format!(
                "pattern length is {len}, but maximum allowed is {max}"
            ));
        }
        Ok(())
    }
}

impl fmt::Display for StringMatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "Exact(\"{v}\")"),
            Self::Prefix(v) => write!(f, "Prefix(\"{v}\")"),
            Self::Suffix(v) => write!(f, "Suffix(\"{v}\")"),
            Self::Contains(v) => write!(f, "Contains(\"{v}\")"),
            Self::Regex(v) => write!(f, "Regex(\"{v}\")"),
        }
    }
}

/// Compiled string matcher.
#[derive(Debug, Clone)]
pub enum StringMatcher {
    /// Exact string equality (case-sensitive, no trimming).
    Exact(String),
    /// String starts with prefix.
    Prefix(String),
    /// String ends with suffix.
    Suffix(String),
    /// String contains substring.
    Contains(String),
    /// Regex search (unanchored unless the pattern anchors itself).
    Regex(Regex),
}

impl StringMatcher {
    /// Test `input` against this matcher.
    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        match self {
            Self::Exact(v) => input == v,
            Self::Prefix(v) => input.starts_with(v.as_str()),
            Self::Suffix(v) => input.ends_with(v.as_str()),
            Self::Contains(v) => input.contains(v.as_str()),
            Self::Regex(re) => re.is_match(input),
        }
    }
}
