//! Rule documents: the YAML/JSON files a store is loaded from.
//!
//! A document maps payload names to either a literal payload or a rule list
//! under the reserved `__rules__` key:
//!
//! ```yaml
//! greeting: hello            # literal: one unconditional rule
//! emoji:
//!   __rules__:
//!     - targeting: { weather: [sunny] }
//!       payload: 😎
//!     - payload: bar
//! ```
//!
//! The `__rules__` check happens here, once, producing an explicit
//! [`InsertData`]. Past this boundary nothing inspects payload shapes, so a
//! payload is free to contain any keys.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::rule::PayloadRule;
use crate::StoreError;

/// Reserved key marking a rule list in a document.
pub const RULES_KEY: &str = "__rules__";

/// What to insert for one payload name.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertData {
    /// A single unconditional payload.
    Literal(Value),
    /// A full rule list.
    Rules(Vec<PayloadRule>),
}

impl InsertData {
    /// Classify a document value: an object whose only key is `__rules__` is a
    /// rule list, anything else is a literal.
    ///
    /// # Errors
    ///
    /// Returns a message if the `__rules__` value is not a list of rules.
    pub fn from_document_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(mut map) if map.len() == 1 && map.contains_key(RULES_KEY) => {
                let rules = map.remove(RULES_KEY).unwrap_or(Value::Null);
                serde_json::from_value(rules)
                    .map(Self::Rules)
                    .map_err(|e| format!("{RULES_KEY}: {e}"))
            }
            literal => Ok(Self::Literal(literal)),
        }
    }

    /// The rules this entry inserts.
    #[must_use]
    pub fn into_rules(self) -> Vec<PayloadRule> {
        match self {
            Self::Literal(payload) => vec![PayloadRule::new(payload)],
            Self::Rules(rules) => rules,
        }
    }
}

impl From<Vec<PayloadRule>> for InsertData {
    fn from(rules: Vec<PayloadRule>) -> Self {
        Self::Rules(rules)
    }
}

/// A parsed rule document: payload name → [`InsertData`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleDocument {
    entries: BTreeMap<String, InsertData>,
}

impl RuleDocument {
    /// Build from an already-parsed value (must be a mapping).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Document`] if the value is not a mapping or an
    /// entry's `__rules__` is malformed.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let Value::Object(map) = value else {
            return Err(document_error(format!(
                "expected a mapping of payload names, found {}",
                crate::validator::kind_of(&value)
            )));
        };
        let mut entries = BTreeMap::new();
        for (name, value) in map {
            let data = InsertData::from_document_value(value)
                .map_err(|e| document_error(format!("{name}.{e}")))?;
            entries.insert(name, data);
        }
        Ok(Self { entries })
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Document`] on malformed JSON or document shape.
    pub fn from_json_str(content: &str) -> Result<Self, StoreError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| document_error(format!("JSON parse error: {e}")))?;
        Self::from_value(value)
    }

    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Document`] on malformed YAML or document shape.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(content: &str) -> Result<Self, StoreError> {
        let value: Value = serde_yaml::from_str(content)
            .map_err(|e| document_error(format!("YAML parse error: {e}")))?;
        Self::from_value(value)
    }

    /// Read a document from disk. `.json` files parse as JSON, anything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Document`] if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| document_error(format!("failed to read \"{}\": {e}", path.display())))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            return Self::from_json_str(&content);
        }

        #[cfg(feature = "yaml")]
        {
            Self::from_yaml_str(&content)
        }
        #[cfg(not(feature = "yaml"))]
        {
            Err(document_error(format!(
                "\"{}\" is not JSON and YAML support is disabled",
                path.display()
            )))
        }
    }

    /// Payload names in the document.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// The entry for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&InsertData> {
        self.entries.get(name)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the document has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for RuleDocument {
    type Item = (String, InsertData);
    type IntoIter = std::collections::btree_map::IntoIter<String, InsertData>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

fn document_error(reason: String) -> StoreError {
    StoreError::Document { reason }
}
