//! Conformance test fixture runner
//!
//! Loads YAML fixtures and runs them against a store built from the
//! reference domain ([`crate::store`]).
//!
//! ```yaml
//! name: fallback
//! description: an untargeted last rule catches everything
//! rules:                     # one rule document, or a list applied in order
//!   emoji:
//!     __rules__:
//!       - { targeting: { weather: [sunny] }, payload: 😎 }
//!       - { payload: bar }
//! cases:
//!   - name: sunny
//!     payload: emoji
//!     query: { weather: sunny }
//!     expect: 😎
//! ```
//!
//! A case checks exactly one of `expect`, `expect_none`, `expect_all`,
//! `expect_each` (omit `payload`) or `expect_error` (issue paths).

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use tailor::{Query, RuleDocument, Store, StoreError};

/// A complete test fixture
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    pub name: String,
    pub description: String,
    /// Rule document(s) inserted into an empty reference store.
    #[serde(default)]
    pub rules: Value,
    /// Expected issue paths if loading `rules` must fail.
    #[serde(default)]
    pub expect_load_error: Option<Vec<String>>,
    /// Expected stored (normalized) rule list per payload name.
    #[serde(default)]
    pub canonical: BTreeMap<String, Value>,
    #[serde(default)]
    pub cases: Vec<TestCase>,
}

/// Test case
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestCase {
    pub name: String,
    /// Payload name to resolve; omitted for `expect_each`.
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub query: Query,
    #[serde(default)]
    pub expect: Option<Value>,
    #[serde(default)]
    pub expect_none: bool,
    #[serde(default)]
    pub expect_all: Option<Vec<Value>>,
    #[serde(default)]
    pub expect_each: Option<BTreeMap<String, Option<Value>>>,
    #[serde(default)]
    pub expect_error: Option<Vec<String>>,
}

/// What a case expects, or what the store produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Payload(Option<Value>),
    All(Vec<Value>),
    Each(BTreeMap<String, Option<Value>>),
    Error(Vec<String>),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payload(Some(value)) => write!(f, "{value}"),
            Self::Payload(None) => f.write_str("no match"),
            Self::All(values) => write!(f, "all {values:?}"),
            Self::Each(map) => write!(f, "each {map:?}"),
            Self::Error(paths) => write!(f, "error at {paths:?}"),
        }
    }
}

impl TestCase {
    /// The outcome this case expects.
    ///
    /// # Panics
    ///
    /// Panics if the case names no expectation, or `expect_each` is combined
    /// with a payload name.
    pub fn expected(&self) -> Outcome {
        if let Some(paths) = &self.expect_error {
            return Outcome::Error(paths.clone());
        }
        if let Some(each) = &self.expect_each {
            assert!(
                self.payload.is_none(),
                "case '{}': expect_each resolves every name, drop `payload`",
                self.name
            );
            return Outcome::Each(each.clone());
        }
        if let Some(all) = &self.expect_all {
            return Outcome::All(all.clone());
        }
        if self.expect_none {
            return Outcome::Payload(None);
        }
        match &self.expect {
            Some(value) => Outcome::Payload(Some(value.clone())),
            None => panic!("case '{}' has no expectation", self.name),
        }
    }

    /// Resolve this case against `store`, in the shape the expectation asks for.
    pub async fn resolve(&self, store: &Store) -> Outcome {
        let result = match (&self.payload, self.expected()) {
            (None, _) => store
                .get_payload_for_each_name(&self.query)
                .await
                .map(Outcome::Each),
            (Some(name), Outcome::All(_)) => {
                store.get_payloads(name, &self.query).await.map(Outcome::All)
            }
            (Some(name), _) => store
                .get_payload(name, &self.query)
                .await
                .map(Outcome::Payload),
        };
        result.unwrap_or_else(|err| Outcome::Error(error_paths(&err)))
    }
}

/// Issue paths for validation errors; the error text otherwise.
fn error_paths(err: &StoreError) -> Vec<String> {
    match err.as_validation() {
        Some(validation) => validation.paths(),
        None => vec![err.to_string()],
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of running a single test case
#[derive(Debug)]
pub struct CaseResult {
    pub case_name: String,
    pub passed: bool,
    pub expected: Outcome,
    pub actual: Outcome,
}

impl Fixture {
    /// Parse a fixture from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Parse multiple fixtures from a YAML file with `---` separators
    pub fn from_yaml_multi(yaml: &str) -> Result<Vec<Self>, serde_yaml::Error> {
        let mut fixtures = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(yaml) {
            fixtures.push(Self::deserialize(doc)?);
        }
        Ok(fixtures)
    }

    /// Build the reference store and insert this fixture's documents in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError`] a document produces.
    pub async fn load(&self) -> Result<Store, StoreError> {
        let documents = match &self.rules {
            Value::Null => Vec::new(),
            Value::Array(documents) => documents.clone(),
            document => vec![document.clone()],
        };
        let mut store = crate::store()?;
        for document in documents {
            store = store
                .insert_document(RuleDocument::from_value(document)?)
                .await?;
        }
        Ok(store)
    }

    /// Run all test cases and return results.
    ///
    /// A fixture with `expect_load_error` yields a single `load` result.
    pub async fn run(&self) -> Vec<CaseResult> {
        let store = match (self.load().await, &self.expect_load_error) {
            (Err(err), Some(paths)) => {
                return vec![CaseResult::new(
                    "load",
                    Outcome::Error(paths.clone()),
                    Outcome::Error(error_paths(&err)),
                )];
            }
            (Ok(_), Some(paths)) => {
                return vec![CaseResult::new(
                    "load",
                    Outcome::Error(paths.clone()),
                    Outcome::Payload(None),
                )];
            }
            (Err(err), None) => {
                panic!("Fixture '{}' failed to load: {err}", self.name);
            }
            (Ok(store), None) => store,
        };

        let mut results: Vec<CaseResult> = self
            .canonical
            .iter()
            .map(|(name, expected)| {
                let actual = store
                    .rules(name)
                    .and_then(|rules| serde_json::to_value(rules).ok())
                    .unwrap_or(Value::Null);
                CaseResult::new(
                    format!("canonical {name}"),
                    Outcome::Payload(Some(expected.clone())),
                    Outcome::Payload(Some(actual)),
                )
            })
            .collect();

        for case in &self.cases {
            let actual = case.resolve(&store).await;
            results.push(CaseResult::new(case.name.clone(), case.expected(), actual));
        }
        results
    }

    /// Run all test cases and panic on first failure
    pub async fn run_and_assert(&self) {
        let results = self.run().await;
        for result in results {
            assert!(
                result.passed,
                "Fixture '{}' case '{}' failed: expected {}, got {}",
                self.name, result.case_name, result.expected, result.actual
            );
        }
    }
}

impl CaseResult {
    fn new(case_name: impl Into<String>, expected: Outcome, actual: Outcome) -> Self {
        Self {
            case_name: case_name.into(),
            passed: expected == actual,
            expected,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIXTURE: &str = r"
name: smoke
description: literal and rule list
rules:
  greeting: hello
  emoji:
    __rules__:
      - { targeting: { highTide: true }, payload: 🌊 }
      - { payload: bar }
cases:
  - name: tide
    payload: emoji
    query: { highTide: true }
    expect: 🌊
  - name: each
    query: {}
    expect_each: { emoji: bar, greeting: hello, count: null, tags: null, banner: null }
  - name: bad query
    payload: emoji
    query: { highTide: 3 }
    expect_error: [query.highTide]
";

    #[tokio::test]
    async fn smoke_fixture_passes() {
        let fixture = Fixture::from_yaml(FIXTURE).unwrap();
        let results = fixture.run().await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.passed), "{results:?}");
    }

    #[tokio::test]
    async fn wrong_expectation_fails() {
        let mut fixture = Fixture::from_yaml(FIXTURE).unwrap();
        fixture.cases[0].expect = Some(json!("nope"));
        let results = fixture.run().await;
        assert!(!results[0].passed);
        assert_eq!(results[0].actual, Outcome::Payload(Some(json!("🌊"))));
    }

    #[test]
    fn multi_document_yaml() {
        let yaml = format!("{FIXTURE}---\n{FIXTURE}");
        assert_eq!(Fixture::from_yaml_multi(&yaml).unwrap().len(), 2);
    }
}
