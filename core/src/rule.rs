//! Rule types: what authors write and what the store keeps.
//!
//! Authors supply flat [`PayloadRule`]s. A rule's `targeting` is one
//! [`TargetingSet`] (every key must match) or a list of alternatives (any set
//! may match). Normalization turns the flat list into canonical [`Rule`]s:
//! alternatives are spread into adjacent rules and rules sharing their
//! ordinary targeting are nested under one [`FallThroughRule`].
//!
//! ```yaml
//! - targeting: { weather: [sunny] }
//!   payload: 😎
//! - targeting: [{ weather: [rainy] }, { highTide: true }]
//!   payload: ☂️
//! - payload: bar
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dimension name → targeting value. All keys must match (AND).
pub type TargetingSet = BTreeMap<String, Value>;

/// A canonical rule list, shared between snapshots.
pub type RuleList = Arc<[Rule]>;

/// Targeting attached to a [`PayloadRule`].
///
/// Deserializes from a mapping (one set) or an array of mappings (alternatives).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Targeting {
    /// One targeting set.
    Set(TargetingSet),
    /// Alternative targeting sets; any one matching is enough (OR).
    AnyOf(Vec<TargetingSet>),
}

impl Targeting {
    /// The targeting sets, in order. A single set yields one element.
    #[must_use]
    pub fn sets(&self) -> &[TargetingSet] {
        match self {
            Self::Set(set) => std::slice::from_ref(set),
            Self::AnyOf(sets) => sets,
        }
    }
}

impl From<TargetingSet> for Targeting {
    fn from(set: TargetingSet) -> Self {
        Self::Set(set)
    }
}

/// A rule that yields `payload` when its targeting matches.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use tailor::PayloadRule;
///
/// let rule = PayloadRule::new(json!("😎")).when("weather", json!(["sunny"]));
/// let parsed: PayloadRule =
///     serde_json::from_value(json!({"targeting": {"weather": ["sunny"]}, "payload": "😎"}))
///         .unwrap();
/// assert_eq!(rule, parsed);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadRule {
    /// Targeting; absent means the rule always matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeting: Option<Targeting>,
    /// The payload returned on a match.
    pub payload: Value,
}

impl PayloadRule {
    /// An unconditional rule.
    #[must_use]
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            targeting: None,
            payload: payload.into(),
        }
    }

    /// Require `dimension` to match `value`.
    ///
    /// On a rule with alternatives the key is added to every alternative.
    #[must_use]
    pub fn when(mut self, dimension: impl Into<String>, value: impl Into<Value>) -> Self {
        let (dimension, value) = (dimension.into(), value.into());
        match &mut self.targeting {
            None => {
                self.targeting = Some(Targeting::Set(BTreeMap::from([(dimension, value)])));
            }
            Some(Targeting::Set(set)) => {
                set.insert(dimension, value);
            }
            Some(Targeting::AnyOf(sets)) => {
                for set in sets {
                    set.insert(dimension.clone(), value.clone());
                }
            }
        }
        self
    }

    /// Replace the targeting with one set.
    #[must_use]
    pub fn with_targeting(mut self, set: TargetingSet) -> Self {
        self.targeting = Some(Targeting::Set(set));
        self
    }

    /// Replace the targeting with alternatives.
    #[must_use]
    pub fn with_any_of(mut self, sets: Vec<TargetingSet>) -> Self {
        self.targeting = Some(Targeting::AnyOf(sets));
        self
    }
}

/// Ordinary targeting gating an ordered list of rules keyed on fall-through dimensions.
///
/// Serialized as `{targeting, fallThrough}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FallThroughRule {
    /// Ordinary-dimension targeting; empty means always entered.
    #[serde(default)]
    pub targeting: TargetingSet,
    /// Nested rules, first match wins.
    pub fall_through: Vec<PayloadRule>,
}

/// A canonical rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rule {
    /// Gate plus nested rules. Listed first so `fallThrough` decides the shape.
    FallThrough(FallThroughRule),
    /// Plain targeting → payload.
    Payload(PayloadRule),
}

impl Rule {
    /// Number of leaf payload rules under this rule.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Payload(_) => 1,
            Self::FallThrough(rule) => rule.fall_through.len(),
        }
    }
}

impl From<PayloadRule> for Rule {
    fn from(rule: PayloadRule) -> Self {
        Self::Payload(rule)
    }
}

impl From<FallThroughRule> for Rule {
    fn from(rule: FallThroughRule) -> Self {
        Self::FallThrough(rule)
    }
}

/// Turn canonical rules back into flat author rules.
///
/// A fall-through rule becomes one rule per nested entry, with the gate's
/// targeting merged into each. Normalizing the result reproduces the input.
#[must_use]
pub fn flatten(rules: &[Rule]) -> Vec<PayloadRule> {
    let mut flat = Vec::with_capacity(rules.iter().map(Rule::leaf_count).sum());
    for rule in rules {
        match rule {
            Rule::Payload(rule) => flat.push(rule.clone()),
            Rule::FallThrough(gate) => {
                for nested in &gate.fall_through {
                    flat.push(merge_gate(&gate.targeting, nested));
                }
            }
        }
    }
    flat
}

fn merge_gate(gate: &TargetingSet, nested: &PayloadRule) -> PayloadRule {
    let merged = |set: &TargetingSet| {
        let mut merged = gate.clone();
        merged.extend(set.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    };
    let targeting = match &nested.targeting {
        None if gate.is_empty() => None,
        None => Some(Targeting::Set(gate.clone())),
        Some(Targeting::Set(set)) => Some(Targeting::Set(merged(set))),
        Some(Targeting::AnyOf(sets)) => Some(Targeting::AnyOf(sets.iter().map(merged).collect())),
    };
    PayloadRule {
        targeting,
        payload: nested.payload.clone(),
    }
}
