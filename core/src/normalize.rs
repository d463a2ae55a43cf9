//! Rule normalization: spread, validate, merge.
//!
//! Author rules go through three passes:
//!
//! 1. **Validate** every payload and targeting value, collecting every issue
//!    of the batch (no fail-fast). Validators may coerce; the coerced values
//!    are what gets stored.
//! 2. **Spread** alternatives (`targeting: [a, b]`) into adjacent rules.
//! 3. **Merge** each rule onto the accumulated list. Two adjacent rules combine
//!    when their ordinary targeting is equal and at least one of them also
//!    targets fall-through dimensions; they then share one [`FallThroughRule`].
//!
//! Appending to an existing canonical list only folds new rules onto its tail,
//! so the result equals normalizing the whole flat history from scratch.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Issue, IssueKind, IssuePath, ValidationError};
use crate::registry::TargetingRegistry;
use crate::rule::{flatten, FallThroughRule, PayloadRule, Rule, Targeting, TargetingSet};
use crate::validator::Validator;
use crate::{MAX_RULES_PER_PAYLOAD, MAX_TARGETING_ALTERNATIVES};

/// Normalizes rule batches for one payload name.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    name: &'a str,
    payload: &'a dyn Validator,
    ordinary: &'a TargetingRegistry,
    fall_through: &'a TargetingRegistry,
}

impl<'a> Normalizer<'a> {
    /// A normalizer for payload `name`.
    #[must_use]
    pub fn new(
        name: &'a str,
        payload: &'a dyn Validator,
        ordinary: &'a TargetingRegistry,
        fall_through: &'a TargetingRegistry,
    ) -> Self {
        Self {
            name,
            payload,
            ordinary,
            fall_through,
        }
    }

    /// Validate and normalize a flat batch into a canonical list.
    ///
    /// # Errors
    ///
    /// Returns every issue found in the batch.
    pub async fn normalize(&self, rules: Vec<PayloadRule>) -> Result<Vec<Rule>, ValidationError> {
        self.extend(&[], rules).await
    }

    /// Validate `rules` and fold them onto the canonical list `existing`.
    ///
    /// Only the new rules are validated; `existing` is trusted to be canonical.
    /// Issue paths index into `rules`.
    ///
    /// # Errors
    ///
    /// Returns every issue found in `rules`, plus a `TooManyRules` issue when
    /// the combined list would exceed [`MAX_RULES_PER_PAYLOAD`].
    pub async fn extend(
        &self,
        existing: &[Rule],
        rules: Vec<PayloadRule>,
    ) -> Result<Vec<Rule>, ValidationError> {
        let base = IssuePath::root(self.name).key("rules");
        let mut issues = Vec::new();
        let mut spread = Vec::with_capacity(rules.len());

        for (index, rule) in rules.into_iter().enumerate() {
            let path = base.index(index);
            if let Some(valid) = self.validate(&path, rule, &mut issues).await {
                spread.extend(spread_rule(valid));
            }
        }

        let total = existing.iter().map(Rule::leaf_count).sum::<usize>() + spread.len();
        if total > MAX_RULES_PER_PAYLOAD {
            issues.push(Issue::new(
                base,
                IssueKind::TooManyRules,
                format!("{total} rules, but maximum allowed is {MAX_RULES_PER_PAYLOAD}"),
            ));
        }
        ValidationError::check(issues)?;

        let mut canonical = existing.to_vec();
        for rule in spread {
            self.push(&mut canonical, rule);
        }
        Ok(canonical)
    }

    /// Re-fold a list from its flattened form without validating.
    ///
    /// Canonical input comes back unchanged.
    #[must_use]
    pub fn recombine(&self, rules: &[Rule]) -> Vec<Rule> {
        let mut canonical = Vec::with_capacity(rules.len());
        for rule in flatten(rules) {
            for spread in spread_rule(rule) {
                self.push(&mut canonical, spread);
            }
        }
        canonical
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════════════════

    async fn validate(
        &self,
        path: &IssuePath,
        rule: PayloadRule,
        issues: &mut Vec<Issue>,
    ) -> Option<PayloadRule> {
        let before = issues.len();

        let targeting = match rule.targeting {
            None => None,
            Some(Targeting::Set(set)) => {
                let set = self.validate_set(&path.key("targeting"), set, issues).await;
                Some(Targeting::Set(set))
            }
            Some(Targeting::AnyOf(sets)) if sets.len() > MAX_TARGETING_ALTERNATIVES => {
                issues.push(Issue::new(
                    path.key("targeting"),
                    IssueKind::TooManyRules,
                    format!(
                        "{} targeting alternatives, but maximum allowed is {MAX_TARGETING_ALTERNATIVES}",
                        sets.len()
                    ),
                ));
                None
            }
            Some(Targeting::AnyOf(sets)) => {
                let mut validated = Vec::with_capacity(sets.len());
                for (alternative, set) in sets.into_iter().enumerate() {
                    let set_path = path.key("targeting").index(alternative);
                    validated.push(self.validate_set(&set_path, set, issues).await);
                }
                Some(Targeting::AnyOf(validated))
            }
        };

        let payload = match self.payload.validate(&rule.payload).await {
            Ok(payload) => payload,
            Err(message) => {
                issues.push(Issue::invalid(path.key("payload"), message));
                Value::Null
            }
        };

        (issues.len() == before).then_some(PayloadRule { targeting, payload })
    }

    async fn validate_set(
        &self,
        path: &IssuePath,
        set: TargetingSet,
        issues: &mut Vec<Issue>,
    ) -> TargetingSet {
        let mut validated = TargetingSet::new();
        for (dimension, value) in set {
            let descriptor = self
                .ordinary
                .lookup(&dimension)
                .or_else(|| self.fall_through.lookup(&dimension));
            let Some(descriptor) = descriptor else {
                issues.push(Issue::new(
                    path.key(dimension.as_str()),
                    IssueKind::UnknownTargetingDimension,
                    format!("unknown targeting dimension \"{dimension}\""),
                ));
                continue;
            };
            match descriptor.targeting_validator().validate(&value).await {
                Ok(coerced) => {
                    validated.insert(dimension, coerced);
                }
                Err(message) => issues.push(Issue::invalid(path.key(dimension.as_str()), message)),
            }
        }
        validated
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Merge
    // ═══════════════════════════════════════════════════════════════════════

    fn push(&self, canonical: &mut Vec<Rule>, rule: PayloadRule) {
        match canonical.pop() {
            Some(prev) if self.can_combine(&prev, &rule) => {
                canonical.push(self.merge(prev, rule));
            }
            Some(prev) => {
                canonical.push(prev);
                canonical.push(self.place(rule));
            }
            None => canonical.push(self.place(rule)),
        }
    }

    /// Ordinary targeting must be equal and one side must target fall-through
    /// dimensions. An accumulated gate counts as such a side, so a plain rule
    /// with the gate's ordinary targeting joins it as an untargeted nested rule.
    fn can_combine(&self, prev: &Rule, rule: &PayloadRule) -> bool {
        let Some(next) = single_set(rule) else {
            return false;
        };
        let (prev_ordinary, prev_nested) = match prev {
            Rule::FallThrough(gate) => (self.ordinary_subset(&gate.targeting), true),
            Rule::Payload(prev) => match single_set(prev) {
                Some(set) => (self.ordinary_subset(set), self.uses_fall_through(set)),
                None => return false,
            },
        };
        prev_ordinary == self.ordinary_subset(next) && (prev_nested || self.uses_fall_through(next))
    }

    fn merge(&self, prev: Rule, rule: PayloadRule) -> Rule {
        let mut gate = match prev {
            Rule::FallThrough(gate) => gate,
            Rule::Payload(prev) => self.split_fall_through(prev),
        };
        gate.fall_through
            .extend(self.split_fall_through(rule).fall_through);
        Rule::FallThrough(gate)
    }

    fn place(&self, rule: PayloadRule) -> Rule {
        match single_set(&rule) {
            Some(set) if self.uses_fall_through(set) => {
                Rule::FallThrough(self.split_fall_through(rule))
            }
            _ => Rule::Payload(rule),
        }
    }

    fn split_fall_through(&self, rule: PayloadRule) -> FallThroughRule {
        let set = match rule.targeting {
            Some(Targeting::Set(set)) => set,
            Some(Targeting::AnyOf(_)) | None => TargetingSet::new(),
        };
        let (targeting, nested): (TargetingSet, TargetingSet) =
            set.into_iter().partition(|(key, _)| self.ordinary.contains(key));
        FallThroughRule {
            targeting,
            fall_through: vec![PayloadRule {
                targeting: (!nested.is_empty()).then_some(Targeting::Set(nested)),
                payload: rule.payload,
            }],
        }
    }

    fn ordinary_subset<'s>(&self, set: &'s TargetingSet) -> BTreeMap<&'s str, &'s Value> {
        set.iter()
            .filter(|(key, _)| self.ordinary.contains(key))
            .map(|(key, value)| (key.as_str(), value))
            .collect()
    }

    fn uses_fall_through(&self, set: &TargetingSet) -> bool {
        set.keys().any(|key| !self.ordinary.contains(key))
    }
}

/// The rule's single targeting set; an untargeted rule counts as the empty set.
/// `None` for rules carrying alternatives.
fn single_set(rule: &PayloadRule) -> Option<&TargetingSet> {
    static EMPTY: TargetingSet = TargetingSet::new();
    match &rule.targeting {
        None => Some(&EMPTY),
        Some(Targeting::Set(set)) => Some(set),
        Some(Targeting::AnyOf(_)) => None,
    }
}

/// One rule per targeting alternative; empty sets become untargeted.
fn spread_rule(rule: PayloadRule) -> Vec<PayloadRule> {
    let plain = |set: TargetingSet, payload: Value| PayloadRule {
        targeting: (!set.is_empty()).then_some(Targeting::Set(set)),
        payload,
    };
    match rule.targeting {
        None => vec![rule],
        Some(Targeting::Set(set)) => vec![plain(set, rule.payload)],
        Some(Targeting::AnyOf(sets)) if sets.is_empty() => vec![PayloadRule {
            targeting: None,
            payload: rule.payload,
        }],
        Some(Targeting::AnyOf(sets)) => sets
            .into_iter()
            .map(|set| plain(set, rule.payload.clone()))
            .collect(),
    }
}
