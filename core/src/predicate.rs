//! Predicate evaluation: deciding which rules match a query.
//!
//! A [`RulePredicate`] is built once per query. Building it invokes every
//! relevant dimension's [`PredicateFactory`](crate::PredicateFactory)
//! concurrently, so per-query setup costs O(dimensions), not O(rules).
//! Applying it to rules is then sequential: callers await each rule fully
//! before moving to the next, so slow predicates never reorder precedence.
//!
//! # Matching
//!
//! - No targeting: always matches.
//! - One set: every key must match (AND), checked in key order, stopping at
//!   the first failure.
//! - Alternatives: any set matching is enough (OR), first success wins.
//! - A key whose dimension is absent from the query fails unless the dimension
//!   was registered with `requires_query(false)`.
//! - A key naming an unregistered dimension logs a warning and fails.

use std::collections::BTreeMap;

use futures::future::join_all;
use serde_json::Value;
use tracing::warn;

use crate::error::{Issue, IssueKind, IssuePath, ValidationError};
use crate::registry::{TargetingDescriptor, TargetingRegistry};
use crate::rule::{PayloadRule, Rule, Targeting, TargetingSet};
use crate::targeting::TargetingPredicate;
use crate::trace::{DimensionOutcome, DimensionTrace, RuleTrace, SetTrace};
use crate::Query;

/// Validate and coerce a query against both registries.
///
/// Every field must name a registered dimension and pass its query validator.
///
/// # Errors
///
/// Returns a [`ValidationError`] with one issue per bad field, rooted at `query`.
pub async fn validate_query(
    ordinary: &TargetingRegistry,
    fall_through: &TargetingRegistry,
    query: &Query,
) -> Result<Query, ValidationError> {
    let mut issues = Vec::new();
    let mut validated = Query::new();

    for (field, value) in query.iter() {
        let path = IssuePath::root("query").key(field.as_str());
        let Some(descriptor) = lookup(ordinary, fall_through, field) else {
            issues.push(Issue::new(
                path,
                IssueKind::UnknownQueryField,
                format!("unknown query field \"{field}\""),
            ));
            continue;
        };
        match descriptor.query_validator().validate(value).await {
            Ok(coerced) => {
                validated.insert(field.clone(), coerced);
            }
            Err(message) => issues.push(Issue::invalid(path, message)),
        }
    }

    ValidationError::check(issues)?;
    Ok(validated)
}

fn lookup<'r>(
    ordinary: &'r TargetingRegistry,
    fall_through: &'r TargetingRegistry,
    name: &str,
) -> Option<&'r TargetingDescriptor> {
    ordinary.lookup(name).or_else(|| fall_through.lookup(name))
}

/// Per-query rule matcher.
pub struct RulePredicate<'s> {
    name: &'s str,
    ordinary: &'s TargetingRegistry,
    fall_through: &'s TargetingRegistry,
    resolved: BTreeMap<&'s str, Box<dyn TargetingPredicate>>,
}

impl<'s> RulePredicate<'s> {
    /// Build the per-dimension predicates for an already-validated `query`.
    ///
    /// A factory runs for every dimension the query carries, and for every
    /// dimension registered with `requires_query(false)`. `name` is the payload
    /// name used in log events.
    pub async fn build(
        name: &'s str,
        ordinary: &'s TargetingRegistry,
        fall_through: &'s TargetingRegistry,
        query: &Query,
    ) -> Self {
        let wanted: Vec<(&'s str, &'s TargetingDescriptor)> = ordinary
            .iter()
            .chain(fall_through.iter())
            .filter(|(dimension, descriptor)| {
                query.contains(dimension) || !descriptor.is_query_required()
            })
            .map(|(dimension, descriptor)| (dimension.as_str(), descriptor))
            .collect();

        let predicates = join_all(wanted.iter().map(|(dimension, descriptor)| {
            descriptor.predicate().create(query.get(dimension), query)
        }))
        .await;

        let resolved = wanted
            .into_iter()
            .map(|(dimension, _)| dimension)
            .zip(predicates)
            .collect();

        Self {
            name,
            ordinary,
            fall_through,
            resolved,
        }
    }

    /// Whether `rule` yields a payload for this query.
    pub async fn matches(&self, rule: &Rule) -> bool {
        self.first_payload(rule).await.is_some()
    }

    /// The payload `rule` yields: its own for a payload rule, the first
    /// matching nested payload for a fall-through rule whose gate matches.
    pub async fn first_payload<'r>(&self, rule: &'r Rule) -> Option<&'r Value> {
        match rule {
            Rule::Payload(rule) => self
                .matches_targeting(rule.targeting.as_ref())
                .await
                .then_some(&rule.payload),
            Rule::FallThrough(gate) => {
                if !self.matches_set(&gate.targeting).await {
                    return None;
                }
                for nested in &gate.fall_through {
                    if self.matches_targeting(nested.targeting.as_ref()).await {
                        return Some(&nested.payload);
                    }
                }
                None
            }
        }
    }

    /// Every payload `rule` yields, in nested order.
    pub async fn all_payloads<'r>(&self, rule: &'r Rule) -> Vec<&'r Value> {
        match rule {
            Rule::Payload(rule) => {
                if self.matches_targeting(rule.targeting.as_ref()).await {
                    vec![&rule.payload]
                } else {
                    Vec::new()
                }
            }
            Rule::FallThrough(gate) => {
                let mut payloads = Vec::new();
                if !self.matches_set(&gate.targeting).await {
                    return payloads;
                }
                for nested in &gate.fall_through {
                    if self.matches_targeting(nested.targeting.as_ref()).await {
                        payloads.push(&nested.payload);
                    }
                }
                payloads
            }
        }
    }

    /// Whether optional targeting matches.
    pub async fn matches_targeting(&self, targeting: Option<&Targeting>) -> bool {
        match targeting {
            None => true,
            Some(Targeting::Set(set)) => self.matches_set(set).await,
            Some(Targeting::AnyOf(sets)) if sets.is_empty() => true,
            Some(Targeting::AnyOf(sets)) => {
                for set in sets {
                    if self.matches_set(set).await {
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Whether every key of `set` matches, stopping at the first failure.
    pub async fn matches_set(&self, set: &TargetingSet) -> bool {
        for (dimension, value) in set {
            if !self.test(dimension, value).await.matched() {
                return false;
            }
        }
        true
    }

    async fn test(&self, dimension: &str, value: &Value) -> DimensionOutcome {
        if let Some(predicate) = self.resolved.get(dimension) {
            return if predicate.matches(value).await {
                DimensionOutcome::Matched
            } else {
                DimensionOutcome::Failed
            };
        }
        if lookup(self.ordinary, self.fall_through, dimension).is_some() {
            return DimensionOutcome::MissingQuery;
        }
        warn!(
            payload = self.name,
            dimension, "rule targets an unrecognized dimension, treating it as no match"
        );
        DimensionOutcome::Unknown
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Tracing
    // ═══════════════════════════════════════════════════════════════════════

    /// Evaluate `rule` recording every dimension outcome.
    ///
    /// Sets are evaluated in full (no short-circuit inside a set); nested
    /// fall-through steps stop after the first match.
    pub async fn trace(&self, index: usize, rule: &Rule) -> RuleTrace {
        match rule {
            Rule::Payload(rule) => self.trace_payload_rule(index, rule).await,
            Rule::FallThrough(gate) => {
                let gate_trace = self.trace_set(&gate.targeting).await;
                let mut step = RuleTrace {
                    index,
                    matched: false,
                    sets: if gate.targeting.is_empty() {
                        Vec::new()
                    } else {
                        vec![gate_trace.clone()]
                    },
                    nested: Vec::new(),
                    payload: None,
                };
                if !gate_trace.matched {
                    return step;
                }
                for (position, nested) in gate.fall_through.iter().enumerate() {
                    let nested_step = self.trace_payload_rule(position, nested).await;
                    let matched = nested_step.matched;
                    if matched {
                        step.matched = true;
                        step.payload = nested_step.payload.clone();
                    }
                    step.nested.push(nested_step);
                    if matched {
                        break;
                    }
                }
                step
            }
        }
    }

    async fn trace_payload_rule(&self, index: usize, rule: &PayloadRule) -> RuleTrace {
        let sets = match &rule.targeting {
            None => Vec::new(),
            Some(targeting) => {
                let mut sets = Vec::with_capacity(targeting.sets().len());
                for set in targeting.sets() {
                    let set_trace = self.trace_set(set).await;
                    let matched = set_trace.matched;
                    sets.push(set_trace);
                    if matched {
                        break;
                    }
                }
                sets
            }
        };
        let matched = sets.is_empty() || sets.iter().any(|s| s.matched);
        RuleTrace {
            index,
            matched,
            sets,
            nested: Vec::new(),
            payload: matched.then(|| rule.payload.clone()),
        }
    }

    async fn trace_set(&self, set: &TargetingSet) -> SetTrace {
        let mut dimensions = Vec::with_capacity(set.len());
        for (dimension, value) in set {
            dimensions.push(DimensionTrace {
                dimension: dimension.clone(),
                targeting: value.clone(),
                outcome: self.test(dimension, value).await,
            });
        }
        SetTrace {
            matched: dimensions.iter().all(|d| d.outcome.matched()),
            dimensions,
        }
    }
}
