//! Evaluation trace types for debugging resolution.
//!
//! Trace types mirror the rule types ([`Rule`](crate::Rule),
//! [`TargetingSet`](crate::TargetingSet)) but capture evaluation results
//! instead of inputs. Use [`Store::explain`](crate::Store::explain) to see why
//! a payload was (or was not) chosen.
//!
//! # Two Levels of Trace
//!
//! - [`SetTrace`]: per targeting set, what did each dimension say?
//! - [`EvalTrace`]: per rule list, which rules were tried and which one won?
//!
//! Inside a set, ALL dimensions are evaluated (no short-circuit) for maximum
//! debugging value. The `matched` results are still what resolution computes.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// What one dimension of a targeting set decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DimensionOutcome {
    /// The dimension's predicate accepted the targeting value.
    Matched,
    /// The dimension's predicate rejected the targeting value.
    Failed,
    /// The query lacks the field and the dimension requires it.
    MissingQuery,
    /// The dimension is not registered; treated as no match.
    Unknown,
}

impl DimensionOutcome {
    /// Whether this outcome lets the set match.
    #[must_use]
    pub fn matched(self) -> bool {
        self == Self::Matched
    }
}

/// One dimension of a targeting set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionTrace {
    /// Dimension name.
    pub dimension: String,
    /// The rule's targeting value for this dimension.
    pub targeting: Value,
    /// What the evaluator decided.
    pub outcome: DimensionOutcome,
}

/// One targeting set (AND of its dimensions).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetTrace {
    /// Whether every dimension matched.
    pub matched: bool,
    /// Every dimension, in key order.
    pub dimensions: Vec<DimensionTrace>,
}

/// One rule's evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleTrace {
    /// Position in the rule list (or in the nested list for fall-through entries).
    pub index: usize,
    /// Whether the rule produced a payload.
    pub matched: bool,
    /// Targeting sets tried (OR). Empty for an untargeted rule.
    pub sets: Vec<SetTrace>,
    /// Nested steps of a fall-through rule whose gate matched.
    /// Stops after the first match.
    pub nested: Vec<RuleTrace>,
    /// The payload produced, if any.
    pub payload: Option<Value>,
}

/// Trace of a full rule-list evaluation.
///
/// # INV: `result` == `get_payload()` result
///
/// The `result` field always equals what [`Store::get_payload`](crate::Store::get_payload)
/// returns for the same name and query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalTrace {
    /// The payload name evaluated.
    pub name: String,
    /// The final result (identical to what `get_payload()` returns).
    pub result: Option<Value>,
    /// Each rule evaluated, in order. Stops after the first match.
    pub steps: Vec<RuleTrace>,
}

impl fmt::Display for EvalTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Some(payload) => writeln!(f, "{} → {payload}", self.name)?,
            None => writeln!(f, "{} → (no match)", self.name)?,
        }
        for step in &self.steps {
            write_rule(f, step, 1)?;
        }
        Ok(())
    }
}

fn write_rule(f: &mut fmt::Formatter<'_>, step: &RuleTrace, depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    let mark = if step.matched { "✓" } else { "✗" };
    write!(f, "{indent}{mark} [{}]", step.index)?;
    if step.sets.is_empty() {
        write!(f, " (always)")?;
    }
    for (position, set) in step.sets.iter().enumerate() {
        if position > 0 {
            write!(f, " |")?;
        }
        for dim in &set.dimensions {
            write!(f, " {}={} {:?}", dim.dimension, dim.targeting, dim.outcome)?;
        }
    }
    if let Some(payload) = &step.payload {
        write!(f, " → {payload}")?;
    }
    writeln!(f)?;
    for nested in &step.nested {
        write_rule(f, nested, depth + 1)?;
    }
    Ok(())
}
