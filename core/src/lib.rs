//! tailor - typed rule-targeting engine
//!
//! Each named payload carries an ordered list of rules. A rule pairs targeting
//! (dimension → value) with a payload; resolving a name against a query returns
//! the payload of the first rule whose targeting matches.
//!
//! # Architecture
//!
//! - [`Validator`]: validate-or-coerce capability for payloads, targeting and query values
//! - [`PredicateFactory`] / [`TargetingPredicate`]: how a dimension compares a
//!   rule's targeting value with the query (possibly asynchronous)
//! - [`TargetingRegistry`]: dimension name → [`TargetingDescriptor`]
//! - [`Normalizer`]: validates author rules and merges adjacent rules into
//!   [`FallThroughRule`]s
//! - [`Store`]: immutable snapshot; every mutation returns a new one
//! - [`RulePredicate`]: per-query matcher behind the resolution API
//!
//! # Key Design Insights
//!
//! 1. **First match wins**: rules are evaluated strictly in list order, one at
//!    a time, even when predicates are asynchronous.
//!
//! 2. **Two tiers**: ordinary dimensions gate a rule; fall-through dimensions
//!    pick between rules that share the same gate.
//!
//! 3. **Missing query → no match**: a rule targeting a dimension the query
//!    lacks does not match, unless the dimension was registered with
//!    `requires_query(false)`.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tailor::prelude::*;
//!
//! # futures::executor::block_on(async {
//! let store = Store::builder()
//!     .payload("emoji", validator::string())
//!     .targeting(
//!         "weather",
//!         TargetingDescriptor::new(targeting::one_of())
//!             .targeting(validator::array_of(validator::string()))
//!             .query(validator::string()),
//!     )
//!     .targeting(
//!         "highTide",
//!         TargetingDescriptor::new(targeting::equals()).query(validator::boolean()),
//!     )
//!     .build()?
//!     .add_rules(
//!         "emoji",
//!         vec![
//!             PayloadRule::new("😎").when("weather", json!(["sunny"])),
//!             PayloadRule::new("☂️").when("weather", json!(["rainy"])),
//!             PayloadRule::new("🌊").when("highTide", true),
//!             PayloadRule::new("bar"),
//!         ],
//!     )
//!     .await?;
//!
//! let query = Query::new().with("highTide", true);
//! assert_eq!(store.get_payload("emoji", &query).await?, Some(json!("🌊")));
//! assert_eq!(store.get_payload("emoji", &Query::new()).await?, Some(json!("bar")));
//! # Ok::<(), StoreError>(())
//! # }).unwrap();
//! ```

// ═══════════════════════════════════════════════════════════════════════════════
// Modules
// ═══════════════════════════════════════════════════════════════════════════════

mod document;
mod error;
mod normalize;
mod predicate;
mod query;
mod registry;
mod rule;
mod shared;
mod store;
mod string_match;
mod trace;

pub mod targeting;
pub mod validator;

// ═══════════════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════════════

// Core types
pub use normalize::Normalizer;
pub use predicate::{validate_query, RulePredicate};
pub use query::Query;
pub use registry::{TargetingDescriptor, TargetingRegistry};
pub use rule::{flatten, FallThroughRule, PayloadRule, Rule, RuleList, Targeting, TargetingSet};
pub use store::{Store, StoreBuilder};
pub use string_match::{StringMatchSpec, StringMatcher};

// Capabilities
pub use targeting::{PredicateFactory, SharedPredicateFactory, TargetingPredicate};
pub use validator::{SharedValidator, Validator};

// Documents and snapshots
pub use document::{InsertData, RuleDocument, RULES_KEY};
pub use shared::{ReloadOutcome, Reloader, SharedStore};

// Errors
pub use error::{Issue, IssueKind, IssuePath, PathSegment, StoreError, ValidationError};

// Trace types
pub use trace::{DimensionOutcome, DimensionTrace, EvalTrace, RuleTrace, SetTrace};

// ═══════════════════════════════════════════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════════════════════════════════════════

/// Prelude module for convenient imports.
///
/// ```
/// use tailor::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Capability modules
        targeting,
        validator,
        // Trace types
        EvalTrace,
        // Documents
        InsertData,
        // Core types
        PayloadRule,
        // Traits
        PredicateFactory,
        Query,
        Rule,
        RuleDocument,
        Store,
        // Errors
        StoreError,
        TargetingDescriptor,
        TargetingPredicate,
        Validator,
    };
}

// ═══════════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum number of leaf rules in one payload's rule list.
///
/// Checked when rules are added; exceeding it is reported as an
/// [`IssueKind::TooManyRules`] issue.
pub const MAX_RULES_PER_PAYLOAD: usize = 4096;

/// Maximum number of alternative targeting sets on one author rule.
///
/// Same width protection as [`MAX_RULES_PER_PAYLOAD`], applied before spreading.
pub const MAX_TARGETING_ALTERNATIVES: usize = 256;

/// Maximum length for non-regex string match patterns (exact, prefix, suffix, contains).
pub const MAX_PATTERN_LENGTH: usize = 8192;

/// Maximum length for regex patterns.
///
/// Regex compilation is expensive even with the linear-time Rust `regex` crate.
/// Shorter limit than [`MAX_PATTERN_LENGTH`] because regex complexity scales
/// faster than literal matching.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4096;
