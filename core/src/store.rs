//! The rule store: immutable snapshots of payload schemas, targeting
//! dimensions and canonical rule lists.
//!
//! Every mutation returns a new [`Store`]. Unchanged rule lists are shared
//! (`Arc`) between the old and new snapshot; the old one stays valid, so
//! readers holding it are never affected by a rebuild.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tailor::{targeting, validator, PayloadRule, Query, Store, TargetingDescriptor};
//!
//! # futures::executor::block_on(async {
//! let store = Store::builder()
//!     .payload("emoji", validator::string())
//!     .targeting(
//!         "weather",
//!         TargetingDescriptor::new(targeting::one_of()).query(validator::string()),
//!     )
//!     .build()
//!     .unwrap()
//!     .add_rules(
//!         "emoji",
//!         vec![
//!             PayloadRule::new("😎").when("weather", json!(["sunny"])),
//!             PayloadRule::new("bar"),
//!         ],
//!     )
//!     .await
//!     .unwrap();
//!
//! let sunny = Query::new().with("weather", "sunny");
//! assert_eq!(store.get_payload("emoji", &sunny).await.unwrap(), Some(json!("😎")));
//! assert_eq!(store.get_payload("emoji", &Query::new()).await.unwrap(), Some(json!("bar")));
//! # });
//! ```

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::document::{InsertData, RuleDocument};
use crate::error::{StoreError, ValidationError};
use crate::normalize::Normalizer;
use crate::predicate::{validate_query, RulePredicate};
use crate::registry::{TargetingDescriptor, TargetingRegistry};
use crate::rule::{flatten, PayloadRule, Rule, RuleList};
use crate::trace::EvalTrace;
use crate::validator::SharedValidator;
use crate::Query;

/// Builder for an empty [`Store`].
///
/// Declares payload names with their validators and, optionally, the initial
/// targeting dimensions. Duplicates are reported by [`build`](Self::build).
#[derive(Debug, Default)]
#[must_use]
pub struct StoreBuilder {
    payloads: BTreeMap<String, SharedValidator>,
    targeting: Vec<(String, TargetingDescriptor)>,
    fall_through: Vec<(String, TargetingDescriptor)>,
    duplicate: Option<String>,
}

impl StoreBuilder {
    /// Declare a payload name.
    pub fn payload(mut self, name: impl Into<String>, validator: SharedValidator) -> Self {
        match self.payloads.entry(name.into()) {
            Entry::Occupied(entry) => {
                self.duplicate.get_or_insert_with(|| entry.key().clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(validator);
            }
        }
        self
    }

    /// Register an ordinary targeting dimension.
    pub fn targeting(mut self, name: impl Into<String>, descriptor: TargetingDescriptor) -> Self {
        self.targeting.push((name.into(), descriptor));
        self
    }

    /// Register a fall-through targeting dimension.
    pub fn fall_through(mut self, name: impl Into<String>, descriptor: TargetingDescriptor) -> Self {
        self.fall_through.push((name.into(), descriptor));
        self
    }

    /// Build the store (no rules yet).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicatePayload`] or [`StoreError::DuplicateDimension`].
    pub fn build(self) -> Result<Store, StoreError> {
        if let Some(name) = self.duplicate {
            return Err(StoreError::DuplicatePayload { name });
        }
        let targeting = TargetingRegistry::new().extend(self.targeting)?;
        let fall_through = TargetingRegistry::new().extend(self.fall_through)?;
        check_disjoint(&targeting, &fall_through)?;

        Ok(Store {
            payloads: Arc::new(self.payloads),
            targeting,
            fall_through,
            rules: Arc::new(BTreeMap::new()),
        })
    }
}

fn check_disjoint(
    targeting: &TargetingRegistry,
    fall_through: &TargetingRegistry,
) -> Result<(), StoreError> {
    match fall_through.names().into_iter().find(|name| targeting.contains(name)) {
        Some(name) => Err(StoreError::DuplicateDimension {
            name: name.to_owned(),
        }),
        None => Ok(()),
    }
}

/// One immutable store snapshot.
#[derive(Debug, Clone)]
pub struct Store {
    payloads: Arc<BTreeMap<String, SharedValidator>>,
    targeting: TargetingRegistry,
    fall_through: TargetingRegistry,
    rules: Arc<BTreeMap<String, RuleList>>,
}

impl Store {
    /// Start declaring a store.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mutation (each returns a new snapshot)
    // ═══════════════════════════════════════════════════════════════════════

    /// Add ordinary targeting dimensions, re-validating every stored rule.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateDimension`] if a name is already registered in
    /// either registry; [`StoreError::Validation`] if a stored rule fails the
    /// new schemas. `self` is unchanged either way.
    pub async fn use_targeting<I, K>(&self, dimensions: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (K, TargetingDescriptor)>,
        K: Into<String>,
    {
        let targeting = self.targeting.extend(dimensions)?;
        check_disjoint(&targeting, &self.fall_through)?;
        self.revalidated(targeting, self.fall_through.clone()).await
    }

    /// Add fall-through targeting dimensions, re-validating every stored rule.
    ///
    /// # Errors
    ///
    /// Same as [`use_targeting`](Self::use_targeting).
    pub async fn use_fall_through_targeting<I, K>(&self, dimensions: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (K, TargetingDescriptor)>,
        K: Into<String>,
    {
        let fall_through = self.fall_through.extend(dimensions)?;
        check_disjoint(&self.targeting, &fall_through)?;
        self.revalidated(self.targeting.clone(), fall_through).await
    }

    async fn revalidated(
        &self,
        targeting: TargetingRegistry,
        fall_through: TargetingRegistry,
    ) -> Result<Self, StoreError> {
        let mut issues = Vec::new();
        let mut rules = BTreeMap::new();

        for (name, list) in self.rules.iter() {
            let validator = self.payload_validator(name)?;
            let normalizer = Normalizer::new(name, validator.as_ref(), &targeting, &fall_through);
            match normalizer.normalize(flatten(list)).await {
                Ok(canonical) => {
                    rules.insert(name.clone(), RuleList::from(canonical));
                }
                Err(err) => issues.extend(err.into_issues()),
            }
        }
        ValidationError::check(issues)?;

        debug!(
            dimensions = targeting.len(),
            fall_through_dimensions = fall_through.len(),
            payloads = rules.len(),
            "targeting extended"
        );
        Ok(Self {
            payloads: Arc::clone(&self.payloads),
            targeting,
            fall_through,
            rules: Arc::new(rules),
        })
    }

    /// Append rules to `name`'s list.
    ///
    /// New rules always land after the existing ones; existing precedence is
    /// never changed.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownPayloadName`] if `name` was not declared;
    /// [`StoreError::Validation`] listing every failing rule path. `self` is
    /// unchanged either way.
    pub async fn add_rules(
        &self,
        name: &str,
        rules: Vec<PayloadRule>,
    ) -> Result<Self, StoreError> {
        let validator = self.payload_validator(name)?;
        let existing = self.rule_list(name);
        let canonical = self
            .normalizer(name, validator)
            .extend(existing, rules)
            .await?;

        debug!(
            payload = name,
            before = leaf_count(existing),
            after = leaf_count(&canonical),
            "rules added"
        );
        let mut lists = (*self.rules).clone();
        lists.insert(name.to_owned(), RuleList::from(canonical));
        Ok(self.with_rules(lists))
    }

    /// Insert several names at once: a literal becomes one unconditional rule,
    /// a rule list is appended as by [`add_rules`](Self::add_rules).
    ///
    /// Issues are collected across every name before failing.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownPayloadName`] for the first undeclared name;
    /// otherwise [`StoreError::Validation`] with every issue of every name.
    pub async fn insert<I, K>(&self, data: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (K, InsertData)>,
        K: Into<String>,
    {
        let entries: Vec<(String, InsertData)> =
            data.into_iter().map(|(name, data)| (name.into(), data)).collect();
        for (name, _) in &entries {
            self.payload_validator(name)?;
        }

        let mut lists = (*self.rules).clone();
        let mut issues = Vec::new();
        for (name, data) in entries {
            let validator = self.payload_validator(&name)?;
            let result = {
                let existing = lists.get(&name).map_or(&[][..], |list| &list[..]);
                self.normalizer(&name, validator)
                    .extend(existing, data.into_rules())
                    .await
            };
            match result {
                Ok(canonical) => {
                    lists.insert(name, RuleList::from(canonical));
                }
                Err(err) => issues.extend(err.into_issues()),
            }
        }
        ValidationError::check(issues)?;

        debug!(payloads = lists.len(), "rules inserted");
        Ok(self.with_rules(lists))
    }

    /// Insert every entry of a parsed rule document.
    ///
    /// # Errors
    ///
    /// Same as [`insert`](Self::insert).
    pub async fn insert_document(&self, document: RuleDocument) -> Result<Self, StoreError> {
        self.insert(document).await
    }

    /// A snapshot with the same schemas and dimensions and no rules.
    #[must_use]
    pub fn remove_all_rules(&self) -> Self {
        debug!(payloads = self.rules.len(), "all rules removed");
        self.with_rules(BTreeMap::new())
    }

    fn with_rules(&self, rules: BTreeMap<String, RuleList>) -> Self {
        Self {
            payloads: Arc::clone(&self.payloads),
            targeting: self.targeting.clone(),
            fall_through: self.fall_through.clone(),
            rules: Arc::new(rules),
        }
    }

    fn normalizer<'a>(&'a self, name: &'a str, validator: &'a SharedValidator) -> Normalizer<'a> {
        Normalizer::new(name, validator.as_ref(), &self.targeting, &self.fall_through)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Resolution
    // ═══════════════════════════════════════════════════════════════════════

    /// The payload of the first matching rule of `name`, or `None`.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownPayloadName`], or [`StoreError::Validation`] for an
    /// invalid query (unknown fields included).
    pub async fn get_payload(&self, name: &str, query: &Query) -> Result<Option<Value>, StoreError> {
        let predicate = self.create_rule_predicate(name, query).await?;
        Ok(self.first_match(name, &predicate).await.cloned())
    }

    /// Payloads of every matching rule of `name`, in list order.
    ///
    /// # Errors
    ///
    /// Same as [`get_payload`](Self::get_payload).
    pub async fn get_payloads(&self, name: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        let predicate = self.create_rule_predicate(name, query).await?;
        let mut payloads = Vec::new();
        for (index, rule) in self.rule_list(name).iter().enumerate() {
            let matched = predicate.all_payloads(rule).await;
            trace!(payload = name, index, matched = matched.len(), "rule evaluated");
            payloads.extend(matched.into_iter().cloned());
        }
        Ok(payloads)
    }

    /// First matching payload for every declared name.
    ///
    /// The query is validated once; names are then resolved concurrently and
    /// independently of each other.
    ///
    /// # Errors
    ///
    /// [`StoreError::Validation`] for an invalid query.
    pub async fn get_payload_for_each_name(
        &self,
        query: &Query,
    ) -> Result<BTreeMap<String, Option<Value>>, StoreError> {
        let query = validate_query(&self.targeting, &self.fall_through, query).await?;
        let lookups = self.payloads.keys().map(|name| {
            let query = &query;
            async move {
                let predicate =
                    RulePredicate::build(name, &self.targeting, &self.fall_through, query).await;
                let payload = self.first_match(name, &predicate).await.cloned();
                (name.clone(), payload)
            }
        });
        Ok(join_all(lookups).await.into_iter().collect())
    }

    /// [`get_payload`](Self::get_payload), deserialized into `T`.
    ///
    /// # Errors
    ///
    /// As [`get_payload`](Self::get_payload), plus [`StoreError::PayloadType`]
    /// when the payload does not deserialize.
    pub async fn get_payload_as<T: DeserializeOwned>(
        &self,
        name: &str,
        query: &Query,
    ) -> Result<Option<T>, StoreError> {
        self.get_payload(name, query)
            .await?
            .map(|payload| {
                serde_json::from_value(payload).map_err(|e| StoreError::PayloadType {
                    name: name.to_owned(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Resolve `name` and record why each rule did or did not match.
    ///
    /// `result` equals what [`get_payload`](Self::get_payload) returns.
    ///
    /// # Errors
    ///
    /// Same as [`get_payload`](Self::get_payload).
    pub async fn explain(&self, name: &str, query: &Query) -> Result<EvalTrace, StoreError> {
        let predicate = self.create_rule_predicate(name, query).await?;
        let mut steps = Vec::new();
        let mut result = None;
        for (index, rule) in self.rule_list(name).iter().enumerate() {
            let step = predicate.trace(index, rule).await;
            let matched = step.matched;
            if matched {
                result = step.payload.clone();
            }
            steps.push(step);
            if matched {
                break;
            }
        }
        Ok(EvalTrace {
            name: name.to_owned(),
            result,
            steps,
        })
    }

    /// Validate `query` and build the per-query matcher for `name`'s rules.
    ///
    /// # Errors
    ///
    /// Same as [`get_payload`](Self::get_payload).
    pub async fn create_rule_predicate<'s>(
        &'s self,
        name: &'s str,
        query: &Query,
    ) -> Result<RulePredicate<'s>, StoreError> {
        self.payload_validator(name)?;
        let query = validate_query(&self.targeting, &self.fall_through, query).await?;
        Ok(RulePredicate::build(name, &self.targeting, &self.fall_through, &query).await)
    }

    async fn first_match<'a>(&'a self, name: &str, predicate: &RulePredicate<'_>) -> Option<&'a Value> {
        for (index, rule) in self.rule_list(name).iter().enumerate() {
            let payload = predicate.first_payload(rule).await;
            trace!(payload = name, index, matched = payload.is_some(), "rule evaluated");
            if payload.is_some() {
                return payload;
            }
        }
        None
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════════

    /// Declared payload names (sorted).
    #[must_use]
    pub fn payload_names(&self) -> Vec<&str> {
        self.payloads.keys().map(String::as_str).collect()
    }

    /// Ordinary targeting dimension names (sorted).
    #[must_use]
    pub fn dimension_names(&self) -> Vec<&str> {
        self.targeting.names()
    }

    /// Fall-through targeting dimension names (sorted).
    #[must_use]
    pub fn fall_through_dimension_names(&self) -> Vec<&str> {
        self.fall_through.names()
    }

    /// The canonical rule list of `name`; `None` if the name was never declared.
    #[must_use]
    pub fn rules(&self, name: &str) -> Option<&[Rule]> {
        self.payloads
            .contains_key(name)
            .then(|| self.rule_list(name))
    }

    /// The ordinary targeting registry.
    #[must_use]
    pub fn targeting(&self) -> &TargetingRegistry {
        &self.targeting
    }

    /// The fall-through targeting registry.
    #[must_use]
    pub fn fall_through_targeting(&self) -> &TargetingRegistry {
        &self.fall_through
    }

    /// The validator declared for `name`.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownPayloadName`] if `name` was not declared.
    pub fn payload_validator(&self, name: &str) -> Result<&SharedValidator, StoreError> {
        self.payloads
            .get(name)
            .ok_or_else(|| StoreError::UnknownPayloadName {
                name: name.to_owned(),
                available: self.payloads.keys().cloned().collect(),
            })
    }

    fn rule_list(&self, name: &str) -> &[Rule] {
        self.rules.get(name).map_or(&[], |list| &list[..])
    }
}

fn leaf_count(rules: &[Rule]) -> usize {
    rules.iter().map(Rule::leaf_count).sum()
}
