//! Targeting registry: dimension name → predicate factory + validators.
//!
//! A registry is immutable. [`register`](TargetingRegistry::register) and
//! [`extend`](TargetingRegistry::extend) return a new registry that shares
//! nothing mutable with the old one, so snapshots built on the old registry
//! keep resolving exactly as before.
//!
//! # Example
//!
//! ```
//! use tailor::{targeting, validator, TargetingDescriptor, TargetingRegistry};
//!
//! let registry = TargetingRegistry::new()
//!     .register(
//!         "highTide",
//!         TargetingDescriptor::new(targeting::equals())
//!             .targeting(validator::boolean())
//!             .query(validator::boolean()),
//!     )
//!     .unwrap();
//!
//! assert!(registry.contains("highTide"));
//! assert!(registry.register("highTide", TargetingDescriptor::new(targeting::equals())).is_err());
//! ```

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::targeting::SharedPredicateFactory;
use crate::validator::{self, SharedValidator};
use crate::StoreError;

/// Everything the engine needs to know about one targeting dimension.
#[derive(Clone)]
pub struct TargetingDescriptor {
    predicate: SharedPredicateFactory,
    targeting_validator: SharedValidator,
    query_validator: SharedValidator,
    requires_query: bool,
}

impl TargetingDescriptor {
    /// A dimension using `predicate`, accepting any targeting/query value and
    /// requiring a query value to match.
    #[must_use]
    pub fn new(predicate: SharedPredicateFactory) -> Self {
        Self {
            predicate,
            targeting_validator: validator::any(),
            query_validator: validator::any(),
            requires_query: true,
        }
    }

    /// Validator for the targeting values rules carry for this dimension.
    #[must_use]
    pub fn targeting(mut self, validator: SharedValidator) -> Self {
        self.targeting_validator = validator;
        self
    }

    /// Validator for the query field of this dimension.
    #[must_use]
    pub fn query(mut self, validator: SharedValidator) -> Self {
        self.query_validator = validator;
        self
    }

    /// Whether a rule targeting this dimension can only match when the query
    /// carries the dimension's field. Defaults to `true`.
    ///
    /// With `false`, the predicate runs with an absent query value and decides
    /// for itself (e.g. a time window that defaults to "now").
    #[must_use]
    pub fn requires_query(mut self, requires_query: bool) -> Self {
        self.requires_query = requires_query;
        self
    }

    /// The predicate factory.
    #[must_use]
    pub fn predicate(&self) -> &SharedPredicateFactory {
        &self.predicate
    }

    /// The targeting value validator.
    #[must_use]
    pub fn targeting_validator(&self) -> &SharedValidator {
        &self.targeting_validator
    }

    /// The query value validator.
    #[must_use]
    pub fn query_validator(&self) -> &SharedValidator {
        &self.query_validator
    }

    /// Whether matching requires the query field to be present.
    #[must_use]
    pub fn is_query_required(&self) -> bool {
        self.requires_query
    }
}

impl fmt::Debug for TargetingDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetingDescriptor")
            .field("predicate", &self.predicate)
            .field("targeting_validator", &self.targeting_validator)
            .field("query_validator", &self.query_validator)
            .field("requires_query", &self.requires_query)
            .finish()
    }
}

/// Immutable map of targeting dimensions.
#[derive(Debug, Clone, Default)]
pub struct TargetingRegistry {
    dimensions: Arc<BTreeMap<String, TargetingDescriptor>>,
}

impl TargetingRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new registry with `name` added.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateDimension`] if `name` is already registered.
    pub fn register(
        &self,
        name: impl Into<String>,
        descriptor: TargetingDescriptor,
    ) -> Result<Self, StoreError> {
        self.extend([(name.into(), descriptor)])
    }

    /// Return a new registry with every dimension of `dimensions` added.
    ///
    /// All-or-nothing: on a duplicate, `self` is untouched and no registry is produced.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateDimension`] if a name is already registered
    /// or appears twice in `dimensions`.
    pub fn extend<I, K>(&self, dimensions: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (K, TargetingDescriptor)>,
        K: Into<String>,
    {
        let mut extended = (*self.dimensions).clone();
        for (name, descriptor) in dimensions {
            match extended.entry(name.into()) {
                Entry::Occupied(entry) => {
                    return Err(StoreError::DuplicateDimension {
                        name: entry.key().clone(),
                    });
                }
                Entry::Vacant(entry) => {
                    entry.insert(descriptor);
                }
            }
        }
        Ok(Self {
            dimensions: Arc::new(extended),
        })
    }

    /// Look up a dimension by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&TargetingDescriptor> {
        self.dimensions.get(name)
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.dimensions.contains_key(name)
    }

    /// Registered dimension names (sorted).
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.dimensions.keys().map(String::as_str).collect()
    }

    /// Iterate dimensions in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &TargetingDescriptor)> {
        self.dimensions.iter()
    }

    /// Number of registered dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    /// Returns `true` if no dimensions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}
