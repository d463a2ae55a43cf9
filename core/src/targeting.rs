//! Targeting predicates — how a dimension decides whether a rule's targeting
//! value matches the query.
//!
//! A dimension registers a [`PredicateFactory`]. Once per query the evaluator
//! hands the factory the dimension's query value (if any) and the whole query;
//! the factory returns a [`TargetingPredicate`] that is then applied to the
//! targeting value of every candidate rule. Both steps may suspend.
//!
//! Most dimensions are plain synchronous comparisons and use [`predicate`]:
//!
//! ```
//! use serde_json::json;
//! use tailor::{targeting, PredicateFactory, Query, TargetingPredicate};
//!
//! # futures::executor::block_on(async {
//! let high_tide = targeting::predicate(|query, targeting| query == Some(targeting));
//! let query = Query::new().with("highTide", true);
//! let test = high_tide.create(query.get("highTide"), &query).await;
//! assert!(test.matches(&json!(true)).await);
//! assert!(!test.matches(&json!(false)).await);
//! # });
//! ```

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;

use crate::validator::{self, SharedValidator};
use crate::{Query, StringMatchSpec, StringMatcher};

/// A per-query test applied to a rule's targeting value for one dimension.
pub trait TargetingPredicate: Send + Sync {
    /// Returns `true` if `targeting` matches the query this predicate was built for.
    fn matches<'a>(&'a self, targeting: &'a Value) -> BoxFuture<'a, bool>;
}

/// Builds a [`TargetingPredicate`] from a query.
///
/// Invoked once per query (not once per rule), so expensive setup belongs here.
pub trait PredicateFactory: Send + Sync + Debug {
    /// Build the predicate for this query.
    ///
    /// `query_value` is the dimension's own field (absent when the query omits
    /// it, which only happens for dimensions registered with
    /// `requires_query(false)`); `query` is the full validated query.
    fn create<'a>(
        &'a self,
        query_value: Option<&'a Value>,
        query: &'a Query,
    ) -> BoxFuture<'a, Box<dyn TargetingPredicate>>;
}

/// A predicate factory shared between snapshots.
pub type SharedPredicateFactory = Arc<dyn PredicateFactory>;

// ═══════════════════════════════════════════════════════════════════════════════
// Closure adapters
// ═══════════════════════════════════════════════════════════════════════════════

struct FnFactory<F> {
    f: Arc<F>,
}

impl<F> Debug for FnFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnFactory")
    }
}

struct BoundFn<F> {
    f: Arc<F>,
    query_value: Option<Value>,
}

impl<F> TargetingPredicate for BoundFn<F>
where
    F: Fn(Option<&Value>, &Value) -> bool + Send + Sync,
{
    fn matches<'a>(&'a self, targeting: &'a Value) -> BoxFuture<'a, bool> {
        future::ready((self.f)(self.query_value.as_ref(), targeting)).boxed()
    }
}

impl<F> PredicateFactory for FnFactory<F>
where
    F: Fn(Option<&Value>, &Value) -> bool + Send + Sync + 'static,
{
    fn create<'a>(
        &'a self,
        query_value: Option<&'a Value>,
        _query: &'a Query,
    ) -> BoxFuture<'a, Box<dyn TargetingPredicate>> {
        let bound: Box<dyn TargetingPredicate> = Box::new(BoundFn {
            f: Arc::clone(&self.f),
            query_value: query_value.cloned(),
        });
        future::ready(bound).boxed()
    }
}

/// Synchronous predicate: `f(query_value, targeting_value) -> bool`.
#[must_use]
pub fn predicate<F>(f: F) -> SharedPredicateFactory
where
    F: Fn(Option<&Value>, &Value) -> bool + Send + Sync + 'static,
{
    Arc::new(FnFactory { f: Arc::new(f) })
}

struct AsyncFnFactory<F> {
    f: Arc<F>,
}

impl<F> Debug for AsyncFnFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncFnFactory")
    }
}

struct BoundAsyncFn<F> {
    f: Arc<F>,
    query_value: Option<Value>,
}

impl<F, Fut> TargetingPredicate for BoundAsyncFn<F>
where
    F: Fn(Option<Value>, Value) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn matches<'a>(&'a self, targeting: &'a Value) -> BoxFuture<'a, bool> {
        (self.f)(self.query_value.clone(), targeting.clone()).boxed()
    }
}

impl<F, Fut> PredicateFactory for AsyncFnFactory<F>
where
    F: Fn(Option<Value>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn create<'a>(
        &'a self,
        query_value: Option<&'a Value>,
        _query: &'a Query,
    ) -> BoxFuture<'a, Box<dyn TargetingPredicate>> {
        let bound: Box<dyn TargetingPredicate> = Box::new(BoundAsyncFn {
            f: Arc::clone(&self.f),
            query_value: query_value.cloned(),
        });
        future::ready(bound).boxed()
    }
}

/// Asynchronous per-rule predicate: `f(query_value, targeting_value)` resolves to a bool.
#[must_use]
pub fn async_predicate<F, Fut>(f: F) -> SharedPredicateFactory
where
    F: Fn(Option<Value>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    Arc::new(AsyncFnFactory { f: Arc::new(f) })
}

struct AsyncFactory<F> {
    f: F,
}

impl<F> Debug for AsyncFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncFactory")
    }
}

impl<F, Fut> PredicateFactory for AsyncFactory<F>
where
    F: Fn(Option<Value>, Query) -> Fut + Send + Sync,
    Fut: Future<Output = Box<dyn TargetingPredicate>> + Send + 'static,
{
    fn create<'a>(
        &'a self,
        query_value: Option<&'a Value>,
        query: &'a Query,
    ) -> BoxFuture<'a, Box<dyn TargetingPredicate>> {
        (self.f)(query_value.cloned(), query.clone()).boxed()
    }
}

/// Asynchronous factory: `f(query_value, query)` resolves to the predicate.
///
/// Use this when building the predicate needs I/O (a lookup keyed by the query
/// value, for example); the lookup then runs once per query.
#[must_use]
pub fn async_factory<F, Fut>(f: F) -> SharedPredicateFactory
where
    F: Fn(Option<Value>, Query) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Box<dyn TargetingPredicate>> + Send + 'static,
{
    Arc::new(AsyncFactory { f })
}

/// Wrap a synchronous targeting test as a boxed [`TargetingPredicate`].
///
/// Convenient inside [`async_factory`] closures once the async setup is done.
#[must_use]
pub fn boxed<F>(f: F) -> Box<dyn TargetingPredicate>
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    Box::new(Closure(f))
}

struct Closure<F>(F);

impl<F> TargetingPredicate for Closure<F>
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn matches<'a>(&'a self, targeting: &'a Value) -> BoxFuture<'a, bool> {
        future::ready((self.0)(targeting)).boxed()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Ready-made predicates
// ═══════════════════════════════════════════════════════════════════════════════

/// Matches when the query value equals the targeting value.
#[must_use]
pub fn equals() -> SharedPredicateFactory {
    predicate(|query, targeting| query == Some(targeting))
}

/// Matches when the query value is one of the targeted values.
///
/// The targeting value is a list (`weather: [sunny, cloudy]`) or a single
/// value. A list-valued query matches if any of its elements is targeted.
#[must_use]
pub fn one_of() -> SharedPredicateFactory {
    predicate(|query, targeting| {
        let Some(query) = query else {
            return false;
        };
        let targeted = |candidate: &Value| match targeting {
            Value::Array(values) => values.contains(candidate),
            single => single == candidate,
        };
        match query {
            Value::Array(candidates) => candidates.iter().any(targeted),
            single => targeted(single),
        }
    })
}

/// Matches a string query value against a [`StringMatchSpec`] targeting value
/// (or any of a list of them).
///
/// Specs are compiled the first time a targeting value is seen and cached in
/// the factory, so a regex is built once per distinct targeting value rather
/// than once per rule test. Pair with [`string_match_validator`] so malformed
/// specs are rejected when rules are added rather than silently never matching.
#[must_use]
pub fn string_match() -> SharedPredicateFactory {
    Arc::new(StringMatchFactory::default())
}

/// Upper bound on cached targeting values; the cache starts over when full.
const MAX_CACHED_MATCHERS: usize = crate::MAX_RULES_PER_PAYLOAD;

#[derive(Debug, Default)]
struct MatcherCache {
    entries: Mutex<HashMap<String, Arc<[StringMatcher]>>>,
}

impl MatcherCache {
    /// Compiled matchers for `targeting`; `None` if it is not a valid spec list.
    fn get(&self, targeting: &Value) -> Option<Arc<[StringMatcher]>> {
        let key = targeting.to_string();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = entries.get(&key) {
            return Some(Arc::clone(hit));
        }

        let specs = match targeting {
            Value::Array(specs) => specs.as_slice(),
            spec => std::slice::from_ref(spec),
        };
        let compiled: Arc<[StringMatcher]> = specs
            .iter()
            .map(|spec| StringMatchSpec::from_value(spec)?.compile())
            .collect::<Result<Vec<_>, String>>()
            .ok()?
            .into();

        if entries.len() >= MAX_CACHED_MATCHERS {
            entries.clear();
        }
        entries.insert(key, Arc::clone(&compiled));
        Some(compiled)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[derive(Debug, Default)]
struct StringMatchFactory {
    cache: Arc<MatcherCache>,
}

struct StringMatchPredicate {
    cache: Arc<MatcherCache>,
    input: Option<String>,
}

impl TargetingPredicate for StringMatchPredicate {
    fn matches<'a>(&'a self, targeting: &'a Value) -> BoxFuture<'a, bool> {
        let matched = self.input.as_deref().is_some_and(|input| {
            self.cache
                .get(targeting)
                .is_some_and(|matchers| matchers.iter().any(|m| m.matches(input)))
        });
        future::ready(matched).boxed()
    }
}

impl PredicateFactory for StringMatchFactory {
    fn create<'a>(
        &'a self,
        query_value: Option<&'a Value>,
        _query: &'a Query,
    ) -> BoxFuture<'a, Box<dyn TargetingPredicate>> {
        let bound: Box<dyn TargetingPredicate> = Box::new(StringMatchPredicate {
            cache: Arc::clone(&self.cache),
            input: query_value.and_then(Value::as_str).map(str::to_owned),
        });
        future::ready(bound).boxed()
    }
}

/// Validator for [`string_match`] targeting values: a spec, or a non-empty list of specs.
#[must_use]
pub fn string_match_validator() -> SharedValidator {
    validator::from_fn("string_match", |value| {
        let check = |spec: &Value| StringMatchSpec::from_value(spec)?.compile().map(drop);
        match value {
            Value::Array(specs) if specs.is_empty() => {
                Err("expected at least one string match".to_owned())
            }
            Value::Array(specs) => {
                for (index, spec) in specs.iter().enumerate() {
                    check(spec).map_err(|e| format!("[{index}]: {e}"))?;
                }
                Ok(value.clone())
            }
            spec => check(spec).map(|()| value.clone()),
        }
    })
}
