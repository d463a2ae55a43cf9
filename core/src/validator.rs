//! `Validator` — the validate-or-reject capability behind payloads, targeting
//! values and query values.
//!
//! The engine never interprets payload or targeting shapes itself. Each payload
//! name, each dimension's targeting values and each query field is paired with
//! a validator that either returns the (possibly coerced) value or rejects it
//! with a message. Validators may suspend, so they return a [`BoxFuture`].
//!
//! Synchronous validators are the common case; the constructors in this module
//! wrap them in ready futures:
//!
//! ```
//! use serde_json::json;
//! use tailor::{validator, Validator};
//!
//! # futures::executor::block_on(async {
//! let weather = validator::array_of(validator::one_of(["sunny", "rainy"]));
//! assert!(weather.validate(&json!(["sunny"])).await.is_ok());
//! assert!(weather.validate(&json!(["foggy"])).await.is_err());
//! # });
//! ```

use std::fmt::{self, Debug};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Validates a dynamic value, returning the value to store or a rejection message.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: validators are shared by every
/// snapshot derived from the store they were registered on.
pub trait Validator: Send + Sync + Debug {
    /// Validate (and optionally coerce) `value`.
    ///
    /// Returns the value that should be stored or compared, or a message
    /// describing why the value is rejected.
    fn validate<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Result<Value, String>>;
}

/// A validator shared between snapshots.
pub type SharedValidator = Arc<dyn Validator>;

/// Short name of a JSON value's type, for rejection messages.
#[must_use]
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn expected(what: &str, value: &Value) -> String {
    format!("expected {what}, received {}", kind_of(value))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Primitive validators
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct AnyValue;

impl Validator for AnyValue {
    fn validate<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Result<Value, String>> {
        future::ready(Ok(value.clone())).boxed()
    }
}

#[derive(Debug, Clone, Copy)]
enum Primitive {
    String,
    Boolean,
    Number,
}

impl Validator for Primitive {
    fn validate<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Result<Value, String>> {
        let result = match (self, value) {
            (Self::String, Value::String(_))
            | (Self::Boolean, Value::Bool(_))
            | (Self::Number, Value::Number(_)) => Ok(value.clone()),
            (Self::String, _) => Err(expected("string", value)),
            (Self::Boolean, _) => Err(expected("boolean", value)),
            (Self::Number, _) => Err(expected("number", value)),
        };
        future::ready(result).boxed()
    }
}

/// Accepts any value unchanged.
#[must_use]
pub fn any() -> SharedValidator {
    Arc::new(AnyValue)
}

/// Accepts JSON strings.
#[must_use]
pub fn string() -> SharedValidator {
    Arc::new(Primitive::String)
}

/// Accepts JSON booleans.
#[must_use]
pub fn boolean() -> SharedValidator {
    Arc::new(Primitive::Boolean)
}

/// Accepts JSON numbers.
#[must_use]
pub fn number() -> SharedValidator {
    Arc::new(Primitive::Number)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Composite validators
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct OneOf {
    allowed: Vec<Value>,
}

impl Validator for OneOf {
    fn validate<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Result<Value, String>> {
        let result = if self.allowed.contains(value) {
            Ok(value.clone())
        } else {
            let allowed: Vec<String> = self.allowed.iter().map(Value::to_string).collect();
            Err(format!(
                "expected one of [{}], received {value}",
                allowed.join(", ")
            ))
        };
        future::ready(result).boxed()
    }
}

/// Accepts exactly one of the listed values (an enumeration).
#[must_use]
pub fn one_of<I, V>(allowed: I) -> SharedValidator
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    Arc::new(OneOf {
        allowed: allowed.into_iter().map(Into::into).collect(),
    })
}

#[derive(Debug)]
struct ArrayOf {
    item: SharedValidator,
}

impl Validator for ArrayOf {
    fn validate<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Result<Value, String>> {
        async move {
            let Value::Array(items) = value else {
                return Err(expected("array", value));
            };
            let mut validated = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let item = self
                    .item
                    .validate(item)
                    .await
                    .map_err(|message| format!("[{index}]: {message}"))?;
                validated.push(item);
            }
            Ok(Value::Array(validated))
        }
        .boxed()
    }
}

/// Accepts arrays whose every element passes `item`.
#[must_use]
pub fn array_of(item: SharedValidator) -> SharedValidator {
    Arc::new(ArrayOf { item })
}

#[derive(Debug)]
struct Either {
    first: SharedValidator,
    second: SharedValidator,
}

impl Validator for Either {
    fn validate<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Result<Value, String>> {
        async move {
            match self.first.validate(value).await {
                Ok(v) => Ok(v),
                Err(first) => self
                    .second
                    .validate(value)
                    .await
                    .map_err(|second| format!("{first}; or {second}")),
            }
        }
        .boxed()
    }
}

/// Accepts what `first` accepts, otherwise what `second` accepts.
#[must_use]
pub fn either(first: SharedValidator, second: SharedValidator) -> SharedValidator {
    Arc::new(Either { first, second })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Typed validators (serde)
// ═══════════════════════════════════════════════════════════════════════════════

struct Typed<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Debug for Typed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Typed")
            .field(&std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Validator for Typed<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    fn validate<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Result<Value, String>> {
        let result = serde_json::from_value::<T>(value.clone())
            .map_err(|e| e.to_string())
            .and_then(|typed| serde_json::to_value(typed).map_err(|e| e.to_string()));
        future::ready(result).boxed()
    }
}

/// Accepts values that deserialize as `T`, storing `T`'s canonical serialization.
///
/// Defaults declared with `#[serde(default)]` are filled in, so the stored
/// payload always has `T`'s complete shape.
#[must_use]
pub fn typed<T>() -> SharedValidator
where
    T: DeserializeOwned + Serialize + 'static,
{
    Arc::new(Typed::<T> {
        _phantom: PhantomData,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Closure validators
// ═══════════════════════════════════════════════════════════════════════════════

struct FnValidator<F> {
    name: &'static str,
    f: F,
}

impl<F> Debug for FnValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FnValidator").field(&self.name).finish()
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync,
{
    fn validate<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Result<Value, String>> {
        future::ready((self.f)(value)).boxed()
    }
}

/// Wrap a synchronous closure as a validator. `name` shows up in `Debug` output.
#[must_use]
pub fn from_fn<F>(name: &'static str, f: F) -> SharedValidator
where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
{
    Arc::new(FnValidator { name, f })
}

struct AsyncFnValidator<F> {
    name: &'static str,
    f: F,
}

impl<F> Debug for AsyncFnValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AsyncFnValidator").field(&self.name).finish()
    }
}

impl<F, Fut> Validator for AsyncFnValidator<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    fn validate<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Result<Value, String>> {
        (self.f)(value.clone()).boxed()
    }
}

/// Wrap an asynchronous closure as a validator. The closure receives an owned copy.
#[must_use]
pub fn from_async_fn<F, Fut>(name: &'static str, f: F) -> SharedValidator
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    Arc::new(AsyncFnValidator { name, f })
}
