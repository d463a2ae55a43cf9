//! tailor-test: reference targeting domain for conformance testing
//!
//! Provides a small, predictable set of payloads and targeting dimensions.
//! This is the reference extension that demonstrates how to build a tailor
//! domain: each dimension is a [`TargetingDescriptor`] pairing a predicate
//! with targeting/query validators.
//!
//! | Dimension   | Tier         | Targeting              | Query        |
//! |-------------|--------------|------------------------|--------------|
//! | `weather`   | ordinary     | list of weathers       | one weather  |
//! | `highTide`  | ordinary     | bool                   | bool         |
//! | `timeOfDay` | ordinary     | string or `"now!"`     | optional     |
//! | `dateRange` | ordinary     | `{start?, end?}`       | `YYYY-MM-DD` |
//! | `delayed`   | ordinary     | bool (async factory)   | bool         |
//! | `browser`   | fall-through | string match spec(s)   | user agent   |
//! | `device`    | fall-through | list of devices        | one device   |
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tailor::{PayloadRule, Query};
//!
//! # futures::executor::block_on(async {
//! let store = tailor_test::store()
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
//! # });
//! ```

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tailor::{targeting, validator, Store, StoreBuilder, StoreError, TargetingDescriptor};

pub mod fixture;

/// Values the `weather` dimension accepts.
pub const WEATHERS: [&str; 4] = ["sunny", "rainy", "cloudy", "snowy"];

/// Values the `device` dimension accepts.
pub const DEVICES: [&str; 3] = ["mobile", "tablet", "desktop"];

/// How long the `delayed` dimension's factory sleeps.
pub const DELAY: Duration = Duration::from_millis(5);

/// A structured payload, used to exercise typed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Banner {
    /// Headline.
    pub title: String,
    /// Optional body text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dimensions
// ═══════════════════════════════════════════════════════════════════════════════

/// `weather`: targeting lists weathers, the query names one.
#[must_use]
pub fn weather() -> TargetingDescriptor {
    TargetingDescriptor::new(targeting::one_of())
        .targeting(validator::array_of(validator::one_of(WEATHERS)))
        .query(validator::one_of(WEATHERS))
}

/// `highTide`: boolean equality.
#[must_use]
pub fn high_tide() -> TargetingDescriptor {
    TargetingDescriptor::new(targeting::equals())
        .targeting(validator::boolean())
        .query(validator::boolean())
}

/// `timeOfDay`: matches the query's time of day, or anything when targeted
/// with `"now!"`. Does not require the query field.
#[must_use]
pub fn time_of_day() -> TargetingDescriptor {
    TargetingDescriptor::new(targeting::predicate(|query, targeting| {
        targeting == "now!" || query == Some(targeting)
    }))
    .targeting(validator::string())
    .query(validator::string())
    .requires_query(false)
}

/// Inclusive date window; either bound may be open.
///
/// Bounds are calendar dates written `YYYY-MM-DD`; impossible dates such as
/// `2024-02-31` are rejected when the targeting is validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateRange {
    /// First day in range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    /// Last day in range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Whether `day` falls inside the window.
    #[must_use]
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start.is_none_or(|start| start <= day) && self.end.is_none_or(|end| day <= end)
    }
}

/// Format of `dateRange` query values and bounds.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_day(value: &Value) -> Result<NaiveDate, String> {
    let Some(text) = value.as_str() else {
        return Err(format!("expected a YYYY-MM-DD date, received {value}"));
    };
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| format!("invalid date \"{text}\": {e}"))
}

fn parse_range(value: &Value) -> Result<DateRange, String> {
    let Value::Object(bounds) = value else {
        return Err(format!("expected {{start?, end?}}, received {value}"));
    };
    let mut range = DateRange {
        start: None,
        end: None,
    };
    for (key, bound) in bounds {
        let day = Some(parse_day(bound).map_err(|e| format!("{key}: {e}"))?);
        match key.as_str() {
            "start" => range.start = day,
            "end" => range.end = day,
            other => return Err(format!("unknown date range key \"{other}\"")),
        }
    }
    if let (Some(start), Some(end)) = (range.start, range.end) {
        if start > end {
            return Err(format!("start {start} is after end {end}"));
        }
    }
    Ok(range)
}

/// `dateRange`: `{start?, end?}` window tested against a `YYYY-MM-DD` query.
///
/// Both validators store the canonical form, so the predicate only ever sees
/// well-formed dates.
#[must_use]
pub fn date_range() -> TargetingDescriptor {
    let range = validator::from_fn("date_range", |value| {
        let range = parse_range(value)?;
        serde_json::to_value(range).map_err(|e| e.to_string())
    });
    let day = validator::from_fn("iso_date", |value| {
        parse_day(value).map(|day| Value::String(day.format(DATE_FORMAT).to_string()))
    });

    TargetingDescriptor::new(targeting::predicate(|query, targeting| {
        let Some(Ok(day)) = query.map(parse_day) else {
            return false;
        };
        parse_range(targeting).is_ok_and(|range| range.contains(day))
    }))
    .targeting(range)
    .query(day)
}

/// `delayed`: boolean equality whose predicate is built asynchronously.
#[must_use]
pub fn delayed() -> TargetingDescriptor {
    TargetingDescriptor::new(targeting::async_factory(|value, _query| async move {
        tokio::time::sleep(DELAY).await;
        targeting::boxed(move |targeting| value.as_ref() == Some(targeting))
    }))
    .targeting(validator::boolean())
    .query(validator::boolean())
}

/// `browser` (fall-through): string match spec(s) against the user agent.
#[must_use]
pub fn browser() -> TargetingDescriptor {
    TargetingDescriptor::new(targeting::string_match())
        .targeting(targeting::string_match_validator())
        .query(validator::string())
}

/// `device` (fall-through): targeting lists devices, the query names one.
#[must_use]
pub fn device() -> TargetingDescriptor {
    TargetingDescriptor::new(targeting::one_of())
        .targeting(validator::array_of(validator::one_of(DEVICES)))
        .query(validator::one_of(DEVICES))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Composition
// ═══════════════════════════════════════════════════════════════════════════════

/// Add the reference payloads and dimensions to `builder`.
///
/// Payloads: `emoji` and `greeting` (strings), `count` (number), `tags`
/// (list of strings), `banner` ([`Banner`]).
pub fn register(builder: StoreBuilder) -> StoreBuilder {
    builder
        .payload("emoji", validator::string())
        .payload("greeting", validator::string())
        .payload("count", validator::number())
        .payload("tags", validator::array_of(validator::string()))
        .payload("banner", validator::typed::<Banner>())
        .targeting("weather", weather())
        .targeting("highTide", high_tide())
        .targeting("timeOfDay", time_of_day())
        .targeting("dateRange", date_range())
        .targeting("delayed", delayed())
        .fall_through("browser", browser())
        .fall_through("device", device())
}

/// An empty store with the reference domain registered.
///
/// # Errors
///
/// Never fails for the reference domain; the signature mirrors
/// [`StoreBuilder::build`].
pub fn store() -> Result<Store, StoreError> {
    register(Store::builder()).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tailor::{PayloadRule, Query};

    fn day(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, DATE_FORMAT).unwrap()
    }

    #[test]
    fn impossible_dates_rejected() {
        assert!(parse_day(&json!("2024-02-29")).is_ok());
        assert!(parse_day(&json!("2023-02-29")).is_err());
        assert!(parse_day(&json!("2024-13-45")).is_err());
        assert!(parse_day(&json!("2024/02/28")).is_err());
        assert!(parse_day(&json!(20240228)).is_err());
    }

    #[test]
    fn date_range_bounds() {
        let range = parse_range(&json!({"start": "2024-12-01"})).unwrap();
        assert!(range.contains(day("2024-12-25")));
        assert!(!range.contains(day("2024-11-30")));

        assert!(parse_range(&json!({"start": "2024-12-02", "end": "2024-12-01"})).is_err());
        assert!(parse_range(&json!({"begin": "2024-12-01"})).is_err());
    }

    #[tokio::test]
    async fn impossible_range_and_query_date_fail_validation() {
        let err = store()
            .unwrap()
            .add_rules(
                "emoji",
                vec![PayloadRule::new("x").when(
                    "dateRange",
                    json!({"start": "2024-13-45", "end": "9999-99-99"}),
                )],
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.as_validation().unwrap().paths(),
            vec!["emoji.rules[0].targeting.dateRange"]
        );

        let err = store()
            .unwrap()
            .get_payload("emoji", &Query::new().with("dateRange", "2024-02-31"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.as_validation().unwrap().paths(), vec!["query.dateRange"]);
    }

    #[tokio::test]
    async fn reference_store_resolves() {
        let store = store()
            .unwrap()
            .add_rules(
                "emoji",
                vec![
                    PayloadRule::new("🎄").when(
                        "dateRange",
                        json!({"start": "2024-12-24", "end": "2024-12-26"}),
                    ),
                    PayloadRule::new("bar"),
                ],
            )
            .await
            .unwrap();

        let christmas = Query::new().with("dateRange", "2024-12-25");
        assert_eq!(
            store.get_payload("emoji", &christmas).await.unwrap(),
            Some(json!("🎄"))
        );
        let err = store
            .get_payload("emoji", &Query::new().with("dateRange", "tomorrow"))
            .await
            .unwrap_err();
        assert_eq!(err.as_validation().unwrap().paths(), vec!["query.dateRange"]);
    }

    #[tokio::test]
    async fn typed_banner_payload() {
        let err = store()
            .unwrap()
            .add_rules("banner", vec![PayloadRule::new(json!({"headline": "x"}))])
            .await
            .unwrap_err();
        assert_eq!(
            err.as_validation().unwrap().paths(),
            vec!["banner.rules[0].payload"]
        );
    }
}
