//! Errors from store construction, mutation and resolution.
//!
//! Mutation errors are atomic: a failed `add_rules`, `insert` or `use_targeting`
//! returns the error and the caller keeps the snapshot it already had.
//!
//! Validation never fails fast. Every rule of a batch is checked and every
//! problem is reported as one [`Issue`] inside a single [`ValidationError`].

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// One segment of an [`IssuePath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// An object key (payload name, `rules`, `targeting`, a dimension name...).
    Key(String),
    /// A position in a list (rule index, targeting alternative).
    Index(usize),
}

/// Location of a validation issue, e.g. `emoji.rules[2].targeting.weather`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuePath(Vec<PathSegment>);

impl IssuePath {
    /// A path rooted at the given key (usually a payload name, or `query`).
    #[must_use]
    pub fn root(key: impl Into<String>) -> Self {
        Self(vec![PathSegment::Key(key.into())])
    }

    /// Extend the path with an object key.
    #[must_use]
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }

    /// Extend the path with a list index.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// The segments of this path, root first.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// The root key, if the path starts with one.
    #[must_use]
    pub fn head(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathSegment::Key(key)) => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for IssuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if position == 0 => write!(f, "{key}")?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// What kind of problem an [`Issue`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// A validator rejected a payload, targeting value or query value.
    Invalid,
    /// A rule targets a dimension that is not registered.
    UnknownTargetingDimension,
    /// A query carries a field no registered dimension accepts.
    UnknownQueryField,
    /// A rule list or a targeting alternative list exceeds its limit.
    TooManyRules,
}

/// A single validation problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Where the problem is.
    pub path: IssuePath,
    /// What kind of problem it is.
    pub kind: IssueKind,
    /// Human-readable message (validator output or engine message).
    pub message: String,
}

impl Issue {
    /// Create an issue.
    #[must_use]
    pub fn new(path: IssuePath, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            path,
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an [`IssueKind::Invalid`] issue.
    #[must_use]
    pub fn invalid(path: IssuePath, message: impl Into<String>) -> Self {
        Self::new(path, IssueKind::Invalid, message)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Aggregated validation failure.
///
/// Carries every failing path of the rejected batch, grouped by payload name
/// via [`by_payload`](Self::by_payload).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    issues: Vec<Issue>,
}

impl ValidationError {
    /// Wrap a list of issues.
    #[must_use]
    pub fn new(issues: Vec<Issue>) -> Self {
        Self { issues }
    }

    /// `Ok(())` when `issues` is empty, otherwise the aggregated error.
    ///
    /// # Errors
    ///
    /// Returns the issues wrapped in a `ValidationError` when there are any.
    pub fn check(issues: Vec<Issue>) -> Result<(), Self> {
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Self::new(issues))
        }
    }

    /// All issues, in the order they were found.
    #[must_use]
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Consume the error, returning its issues.
    #[must_use]
    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }

    /// Rendered paths of every issue, in order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.path.to_string()).collect()
    }

    /// Returns `true` if any issue is of the given kind.
    #[must_use]
    pub fn has_kind(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    /// Issues grouped by their root key: `{payloadName: ["rules[0].payload: ...", ...]}`.
    #[must_use]
    pub fn by_payload(&self) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for issue in &self.issues {
            let root = issue.path.head().unwrap_or_default().to_owned();
            let rest = IssuePath(issue.path.segments().iter().skip(1).cloned().collect());
            let rendered = rest.to_string();
            let rendered = rendered.strip_prefix('.').unwrap_or(&rendered);
            grouped
                .entry(root)
                .or_default()
                .push(format!("{rendered}: {}", issue.message));
        }
        grouped
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.issues.len();
        write!(
            f,
            "{count} validation issue{}",
            if count == 1 { "" } else { "s" }
        )?;
        for (position, issue) in self.issues.iter().enumerate() {
            let sep = if position == 0 { ": " } else { "; " };
            write!(f, "{sep}{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Errors returned by [`Store`](crate::Store) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Rules, payloads or a query failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The requested payload name was never declared.
    #[error("unknown payload name \"{name}\"{}", registered_suffix(.available))]
    UnknownPayloadName {
        /// The unregistered name.
        name: String,
        /// Names that ARE registered (for self-correcting error messages).
        available: Vec<String>,
    },

    /// A targeting dimension was registered twice, or as both ordinary and fall-through.
    #[error("targeting dimension \"{name}\" is already registered")]
    DuplicateDimension {
        /// The dimension name.
        name: String,
    },

    /// A payload name was declared twice when building the store.
    #[error("payload \"{name}\" is already declared")]
    DuplicatePayload {
        /// The payload name.
        name: String,
    },

    /// A resolved payload did not deserialize into the requested type.
    #[error("payload of \"{name}\" does not fit the requested type: {reason}")]
    PayloadType {
        /// The payload name.
        name: String,
        /// The deserialization error message.
        reason: String,
    },

    /// A rule document could not be read or parsed.
    #[error("invalid rule document: {reason}")]
    Document {
        /// The underlying error message.
        reason: String,
    },
}

impl StoreError {
    /// HTTP status a serving layer maps this error to.
    ///
    /// A successful lookup with no matching rule is not an error; serving
    /// layers answer it with `204`.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::UnknownPayloadName { .. } => 404,
            Self::DuplicateDimension { .. }
            | Self::DuplicatePayload { .. }
            | Self::PayloadType { .. }
            | Self::Document { .. } => 500,
        }
    }

    /// The aggregated validation error, if this is one.
    #[must_use]
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }
}

fn registered_suffix(available: &[String]) -> String {
    if available.is_empty() {
        " — no payloads are declared".to_owned()
    } else {
        format!(" — declared: {}", available.join(", "))
    }
}
