//! Shared types, error enums, and wire primitives for transit-core.

use serde::Serialize;
use thiserror::Error;

/// All errors produced by transit-core.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed message bytes: {0}")]
    Deserialize(String),
    #[error("failed to encode message: {0}")]
    Serialize(String),
    #[error("message too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("row decode failed: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

impl FeedError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Deserialize(_) => "deserialize",
            FeedError::Serialize(_) => "serialize",
            FeedError::PayloadTooLarge { .. } => "payload_too_large",
            FeedError::Validation(e) if e.is_version_error() => "unsupported_version",
            FeedError::Validation(_) => "validation",
            FeedError::Codec(CodecError::Arity { .. }) => "decode_arity",
            FeedError::Codec(CodecError::Coercion { .. }) => "coercion",
            FeedError::Io(_) => "io",
            FeedError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;

/// Structural rejection of a decoded value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing version tag `v`")]
    MissingVersion,
    #[error("unsupported protocol version {version}")]
    UnsupportedVersion { version: i128 },
    #[error("{path}: expected {expected}, found {found}")]
    Shape {
        path: String,
        expected: String,
        found: String,
    },
    #[error("{path}: payload populates {keys:?}, exactly one union member is allowed")]
    MultiplePayloads { path: String, keys: Vec<String> },
}

impl ValidationError {
    pub(crate) fn shape(path: &str, expected: impl Into<String>, found: impl Into<String>) -> Self {
        ValidationError::Shape {
            path: path.to_string(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// True for the fail-fast rejections raised before payload validation.
    pub fn is_version_error(&self) -> bool {
        matches!(
            self,
            ValidationError::MissingVersion | ValidationError::UnsupportedVersion { .. }
        )
    }

    /// Location of the offending value.
    pub fn path(&self) -> &str {
        match self {
            ValidationError::Shape { path, .. } | ValidationError::MultiplePayloads { path, .. } => {
                path
            }
            ValidationError::MissingVersion | ValidationError::UnsupportedVersion { .. } => "v",
        }
    }
}

/// Failure turning a wire tuple into an entity record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The row is shorter than its entity kind requires.
    #[error("{kind} row {index} has {actual} fields, needs at least {required} (missing {missing:?})")]
    Arity {
        kind: &'static str,
        index: usize,
        required: usize,
        actual: usize,
        missing: Vec<&'static str>,
    },
    #[error("{kind} row {index}: field `{field}` is not numeric: {value:?}")]
    Coercion {
        kind: &'static str,
        index: usize,
        field: &'static str,
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Wire primitives
// ---------------------------------------------------------------------------

/// A single element of a compact wire tuple.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Primitive {
    Text(String),
    Int(i64),
    Float(f64),
}

/// One compact entity tuple as it appears on the wire.
pub type Row = Vec<Primitive>;

impl Primitive {
    /// Name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Primitive::Text(_) => "text",
            Primitive::Int(_) => "integer",
            Primitive::Float(_) => "float",
        }
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Primitive::Text(s) => write!(f, "{s}"),
            Primitive::Int(i) => write!(f, "{i}"),
            Primitive::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        Primitive::Text(value.to_string())
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        Primitive::Text(value)
    }
}

impl From<i64> for Primitive {
    fn from(value: i64) -> Self {
        Primitive::Int(value)
    }
}

impl From<f64> for Primitive {
    fn from(value: f64) -> Self {
        Primitive::Float(value)
    }
}

/// Current time as epoch milliseconds.
pub fn epoch_millis_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
