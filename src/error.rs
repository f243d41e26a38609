//! Error types for contract loading, resolution and exchange unmarshalling.

use std::path::PathBuf;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::types::{Kind, ParamLocation, Style};

/// Errors while loading or parsing a contract document.
#[derive(Debug, Error)]
pub enum ContractError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML: {source}")]
    InvalidYaml {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unsupported contract version \"{version}\": expected 3.0.x or 3.1.x")]
    UnsupportedVersion { version: String },

    #[error("cannot resolve reference \"{reference}\"")]
    UnresolvableRef { reference: String },

    #[error("invalid contract at {path}: {message}")]
    Malformed { path: String, message: String },
}

impl ContractError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ContractError::FileNotFound { .. } | ContractError::ReadError { .. } => 3,
            _ => 2,
        }
    }

    pub(crate) fn malformed(path: &str, message: impl Into<String>) -> Self {
        ContractError::Malformed {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Failures locating the contract entry that governs an exchange.
///
/// These are fatal to the whole exchange. The variants are checked in order:
/// no path, then no operation for the method, then no server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("path not found for {url}")]
    PathNotFound { url: String },

    #[error("operation {method} not found for {url}")]
    OperationNotFound { url: String, method: String },

    #[error("server not found for {url}")]
    ServerNotFound { url: String },

    #[error("webhook not found: {name}")]
    WebhookNotFound { name: String },

    #[error("response not found for status {status}")]
    ResponseNotFound { status: u16 },
}

impl ResolutionError {
    /// HTTP status an adapter should answer with for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            ResolutionError::PathNotFound { .. } | ResolutionError::WebhookNotFound { .. } => 404,
            ResolutionError::OperationNotFound { .. } => 405,
            ResolutionError::ServerNotFound { .. } => 400,
            ResolutionError::ResponseNotFound { .. } => 422,
        }
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        4
    }
}

/// Single structural complaint with path context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid value.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "/: {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Structural validation failure carrying every underlying complaint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed with {} error(s)", errors.len())]
pub struct ValidationError {
    pub errors: Vec<SchemaError>,
}

/// Forced type coercion failed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("failed to cast {value} to {kind}")]
pub struct CastError {
    pub value: Value,
    pub kind: Kind,
}

/// Parameter style deserialization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StyleError {
    #[error("{name} not found")]
    NotFound { name: String },

    #[error("malformed {style} value for {name}: {message}")]
    Malformed {
        name: String,
        style: Style,
        message: String,
    },

    #[error("style {style} (explode={explode}) does not support {shape} values")]
    NotSupported {
        style: Style,
        explode: bool,
        shape: &'static str,
    },
}

/// Body (or complex parameter) media type failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaTypeError {
    #[error("unsupported media type {mimetype}")]
    Unsupported { mimetype: String },

    #[error("malformed {mimetype} content: {message}")]
    Malformed { mimetype: String, message: String },
}

/// Failures producing a typed value from a validated one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnmarshalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unknown format \"{format}\"")]
    UnknownFormat { format: String },

    #[error("cannot convert {value} to format \"{format}\": {message}")]
    FormatConversion {
        format: String,
        value: String,
        message: String,
    },
}

/// Security requirement failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    #[error("no security requirement satisfied (tried {})", describe_requirements(.requirements))]
    NotSatisfied { requirements: Vec<Vec<String>> },

    #[error("missing credential for security scheme {scheme}")]
    MissingCredential { scheme: String },

    #[error("unknown security scheme {scheme}")]
    UnknownScheme { scheme: String },

    #[error("unsupported security scheme {scheme}")]
    Unsupported { scheme: String },
}

fn describe_requirements(requirements: &[Vec<String>]) -> String {
    requirements
        .iter()
        .map(|names| format!("[{}]", names.join(", ")))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Failure of a single parameter or header.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("missing required value")]
    Missing,

    #[error("empty value is not allowed")]
    EmptyValue,

    #[error(transparent)]
    Style(#[from] StyleError),

    #[error(transparent)]
    MediaType(#[from] MediaTypeError),

    #[error(transparent)]
    Cast(#[from] CastError),

    #[error(transparent)]
    Unmarshal(#[from] UnmarshalError),
}

/// Failure of a request or response body.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BodyError {
    #[error("missing required request body")]
    Missing,

    #[error("media type {mimetype} not declared")]
    MediaTypeNotFound { mimetype: String },

    #[error(transparent)]
    MediaType(#[from] MediaTypeError),

    #[error(transparent)]
    Cast(#[from] CastError),

    #[error(transparent)]
    Unmarshal(#[from] UnmarshalError),
}

/// One entry in an exchange result's ordered error list.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    #[error("{location} parameter {name}: {source}")]
    Parameter {
        name: String,
        location: ParamLocation,
        #[source]
        source: ParameterError,
    },

    #[error("header {name}: {source}")]
    Header {
        name: String,
        #[source]
        source: ParameterError,
    },

    #[error("body: {0}")]
    Body(#[from] BodyError),

    #[error(transparent)]
    Security(#[from] SecurityError),
}

impl ExchangeError {
    /// Short machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::Parameter { source, .. } | ExchangeError::Header { source, .. } => {
                match source {
                    ParameterError::Missing => "missing",
                    ParameterError::EmptyValue | ParameterError::Style(_) => "deserialize",
                    ParameterError::MediaType(_) => "deserialize",
                    ParameterError::Cast(_) => "cast",
                    ParameterError::Unmarshal(UnmarshalError::Validation(_)) => "validation",
                    ParameterError::Unmarshal(_) => "unmarshal",
                }
            }
            ExchangeError::Body(source) => match source {
                BodyError::Missing => "missing",
                BodyError::MediaTypeNotFound { .. } | BodyError::MediaType(_) => "deserialize",
                BodyError::Cast(_) => "cast",
                BodyError::Unmarshal(UnmarshalError::Validation(_)) => "validation",
                BodyError::Unmarshal(_) => "unmarshal",
            },
            ExchangeError::Security(_) => "security",
        }
    }

    /// Structural complaints underneath a validation failure, if any.
    pub fn schema_errors(&self) -> &[SchemaError] {
        let unmarshal = match self {
            ExchangeError::Parameter {
                source: ParameterError::Unmarshal(e),
                ..
            }
            | ExchangeError::Header {
                source: ParameterError::Unmarshal(e),
                ..
            }
            | ExchangeError::Body(BodyError::Unmarshal(e)) => e,
            _ => return &[],
        };
        match unmarshal {
            UnmarshalError::Validation(v) => &v.errors,
            _ => &[],
        }
    }
}

impl Serialize for ExchangeError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("kind", self.kind())?;
        match self {
            ExchangeError::Parameter { name, location, .. } => {
                map.serialize_entry("name", name)?;
                map.serialize_entry("location", location)?;
            }
            ExchangeError::Header { name, .. } => {
                map.serialize_entry("name", name)?;
                map.serialize_entry("location", &ParamLocation::Header)?;
            }
            ExchangeError::Body(_) => map.serialize_entry("location", "body")?,
            ExchangeError::Security(_) => {}
        }
        map.serialize_entry("message", &self.to_string())?;
        let schema_errors = self.schema_errors();
        if !schema_errors.is_empty() {
            map.serialize_entry("errors", schema_errors)?;
        }
        map.end()
    }
}
