//! Core vocabulary shared by every stage of the exchange pipeline.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::formats::FormatRegistry;
use crate::security::{CredentialProvider, StandardCredentials};

/// HTTP methods that may carry an operation in a path item.
pub const HTTP_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Direction of the exchange being evaluated.
///
/// Requests hide `readOnly` properties, responses hide `writeOnly` ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Create direction from a request flag (true = Request, false = Response).
    pub fn from_request_flag(is_request: bool) -> Self {
        if is_request {
            Direction::Request
        } else {
            Direction::Response
        }
    }

    /// Whether a property carrying these flags is invisible in this direction.
    pub fn hides(&self, read_only: bool, write_only: bool) -> bool {
        match self {
            Direction::Request => read_only,
            Direction::Response => write_only,
        }
    }
}

/// Contract format version. Only the major.minor pair matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ContractVersion {
    #[serde(rename = "3.0")]
    V30,
    #[serde(rename = "3.1")]
    V31,
}

impl ContractVersion {
    /// Parse the `openapi` field of a document (e.g. `"3.0.3"`).
    pub fn parse(s: &str) -> Option<Self> {
        if s == "3.0" || s.starts_with("3.0.") {
            Some(ContractVersion::V30)
        } else if s == "3.1" || s.starts_with("3.1.") {
            Some(ContractVersion::V31)
        } else {
            None
        }
    }
}

/// Primitive JSON kinds a schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl Kind {
    /// Preference order used when a schema declares no type at all.
    pub const ANY_ORDER: [Kind; 6] = [
        Kind::Object,
        Kind::Array,
        Kind::Boolean,
        Kind::Integer,
        Kind::Number,
        Kind::String,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "null" => Some(Kind::Null),
            "boolean" => Some(Kind::Boolean),
            "integer" => Some(Kind::Integer),
            "number" => Some(Kind::Number),
            "string" => Some(Kind::String),
            "array" => Some(Kind::Array),
            "object" => Some(Kind::Object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Boolean => "boolean",
            Kind::Integer => "integer",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Array => "array",
            Kind::Object => "object",
        }
    }

    /// Kind checker: does `value` belong to this kind?
    ///
    /// Integral floats such as `1.0` count as integers only in 3.1 documents.
    pub fn matches(&self, value: &Value, version: ContractVersion) -> bool {
        match self {
            Kind::Null => value.is_null(),
            Kind::Boolean => value.is_boolean(),
            Kind::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => true,
                Value::Number(n) => {
                    version == ContractVersion::V31
                        && n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
                }
                _ => false,
            },
            Kind::Number => value.is_number(),
            Kind::String => value.is_string(),
            Kind::Array => value.is_array(),
            Kind::Object => value.is_object(),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a parameter lives in the HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(ParamLocation::Path),
            "query" => Some(ParamLocation::Query),
            "header" => Some(ParamLocation::Header),
            "cookie" => Some(ParamLocation::Cookie),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
            ParamLocation::Cookie => "cookie",
        }
    }

    /// Style used when the parameter does not declare one.
    pub fn default_style(&self) -> Style {
        match self {
            ParamLocation::Path | ParamLocation::Header => Style::Simple,
            ParamLocation::Query | ParamLocation::Cookie => Style::Form,
        }
    }
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-encoding style of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Style {
    #[serde(rename = "simple")]
    Simple,
    #[serde(rename = "form")]
    Form,
    #[serde(rename = "matrix")]
    Matrix,
    #[serde(rename = "label")]
    Label,
    #[serde(rename = "spaceDelimited")]
    SpaceDelimited,
    #[serde(rename = "pipeDelimited")]
    PipeDelimited,
    #[serde(rename = "deepObject")]
    DeepObject,
}

impl Style {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(Style::Simple),
            "form" => Some(Style::Form),
            "matrix" => Some(Style::Matrix),
            "label" => Some(Style::Label),
            "spaceDelimited" => Some(Style::SpaceDelimited),
            "pipeDelimited" => Some(Style::PipeDelimited),
            "deepObject" => Some(Style::DeepObject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Simple => "simple",
            Style::Form => "form",
            Style::Matrix => "matrix",
            Style::Label => "label",
            Style::SpaceDelimited => "spaceDelimited",
            Style::PipeDelimited => "pipeDelimited",
            Style::DeepObject => "deepObject",
        }
    }

    /// `explode` defaults to true for `form`, false for everything else.
    pub fn default_explode(&self) -> bool {
        matches!(self, Style::Form)
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered multi-valued map of raw wire values for one parameter location.
///
/// Header maps are built with [`MultiMap::case_insensitive`] so lookups
/// ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiMap {
    entries: IndexMap<String, Vec<String>>,
    case_insensitive: bool,
}

impl MultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn case_insensitive() -> Self {
        Self {
            entries: IndexMap::new(),
            case_insensitive: true,
        }
    }

    fn key(&self, key: &str) -> String {
        if self.case_insensitive {
            key.to_ascii_lowercase()
        } else {
            key.to_string()
        }
    }

    /// Append a value under `key`.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = self.key(key.as_ref());
        self.entries.entry(key).or_default().push(value.into());
    }

    /// Replace every value under `key` with a single one.
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = self.key(key.as_ref());
        self.entries.insert(key, vec![value.into()]);
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> Option<&[String]> {
        if self.case_insensitive {
            self.entries
                .get(&key.to_ascii_lowercase())
                .map(Vec::as_slice)
        } else {
            self.entries.get(key).map(Vec::as_slice)
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get_all(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for MultiMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = MultiMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Options for unmarshalling exchanges against a contract.
#[derive(Clone)]
pub struct Options {
    /// Base URL that relative server URLs are joined to.
    /// When absent, relative servers are compared against the URL path only.
    pub base_url: Option<String>,
    /// When true, bodies with a media type that has no deserializer fail
    /// instead of passing through as text.
    pub strict_media_types: bool,
    /// Format checkers and converters.
    pub formats: FormatRegistry,
    /// Credential extraction for security schemes.
    pub credentials: Arc<dyn CredentialProvider>,
}

impl Options {
    /// Create options with built-in formats, standard credential extraction
    /// and lenient media types.
    pub fn new() -> Self {
        Self {
            base_url: None,
            strict_media_types: false,
            formats: FormatRegistry::default(),
            credentials: Arc::new(StandardCredentials),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set strict media type handling.
    pub fn strict_media_types(mut self, strict: bool) -> Self {
        self.strict_media_types = strict;
        self
    }

    pub fn formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = formats;
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("base_url", &self.base_url)
            .field("strict_media_types", &self.strict_media_types)
            .field("formats", &self.formats)
            .finish_non_exhaustive()
    }
}
