//! Format registry: per-format base kind, checker and converter.
//!
//! A format only applies to values of its base kind. A `date` format on an
//! integer value, or `int32` on a string, is ignored by both the validator
//! and the unmarshaller.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, LazyLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::typed::Typed;
use crate::types::{ContractVersion, Kind};

/// Predicate deciding whether a value satisfies a format.
pub type FormatCheck = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Conversion of a value already known to satisfy a format.
pub type FormatConvert = Arc<dyn Fn(&Value) -> Result<Typed, String> + Send + Sync>;

/// Wire-constant format names every registry understands.
pub const BUILTIN_FORMATS: &[&str] = &[
    "int32",
    "int64",
    "float",
    "double",
    "date",
    "date-time",
    "password",
    "byte",
    "binary",
    "uuid",
];

/// A single format: which kind it applies to, how to check it, and
/// optionally how to convert it.
#[derive(Clone)]
pub struct FormatDef {
    kind: Kind,
    check: FormatCheck,
    convert: Option<FormatConvert>,
}

impl FormatDef {
    pub fn new(kind: Kind, check: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self {
            kind,
            check: Arc::new(check),
            convert: None,
        }
    }

    pub fn with_converter(
        mut self,
        convert: impl Fn(&Value) -> Result<Typed, String> + Send + Sync + 'static,
    ) -> Self {
        self.convert = Some(Arc::new(convert));
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Whether this format has anything to say about `value`.
    ///
    /// Number formats apply to every number, integer formats only to integers.
    pub fn applies_to(&self, value: &Value, version: ContractVersion) -> bool {
        match self.kind {
            Kind::Number => value.is_number(),
            kind => kind.matches(value, version),
        }
    }

    pub fn check(&self, value: &Value) -> bool {
        (self.check)(value)
    }

    pub fn convert(&self, value: &Value) -> Option<Result<Typed, String>> {
        self.convert.as_ref().map(|convert| convert(value))
    }
}

impl fmt::Debug for FormatDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDef")
            .field("kind", &self.kind)
            .field("convert", &self.convert.is_some())
            .finish()
    }
}

/// Named formats known to the validator and unmarshaller.
#[derive(Clone)]
pub struct FormatRegistry {
    formats: HashMap<String, FormatDef>,
}

impl FormatRegistry {
    /// Registry with no formats at all.
    pub fn empty() -> Self {
        Self {
            formats: HashMap::new(),
        }
    }

    /// Registry with the built-in formats plus `email`, `ipv4`, `ipv6`, `uri`.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();

        registry.register(
            "int32",
            FormatDef::new(Kind::Integer, |v| {
                integer_value(v).is_some_and(|i| i32::try_from(i).is_ok())
            })
            .with_converter(convert_integer),
        );
        registry.register(
            "int64",
            FormatDef::new(Kind::Integer, |v| integer_value(v).is_some())
                .with_converter(convert_integer),
        );
        for name in ["float", "double"] {
            registry.register(
                name,
                FormatDef::new(Kind::Number, |v| v.as_f64().is_some()).with_converter(|v| {
                    v.as_f64()
                        .map(Typed::Float)
                        .ok_or_else(|| "not a number".to_string())
                }),
            );
        }
        registry.register(
            "date",
            FormatDef::new(Kind::String, |v| {
                v.as_str().is_some_and(|s| parse_date(s).is_ok())
            })
            .with_converter(|v| {
                parse_date(str_value(v)?)
                    .map(Typed::Date)
                    .map_err(|e| e.to_string())
            }),
        );
        registry.register(
            "date-time",
            FormatDef::new(Kind::String, |v| {
                v.as_str()
                    .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok())
            })
            .with_converter(|v| {
                DateTime::parse_from_rfc3339(str_value(v)?)
                    .map(Typed::DateTime)
                    .map_err(|e| e.to_string())
            }),
        );
        registry.register(
            "password",
            FormatDef::new(Kind::String, |_| true)
                .with_converter(|v| str_value(v).map(|s| Typed::String(s.to_string()))),
        );
        registry.register(
            "byte",
            FormatDef::new(Kind::String, |v| {
                v.as_str().is_some_and(|s| STANDARD.decode(s).is_ok())
            })
            .with_converter(|v| {
                STANDARD
                    .decode(str_value(v)?)
                    .map(Typed::Bytes)
                    .map_err(|e| e.to_string())
            }),
        );
        registry.register(
            "binary",
            FormatDef::new(Kind::String, |_| true)
                .with_converter(|v| str_value(v).map(|s| Typed::Bytes(s.as_bytes().to_vec()))),
        );
        registry.register(
            "uuid",
            FormatDef::new(Kind::String, |v| {
                v.as_str().is_some_and(|s| Uuid::parse_str(s).is_ok())
            })
            .with_converter(|v| {
                Uuid::parse_str(str_value(v)?)
                    .map(Typed::Uuid)
                    .map_err(|e| e.to_string())
            }),
        );

        registry.register(
            "email",
            FormatDef::new(Kind::String, |v| v.as_str().is_some_and(is_email)),
        );
        registry.register(
            "ipv4",
            FormatDef::new(Kind::String, |v| {
                v.as_str().is_some_and(|s| s.parse::<Ipv4Addr>().is_ok())
            }),
        );
        registry.register(
            "ipv6",
            FormatDef::new(Kind::String, |v| {
                v.as_str().is_some_and(|s| s.parse::<Ipv6Addr>().is_ok())
            }),
        );
        registry.register(
            "uri",
            FormatDef::new(Kind::String, |v| {
                v.as_str().is_some_and(|s| url::Url::parse(s).is_ok())
            }),
        );

        registry
    }

    /// Add or replace a format.
    pub fn register(&mut self, name: impl Into<String>, def: FormatDef) {
        self.formats.insert(name.into(), def);
    }

    /// Builder form of [`FormatRegistry::register`].
    pub fn with_format(mut self, name: impl Into<String>, def: FormatDef) -> Self {
        self.register(name, def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FormatDef> {
        self.formats.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formats.contains_key(name)
    }

    /// Format membership check. Unknown formats and formats for another
    /// base kind always pass.
    pub fn check(&self, name: &str, value: &Value, version: ContractVersion) -> bool {
        match self.formats.get(name) {
            Some(def) if def.applies_to(value, version) => def.check(value),
            _ => true,
        }
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.formats.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FormatRegistry")
            .field("formats", &names)
            .finish()
    }
}

/// Integer view of a JSON number, accepting integral floats.
pub(crate) fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .filter(|f| *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        _ => None,
    }
}

fn convert_integer(value: &Value) -> Result<Typed, String> {
    integer_value(value)
        .map(Typed::Int)
        .ok_or_else(|| "not a 64-bit integer".to_string())
}

fn str_value(value: &Value) -> Result<&str, String> {
    value.as_str().ok_or_else(|| "not a string".to_string())
}

fn parse_date(s: &str) -> chrono::ParseResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
}

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").expect("email pattern compiles"));

fn is_email(s: &str) -> bool {
    EMAIL_RE.is_match(s)
}
