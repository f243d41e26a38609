//! Parameter style deserializers.
//!
//! Each style turns the raw text found in a location map into a JSON value
//! whose leaves are still strings: a single string, an array of strings or
//! an object of strings. Casting to the schema's kinds happens afterwards.

use serde_json::{Map, Value};

use crate::contract::Parameter;
use crate::error::StyleError;
use crate::schema::{SchemaArena, SchemaKind};
use crate::types::{MultiMap, Style};

/// Value shape a parameter's schema asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Primitive,
    Array,
    Object,
}

impl Shape {
    pub fn of(kind: &SchemaKind) -> Self {
        match kind {
            SchemaKind::Array => Shape::Array,
            SchemaKind::Object => Shape::Object,
            _ => Shape::Primitive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Primitive => "primitive",
            Shape::Array => "array",
            Shape::Object => "object",
        }
    }
}

/// Deserializer for one parameter's style.
#[derive(Debug, Clone)]
pub struct StyleDeserializer<'p> {
    style: Style,
    explode: bool,
    name: &'p str,
    shape: Shape,
    properties: Vec<&'p str>,
}

impl<'p> StyleDeserializer<'p> {
    pub fn new(style: Style, explode: bool, name: &'p str, shape: Shape) -> Self {
        Self {
            style,
            explode,
            name,
            shape,
            properties: Vec::new(),
        }
    }

    /// Declared property names, used by exploded form objects.
    pub fn with_properties(mut self, properties: Vec<&'p str>) -> Self {
        self.properties = properties;
        self
    }

    /// Deserializer matching a contract parameter and its schema.
    pub fn for_parameter(param: &'p Parameter, arena: &'p SchemaArena) -> Self {
        let schema = param.schema.map(|id| arena.get(id));
        let shape = schema.map_or(Shape::Primitive, |s| Shape::of(&s.kind()));
        let properties = schema
            .map(|s| s.properties.keys().map(String::as_str).collect())
            .unwrap_or_default();
        Self::new(param.style, param.explode, &param.name, shape).with_properties(properties)
    }

    /// Deserialize the parameter out of `location`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the location holds no value for the parameter,
    /// `Malformed` when the value does not follow the style, and
    /// `NotSupported` for style/shape combinations that do not exist.
    pub fn deserialize(&self, location: &MultiMap) -> Result<Value, StyleError> {
        match self.style {
            Style::Simple => self.simple(self.raw(location)?),
            Style::Label => self.label(self.raw(location)?),
            Style::Matrix => self.matrix(self.raw(location)?),
            Style::Form => self.form(location),
            Style::SpaceDelimited => {
                let raw = self.delimited_raw(location)?;
                let delimiter = if raw.contains("%20") { "%20" } else { " " };
                self.delimited(raw, delimiter)
            }
            Style::PipeDelimited => {
                let raw = self.delimited_raw(location)?;
                self.delimited(raw, "|")
            }
            Style::DeepObject => self.deep_object(location),
        }
    }

    fn raw<'l>(&self, location: &'l MultiMap) -> Result<&'l str, StyleError> {
        location.get(self.name).ok_or_else(|| StyleError::NotFound {
            name: self.name.to_string(),
        })
    }

    fn malformed(&self, message: impl Into<String>) -> StyleError {
        StyleError::Malformed {
            name: self.name.to_string(),
            style: self.style,
            message: message.into(),
        }
    }

    fn not_supported(&self) -> StyleError {
        StyleError::NotSupported {
            style: self.style,
            explode: self.explode,
            shape: self.shape.as_str(),
        }
    }

    /// `blue,black`, `R,100,G,200` or (exploded) `R=100,G=200`.
    fn simple(&self, raw: &str) -> Result<Value, StyleError> {
        match self.shape {
            Shape::Primitive => Ok(Value::from(raw)),
            Shape::Array => Ok(strings(raw.split(','))),
            Shape::Object if self.explode => self.assignments(raw.split(','), '='),
            Shape::Object => self.pairs(raw, ","),
        }
    }

    /// `.blue`, `.blue,black` or (exploded) `.blue.black`, `.R=100.G=200`.
    fn label(&self, raw: &str) -> Result<Value, StyleError> {
        let rest = raw
            .strip_prefix('.')
            .ok_or_else(|| self.malformed("expected a leading '.'"))?;
        match (self.shape, self.explode) {
            (Shape::Primitive, _) => Ok(Value::from(rest)),
            (Shape::Array, false) => Ok(strings(rest.split(','))),
            (Shape::Array, true) => Ok(strings(rest.split('.'))),
            (Shape::Object, false) => self.pairs(rest, ","),
            (Shape::Object, true) => self.assignments(rest.split('.'), '='),
        }
    }

    /// `;color=blue`, `;color=blue,black` or (exploded)
    /// `;color=blue;color=black`, `;R=100;G=200`.
    fn matrix(&self, raw: &str) -> Result<Value, StyleError> {
        let prefix = format!(";{}=", self.name);
        match (self.shape, self.explode) {
            (Shape::Object, true) => {
                let rest = raw
                    .strip_prefix(';')
                    .ok_or_else(|| self.malformed("expected a leading ';'"))?;
                self.assignments(rest.split(';'), '=')
            }
            (Shape::Array, true) => {
                let items = raw
                    .split(';')
                    .skip(1)
                    .map(|part| {
                        part.strip_prefix(&prefix[1..])
                            .ok_or_else(|| self.malformed(format!("expected '{}'", prefix)))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if !raw.starts_with(';') || items.is_empty() {
                    return Err(self.malformed(format!("expected '{}'", prefix)));
                }
                Ok(strings(items))
            }
            (shape, _) => {
                let rest = raw
                    .strip_prefix(&prefix)
                    .ok_or_else(|| self.malformed(format!("expected '{}'", prefix)))?;
                match shape {
                    Shape::Primitive => Ok(Value::from(rest)),
                    Shape::Array => Ok(strings(rest.split(','))),
                    Shape::Object => self.pairs(rest, ","),
                }
            }
        }
    }

    /// `color=blue`, `color=blue,black`, `color=blue&color=black`, or the
    /// exploded object form `R=100&G=200` where keys are property names.
    fn form(&self, location: &MultiMap) -> Result<Value, StyleError> {
        match (self.shape, self.explode) {
            (Shape::Primitive, _) => self.raw(location).map(Value::from),
            (Shape::Array, false) => Ok(strings(self.raw(location)?.split(','))),
            (Shape::Array, true) => {
                let values = location.get_all(self.name).ok_or_else(|| StyleError::NotFound {
                    name: self.name.to_string(),
                })?;
                Ok(strings(values.iter().map(String::as_str)))
            }
            (Shape::Object, false) => self.pairs(self.raw(location)?, ","),
            (Shape::Object, true) if self.properties.is_empty() => {
                self.assignments(self.raw(location)?.split('&'), '=')
            }
            (Shape::Object, true) => {
                let object: Map<String, Value> = self
                    .properties
                    .iter()
                    .filter_map(|prop| location.get(prop).map(|v| (prop.to_string(), Value::from(v))))
                    .collect();
                if object.is_empty() {
                    return Err(StyleError::NotFound {
                        name: self.name.to_string(),
                    });
                }
                Ok(Value::Object(object))
            }
        }
    }

    fn delimited_raw<'l>(&self, location: &'l MultiMap) -> Result<&'l str, StyleError> {
        if self.explode || self.shape == Shape::Primitive {
            return Err(self.not_supported());
        }
        self.raw(location)
    }

    /// `blue|black` or `R|100|G|200` (likewise with spaces).
    fn delimited(&self, raw: &str, delimiter: &str) -> Result<Value, StyleError> {
        match self.shape {
            Shape::Array => Ok(strings(raw.split(delimiter))),
            Shape::Object => self.pairs(raw, delimiter),
            Shape::Primitive => Err(self.not_supported()),
        }
    }

    /// `color[R]=100&color[G]=200`.
    fn deep_object(&self, location: &MultiMap) -> Result<Value, StyleError> {
        if !self.explode || self.shape != Shape::Object {
            return Err(self.not_supported());
        }
        let prefix = format!("{}[", self.name);
        let mut object = Map::new();
        for (key, values) in location.iter() {
            let Some(inner) = key.strip_prefix(&prefix).and_then(|k| k.strip_suffix(']')) else {
                continue;
            };
            if inner.is_empty() || inner.contains(['[', ']']) {
                return Err(self.malformed(format!("unsupported key {}", key)));
            }
            if let Some(value) = values.first() {
                object.insert(inner.to_string(), Value::from(value.as_str()));
            }
        }
        if object.is_empty() {
            return Err(StyleError::NotFound {
                name: self.name.to_string(),
            });
        }
        Ok(Value::Object(object))
    }

    /// Alternating keys and values: `R,100,G,200`.
    fn pairs(&self, raw: &str, delimiter: &str) -> Result<Value, StyleError> {
        let parts: Vec<&str> = raw.split(delimiter).collect();
        if parts.len() % 2 != 0 {
            return Err(self.malformed("expected an even number of key/value items"));
        }
        Ok(Value::Object(
            parts
                .chunks(2)
                .map(|pair| (pair[0].to_string(), Value::from(pair[1])))
                .collect(),
        ))
    }

    /// `key=value` items.
    fn assignments<'r>(
        &self,
        items: impl Iterator<Item = &'r str>,
        separator: char,
    ) -> Result<Value, StyleError> {
        items
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.split_once(separator)
                    .map(|(k, v)| (k.to_string(), Value::from(v)))
                    .ok_or_else(|| self.malformed(format!("expected key{}value in {}", separator, item)))
            })
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object)
    }
}

fn strings<'s>(items: impl IntoIterator<Item = &'s str>) -> Value {
    Value::Array(items.into_iter().map(Value::from).collect())
}
