//! Forced coercion of loosely typed values (query strings, headers, form
//! fields) to the kinds their schema declares.

use serde_json::{Map, Number, Value};

use crate::error::CastError;
use crate::schema::{AdditionalProperties, SchemaContext, SchemaId, SchemaKind};
use crate::types::Kind;

/// Schema-directed caster.
#[derive(Debug, Clone, Copy)]
pub struct Caster<'a> {
    ctx: SchemaContext<'a>,
}

impl<'a> Caster<'a> {
    pub fn new(ctx: SchemaContext<'a>) -> Self {
        Self { ctx }
    }

    /// Coerce `value` toward the kind of schema `id`.
    ///
    /// `null` and values under untyped schemas pass through untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CastError`] when a value cannot be coerced, including a
    /// bare string where an array is expected.
    pub fn cast(&self, id: SchemaId, value: Value) -> Result<Value, CastError> {
        if value.is_null() {
            return Ok(value);
        }
        match self.ctx.schema(id).kind() {
            SchemaKind::Any | SchemaKind::Primitive(Kind::Null) => Ok(value),
            SchemaKind::Primitive(kind) => cast_primitive(kind, value),
            SchemaKind::Union(kinds) => {
                let mut last = None;
                for kind in kinds {
                    match self.cast_kind(id, kind, value.clone()) {
                        Ok(cast) => return Ok(cast),
                        Err(e) => last = Some(e),
                    }
                }
                Err(last.unwrap_or(CastError {
                    value,
                    kind: Kind::Null,
                }))
            }
            SchemaKind::Array => self.cast_array(id, value),
            SchemaKind::Object => self.cast_object(id, value),
        }
    }

    fn cast_kind(&self, id: SchemaId, kind: Kind, value: Value) -> Result<Value, CastError> {
        match kind {
            Kind::Array if value.is_array() => self.cast_array(id, value),
            Kind::Object if value.is_object() => self.cast_object(id, value),
            Kind::Array | Kind::Object => Err(CastError { value, kind }),
            Kind::Null if value.is_null() => Ok(value),
            Kind::Null => Err(CastError { value, kind }),
            primitive => cast_primitive(primitive, value),
        }
    }

    fn cast_array(&self, id: SchemaId, value: Value) -> Result<Value, CastError> {
        match value {
            Value::String(_) => Err(CastError {
                value,
                kind: Kind::Array,
            }),
            Value::Array(items) => {
                let Some(item_schema) = self.ctx.schema(id).items else {
                    return Ok(Value::Array(items));
                };
                items
                    .into_iter()
                    .map(|item| self.cast(item_schema, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            other => Ok(other),
        }
    }

    fn cast_object(&self, id: SchemaId, value: Value) -> Result<Value, CastError> {
        let Value::Object(map) = value else {
            return Ok(value);
        };
        let mut out = Map::with_capacity(map.len());
        for (key, item) in map {
            let cast = match self.property_schema(id, &key) {
                Some(prop) => self.cast(prop, item)?,
                None => item,
            };
            out.insert(key, cast);
        }
        Ok(Value::Object(out))
    }

    /// Schema for `key`: declared properties (own, then `allOf` branches),
    /// then a schema-valued `additionalProperties`.
    fn property_schema(&self, id: SchemaId, key: &str) -> Option<SchemaId> {
        let schema = self.ctx.schema(id);
        if let Some(prop) = schema.properties.get(key) {
            return Some(*prop);
        }
        if let Some(prop) = schema
            .all_of
            .iter()
            .find_map(|branch| self.ctx.schema(*branch).properties.get(key))
        {
            return Some(*prop);
        }
        match schema.additional_properties {
            AdditionalProperties::Schema(extra) => Some(extra),
            _ => None,
        }
    }
}

fn cast_primitive(kind: Kind, value: Value) -> Result<Value, CastError> {
    let cast = match (&value, kind) {
        (_, Kind::String) => Some(value.clone()),
        (Value::String(s), Kind::Integer) => s.trim().parse::<i64>().ok().map(Value::from),
        (Value::Number(_), Kind::Integer) => Some(value.clone()),
        (Value::String(s), Kind::Number) => parse_number(s.trim()),
        (Value::Number(_), Kind::Number) => Some(value.clone()),
        (Value::String(s), Kind::Boolean) => parse_bool(s).map(Value::Bool),
        (Value::Bool(_), Kind::Boolean) => Some(value.clone()),
        _ => None,
    };
    cast.ok_or(CastError { value, kind })
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
