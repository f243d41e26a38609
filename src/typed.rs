//! Typed values produced by unmarshalling.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// A strongly-typed value built from wire data and a schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Typed {
    Null,
    Bool(bool),
    Int(i64),
    /// Integers above `i64::MAX`.
    UInt(u64),
    Float(f64),
    String(String),
    #[serde(serialize_with = "serialize_bytes")]
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Uuid(Uuid),
    List(Vec<Typed>),
    Record(Record),
}

fn serialize_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

impl Typed {
    pub fn is_null(&self) -> bool {
        matches!(self, Typed::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Typed::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Typed::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Typed::Float(f) => Some(*f),
            Typed::Int(i) => Some(*i as f64),
            Typed::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Typed::Int(i) => u64::try_from(*i).ok(),
            Typed::UInt(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Typed::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Typed]> {
        match self {
            Typed::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Typed::Record(record) => Some(record),
            _ => None,
        }
    }

    /// JSON rendering (dates and uuids become strings, bytes become base64).
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Free-form conversion with no schema guidance.
impl From<&Value> for Typed {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Typed::Null,
            Value::Bool(b) => Typed::Bool(*b),
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Typed::Int(i),
                (None, Some(u)) => Typed::UInt(u),
                (None, None) => Typed::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Typed::String(s.clone()),
            Value::Array(items) => Typed::List(items.iter().map(Typed::from).collect()),
            Value::Object(map) => Typed::Record(Record::with_fields(
                None,
                map.iter()
                    .map(|(k, v)| (k.clone(), Typed::from(v)))
                    .collect(),
            )),
        }
    }
}

/// Struct-like value for an object schema, named after its model.
///
/// Field order follows the schema's declared property order, followed by
/// any additional properties in payload order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    model: Option<String>,
    fields: IndexMap<String, Typed>,
}

impl Record {
    pub fn new(model: Option<String>) -> Self {
        Self {
            model,
            fields: IndexMap::new(),
        }
    }

    pub fn with_fields(model: Option<String>, fields: IndexMap<String, Typed>) -> Self {
        Self { model, fields }
    }

    /// Declared model name; `None` for anonymous records.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&Typed> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Typed> {
        self.fields.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Typed) {
        self.fields.insert(name.into(), value);
    }

    pub fn fields(&self) -> &IndexMap<String, Typed> {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn into_fields(self) -> IndexMap<String, Typed> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn free_form_conversion() {
        let typed = Typed::from(&json!({"a": 1, "b": [true, null], "c": 1.5}));
        let record = typed.as_record().unwrap();
        assert_eq!(record.model(), None);
        assert_eq!(record.get("a"), Some(&Typed::Int(1)));
        assert_eq!(
            record.get("b"),
            Some(&Typed::List(vec![Typed::Bool(true), Typed::Null]))
        );
        assert_eq!(record.get("c"), Some(&Typed::Float(1.5)));
    }

    #[test]
    fn large_unsigned_keeps_precision() {
        let big = u64::MAX - 1;
        let typed = Typed::from(&json!(big));
        assert_eq!(typed, Typed::UInt(big));
        assert_eq!(typed.as_u64(), Some(big));
        assert_eq!(typed.as_i64(), None);
        assert_eq!(typed.to_json(), json!(big));
        assert_eq!(Typed::from(&json!(7)).as_u64(), Some(7));
    }

    #[test]
    fn json_rendering() {
        let mut record = Record::new(Some("Pet".into()));
        record.insert("born", Typed::Date(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()));
        record.insert("blob", Typed::Bytes(b"hi".to_vec()));
        record.insert("tag", Typed::Null);

        let json = Typed::Record(record).to_json();
        assert_eq!(json, json!({"born": "2020-01-02", "blob": "aGk=", "tag": null}));
    }
}
