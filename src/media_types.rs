//! Body deserializers keyed by media type.
//!
//! JSON (and `+json`), XML, url-encoded forms, multipart forms and plain
//! text are understood. Form-like bodies produce objects whose values are
//! strings; properties whose schema is an array collect repeated keys.

use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::contract::MediaType;
use crate::error::MediaTypeError;
use crate::schema::{SchemaArena, SchemaId, SchemaKind};
use crate::typed::Typed;

/// A parsed `Content-Type` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    /// Lowercase `type/subtype`.
    pub essence: String,
    pub params: IndexMap<String, String>,
}

impl MimeType {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';');
        let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let params = parts
            .filter_map(|param| param.split_once('='))
            .map(|(k, v)| {
                (
                    k.trim().to_ascii_lowercase(),
                    v.trim().trim_matches('"').to_string(),
                )
            })
            .collect();
        Self { essence, params }
    }

    fn type_part(&self) -> &str {
        self.essence.split('/').next().unwrap_or_default()
    }

    fn is_json(&self) -> bool {
        self.essence == "application/json" || self.essence.ends_with("+json")
    }

    fn is_xml(&self) -> bool {
        matches!(self.essence.as_str(), "application/xml" | "text/xml")
            || self.essence.ends_with("+xml")
    }
}

/// Find the declared media type for a request/response content type:
/// exact match first, then `type/*`, then `*/*`.
pub fn find_media_type<'c>(
    content: &'c IndexMap<String, MediaType>,
    mimetype: &str,
) -> Option<(&'c str, &'c MediaType)> {
    let wanted = MimeType::parse(mimetype);
    let declared = || {
        content
            .iter()
            .map(|(key, media)| (key.as_str(), MimeType::parse(key), media))
    };

    if let Some((key, _, media)) = declared().find(|(_, m, _)| m.essence == wanted.essence) {
        return Some((key, media));
    }
    let range = format!("{}/*", wanted.type_part());
    if let Some((key, _, media)) = declared().find(|(_, m, _)| m.essence == range) {
        return Some((key, media));
    }
    declared()
        .find(|(_, m, _)| m.essence == "*/*")
        .map(|(key, _, media)| (key, media))
}

/// Raw content of multipart parts that are not valid UTF-8, by field name.
///
/// The deserialized value carries a one-char-per-byte stand-in for such
/// parts; [`restore`](Self::restore) swaps the bytes back in once the body
/// is unmarshalled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryParts {
    fields: IndexMap<String, RawField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RawField {
    /// Field folded to its last part.
    Last(Vec<u8>),
    /// Field kept every part; `None` marks text parts.
    Items(Vec<Option<Vec<u8>>>),
}

impl BinaryParts {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Replace the stand-ins of an unmarshalled body with [`Typed::Bytes`].
    pub fn restore(self, typed: &mut Typed) {
        let Typed::Record(record) = typed else {
            return;
        };
        for (name, raw) in self.fields {
            let Some(field) = record.get_mut(&name) else {
                continue;
            };
            match raw {
                RawField::Last(bytes) => {
                    if is_text(field) {
                        *field = Typed::Bytes(bytes);
                    }
                }
                RawField::Items(raws) => {
                    if let Typed::List(items) = field {
                        for (item, raw) in items.iter_mut().zip(raws) {
                            if let Some(bytes) = raw {
                                if is_text(item) {
                                    *item = Typed::Bytes(bytes);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

fn is_text(value: &Typed) -> bool {
    matches!(value, Typed::String(_) | Typed::Bytes(_))
}

/// Deserializer for one body (or complex parameter) value.
#[derive(Debug, Clone, Copy)]
pub struct MediaTypeDeserializer<'a> {
    arena: &'a SchemaArena,
    schema: Option<SchemaId>,
    strict: bool,
}

impl<'a> MediaTypeDeserializer<'a> {
    pub fn new(arena: &'a SchemaArena, schema: Option<SchemaId>) -> Self {
        Self {
            arena,
            schema,
            strict: false,
        }
    }

    /// Fail on media types without a deserializer instead of passing the
    /// body through as text.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Turn raw body bytes into a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `MediaTypeError::Malformed` for content that does not parse
    /// and `Unsupported` for unknown media types in strict mode.
    pub fn deserialize(&self, content_type: &str, body: &[u8]) -> Result<Value, MediaTypeError> {
        self.deserialize_body(content_type, body)
            .map(|(value, _)| value)
    }

    /// Like [`deserialize`](Self::deserialize), also handing back the raw
    /// content of multipart parts that are not valid UTF-8.
    ///
    /// # Errors
    ///
    /// Same as [`deserialize`](Self::deserialize).
    pub fn deserialize_body(
        &self,
        content_type: &str,
        body: &[u8],
    ) -> Result<(Value, BinaryParts), MediaTypeError> {
        let mime = MimeType::parse(content_type);
        let malformed = |message: String| MediaTypeError::Malformed {
            mimetype: mime.essence.clone(),
            message,
        };

        if mime.essence == "multipart/form-data" {
            let boundary = mime
                .params
                .get("boundary")
                .ok_or_else(|| malformed("missing boundary parameter".to_string()))?;
            return self.multipart(body, boundary).map_err(malformed);
        }

        let value = if mime.is_json() {
            serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))?
        } else if mime.is_xml() {
            self.xml(body).map_err(malformed)?
        } else {
            match mime.essence.as_str() {
                "application/x-www-form-urlencoded" => self.urlencoded(body),
                "text/plain" => std::str::from_utf8(body)
                    .map(Value::from)
                    .map_err(|e| malformed(e.to_string()))?,
                _ if self.strict => {
                    return Err(MediaTypeError::Unsupported {
                        mimetype: mime.essence.clone(),
                    })
                }
                _ => {
                    tracing::warn!(mimetype = %mime.essence, "no deserializer for media type, passing body through");
                    Value::from(String::from_utf8_lossy(body).into_owned())
                }
            }
        };
        Ok((value, BinaryParts::default()))
    }

    fn urlencoded(&self, body: &[u8]) -> Value {
        let mut fields: IndexMap<String, Vec<Value>> = IndexMap::new();
        for (key, value) in url::form_urlencoded::parse(body) {
            fields
                .entry(key.into_owned())
                .or_default()
                .push(Value::from(value.into_owned()));
        }
        fold_fields(self.arena, self.schema, fields, Repeats::LastWins)
    }

    fn multipart(&self, body: &[u8], boundary: &str) -> Result<(Value, BinaryParts), String> {
        let delimiter = format!("--{}", boundary);
        let mut fields: IndexMap<String, Vec<Value>> = IndexMap::new();
        let mut raw: IndexMap<String, Vec<Option<Vec<u8>>>> = IndexMap::new();
        let mut closed = false;

        for segment in split_bytes(body, delimiter.as_bytes()).into_iter().skip(1) {
            if segment.starts_with(b"--") {
                closed = true;
                break;
            }
            let segment = segment.strip_prefix(&b"\r\n"[..]).unwrap_or(segment);
            let split = find_bytes(segment, b"\r\n\r\n")
                .ok_or_else(|| "part without header separator".to_string())?;
            let head = String::from_utf8_lossy(&segment[..split]);
            let content = &segment[split + 4..];
            let content = content.strip_suffix(&b"\r\n"[..]).unwrap_or(content);

            let mut name = None;
            let mut part_type = None;
            for line in head.lines() {
                let Some((header, value)) = line.split_once(':') else {
                    continue;
                };
                match header.trim().to_ascii_lowercase().as_str() {
                    "content-disposition" => name = disposition_name(value),
                    "content-type" => part_type = Some(MimeType::parse(value)),
                    _ => {}
                }
            }
            let name = name.ok_or_else(|| "part without a content-disposition name".to_string())?;

            let (value, bytes) = match std::str::from_utf8(content) {
                Ok(text) => {
                    let value = match part_type {
                        Some(mime) if mime.is_json() => {
                            serde_json::from_str(text).unwrap_or_else(|_| Value::from(text))
                        }
                        _ => Value::from(text),
                    };
                    (value, None)
                }
                // One char per byte, so length constraints count bytes.
                Err(_) => (
                    Value::from(content.iter().map(|b| char::from(*b)).collect::<String>()),
                    Some(content.to_vec()),
                ),
            };
            fields.entry(name.clone()).or_default().push(value);
            raw.entry(name).or_default().push(bytes);
        }

        if !closed {
            return Err("missing closing boundary".to_string());
        }
        let value = fold_fields(self.arena, self.schema, fields, Repeats::LastWins);

        let mut parts = BinaryParts::default();
        for (name, raws) in raw {
            if raws.iter().all(Option::is_none) {
                continue;
            }
            let field = match value.get(&name) {
                Some(Value::Array(items)) if items.len() == raws.len() => RawField::Items(raws),
                _ => match raws.into_iter().last().flatten() {
                    Some(bytes) => RawField::Last(bytes),
                    None => continue,
                },
            };
            parts.fields.insert(name, field);
        }
        Ok((value, parts))
    }

    fn xml(&self, body: &[u8]) -> Result<Value, String> {
        let text = std::str::from_utf8(body).map_err(|e| e.to_string())?;
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        // Open elements: accumulated children and text.
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event().map_err(|e| e.to_string())? {
                Event::Start(start) => stack.push(XmlElement::open(&start)?),
                Event::Empty(start) => {
                    let element = XmlElement::open(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
                Event::Text(t) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&t.unescape().map_err(|e| e.to_string())?);
                    }
                }
                Event::CData(c) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| "unbalanced end tag".to_string())?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err("unclosed element".to_string());
        }
        let root = root.ok_or_else(|| "empty document".to_string())?;
        Ok(root.into_value(self.arena, self.schema))
    }
}

#[derive(Debug)]
struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    fn open(start: &BytesStart<'_>) -> Result<Self, String> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            attributes.push((key, value.into_owned()));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            attributes,
            children: Vec::new(),
            text: String::new(),
        })
    }

    /// Leaf elements become strings, others objects keyed by child name.
    fn into_value(self, arena: &SchemaArena, schema: Option<SchemaId>) -> Value {
        if self.children.is_empty() && self.attributes.is_empty() {
            return Value::from(self.text);
        }
        let mut fields: IndexMap<String, Vec<Value>> = IndexMap::new();
        for (key, value) in self.attributes {
            fields.entry(key).or_default().push(Value::from(value));
        }
        for child in self.children {
            let child_schema = schema
                .and_then(|id| property_schema(arena, id, &child.name))
                .map(|id| item_schema(arena, id));
            let name = child.name.clone();
            let value = child.into_value(arena, child_schema);
            fields.entry(name).or_default().push(value);
        }
        fold_fields(arena, schema, fields, Repeats::Collect)
    }
}

/// How undeclared keys that repeat are folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repeats {
    LastWins,
    Collect,
}

/// Collapse multi-valued fields into an object. Array-typed properties keep
/// every value, other declared properties keep the last one.
fn fold_fields(
    arena: &SchemaArena,
    schema: Option<SchemaId>,
    fields: IndexMap<String, Vec<Value>>,
    repeats: Repeats,
) -> Value {
    let mut object = Map::with_capacity(fields.len());
    for (key, mut values) in fields {
        let declared = schema.and_then(|id| property_schema(arena, id, &key));
        let collect = match declared.map(|id| arena.get(id).kind()) {
            Some(SchemaKind::Array) => true,
            Some(_) => false,
            None => repeats == Repeats::Collect && values.len() > 1,
        };
        let value = if collect {
            Value::Array(values)
        } else {
            values.pop().unwrap_or(Value::Null)
        };
        object.insert(key, value);
    }
    Value::Object(object)
}

fn property_schema(arena: &SchemaArena, id: SchemaId, key: &str) -> Option<SchemaId> {
    let schema = arena.get(id);
    schema.properties.get(key).copied().or_else(|| {
        schema
            .all_of
            .iter()
            .find_map(|branch| arena.get(*branch).properties.get(key).copied())
    })
}

/// For XML, an array property's elements are shaped by its `items`.
fn item_schema(arena: &SchemaArena, id: SchemaId) -> SchemaId {
    match arena.get(id).kind() {
        SchemaKind::Array => arena.get(id).items.unwrap_or(id),
        _ => id,
    }
}

fn split_bytes<'b>(haystack: &'b [u8], needle: &[u8]) -> Vec<&'b [u8]> {
    let mut pieces = Vec::new();
    let mut rest = haystack;
    while let Some(at) = find_bytes(rest, needle) {
        pieces.push(&rest[..at]);
        rest = &rest[at + needle.len()..];
    }
    pieces.push(rest);
    pieces
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn disposition_name(value: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("name")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}
