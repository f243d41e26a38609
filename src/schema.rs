//! Schema arena.
//!
//! Every schema node of a contract lives in one [`SchemaArena`] and is
//! addressed by a [`SchemaId`]. A `$ref` resolves to the id of the node it
//! points at, so shared and self-referential schemas are the same node
//! rather than copies, and recursion through them is bounded by identity.

use std::collections::{HashMap, HashSet};
use std::fmt;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::casting::Caster;
use crate::error::ContractError;
use crate::formats::FormatRegistry;
use crate::loader::navigate_fragment;
use crate::types::{ContractVersion, Direction, Kind};
use crate::unmarshal::SchemaUnmarshaller;
use crate::validator::SchemaValidator;

/// Keywords delegated to the `jsonschema` crate for each node.
const CONSTRAINT_KEYWORDS: &[&str] = &[
    "const",
    "minLength",
    "maxLength",
    "pattern",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minItems",
    "maxItems",
    "uniqueItems",
    "minProperties",
    "maxProperties",
];

const COMPONENT_SCHEMAS: &str = "#/components/schemas/";

/// Stable identity of a schema node within its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(usize);

/// What `additionalProperties` allows for keys outside `properties`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdditionalProperties {
    /// `true` or absent: free-form values.
    Allowed,
    /// `false`: extra keys are an error.
    Forbidden,
    /// Extra values must match this schema.
    Schema(SchemaId),
}

/// Resolved dispatch kind of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaKind {
    /// Exactly one non-container type (including a bare `"null"`).
    Primitive(Kind),
    Array,
    Object,
    /// Several non-null types, in declaration order.
    Union(Vec<Kind>),
    /// No declared type.
    Any,
}

/// Compiled keyword constraints of one node.
pub(crate) struct KeywordCheck(jsonschema::Validator);

impl KeywordCheck {
    pub(crate) fn validator(&self) -> &jsonschema::Validator {
        &self.0
    }
}

impl fmt::Debug for KeywordCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeywordCheck")
    }
}

/// One schema node.
#[derive(Debug)]
pub struct Schema {
    /// Declared types; empty means any. May contain `Kind::Null` (3.1).
    pub types: Vec<Kind>,
    pub format: Option<String>,
    pub properties: IndexMap<String, SchemaId>,
    pub items: Option<SchemaId>,
    pub one_of: Vec<SchemaId>,
    pub any_of: Vec<SchemaId>,
    pub all_of: Vec<SchemaId>,
    pub not: Option<SchemaId>,
    pub required: Vec<String>,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
    /// The 3.0 `nullable` keyword.
    pub nullable: bool,
    pub read_only: bool,
    pub write_only: bool,
    pub deprecated: bool,
    pub additional_properties: AdditionalProperties,
    /// Name of the record type built for this schema.
    pub model: Option<String>,
    pub(crate) keywords: Option<KeywordCheck>,
}

impl Schema {
    fn any() -> Self {
        Self {
            types: Vec::new(),
            format: None,
            properties: IndexMap::new(),
            items: None,
            one_of: Vec::new(),
            any_of: Vec::new(),
            all_of: Vec::new(),
            not: None,
            required: Vec::new(),
            default: None,
            enum_values: None,
            nullable: false,
            read_only: false,
            write_only: false,
            deprecated: false,
            additional_properties: AdditionalProperties::Allowed,
            model: None,
            keywords: None,
        }
    }

    /// Whether `null` is an acceptable value.
    pub fn accepts_null(&self) -> bool {
        self.nullable || self.types.is_empty() || self.types.contains(&Kind::Null)
    }

    pub fn has_type(&self) -> bool {
        !self.types.is_empty()
    }

    pub fn kind(&self) -> SchemaKind {
        let non_null: Vec<Kind> = self
            .types
            .iter()
            .copied()
            .filter(|k| *k != Kind::Null)
            .collect();
        match non_null.as_slice() {
            [] if self.types.is_empty() => SchemaKind::Any,
            [] => SchemaKind::Primitive(Kind::Null),
            [Kind::Array] => SchemaKind::Array,
            [Kind::Object] => SchemaKind::Object,
            [kind] => SchemaKind::Primitive(*kind),
            _ => SchemaKind::Union(non_null),
        }
    }
}

/// Immutable store of every schema node of a contract.
#[derive(Debug, Default)]
pub struct SchemaArena {
    nodes: Vec<Schema>,
}

impl SchemaArena {
    /// Build an arena from a standalone schema value.
    ///
    /// `$ref`s are resolved against `schema` itself, so a document holding
    /// `components/schemas` next to the root schema works.
    pub fn from_value(
        schema: &Value,
        version: ContractVersion,
    ) -> Result<(SchemaArena, SchemaId), ContractError> {
        let mut builder = SchemaBuilder::new(schema, version);
        let root = builder.build(schema, "#")?;
        Ok((builder.finish()?, root))
    }

    pub fn get(&self, id: SchemaId) -> &Schema {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl std::ops::Index<SchemaId> for SchemaArena {
    type Output = Schema;

    fn index(&self, id: SchemaId) -> &Schema {
        self.get(id)
    }
}

/// Builds schema nodes out of a document, sharing nodes per `$ref` target.
pub(crate) struct SchemaBuilder<'d> {
    doc: &'d Value,
    version: ContractVersion,
    nodes: Vec<Option<Schema>>,
    by_pointer: HashMap<String, SchemaId>,
}

impl<'d> SchemaBuilder<'d> {
    pub(crate) fn new(doc: &'d Value, version: ContractVersion) -> Self {
        Self {
            doc,
            version,
            nodes: Vec::new(),
            by_pointer: HashMap::new(),
        }
    }

    pub(crate) fn finish(self) -> Result<SchemaArena, ContractError> {
        let nodes = self
            .nodes
            .into_iter()
            .collect::<Option<Vec<Schema>>>()
            .ok_or_else(|| ContractError::malformed("#", "dangling schema reference"))?;
        Ok(SchemaArena { nodes })
    }

    fn reserve(&mut self) -> SchemaId {
        self.nodes.push(None);
        SchemaId(self.nodes.len() - 1)
    }

    /// Build (or reuse) the node for `value`, found at JSON pointer `path`.
    pub(crate) fn build(&mut self, value: &'d Value, path: &str) -> Result<SchemaId, ContractError> {
        if let Some(reference) = value.get("$ref") {
            let reference = reference
                .as_str()
                .ok_or_else(|| ContractError::malformed(path, "$ref must be a string"))?;
            return self.build_ref(reference);
        }
        let id = self.reserve();
        let node = self.build_node(value, path, None)?;
        self.nodes[id.0] = Some(node);
        Ok(id)
    }

    fn build_ref(&mut self, reference: &str) -> Result<SchemaId, ContractError> {
        if let Some(id) = self.by_pointer.get(reference) {
            return Ok(*id);
        }
        if !reference.starts_with('#') {
            return Err(ContractError::UnresolvableRef {
                reference: reference.to_string(),
            });
        }

        let doc = self.doc;
        let target = navigate_fragment(doc, reference)?;
        if let Some(next) = target.get("$ref").and_then(Value::as_str) {
            if next == reference {
                return Err(ContractError::UnresolvableRef {
                    reference: reference.to_string(),
                });
            }
            // Alias: share the node of the final target.
            let id = self.build_ref(next)?;
            self.by_pointer.insert(reference.to_string(), id);
            return Ok(id);
        }

        let id = self.reserve();
        self.by_pointer.insert(reference.to_string(), id);
        let model = reference
            .strip_prefix(COMPONENT_SCHEMAS)
            .filter(|name| !name.contains('/'))
            .map(|name| name.replace("~1", "/").replace("~0", "~"));
        let node = self.build_node(target, reference, model)?;
        self.nodes[id.0] = Some(node);
        Ok(id)
    }

    fn build_node(
        &mut self,
        value: &'d Value,
        path: &str,
        model: Option<String>,
    ) -> Result<Schema, ContractError> {
        let map = match value {
            Value::Object(map) => map,
            Value::Bool(true) => return Ok(Schema::any()),
            Value::Bool(false) => {
                let mut schema = Schema::any();
                schema.not = Some(self.push(Schema::any()));
                return Ok(schema);
            }
            _ => return Err(ContractError::malformed(path, "schema must be an object")),
        };

        let mut schema = Schema::any();
        schema.types = parse_types(map.get("type"), path)?;
        schema.format = map.get("format").and_then(Value::as_str).map(String::from);
        schema.nullable = flag(map, "nullable");
        schema.read_only = flag(map, "readOnly");
        schema.write_only = flag(map, "writeOnly");
        schema.deprecated = flag(map, "deprecated");
        schema.default = map.get("default").cloned();
        schema.enum_values = map.get("enum").and_then(Value::as_array).cloned();
        schema.required = map
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        schema.model = map
            .get("x-model")
            .and_then(Value::as_str)
            .map(String::from)
            .or(model);

        if let Some(properties) = map.get("properties") {
            let properties = properties
                .as_object()
                .ok_or_else(|| ContractError::malformed(path, "properties must be an object"))?;
            for (name, prop) in properties {
                let child = format!("{}/properties/{}", path, escape_pointer(name));
                let id = self.build(prop, &child)?;
                schema.properties.insert(name.clone(), id);
            }
        }

        if let Some(items) = map.get("items") {
            if items.is_object() || items.is_boolean() {
                schema.items = Some(self.build(items, &format!("{}/items", path))?);
            }
        }

        schema.additional_properties = match map.get("additionalProperties") {
            None | Some(Value::Bool(true)) => AdditionalProperties::Allowed,
            Some(Value::Bool(false)) => AdditionalProperties::Forbidden,
            Some(other) => AdditionalProperties::Schema(
                self.build(other, &format!("{}/additionalProperties", path))?,
            ),
        };

        schema.one_of = self.build_list(map, "oneOf", path)?;
        schema.any_of = self.build_list(map, "anyOf", path)?;
        schema.all_of = self.build_list(map, "allOf", path)?;
        if let Some(not) = map.get("not") {
            schema.not = Some(self.build(not, &format!("{}/not", path))?);
        }

        schema.keywords = self.compile_keywords(map, path)?;
        Ok(schema)
    }

    fn push(&mut self, schema: Schema) -> SchemaId {
        let id = self.reserve();
        self.nodes[id.0] = Some(schema);
        id
    }

    fn build_list(
        &mut self,
        map: &'d Map<String, Value>,
        key: &str,
        path: &str,
    ) -> Result<Vec<SchemaId>, ContractError> {
        let Some(value) = map.get(key) else {
            return Ok(Vec::new());
        };
        let branches = value
            .as_array()
            .ok_or_else(|| ContractError::malformed(path, format!("{} must be an array", key)))?;
        branches
            .iter()
            .enumerate()
            .map(|(i, branch)| self.build(branch, &format!("{}/{}/{}", path, key, i)))
            .collect()
    }

    fn compile_keywords(
        &self,
        map: &Map<String, Value>,
        path: &str,
    ) -> Result<Option<KeywordCheck>, ContractError> {
        let fragment: Map<String, Value> = CONSTRAINT_KEYWORDS
            .iter()
            .filter_map(|key| map.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect();
        if fragment.is_empty() {
            return Ok(None);
        }
        let fragment = Value::Object(fragment);
        let compiled = match self.version {
            ContractVersion::V30 => jsonschema::draft4::new(&fragment),
            ContractVersion::V31 => jsonschema::draft202012::new(&fragment),
        };
        compiled
            .map(|validator| Some(KeywordCheck(validator)))
            .map_err(|e| ContractError::malformed(path, e.to_string()))
    }
}

fn flag(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn parse_types(value: Option<&Value>, path: &str) -> Result<Vec<Kind>, ContractError> {
    let parse_one = |v: &Value| {
        v.as_str()
            .and_then(Kind::parse)
            .ok_or_else(|| ContractError::malformed(path, format!("unknown type {}", v)))
    };
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(types)) => types.iter().map(parse_one).collect(),
        Some(single) => Ok(vec![parse_one(single)?]),
    }
}

/// Escape a key for use as a JSON Pointer segment.
pub(crate) fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// The (version, direction) strategy that validators, casters and
/// unmarshallers are derived from.
#[derive(Debug, Clone, Copy)]
pub struct SchemaContext<'a> {
    pub arena: &'a SchemaArena,
    pub version: ContractVersion,
    pub direction: Direction,
    pub formats: &'a FormatRegistry,
}

impl<'a> SchemaContext<'a> {
    pub fn new(
        arena: &'a SchemaArena,
        version: ContractVersion,
        direction: Direction,
        formats: &'a FormatRegistry,
    ) -> Self {
        Self {
            arena,
            version,
            direction,
            formats,
        }
    }

    pub fn schema(&self, id: SchemaId) -> &'a Schema {
        self.arena.get(id)
    }

    pub fn caster(&self) -> Caster<'a> {
        Caster::new(*self)
    }

    pub fn validator(&self) -> SchemaValidator<'a> {
        SchemaValidator::new(*self)
    }

    pub fn unmarshaller(&self) -> SchemaUnmarshaller<'a> {
        SchemaUnmarshaller::new(*self)
    }
}

/// Identity-based recursion limiter: a schema node is never re-entered
/// for the very same value instance while it is already being evaluated.
#[derive(Debug, Default)]
pub(crate) struct RecursionGuard {
    active: HashSet<(SchemaId, usize)>,
}

impl RecursionGuard {
    pub(crate) fn enter(&mut self, id: SchemaId, value: &Value) -> bool {
        self.active.insert((id, value as *const Value as usize))
    }

    pub(crate) fn is_active(&self, id: SchemaId, value: &Value) -> bool {
        self.active.contains(&(id, value as *const Value as usize))
    }

    pub(crate) fn leave(&mut self, id: SchemaId, value: &Value) {
        self.active.remove(&(id, value as *const Value as usize));
    }
}
