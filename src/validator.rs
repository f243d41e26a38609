//! Structural validation of values against arena schemas.
//!
//! Type, format and enum checks plus the composition keywords are evaluated
//! here. Scalar constraint keywords (`minLength`, `pattern`, ...) were
//! compiled per node at load time and are delegated to `jsonschema`.

use serde_json::{Map, Value};

use crate::error::{SchemaError, ValidationError};
use crate::schema::{
    escape_pointer, AdditionalProperties, RecursionGuard, Schema, SchemaContext, SchemaId,
};
use crate::types::{Direction, Kind};

/// Validator bound to one (version, direction) context.
#[derive(Debug, Clone, Copy)]
pub struct SchemaValidator<'a> {
    ctx: SchemaContext<'a>,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(ctx: SchemaContext<'a>) -> Self {
        Self { ctx }
    }

    /// Validate `value` against schema `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] carrying every structural complaint,
    /// each with the JSON Pointer of the offending value.
    pub fn validate(&self, id: SchemaId, value: &Value) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        self.collect(id, value, "", &mut errors, &mut RecursionGuard::default());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors })
        }
    }

    pub fn is_valid(&self, id: SchemaId, value: &Value) -> bool {
        self.validate(id, value).is_ok()
    }

    /// Declared type check only. Untyped schemas accept everything.
    pub fn type_valid(&self, id: SchemaId, value: &Value) -> bool {
        let schema = self.ctx.schema(id);
        if value.is_null() {
            return schema.accepts_null();
        }
        !schema.has_type() || schema.types.iter().any(|k| k.matches(value, self.ctx.version))
    }

    /// Format check only. Unknown formats pass.
    pub fn format_valid(&self, id: SchemaId, value: &Value) -> bool {
        match &self.ctx.schema(id).format {
            Some(format) => self.ctx.formats.check(format, value, self.ctx.version),
            None => true,
        }
    }

    /// Whether `value` is acceptable as `kind` under schema `id`: the kind
    /// matches and the schema's format holds.
    pub fn kind_valid(&self, id: SchemaId, kind: Kind, value: &Value) -> bool {
        kind.matches(value, self.ctx.version) && self.format_valid(id, value)
    }

    /// The single `oneOf` branch `value` satisfies.
    ///
    /// `Ok(None)` when the schema has no `oneOf`.
    ///
    /// # Errors
    ///
    /// Fails when zero branches, or more than one, match.
    pub fn one_of(&self, id: SchemaId, value: &Value) -> Result<Option<SchemaId>, ValidationError> {
        let schema = self.ctx.schema(id);
        if schema.one_of.is_empty() {
            return Ok(None);
        }
        let mut guard = RecursionGuard::default();
        let matched = self.valid_branches(&schema.one_of, value, "", &mut guard);
        match matched.as_slice() {
            [only] => Ok(Some(*only)),
            _ => Err(ValidationError {
                errors: vec![one_of_error(value, matched.len())],
            }),
        }
    }

    /// Every `anyOf` branch `value` satisfies.
    pub fn any_of(&self, id: SchemaId, value: &Value) -> Vec<SchemaId> {
        let mut guard = RecursionGuard::default();
        self.valid_branches(&self.ctx.schema(id).any_of, value, "", &mut guard)
    }

    /// `allOf` branches that declare a type and that `value` satisfies.
    ///
    /// Untyped branches are left out: they only constrain, they never
    /// contribute a shape of their own.
    pub fn all_of(&self, id: SchemaId, value: &Value) -> Vec<SchemaId> {
        let mut guard = RecursionGuard::default();
        self.ctx
            .schema(id)
            .all_of
            .iter()
            .copied()
            .filter(|branch| self.ctx.schema(*branch).has_type())
            .filter(|branch| self.branch_valid(*branch, value, "", &mut guard))
            .collect()
    }

    fn valid_branches(
        &self,
        branches: &[SchemaId],
        value: &Value,
        path: &str,
        guard: &mut RecursionGuard,
    ) -> Vec<SchemaId> {
        branches
            .iter()
            .copied()
            .filter(|branch| self.branch_valid(*branch, value, path, guard))
            .collect()
    }

    fn branch_valid(
        &self,
        id: SchemaId,
        value: &Value,
        path: &str,
        guard: &mut RecursionGuard,
    ) -> bool {
        let mut errors = Vec::new();
        self.collect(id, value, path, &mut errors, guard);
        errors.is_empty()
    }

    fn collect(
        &self,
        id: SchemaId,
        value: &Value,
        path: &str,
        errors: &mut Vec<SchemaError>,
        guard: &mut RecursionGuard,
    ) {
        // Re-entering the same node for the same value cannot add anything.
        if !guard.enter(id, value) {
            return;
        }
        self.collect_node(id, value, path, errors, guard);
        guard.leave(id, value);
    }

    fn collect_node(
        &self,
        id: SchemaId,
        value: &Value,
        path: &str,
        errors: &mut Vec<SchemaError>,
        guard: &mut RecursionGuard,
    ) {
        let schema = self.ctx.schema(id);
        let error = |message: String| SchemaError {
            path: path.to_string(),
            message,
        };

        if value.is_null() {
            if !schema.accepts_null() {
                errors.push(error("null is not allowed".to_string()));
                return;
            }
            // Untyped nodes still answer to their enum and combinators.
            if schema.has_type() || schema.nullable {
                return;
            }
        }

        if !self.type_valid(id, value) {
            errors.push(error(format!(
                "{} is not of type {}",
                value,
                describe_types(&schema.types)
            )));
            return;
        }

        if !self.format_valid(id, value) {
            if let Some(format) = &schema.format {
                errors.push(error(format!("{} is not a \"{}\"", value, format)));
            }
        }

        if let Some(allowed) = &schema.enum_values {
            if !allowed.contains(value) {
                errors.push(error(format!(
                    "{} is not one of {}",
                    value,
                    Value::Array(allowed.clone())
                )));
            }
        }

        if let Some(keywords) = &schema.keywords {
            for e in keywords.validator().iter_errors(value) {
                errors.push(SchemaError {
                    path: format!("{}{}", path, e.instance_path),
                    message: e.to_string(),
                });
            }
        }

        match value {
            Value::Array(items) => {
                if let Some(item_schema) = schema.items {
                    for (i, item) in items.iter().enumerate() {
                        let child = format!("{}/{}", path, i);
                        self.collect(item_schema, item, &child, errors, guard);
                    }
                }
            }
            Value::Object(map) => self.collect_object(schema, map, path, errors, guard),
            _ => {}
        }

        for branch in &schema.all_of {
            self.collect(*branch, value, path, errors, guard);
        }

        if !schema.any_of.is_empty()
            && self
                .valid_branches(&schema.any_of, value, path, guard)
                .is_empty()
        {
            errors.push(error(format!(
                "{} is not valid under any of the given schemas",
                value
            )));
        }

        if !schema.one_of.is_empty() {
            let matched = self.valid_branches(&schema.one_of, value, path, guard).len();
            if matched != 1 {
                let mut e = one_of_error(value, matched);
                e.path = path.to_string();
                errors.push(e);
            }
        }

        if let Some(not) = schema.not {
            if self.branch_valid(not, value, path, guard) {
                errors.push(error(format!(
                    "{} should not be valid under the negated schema",
                    value
                )));
            }
        }
    }

    fn collect_object(
        &self,
        schema: &Schema,
        map: &Map<String, Value>,
        path: &str,
        errors: &mut Vec<SchemaError>,
        guard: &mut RecursionGuard,
    ) {
        let direction = self.ctx.direction;

        for name in &schema.required {
            let hidden = schema.properties.get(name).is_some_and(|prop| {
                let prop = self.ctx.schema(*prop);
                direction.hides(prop.read_only, prop.write_only)
            });
            if !hidden && !map.contains_key(name) {
                errors.push(SchemaError {
                    path: path.to_string(),
                    message: format!("\"{}\" is a required property", name),
                });
            }
        }

        for (name, prop_id) in &schema.properties {
            let Some(item) = map.get(name) else {
                continue;
            };
            let child = format!("{}/{}", path, escape_pointer(name));
            let prop = self.ctx.schema(*prop_id);
            if direction.hides(prop.read_only, prop.write_only) {
                let message = match direction {
                    Direction::Request => format!("Tried to write read-only property with {}", item),
                    Direction::Response => format!("Tried to read write-only property with {}", item),
                };
                errors.push(SchemaError {
                    path: child.clone(),
                    message,
                });
            }
            self.collect(*prop_id, item, &child, errors, guard);
        }

        let extras = map
            .iter()
            .filter(|(key, _)| !schema.properties.contains_key(key.as_str()));
        match schema.additional_properties {
            AdditionalProperties::Allowed => {}
            AdditionalProperties::Forbidden => {
                for (key, _) in extras {
                    errors.push(SchemaError {
                        path: path.to_string(),
                        message: format!(
                            "Additional properties are not allowed (\"{}\" was unexpected)",
                            key
                        ),
                    });
                }
            }
            AdditionalProperties::Schema(extra) => {
                for (key, item) in extras {
                    let child = format!("{}/{}", path, escape_pointer(key));
                    self.collect(extra, item, &child, errors, guard);
                }
            }
        }
    }
}

fn one_of_error(value: &Value, matched: usize) -> SchemaError {
    let message = if matched == 0 {
        format!("{} is not valid under any of the given schemas", value)
    } else {
        format!("{} is valid under more than one of the given schemas", value)
    };
    SchemaError {
        path: String::new(),
        message,
    }
}

fn describe_types(types: &[Kind]) -> String {
    match types {
        [single] => format!("\"{}\"", single),
        many => {
            let names: Vec<String> = many.iter().map(|k| format!("\"{}\"", k)).collect();
            format!("[{}]", names.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FormatRegistry;
    use crate::schema::SchemaArena;
    use crate::types::ContractVersion;
    use serde_json::json;

    struct Fixture {
        arena: SchemaArena,
        root: SchemaId,
        formats: FormatRegistry,
        version: ContractVersion,
    }

    impl Fixture {
        fn new(schema: Value) -> Self {
            Self::with_version(schema, ContractVersion::V30)
        }

        fn with_version(schema: Value, version: ContractVersion) -> Self {
            let (arena, root) = SchemaArena::from_value(&schema, version).unwrap();
            Self {
                arena,
                root,
                formats: FormatRegistry::builtin(),
                version,
            }
        }

        fn validator(&self, direction: Direction) -> SchemaValidator<'_> {
            SchemaContext::new(&self.arena, self.version, direction, &self.formats).validator()
        }

        fn errors(&self, direction: Direction, value: Value) -> Vec<SchemaError> {
            match self.validator(direction).validate(self.root, &value) {
                Ok(()) => Vec::new(),
                Err(e) => e.errors,
            }
        }
    }

    fn pet() -> Value {
        json!({
            "type": "object",
            "required": ["id", "name"],
            "properties": {
                "id": { "type": "integer", "readOnly": true },
                "name": { "type": "string", "minLength": 1 },
                "secret": { "type": "string", "writeOnly": true },
                "tag": { "type": "string", "nullable": true }
            }
        })
    }

    #[test]
    fn read_only_is_rejected_in_requests_only() {
        let fixture = Fixture::new(pet());
        let body = json!({ "id": 1, "name": "Rex" });

        let errors = fixture.errors(Direction::Request, body.clone());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "/id");
        assert!(errors[0].message.contains("read-only"));

        assert!(fixture.errors(Direction::Response, body).is_empty());
    }

    #[test]
    fn required_skips_hidden_properties() {
        let fixture = Fixture::new(pet());
        // `id` is readOnly, so a request need not carry it.
        assert!(fixture.errors(Direction::Request, json!({ "name": "Rex" })).is_empty());

        let errors = fixture.errors(Direction::Response, json!({ "name": "Rex" }));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("\"id\" is a required property"));
    }

    #[test]
    fn write_only_is_rejected_in_responses() {
        let fixture = Fixture::new(pet());
        let errors = fixture.errors(
            Direction::Response,
            json!({ "id": 1, "name": "Rex", "secret": "s3" }),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "/secret");
    }

    #[test]
    fn nullable() {
        let fixture = Fixture::new(pet());
        assert!(fixture
            .errors(Direction::Response, json!({ "id": 1, "name": "Rex", "tag": null }))
            .is_empty());
        let errors = fixture.errors(Direction::Response, json!({ "id": 1, "name": null }));
        assert_eq!(errors[0].path, "/name");
    }

    #[test]
    fn null_in_type_list_for_31() {
        let fixture = Fixture::with_version(
            json!({ "type": ["string", "null"] }),
            ContractVersion::V31,
        );
        assert!(fixture.errors(Direction::Request, Value::Null).is_empty());
        assert!(!fixture.errors(Direction::Request, json!(3)).is_empty());
    }

    #[test]
    fn untyped_composition_checks_null() {
        let one_of = Fixture::new(json!({
            "oneOf": [{ "type": "string" }, { "type": "integer" }]
        }));
        assert!(!one_of.errors(Direction::Request, Value::Null).is_empty());
        assert!(one_of.errors(Direction::Request, json!("a")).is_empty());

        let nullable_branch = Fixture::new(json!({
            "anyOf": [{ "type": "string", "nullable": true }, { "type": "integer" }]
        }));
        assert!(nullable_branch.errors(Direction::Request, Value::Null).is_empty());

        let nullable_parent = Fixture::new(json!({
            "nullable": true,
            "allOf": [{ "type": "string" }]
        }));
        assert!(nullable_parent.errors(Direction::Request, Value::Null).is_empty());

        let free = Fixture::new(json!({}));
        assert!(free.errors(Direction::Request, Value::Null).is_empty());
    }

    #[test]
    fn keyword_constraints_are_enforced() {
        let fixture = Fixture::new(pet());
        let errors = fixture.errors(Direction::Response, json!({ "id": 1, "name": "" }));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "/name");
    }

    #[test]
    fn additional_properties_false() {
        let fixture = Fixture::new(json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "additionalProperties": false
        }));
        let errors = fixture.errors(Direction::Request, json!({ "a": "x", "b": 1, "c": 2 }));
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("\"b\""));
    }

    #[test]
    fn additional_properties_schema() {
        let fixture = Fixture::new(json!({
            "type": "object",
            "additionalProperties": { "type": "integer" }
        }));
        assert!(fixture.errors(Direction::Request, json!({ "a": 1 })).is_empty());
        let errors = fixture.errors(Direction::Request, json!({ "a": "x" }));
        assert_eq!(errors[0].path, "/a");
    }

    #[test]
    fn format_and_enum() {
        let fixture = Fixture::new(json!({
            "type": "object",
            "properties": {
                "born": { "type": "string", "format": "date" },
                "kind": { "type": "string", "enum": ["cat", "dog"] },
                "code": { "type": "string", "format": "custom" }
            }
        }));
        assert!(fixture
            .errors(
                Direction::Request,
                json!({ "born": "2020-01-02", "kind": "cat", "code": "anything" })
            )
            .is_empty());
        let errors = fixture.errors(Direction::Request, json!({ "born": "yesterday", "kind": "cow" }));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn one_of_needs_exactly_one_match() {
        let fixture = Fixture::new(json!({
            "oneOf": [
                { "type": "integer" },
                { "type": "number" },
                { "type": "string" }
            ]
        }));
        let validator = fixture.validator(Direction::Request);

        // 3 is both an integer and a number.
        let err = validator.one_of(fixture.root, &json!(3)).unwrap_err();
        assert!(err.errors[0].message.contains("more than one"));
        assert!(!validator.is_valid(fixture.root, &json!(3)));

        assert!(validator.one_of(fixture.root, &json!(true)).is_err());

        let branch = validator.one_of(fixture.root, &json!("x")).unwrap();
        assert_eq!(branch, Some(fixture.arena[fixture.root].one_of[2]));
        assert!(validator.is_valid(fixture.root, &json!(1.5)));
    }

    #[test]
    fn any_of_and_all_of() {
        let fixture = Fixture::new(json!({
            "anyOf": [{ "type": "string" }, { "type": "string", "minLength": 3 }],
            "allOf": [{ "type": "string" }, { "maxLength": 5 }]
        }));
        let validator = fixture.validator(Direction::Request);
        let root = &fixture.arena[fixture.root];

        assert_eq!(validator.any_of(fixture.root, &json!("ab")), vec![root.any_of[0]]);
        assert_eq!(validator.any_of(fixture.root, &json!("abc")).len(), 2);
        // The untyped branch validates but is not reported.
        assert_eq!(validator.all_of(fixture.root, &json!("abc")), vec![root.all_of[0]]);

        assert!(validator.is_valid(fixture.root, &json!("abc")));
        assert!(!validator.is_valid(fixture.root, &json!("abcdef")));
        assert!(!validator.is_valid(fixture.root, &json!(1)));
    }

    #[test]
    fn not_keyword() {
        let fixture = Fixture::new(json!({ "not": { "type": "string" } }));
        let validator = fixture.validator(Direction::Request);
        assert!(validator.is_valid(fixture.root, &json!(1)));
        assert!(!validator.is_valid(fixture.root, &json!("x")));
    }

    #[test]
    fn kind_and_format_checks() {
        let fixture = Fixture::new(json!({ "type": ["integer", "string"], "format": "int32" }));
        let validator = fixture.validator(Direction::Request);
        assert!(validator.kind_valid(fixture.root, Kind::Integer, &json!(5)));
        assert!(!validator.kind_valid(fixture.root, Kind::Integer, &json!(5_000_000_000i64)));
        assert!(validator.kind_valid(fixture.root, Kind::String, &json!("5")));
        assert!(validator.type_valid(fixture.root, &json!("x")));
        assert!(!validator.type_valid(fixture.root, &json!(true)));
    }

    #[test]
    fn recursive_schema_terminates() {
        let fixture = Fixture::new(json!({
            "components": {
                "schemas": {
                    "Node": {
                        "type": "object",
                        "properties": {
                            "value": { "type": "integer" },
                            "children": {
                                "type": "array",
                                "items": { "$ref": "#/components/schemas/Node" }
                            }
                        },
                        "allOf": [{ "$ref": "#/components/schemas/Node" }]
                    }
                }
            },
            "$ref": "#/components/schemas/Node"
        }));
        let value = json!({ "value": 1, "children": [{ "value": 2, "children": [] }] });
        assert!(fixture.errors(Direction::Request, value).is_empty());
        let bad = json!({ "value": 1, "children": [{ "value": "two" }] });
        let errors = fixture.errors(Direction::Request, bad);
        assert!(errors.iter().any(|e| e.path == "/children/0/value"));
    }
}
