//! Conversion of validated wire values into [`Typed`] values.
//!
//! Values are validated first, then dispatched on the schema kind. Object
//! schemas merge properties contributed by their composition branches.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::UnmarshalError;
use crate::formats::integer_value;
use crate::schema::{AdditionalProperties, RecursionGuard, SchemaContext, SchemaId, SchemaKind};
use crate::typed::{Record, Typed};
use crate::types::Kind;
use crate::validator::SchemaValidator;

/// Unmarshaller bound to one (version, direction) context.
#[derive(Debug, Clone, Copy)]
pub struct SchemaUnmarshaller<'a> {
    ctx: SchemaContext<'a>,
    validator: SchemaValidator<'a>,
}

impl<'a> SchemaUnmarshaller<'a> {
    pub fn new(ctx: SchemaContext<'a>) -> Self {
        Self {
            ctx,
            validator: SchemaValidator::new(ctx),
        }
    }

    /// Validate `value` against schema `id` and convert it.
    ///
    /// # Errors
    ///
    /// Returns `UnmarshalError::Validation` for invalid values,
    /// `UnknownFormat` when the schema names a format the registry lacks,
    /// and `FormatConversion` when a converter rejects a value.
    pub fn unmarshal(&self, id: SchemaId, value: &Value) -> Result<Typed, UnmarshalError> {
        self.validator.validate(id, value)?;
        self.node(id, value, &mut RecursionGuard::default())
    }

    fn node(
        &self,
        id: SchemaId,
        value: &Value,
        guard: &mut RecursionGuard,
    ) -> Result<Typed, UnmarshalError> {
        if value.is_null() {
            return Ok(Typed::Null);
        }
        // A node already converting this very value has nothing more to add.
        if !guard.enter(id, value) {
            return Ok(Typed::from(value));
        }
        let typed = self.kind_node(id, value, guard);
        guard.leave(id, value);
        typed
    }

    fn kind_node(
        &self,
        id: SchemaId,
        value: &Value,
        guard: &mut RecursionGuard,
    ) -> Result<Typed, UnmarshalError> {
        match self.ctx.schema(id).kind() {
            SchemaKind::Primitive(Kind::Null) => Ok(Typed::Null),
            SchemaKind::Primitive(kind) => self.primitive(id, kind, value),
            SchemaKind::Array => self.array(id, value, guard),
            SchemaKind::Object => self.object(id, value, guard),
            SchemaKind::Union(kinds) => match kinds
                .into_iter()
                .find(|kind| self.validator.kind_valid(id, *kind, value))
            {
                Some(kind) => self.dispatch(id, kind, value, guard),
                None => Ok(Typed::from(value)),
            },
            SchemaKind::Any => self.any(id, value, guard),
        }
    }

    fn dispatch(
        &self,
        id: SchemaId,
        kind: Kind,
        value: &Value,
        guard: &mut RecursionGuard,
    ) -> Result<Typed, UnmarshalError> {
        match kind {
            Kind::Null => Ok(Typed::Null),
            Kind::Array => self.array(id, value, guard),
            Kind::Object => self.object(id, value, guard),
            primitive => self.primitive(id, primitive, value),
        }
    }

    /// Untyped schema: objects merge composition branches, anything else
    /// defers to the branch that shapes it, then to the first matching kind.
    fn any(
        &self,
        id: SchemaId,
        value: &Value,
        guard: &mut RecursionGuard,
    ) -> Result<Typed, UnmarshalError> {
        let Some(kind) = Kind::ANY_ORDER
            .into_iter()
            .find(|kind| self.validator.kind_valid(id, *kind, value))
        else {
            return Ok(Typed::from(value));
        };
        if kind == Kind::Object {
            return self.object(id, value, guard);
        }

        // Branches already converting this value would only loop back here.
        let one_of = match self.validator.one_of(id, value) {
            Ok(Some(branch)) => Some(branch),
            _ => None,
        };
        let branch = one_of
            .into_iter()
            .chain(self.validator.any_of(id, value))
            .chain(self.validator.all_of(id, value))
            .find(|branch| !guard.is_active(*branch, value));
        match branch {
            Some(branch) => self.node(branch, value, guard),
            None => self.dispatch(id, kind, value, guard),
        }
    }

    fn primitive(&self, id: SchemaId, kind: Kind, value: &Value) -> Result<Typed, UnmarshalError> {
        if let Some(format) = &self.ctx.schema(id).format {
            let def = self
                .ctx
                .formats
                .get(format)
                .ok_or_else(|| UnmarshalError::UnknownFormat {
                    format: format.clone(),
                })?;
            if def.applies_to(value, self.ctx.version) {
                if let Some(converted) = def.convert(value) {
                    return converted.map_err(|message| UnmarshalError::FormatConversion {
                        format: format.clone(),
                        value: value.to_string(),
                        message,
                    });
                }
            }
        }
        Ok(match kind {
            Kind::Integer => integer_value(value)
                .map(Typed::Int)
                .unwrap_or_else(|| Typed::from(value)),
            _ => Typed::from(value),
        })
    }

    fn array(
        &self,
        id: SchemaId,
        value: &Value,
        guard: &mut RecursionGuard,
    ) -> Result<Typed, UnmarshalError> {
        let Value::Array(items) = value else {
            return Ok(Typed::from(value));
        };
        let Some(item_schema) = self.ctx.schema(id).items else {
            return Ok(Typed::from(value));
        };
        items
            .iter()
            .map(|item| self.node(item_schema, item, guard))
            .collect::<Result<Vec<_>, _>>()
            .map(Typed::List)
    }

    fn object(
        &self,
        id: SchemaId,
        value: &Value,
        guard: &mut RecursionGuard,
    ) -> Result<Typed, UnmarshalError> {
        let Value::Object(map) = value else {
            return Ok(Typed::from(value));
        };
        let schema = self.ctx.schema(id);
        let mut record = Record::new(schema.model.clone());
        let mut declared: HashSet<&str> = HashSet::new();

        self.branch_properties(id, value, map, &mut record, &mut declared, guard)?;
        self.properties(id, map, &mut record, &mut declared, guard)?;

        let extras = map
            .iter()
            .filter(|(key, _)| !declared.contains(key.as_str()));
        match schema.additional_properties {
            AdditionalProperties::Allowed => {
                for (key, item) in extras {
                    record.insert(key.clone(), Typed::from(item));
                }
            }
            AdditionalProperties::Schema(extra) => {
                for (key, item) in extras {
                    record.insert(key.clone(), self.node(extra, item, guard)?);
                }
            }
            AdditionalProperties::Forbidden => {}
        }

        Ok(Typed::Record(record))
    }

    /// Properties of every composition branch of `id` that `value`
    /// satisfies, nested branches first.
    fn branch_properties(
        &self,
        id: SchemaId,
        value: &Value,
        map: &Map<String, Value>,
        record: &mut Record,
        declared: &mut HashSet<&'a str>,
        guard: &mut RecursionGuard,
    ) -> Result<(), UnmarshalError> {
        let mut branches = Vec::new();
        if let Ok(Some(branch)) = self.validator.one_of(id, value) {
            branches.push(branch);
        }
        branches.extend(self.validator.any_of(id, value));
        branches.extend(self.validator.all_of(id, value));

        for branch in branches {
            if !guard.enter(branch, value) {
                continue;
            }
            let mut merged = self.branch_properties(branch, value, map, record, declared, guard);
            if merged.is_ok() {
                merged = self.properties(branch, map, record, declared, guard);
            }
            guard.leave(branch, value);
            merged?;
        }
        Ok(())
    }

    /// Declared properties of schema `id` only, without its own extras or
    /// composition.
    fn properties(
        &self,
        id: SchemaId,
        map: &Map<String, Value>,
        record: &mut Record,
        declared: &mut HashSet<&'a str>,
        guard: &mut RecursionGuard,
    ) -> Result<(), UnmarshalError> {
        let schema = self.ctx.schema(id);
        for (name, prop_id) in &schema.properties {
            declared.insert(name.as_str());
            let prop = self.ctx.schema(*prop_id);
            if self.ctx.direction.hides(prop.read_only, prop.write_only) {
                continue;
            }
            let item = match map.get(name).or(prop.default.as_ref()) {
                Some(item) => item,
                None => continue,
            };
            record.insert(name.clone(), self.node(*prop_id, item, guard)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FormatRegistry;
    use crate::schema::SchemaArena;
    use crate::types::{ContractVersion, Direction};
    use chrono::NaiveDate;
    use serde_json::json;

    struct Fixture {
        arena: SchemaArena,
        root: SchemaId,
        formats: FormatRegistry,
    }

    impl Fixture {
        fn new(schema: Value) -> Self {
            let (arena, root) = SchemaArena::from_value(&schema, ContractVersion::V30).unwrap();
            Self {
                arena,
                root,
                formats: FormatRegistry::builtin(),
            }
        }

        fn unmarshaller(&self, direction: Direction) -> SchemaUnmarshaller<'_> {
            SchemaContext::new(&self.arena, ContractVersion::V30, direction, &self.formats)
                .unmarshaller()
        }

        fn run(&self, value: Value) -> Result<Typed, UnmarshalError> {
            self.unmarshaller(Direction::Response).unmarshal(self.root, &value)
        }
    }

    #[test]
    fn primitives_and_formats() {
        let date = Fixture::new(json!({ "type": "string", "format": "date" }));
        assert_eq!(
            date.run(json!("2020-01-02")).unwrap(),
            Typed::Date(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap())
        );

        let plain = Fixture::new(json!({ "type": "integer", "format": "int64" }));
        assert_eq!(plain.run(json!(7)).unwrap(), Typed::Int(7));

        let email = Fixture::new(json!({ "type": "string", "format": "email" }));
        assert_eq!(
            email.run(json!("a@b.io")).unwrap(),
            Typed::String("a@b.io".into())
        );
    }

    #[test]
    fn unknown_format_fails() {
        let fixture = Fixture::new(json!({ "type": "string", "format": "custom" }));
        assert!(matches!(
            fixture.run(json!("x")),
            Err(UnmarshalError::UnknownFormat { format }) if format == "custom"
        ));
    }

    #[test]
    fn format_for_other_kind_is_ignored() {
        let fixture = Fixture::new(json!({ "type": ["integer", "string"], "format": "date" }));
        assert_eq!(fixture.run(json!(5)).unwrap(), Typed::Int(5));
        assert!(matches!(fixture.run(json!("2020-02-03")).unwrap(), Typed::Date(_)));
    }

    #[test]
    fn union_picks_first_matching_kind() {
        let fixture = Fixture::new(json!({ "type": ["integer", "string"] }));
        assert_eq!(fixture.run(json!(3)).unwrap(), Typed::Int(3));
        assert_eq!(fixture.run(json!("3")).unwrap(), Typed::String("3".into()));
    }

    #[test]
    fn untyped_follows_any_order() {
        let fixture = Fixture::new(json!({}));
        assert_eq!(fixture.run(json!(1)).unwrap(), Typed::Int(1));
        assert_eq!(fixture.run(json!(1.5)).unwrap(), Typed::Float(1.5));
        assert_eq!(fixture.run(json!(true)).unwrap(), Typed::Bool(true));
        assert_eq!(fixture.run(json!("s")).unwrap(), Typed::String("s".into()));
        assert_eq!(
            fixture.run(json!([1, "a"])).unwrap(),
            Typed::List(vec![Typed::Int(1), Typed::String("a".into())])
        );
        let record = fixture.run(json!({ "a": 1 })).unwrap();
        assert_eq!(record.as_record().unwrap().get("a"), Some(&Typed::Int(1)));
    }

    #[test]
    fn untyped_primitive_uses_one_of_branch() {
        let fixture = Fixture::new(json!({
            "oneOf": [
                { "type": "string", "format": "date" },
                { "type": "boolean" }
            ]
        }));
        assert!(matches!(fixture.run(json!("2021-05-06")).unwrap(), Typed::Date(_)));
        assert_eq!(fixture.run(json!(false)).unwrap(), Typed::Bool(false));
    }

    #[test]
    fn invalid_value_is_a_validation_error() {
        let fixture = Fixture::new(json!({ "type": "integer" }));
        assert!(matches!(
            fixture.run(json!("x")),
            Err(UnmarshalError::Validation(_))
        ));
    }

    fn pets() -> Value {
        json!({
            "components": {
                "schemas": {
                    "Cat": {
                        "type": "object",
                        "required": ["meow"],
                        "properties": {
                            "name": { "type": "string" },
                            "meow": { "type": "boolean" }
                        }
                    },
                    "Dog": {
                        "type": "object",
                        "required": ["bark"],
                        "properties": {
                            "name": { "type": "string" },
                            "bark": { "type": "boolean" }
                        }
                    }
                }
            },
            "type": "object",
            "oneOf": [
                { "$ref": "#/components/schemas/Cat" },
                { "$ref": "#/components/schemas/Dog" }
            ]
        })
    }

    #[test]
    fn one_of_merge_matches_branch() {
        let fixture = Fixture::new(pets());
        let value = json!({ "name": "Tom", "meow": true });

        let merged = fixture.run(value.clone()).unwrap();
        let cat = fixture.arena[fixture.root].one_of[0];
        let direct = fixture
            .unmarshaller(Direction::Response)
            .unmarshal(cat, &value)
            .unwrap();

        assert_eq!(
            merged.as_record().unwrap().fields(),
            direct.as_record().unwrap().fields()
        );
        assert_eq!(direct.as_record().unwrap().model(), Some("Cat"));
    }

    #[test]
    fn defaults_and_hidden_properties() {
        let fixture = Fixture::new(json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "readOnly": true, "default": 0 },
                "limit": { "type": "integer", "default": 20 },
                "token": { "type": "string", "writeOnly": true }
            }
        }));

        let request = fixture
            .unmarshaller(Direction::Request)
            .unmarshal(fixture.root, &json!({ "token": "t" }))
            .unwrap();
        let request = request.as_record().unwrap();
        assert!(!request.contains("id"));
        assert_eq!(request.get("limit"), Some(&Typed::Int(20)));
        assert_eq!(request.get("token"), Some(&Typed::String("t".into())));

        let response = fixture.run(json!({})).unwrap();
        let response = response.as_record().unwrap();
        assert_eq!(response.get("id"), Some(&Typed::Int(0)));
        assert!(!response.contains("token"));
    }

    #[test]
    fn additional_properties_are_kept() {
        let typed = Fixture::new(json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "additionalProperties": { "type": "string", "format": "date" }
        }));
        let record = typed.run(json!({ "a": "x", "b": "2020-01-01" })).unwrap();
        let record = record.as_record().unwrap();
        assert_eq!(record.field_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(matches!(record.get("b"), Some(Typed::Date(_))));

        let open = Fixture::new(json!({ "type": "object" }));
        let record = open.run(json!({ "x": [1] })).unwrap();
        assert_eq!(
            record.as_record().unwrap().get("x"),
            Some(&Typed::List(vec![Typed::Int(1)]))
        );
    }

    #[test]
    fn recursive_records() {
        let fixture = Fixture::new(json!({
            "components": {
                "schemas": {
                    "Node": {
                        "type": "object",
                        "properties": {
                            "value": { "type": "integer" },
                            "next": { "$ref": "#/components/schemas/Node" }
                        }
                    }
                }
            },
            "$ref": "#/components/schemas/Node"
        }));
        let out = fixture
            .run(json!({ "value": 1, "next": { "value": 2, "next": { "value": 3 } } }))
            .unwrap();
        let first = out.as_record().unwrap();
        assert_eq!(first.model(), Some("Node"));
        let second = first.get("next").unwrap().as_record().unwrap();
        let third = second.get("next").unwrap().as_record().unwrap();
        assert_eq!(third.get("value"), Some(&Typed::Int(3)));
        assert!(!third.contains("next"));
    }

    #[test]
    fn self_referencing_composition_terminates() {
        let any_of = Fixture::new(json!({
            "components": {
                "schemas": {
                    "A": {
                        "anyOf": [
                            { "$ref": "#/components/schemas/A" },
                            { "type": "string", "format": "date" }
                        ]
                    }
                }
            },
            "$ref": "#/components/schemas/A"
        }));
        assert!(matches!(any_of.run(json!("2020-01-02")).unwrap(), Typed::Date(_)));
        assert_eq!(any_of.run(json!("x")).unwrap(), Typed::String("x".into()));
        assert_eq!(any_of.run(json!(3)).unwrap(), Typed::Int(3));

        let all_of = Fixture::new(json!({
            "components": {
                "schemas": {
                    "B": {
                        "type": "object",
                        "allOf": [{ "$ref": "#/components/schemas/B" }],
                        "properties": { "v": { "type": "integer" } }
                    }
                }
            },
            "$ref": "#/components/schemas/B"
        }));
        let out = all_of.run(json!({ "v": 1 })).unwrap();
        assert_eq!(out.as_record().unwrap().get("v"), Some(&Typed::Int(1)));
    }

    #[test]
    fn nested_all_of_chain_merges_every_level() {
        let fixture = Fixture::new(json!({
            "components": {
                "schemas": {
                    "Inner": {
                        "type": "object",
                        "properties": {
                            "born": { "type": "string", "format": "date" },
                            "limit": { "type": "integer", "default": 5 }
                        }
                    },
                    "Mid": {
                        "type": "object",
                        "allOf": [{ "$ref": "#/components/schemas/Inner" }],
                        "properties": { "name": { "type": "string" } }
                    }
                }
            },
            "type": "object",
            "allOf": [{ "$ref": "#/components/schemas/Mid" }]
        }));

        let out = fixture
            .run(json!({ "born": "2020-01-02", "name": "Rex" }))
            .unwrap();
        let record = out.as_record().unwrap();
        assert_eq!(
            record.get("born"),
            Some(&Typed::Date(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()))
        );
        assert_eq!(record.get("limit"), Some(&Typed::Int(5)));
        assert_eq!(record.get("name"), Some(&Typed::String("Rex".into())));
    }

    #[test]
    fn unmarshalling_is_idempotent() {
        let fixture = Fixture::new(pets());
        let value = json!({ "name": "Rex", "bark": false });
        assert_eq!(fixture.run(value.clone()).unwrap(), fixture.run(value).unwrap());
    }
}
