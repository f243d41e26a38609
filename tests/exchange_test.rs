//! Integration tests for request and response unmarshalling.

use chrono::NaiveDate;
use oas_exchange::{
    load_document_str, BodyError, Contract, ExchangeError, ExchangeUnmarshaller, Options,
    ParamLocation, ParameterError, ResolutionError, SecurityError, SimpleRequest, SimpleResponse,
    Typed, UnmarshalError,
};
use serde_json::json;

const PETSTORE: &str = r##"
openapi: 3.0.3
info:
  title: Petstore
  version: "1.0"
servers:
  - url: http://petstore.swagger.io/{version}
    variables:
      version:
        default: v1
        enum: [v1, v2]
security:
  - api_key: []
  - bearer: []
paths:
  /pets:
    get:
      operationId: listPets
      security: []
      parameters:
        - name: limit
          in: query
          schema:
            type: integer
            format: int32
        - name: ids
          in: query
          schema:
            type: array
            items:
              type: integer
        - name: tags
          in: query
          style: pipeDelimited
          schema:
            type: array
            items:
              type: string
        - name: filter
          in: query
          style: deepObject
          explode: true
          schema:
            type: object
            properties:
              color:
                type: string
              age:
                type: integer
        - name: X-Trace
          in: header
          schema:
            type: boolean
        - name: session
          in: cookie
          schema:
            type: string
      responses:
        "200":
          description: pets
          headers:
            X-Rate-Limit:
              required: true
              schema:
                type: integer
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: "#/components/schemas/Pet"
        default:
          description: error
          content:
            application/json:
              schema:
                $ref: "#/components/schemas/Error"
    post:
      operationId: createPet
      requestBody:
        required: true
        content:
          application/json:
            schema:
              $ref: "#/components/schemas/Pet"
          application/x-www-form-urlencoded:
            schema:
              $ref: "#/components/schemas/Pet"
      responses:
        "201":
          description: created
          content:
            application/json:
              schema:
                $ref: "#/components/schemas/Pet"
  /pets/mine:
    get:
      operationId: myPets
      responses:
        "200":
          description: mine
  /pets/{petId}:
    parameters:
      - name: petId
        in: path
        required: true
        schema:
          type: integer
          format: int64
    get:
      operationId: showPet
      responses:
        "2XX":
          description: pet
          content:
            application/json:
              schema:
                $ref: "#/components/schemas/Pet"
  /pets/{petId}/owner:
    get:
      operationId: petOwner
      parameters:
        - name: petId
          in: path
          required: true
          schema:
            type: integer
      responses:
        "200":
          description: owner
  /{collection}/{id}/owner:
    get:
      operationId: anyOwner
      parameters:
        - name: collection
          in: path
          required: true
          schema:
            type: string
        - name: id
          in: path
          required: true
          schema:
            type: string
      responses:
        "200":
          description: owner
components:
  securitySchemes:
    api_key:
      type: apiKey
      name: X-API-Key
      in: header
    bearer:
      type: http
      scheme: bearer
  schemas:
    Pet:
      type: object
      required: [id, name]
      properties:
        id:
          type: integer
          format: int64
          readOnly: true
        name:
          type: string
        status:
          type: string
          enum: [available, sold]
          default: available
        birthday:
          type: string
          format: date
        secret:
          type: string
          writeOnly: true
    Error:
      type: object
      required: [code]
      properties:
        code:
          type: integer
        message:
          type: string
"##;

const HOST: &str = "http://petstore.swagger.io";

fn petstore() -> Contract {
    let document = load_document_str(PETSTORE).unwrap();
    Contract::from_value(&document).unwrap()
}

fn authorized(request: SimpleRequest) -> SimpleRequest {
    request.with_header("X-API-Key", "secret-key")
}

// === Resolution ===

mod resolution {
    use super::*;

    #[test]
    fn concrete_path_wins_over_templates() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());

        let mine = SimpleRequest::new(HOST, "GET", "/v1/pets/mine");
        let resolved = unmarshaller.resolve(&mine).unwrap();
        assert_eq!(resolved.operation.operation_id.as_deref(), Some("myPets"));

        let one = SimpleRequest::new(HOST, "GET", "/v1/pets/5");
        let resolved = unmarshaller.resolve(&one).unwrap();
        assert_eq!(resolved.operation.operation_id.as_deref(), Some("showPet"));
        assert_eq!(resolved.path_variables["petId"], "5");
        assert_eq!(resolved.server_variables["version"], "v1");

        let owner = SimpleRequest::new(HOST, "GET", "/v1/pets/5/owner");
        let resolved = unmarshaller.resolve(&owner).unwrap();
        assert_eq!(resolved.operation.operation_id.as_deref(), Some("petOwner"));

        let other = SimpleRequest::new(HOST, "GET", "/v1/shops/5/owner");
        let resolved = unmarshaller.resolve(&other).unwrap();
        assert_eq!(resolved.operation.operation_id.as_deref(), Some("anyOwner"));
        assert_eq!(resolved.path_variables["collection"], "shops");
    }

    #[test]
    fn failures_are_ordered() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());

        let no_path = SimpleRequest::new(HOST, "GET", "/v1/a/b/c");
        assert!(matches!(
            unmarshaller.resolve(&no_path),
            Err(ResolutionError::PathNotFound { .. })
        ));

        let no_operation = SimpleRequest::new(HOST, "DELETE", "/v1/pets");
        assert!(matches!(
            unmarshaller.resolve(&no_operation),
            Err(ResolutionError::OperationNotFound { .. })
        ));

        let no_server = SimpleRequest::new("http://elsewhere.io", "GET", "/v1/pets");
        assert!(matches!(
            unmarshaller.resolve(&no_server),
            Err(ResolutionError::ServerNotFound { .. })
        ));

        let bad_variable = SimpleRequest::new(HOST, "GET", "/v3/pets");
        assert!(matches!(
            unmarshaller.resolve(&bad_variable),
            Err(ResolutionError::ServerNotFound { .. })
        ));
    }

    #[test]
    fn resolution_failure_ends_the_exchange() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = SimpleRequest::new(HOST, "PATCH", "/v1/pets");
        let err = unmarshaller.unmarshal_request(&request).unwrap_err();
        assert_eq!(err.http_status(), 405);
    }
}

// === Parameters ===

mod parameters {
    use super::*;

    #[test]
    fn exploded_form_query() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = SimpleRequest::new(HOST, "GET", "/v1/pets?limit=10&ids=1&ids=2");
        let result = unmarshaller.unmarshal_request(&request).unwrap();

        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.parameters.query["limit"], Typed::Int(10));
        assert_eq!(
            result.parameters.query["ids"],
            Typed::List(vec![Typed::Int(1), Typed::Int(2)])
        );
        assert_eq!(
            serde_json::to_value(&result.parameters.query).unwrap(),
            json!({ "limit": 10, "ids": [1, 2] })
        );
    }

    #[test]
    fn delimited_and_deep_object() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = SimpleRequest::new(
            HOST,
            "GET",
            "/v1/pets?tags=cat|dog&filter[color]=red&filter[age]=3",
        );
        let result = unmarshaller.unmarshal_request(&request).unwrap();

        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(
            result.parameters.query["tags"],
            Typed::List(vec![Typed::String("cat".into()), Typed::String("dog".into())])
        );
        let filter = result.parameters.query["filter"].as_record().unwrap();
        assert_eq!(filter.get("color"), Some(&Typed::String("red".into())));
        assert_eq!(filter.get("age"), Some(&Typed::Int(3)));
    }

    #[test]
    fn header_and_cookie() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = SimpleRequest::new(HOST, "GET", "/v1/pets")
            .with_header("x-trace", "true")
            .with_cookie("session", "abc");
        let result = unmarshaller.unmarshal_request(&request).unwrap();

        assert_eq!(result.parameters.header["X-Trace"], Typed::Bool(true));
        assert_eq!(result.parameters.cookie["session"], Typed::String("abc".into()));
    }

    #[test]
    fn path_level_parameter_applies() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = authorized(SimpleRequest::new(HOST, "GET", "/v1/pets/12"));
        let result = unmarshaller.unmarshal_request(&request).unwrap();

        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.parameters.path["petId"], Typed::Int(12));
    }

    #[test]
    fn each_bad_parameter_is_reported() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = SimpleRequest::new(HOST, "GET", "/v1/pets?limit=ten&ids=1&ids=x&tags=a");
        let result = unmarshaller.unmarshal_request(&request).unwrap();

        let failed: Vec<&str> = result
            .errors
            .iter()
            .filter_map(|e| match e {
                ExchangeError::Parameter { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(failed, ["limit", "ids"]);
        assert_eq!(
            result.parameters.query["tags"],
            Typed::List(vec![Typed::String("a".into())])
        );
    }

    #[test]
    fn uncastable_path_parameter() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = authorized(SimpleRequest::new(HOST, "GET", "/v1/pets/abc"));
        let result = unmarshaller.unmarshal_request(&request).unwrap();

        assert_eq!(result.errors.len(), 1);
        assert!(matches!(
            &result.errors[0],
            ExchangeError::Parameter {
                location: ParamLocation::Path,
                source: ParameterError::Cast(_),
                ..
            }
        ));
    }
}

// === Bodies ===

mod bodies {
    use super::*;

    #[test]
    fn read_only_property_depends_on_direction() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let payload = br#"{"id": 10, "name": "Rex"}"#.to_vec();

        let request = authorized(SimpleRequest::new(HOST, "POST", "/v1/pets"))
            .with_body("application/json", payload.clone());
        let result = unmarshaller.unmarshal_request(&request).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind(), "validation");
        assert!(matches!(&result.errors[0], ExchangeError::Body(_)));
        assert!(result.body.is_none());

        let response = SimpleResponse::new(201).with_body("application/json", payload);
        let result = unmarshaller.unmarshal_response(&request, &response).unwrap();
        assert!(result.is_valid(), "{:?}", result.errors);
        let pet = result.data.as_ref().and_then(Typed::as_record).unwrap();
        assert_eq!(pet.model(), Some("Pet"));
        assert_eq!(pet.get("id"), Some(&Typed::Int(10)));
    }

    #[test]
    fn request_body_defaults_and_formats() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = authorized(SimpleRequest::new(HOST, "POST", "/v1/pets")).with_body(
            "application/json; charset=utf-8",
            r#"{"name": "Rex", "birthday": "2020-02-29", "secret": "s"}"#,
        );
        let result = unmarshaller.unmarshal_request(&request).unwrap();

        assert!(result.is_valid(), "{:?}", result.errors);
        let pet = result.body.as_ref().and_then(Typed::as_record).unwrap();
        assert_eq!(pet.get("status"), Some(&Typed::String("available".into())));
        assert_eq!(
            pet.get("birthday"),
            Some(&Typed::Date(NaiveDate::from_ymd_opt(2020, 2, 29).unwrap()))
        );
        assert_eq!(pet.get("secret"), Some(&Typed::String("s".into())));
        assert!(!pet.contains("id"));
    }

    #[test]
    fn form_body_is_cast() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = authorized(SimpleRequest::new(HOST, "POST", "/v1/pets"))
            .with_body("application/x-www-form-urlencoded", "name=Rex&status=sold");
        let result = unmarshaller.unmarshal_request(&request).unwrap();

        assert!(result.is_valid(), "{:?}", result.errors);
        let pet = result.body.as_ref().and_then(Typed::as_record).unwrap();
        assert_eq!(pet.get("status"), Some(&Typed::String("sold".into())));
    }

    #[test]
    fn missing_required_body() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = authorized(SimpleRequest::new(HOST, "POST", "/v1/pets"));
        let result = unmarshaller.unmarshal_request(&request).unwrap();
        assert_eq!(result.errors, vec![ExchangeError::Body(BodyError::Missing)]);
    }

    #[test]
    fn undeclared_media_type() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = authorized(SimpleRequest::new(HOST, "POST", "/v1/pets"))
            .with_body("text/csv", "name\nRex");
        let result = unmarshaller.unmarshal_request(&request).unwrap();
        assert_eq!(
            result.errors,
            vec![ExchangeError::Body(BodyError::MediaTypeNotFound {
                mimetype: "text/csv".into()
            })]
        );
    }

    #[test]
    fn body_and_parameters_fail_independently() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = SimpleRequest::new(HOST, "POST", "/v1/pets")
            .with_body("application/json", r#"{"name": 7}"#);
        let result = unmarshaller.unmarshal_request(&request).unwrap();

        let kinds: Vec<&str> = result.errors.iter().map(ExchangeError::kind).collect();
        assert_eq!(kinds, ["validation", "security"]);
        assert!(!result.errors[0].schema_errors().is_empty());
    }
}

// === Security ===

mod security {
    use super::*;

    #[test]
    fn contract_requirements_apply_by_default() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());

        let anonymous = SimpleRequest::new(HOST, "GET", "/v1/pets/1");
        let result = unmarshaller.unmarshal_request(&anonymous).unwrap();
        assert_eq!(
            result.errors,
            vec![ExchangeError::Security(SecurityError::NotSatisfied {
                requirements: vec![vec!["api_key".into()], vec!["bearer".into()]]
            })]
        );
        assert!(result.security.is_none());

        let bearer = anonymous.with_header("Authorization", "Bearer t0k3n");
        let result = unmarshaller.unmarshal_request(&bearer).unwrap();
        assert!(result.is_valid(), "{:?}", result.errors);
        let credentials = result.security.unwrap();
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials["bearer"], "t0k3n");
    }

    #[test]
    fn empty_operation_security_opts_out() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = SimpleRequest::new(HOST, "GET", "/v1/pets");
        let result = unmarshaller.unmarshal_request(&request).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.security.map(|c| c.len()), Some(0));
    }
}

// === Responses ===

mod responses {
    use super::*;

    #[test]
    fn headers_and_array_body() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = SimpleRequest::new(HOST, "GET", "/v1/pets");
        let response = SimpleResponse::new(200)
            .with_header("X-Rate-Limit", "100")
            .with_body("application/json", r#"[{"id": 1, "name": "Rex"}]"#);
        let result = unmarshaller.unmarshal_response(&request, &response).unwrap();

        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.headers["X-Rate-Limit"], Typed::Int(100));
        let pets = result.data.as_ref().and_then(Typed::as_list).unwrap();
        assert_eq!(pets.len(), 1);
        assert_eq!(
            pets[0].as_record().and_then(|p| p.get("status")),
            Some(&Typed::String("available".into()))
        );
    }

    #[test]
    fn write_only_property_is_rejected_in_responses() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = SimpleRequest::new(HOST, "GET", "/v1/pets");
        let response = SimpleResponse::new(200)
            .with_header("X-Rate-Limit", "1")
            .with_body(
                "application/json",
                r#"[{"id": 1, "name": "Rex", "secret": "s"}]"#,
            );
        let result = unmarshaller.unmarshal_response(&request, &response).unwrap();

        assert_eq!(result.errors.len(), 1);
        assert!(matches!(
            &result.errors[0],
            ExchangeError::Body(BodyError::Unmarshal(UnmarshalError::Validation(_)))
        ));
    }

    #[test]
    fn status_ranges_and_default() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());

        let show = SimpleRequest::new(HOST, "GET", "/v1/pets/1");
        let response = SimpleResponse::new(204);
        assert!(unmarshaller.unmarshal_response(&show, &response).is_ok());

        let list = SimpleRequest::new(HOST, "GET", "/v1/pets");
        let response = SimpleResponse::new(503)
            .with_body("application/json", r#"{"code": 503, "message": "down"}"#);
        let result = unmarshaller.unmarshal_response(&list, &response).unwrap();
        let error = result.data.as_ref().and_then(Typed::as_record).unwrap();
        assert_eq!(error.model(), Some("Error"));
        assert_eq!(error.get("code"), Some(&Typed::Int(503)));

        let mine = SimpleRequest::new(HOST, "GET", "/v1/pets/mine");
        assert_eq!(
            unmarshaller
                .unmarshal_response(&mine, &SimpleResponse::new(404))
                .unwrap_err(),
            ResolutionError::ResponseNotFound { status: 404 }
        );
    }

    #[test]
    fn missing_required_header() {
        let contract = petstore();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = SimpleRequest::new(HOST, "GET", "/v1/pets");
        let result = unmarshaller
            .unmarshal_response(&request, &SimpleResponse::new(200))
            .unwrap();
        assert_eq!(
            result.errors,
            vec![ExchangeError::Header {
                name: "X-Rate-Limit".into(),
                source: ParameterError::Missing
            }]
        );
    }
}

// === Webhooks ===

mod webhooks {
    use super::*;

    fn contract() -> Contract {
        Contract::from_value(&json!({
            "openapi": "3.1.0",
            "info": { "title": "Hooks", "version": "1" },
            "webhooks": {
                "newPet": {
                    "post": {
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": { "id": { "type": "integer" } }
                                    }
                                }
                            }
                        },
                        "responses": { "200": { "description": "ok" } }
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn dispatch_by_name() {
        let contract = contract();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request =
            SimpleRequest::webhook("newPet", "POST").with_body("application/json", r#"{"id": 1.0}"#);
        let result = unmarshaller.unmarshal_request(&request).unwrap();

        assert!(result.is_valid(), "{:?}", result.errors);
        let body = result.body.as_ref().and_then(Typed::as_record).unwrap();
        assert_eq!(body.get("id"), Some(&Typed::Int(1)));
    }

    #[test]
    fn unknown_webhook() {
        let contract = contract();
        let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
        let request = SimpleRequest::webhook("oldPet", "POST");
        assert_eq!(
            unmarshaller.unmarshal_request(&request).unwrap_err(),
            ResolutionError::WebhookNotFound {
                name: "oldPet".into()
            }
        );
    }
}
