//! OpenAPI Exchange Unmarshalling
//!
//! Resolves HTTP requests and responses against OpenAPI 3.0/3.1 contracts and
//! turns their raw wire values into validated, typed data.
//!
//! Every exchange goes through the same pipeline:
//!
//! 1. **Resolve** the path template, operation and server for the request URL
//! 2. **Deserialize** each parameter by its style and each body by its media type
//! 3. **Cast** strings to the primitive types the schema declares
//! 4. **Validate** against the schema, honoring `readOnly`/`writeOnly` per direction
//! 5. **Unmarshal** into [`Typed`] values, applying formats and defaults
//!
//! # Example
//!
//! ```
//! use oas_exchange::{Contract, ExchangeUnmarshaller, Options, SimpleRequest, Typed};
//! use serde_json::json;
//!
//! let contract = Contract::from_value(&json!({
//!     "openapi": "3.0.3",
//!     "info": { "title": "Pets", "version": "1" },
//!     "servers": [{ "url": "http://petstore.io/v1" }],
//!     "paths": {
//!         "/pets": {
//!             "get": {
//!                 "parameters": [
//!                     { "name": "limit", "in": "query", "schema": { "type": "integer" } }
//!                 ],
//!                 "responses": { "200": { "description": "ok" } }
//!             }
//!         }
//!     }
//! }))
//! .unwrap();
//!
//! let unmarshaller = ExchangeUnmarshaller::new(&contract, Options::new());
//! let request = SimpleRequest::new("http://petstore.io", "GET", "/v1/pets?limit=10");
//! let result = unmarshaller.unmarshal_request(&request).unwrap();
//!
//! assert!(result.is_valid());
//! assert_eq!(result.parameters.query["limit"], Typed::Int(10));
//! ```
//!
//! # Direction Rules
//!
//! | Property flag | Request | Response |
//! |---------------|---------|----------|
//! | `readOnly` | Must be absent, not required | Visible |
//! | `writeOnly` | Visible | Must be absent, not required |
//!
//! # Errors
//!
//! Resolution failures ([`ResolutionError`]) end an exchange. Everything
//! after resolution is collected per item into the result's `errors` list
//! as [`ExchangeError`]s, next to whatever data could still be produced.

mod casting;
mod contract;
mod error;
mod exchange;
mod formats;
mod loader;
mod media_types;
mod resolver;
mod schema;
mod security;
mod styles;
mod templating;
mod typed;
mod types;
mod unmarshal;
mod validator;

pub use casting::Caster;
pub use contract::{
    Contract, MediaType, Operation, Parameter, PathItem, RequestBody, Response, SecurityRequirement,
    SecurityScheme, Server, ServerVariable,
};
pub use error::{
    BodyError, CastError, ContractError, ExchangeError, MediaTypeError, ParameterError,
    ResolutionError, SchemaError, SecurityError, StyleError, UnmarshalError, ValidationError,
};
pub use exchange::{
    ExchangeUnmarshaller, HttpRequest, HttpResponse, Parameters, RequestParameters, RequestResult,
    ResponseResult, SimpleRequest, SimpleResponse, Target,
};
pub use formats::{FormatCheck, FormatConvert, FormatDef, FormatRegistry, BUILTIN_FORMATS};
pub use loader::{load_contract, load_document, load_document_str, navigate_fragment};
pub use media_types::{find_media_type, BinaryParts, MediaTypeDeserializer, MimeType};
pub use resolver::{find_response, OperationResolver, Resolved, ResolvedSummary};
pub use schema::{AdditionalProperties, Schema, SchemaArena, SchemaContext, SchemaId, SchemaKind};
pub use security::{evaluate as evaluate_security, CredentialProvider, StandardCredentials};
pub use styles::{Shape, StyleDeserializer};
pub use templating::{Captures, PathMatch, PathTemplate, ServerTemplate};
pub use typed::{Record, Typed};
pub use types::{
    json_type_name, ContractVersion, Direction, Kind, MultiMap, Options, ParamLocation, Style,
    HTTP_METHODS,
};
pub use unmarshal::SchemaUnmarshaller;
pub use validator::SchemaValidator;
