//! Immutable contract model built once from an already-loaded document.
//!
//! Paths, webhooks, operations, parameters, bodies, responses, servers and
//! security schemes. All schemas land in one shared [`SchemaArena`].

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::ContractError;
use crate::formats::FormatRegistry;
use crate::loader::dereference;
use crate::schema::{escape_pointer, SchemaArena, SchemaBuilder, SchemaContext, SchemaId};
use crate::templating::{PathTemplate, ServerTemplate};
use crate::types::{ContractVersion, Direction, ParamLocation, Style, HTTP_METHODS};

/// A loaded contract.
#[derive(Debug)]
pub struct Contract {
    pub version: ContractVersion,
    pub servers: Vec<Server>,
    /// Path items in document order.
    pub paths: Vec<PathItem>,
    pub webhooks: IndexMap<String, PathItem>,
    /// Contract-level security requirements.
    pub security: Vec<SecurityRequirement>,
    pub security_schemes: IndexMap<String, SecurityScheme>,
    schemas: SchemaArena,
    default_server: Server,
}

/// One entry of `paths` (or `webhooks`).
#[derive(Debug)]
pub struct PathItem {
    pub template: PathTemplate,
    pub parameters: Vec<Parameter>,
    /// Operations keyed by lowercase method.
    pub operations: IndexMap<String, Operation>,
    pub servers: Vec<Server>,
}

#[derive(Debug)]
pub struct Operation {
    pub method: String,
    pub operation_id: Option<String>,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    /// Responses keyed by status code, `NXX` range or `default`.
    pub responses: IndexMap<String, Response>,
    /// `None` inherits the contract-level requirements.
    pub security: Option<Vec<SecurityRequirement>>,
    pub servers: Vec<Server>,
    pub deprecated: bool,
}

/// A parameter, or a response header (location `Header`).
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub style: Style,
    pub explode: bool,
    pub allow_empty_value: bool,
    pub deprecated: bool,
    pub schema: Option<SchemaId>,
    /// The complex form: a single media type and its schema.
    pub content: Option<(String, MediaType)>,
}

impl Parameter {
    /// Schema governing the value, from either form.
    pub fn value_schema(&self) -> Option<SchemaId> {
        self.schema
            .or_else(|| self.content.as_ref().and_then(|(_, media)| media.schema))
    }
}

#[derive(Debug, Clone)]
pub struct MediaType {
    pub schema: Option<SchemaId>,
}

#[derive(Debug, Clone)]
pub struct RequestBody {
    pub required: bool,
    pub content: IndexMap<String, MediaType>,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub headers: IndexMap<String, Parameter>,
    pub content: IndexMap<String, MediaType>,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub url: String,
    pub variables: IndexMap<String, ServerVariable>,
    pub(crate) template: ServerTemplate,
}

impl Server {
    /// Build a server entry, compiling its URL template.
    pub fn new(url: impl Into<String>) -> Result<Self, regex::Error> {
        let url = url.into();
        let template = ServerTemplate::parse(&url)?;
        Ok(Self {
            url,
            variables: IndexMap::new(),
            template,
        })
    }

    pub fn is_absolute(&self) -> bool {
        self.url.contains("://")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVariable {
    pub default: String,
    /// Allowed values; empty means unrestricted.
    pub allowed: Vec<String>,
}

/// One alternative of a security requirement list: every named scheme must
/// be satisfied together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityRequirement {
    pub schemes: IndexMap<String, Vec<String>>,
}

impl SecurityRequirement {
    pub fn names(&self) -> Vec<String> {
        self.schemes.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityScheme {
    ApiKey { name: String, location: ParamLocation },
    Http { scheme: String },
    OAuth2,
    OpenIdConnect,
    MutualTls,
}

impl Contract {
    /// Build a contract from a parsed document.
    ///
    /// # Errors
    ///
    /// Returns `ContractError` for unsupported versions, unresolvable
    /// references and malformed entries.
    pub fn from_value(document: &Value) -> Result<Self, ContractError> {
        let version_field = match document.get("openapi") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let version = ContractVersion::parse(&version_field).ok_or(
            ContractError::UnsupportedVersion {
                version: version_field,
            },
        )?;

        let mut parser = DocumentParser {
            doc: document,
            schemas: SchemaBuilder::new(document, version),
        };

        let servers = parser.servers(document.get("servers"), "#/servers")?;
        let security = parser.security(document.get("security"), "#/security")?;
        let security_schemes = parser.security_schemes()?;

        let mut paths = Vec::new();
        if let Some(entries) = document.get("paths").and_then(Value::as_object) {
            for (template, item) in entries {
                let pointer = format!("#/paths/{}", escape_pointer(template));
                paths.push(parser.path_item(template, item, &pointer)?);
            }
        }

        let mut webhooks = IndexMap::new();
        if let Some(entries) = document.get("webhooks").and_then(Value::as_object) {
            for (name, item) in entries {
                let pointer = format!("#/webhooks/{}", escape_pointer(name));
                webhooks.insert(name.clone(), parser.path_item(name, item, &pointer)?);
            }
        }

        let default_server =
            Server::new("/").map_err(|e| ContractError::malformed("#/servers", e.to_string()))?;

        Ok(Contract {
            version,
            servers,
            paths,
            webhooks,
            security,
            security_schemes,
            schemas: parser.schemas.finish()?,
            default_server,
        })
    }

    pub fn schemas(&self) -> &SchemaArena {
        &self.schemas
    }

    /// Server used when no level of the contract declares any: `/`.
    pub fn default_server(&self) -> &Server {
        &self.default_server
    }

    /// Strategy context for one exchange direction.
    pub fn context<'a>(
        &'a self,
        direction: Direction,
        formats: &'a FormatRegistry,
    ) -> SchemaContext<'a> {
        SchemaContext::new(&self.schemas, self.version, direction, formats)
    }
}

struct DocumentParser<'d> {
    doc: &'d Value,
    schemas: SchemaBuilder<'d>,
}

impl<'d> DocumentParser<'d> {
    fn deref(&self, value: &'d Value) -> Result<&'d Value, ContractError> {
        dereference(self.doc, value)
    }

    fn object(&self, value: &'d Value, path: &str) -> Result<&'d Map<String, Value>, ContractError> {
        self.deref(value)?
            .as_object()
            .ok_or_else(|| ContractError::malformed(path, "expected an object"))
    }

    fn path_item(
        &mut self,
        template: &str,
        value: &'d Value,
        path: &str,
    ) -> Result<PathItem, ContractError> {
        let map = self.object(value, path)?;
        let template = PathTemplate::parse(template)
            .map_err(|e| ContractError::malformed(path, e.to_string()))?;
        let parameters = self.parameters(map.get("parameters"), &format!("{}/parameters", path))?;
        let servers = self.servers(map.get("servers"), &format!("{}/servers", path))?;

        let mut operations = IndexMap::new();
        for method in HTTP_METHODS {
            if let Some(op) = map.get(*method) {
                let op_path = format!("{}/{}", path, method);
                operations.insert(method.to_string(), self.operation(method, op, &op_path)?);
            }
        }

        Ok(PathItem {
            template,
            parameters,
            operations,
            servers,
        })
    }

    fn operation(
        &mut self,
        method: &str,
        value: &'d Value,
        path: &str,
    ) -> Result<Operation, ContractError> {
        let map = self.object(value, path)?;
        let parameters = self.parameters(map.get("parameters"), &format!("{}/parameters", path))?;
        let request_body = match map.get("requestBody") {
            Some(body) => Some(self.request_body(body, &format!("{}/requestBody", path))?),
            None => None,
        };

        let mut responses = IndexMap::new();
        if let Some(entries) = map.get("responses").and_then(Value::as_object) {
            for (status, response) in entries {
                let response_path = format!("{}/responses/{}", path, status);
                responses.insert(status.clone(), self.response(response, &response_path)?);
            }
        }

        let security = match map.get("security") {
            Some(value) => Some(self.security(Some(value), &format!("{}/security", path))?),
            None => None,
        };

        Ok(Operation {
            method: method.to_string(),
            operation_id: map
                .get("operationId")
                .and_then(Value::as_str)
                .map(String::from),
            parameters,
            request_body,
            responses,
            security,
            servers: self.servers(map.get("servers"), &format!("{}/servers", path))?,
            deprecated: map
                .get("deprecated")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    fn parameters(
        &mut self,
        value: Option<&'d Value>,
        path: &str,
    ) -> Result<Vec<Parameter>, ContractError> {
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let entries = value
            .as_array()
            .ok_or_else(|| ContractError::malformed(path, "parameters must be an array"))?;
        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| self.parameter(entry, None, &format!("{}/{}", path, i)))
            .collect()
    }

    /// Parse a parameter; `header_name` is set for response headers, which
    /// take their name from the map key and have no `in`.
    fn parameter(
        &mut self,
        value: &'d Value,
        header_name: Option<&str>,
        path: &str,
    ) -> Result<Parameter, ContractError> {
        let map = self.object(value, path)?;

        let (name, location) = match header_name {
            Some(name) => (name.to_string(), ParamLocation::Header),
            None => {
                let name = map
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ContractError::malformed(path, "parameter without name"))?;
                let location = map
                    .get("in")
                    .and_then(Value::as_str)
                    .and_then(ParamLocation::parse)
                    .ok_or_else(|| {
                        ContractError::malformed(path, "parameter without a valid 'in'")
                    })?;
                (name.to_string(), location)
            }
        };

        let style = match map.get("style").and_then(Value::as_str) {
            Some(s) => Style::parse(s)
                .ok_or_else(|| ContractError::malformed(path, format!("unknown style {}", s)))?,
            None => location.default_style(),
        };
        let explode = map
            .get("explode")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| style.default_explode());

        let schema = match map.get("schema") {
            Some(schema) => Some(self.schemas.build(schema, &format!("{}/schema", path))?),
            None => None,
        };
        let content = match map.get("content") {
            Some(content) => self
                .content(content, &format!("{}/content", path))?
                .into_iter()
                .next(),
            None => None,
        };

        Ok(Parameter {
            name,
            location,
            // Path parameters are always required.
            required: location == ParamLocation::Path
                || map.get("required").and_then(Value::as_bool).unwrap_or(false),
            style,
            explode,
            allow_empty_value: map
                .get("allowEmptyValue")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            deprecated: map
                .get("deprecated")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            schema,
            content,
        })
    }

    fn request_body(&mut self, value: &'d Value, path: &str) -> Result<RequestBody, ContractError> {
        let map = self.object(value, path)?;
        let content = match map.get("content") {
            Some(content) => self.content(content, &format!("{}/content", path))?,
            None => IndexMap::new(),
        };
        Ok(RequestBody {
            required: map.get("required").and_then(Value::as_bool).unwrap_or(false),
            content,
        })
    }

    fn response(&mut self, value: &'d Value, path: &str) -> Result<Response, ContractError> {
        let map = self.object(value, path)?;
        let content = match map.get("content") {
            Some(content) => self.content(content, &format!("{}/content", path))?,
            None => IndexMap::new(),
        };
        let mut headers = IndexMap::new();
        if let Some(entries) = map.get("headers").and_then(Value::as_object) {
            for (name, header) in entries {
                let header_path = format!("{}/headers/{}", path, escape_pointer(name));
                headers.insert(name.clone(), self.parameter(header, Some(name), &header_path)?);
            }
        }
        Ok(Response { headers, content })
    }

    fn content(
        &mut self,
        value: &'d Value,
        path: &str,
    ) -> Result<IndexMap<String, MediaType>, ContractError> {
        let map = self.object(value, path)?;
        let mut content = IndexMap::new();
        for (mimetype, media) in map {
            let media_path = format!("{}/{}", path, escape_pointer(mimetype));
            let media = self.object(media, &media_path)?;
            let schema = match media.get("schema") {
                Some(schema) => Some(self.schemas.build(schema, &format!("{}/schema", media_path))?),
                None => None,
            };
            content.insert(mimetype.clone(), MediaType { schema });
        }
        Ok(content)
    }

    fn servers(&self, value: Option<&'d Value>, path: &str) -> Result<Vec<Server>, ContractError> {
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let entries = value
            .as_array()
            .ok_or_else(|| ContractError::malformed(path, "servers must be an array"))?;

        let mut servers = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let server_path = format!("{}/{}", path, i);
            let url = entry
                .get("url")
                .and_then(Value::as_str)
                .ok_or_else(|| ContractError::malformed(&server_path, "server without url"))?;
            let mut server =
                Server::new(url).map_err(|e| ContractError::malformed(&server_path, e.to_string()))?;
            if let Some(variables) = entry.get("variables").and_then(Value::as_object) {
                for (name, variable) in variables {
                    let default = variable
                        .get("default")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let allowed = variable
                        .get("enum")
                        .and_then(Value::as_array)
                        .map(|values| {
                            values
                                .iter()
                                .filter_map(|v| v.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default();
                    server
                        .variables
                        .insert(name.clone(), ServerVariable { default, allowed });
                }
            }
            servers.push(server);
        }
        Ok(servers)
    }

    fn security(
        &self,
        value: Option<&'d Value>,
        path: &str,
    ) -> Result<Vec<SecurityRequirement>, ContractError> {
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let entries = value
            .as_array()
            .ok_or_else(|| ContractError::malformed(path, "security must be an array"))?;
        entries
            .iter()
            .map(|entry| {
                let map = entry.as_object().ok_or_else(|| {
                    ContractError::malformed(path, "security requirement must be an object")
                })?;
                let schemes = map
                    .iter()
                    .map(|(name, scopes)| {
                        let scopes = scopes
                            .as_array()
                            .map(|s| {
                                s.iter()
                                    .filter_map(|v| v.as_str().map(String::from))
                                    .collect()
                            })
                            .unwrap_or_default();
                        (name.clone(), scopes)
                    })
                    .collect();
                Ok(SecurityRequirement { schemes })
            })
            .collect()
    }

    fn security_schemes(&self) -> Result<IndexMap<String, SecurityScheme>, ContractError> {
        let mut schemes = IndexMap::new();
        let Some(entries) = self
            .doc
            .pointer("/components/securitySchemes")
            .and_then(Value::as_object)
        else {
            return Ok(schemes);
        };

        for (name, entry) in entries {
            let path = format!("#/components/securitySchemes/{}", escape_pointer(name));
            let map = self.object(entry, &path)?;
            let field = |key: &str| map.get(key).and_then(Value::as_str);
            let scheme = match field("type") {
                Some("apiKey") => SecurityScheme::ApiKey {
                    name: field("name")
                        .ok_or_else(|| ContractError::malformed(&path, "apiKey without name"))?
                        .to_string(),
                    location: field("in")
                        .and_then(ParamLocation::parse)
                        .filter(|loc| *loc != ParamLocation::Path)
                        .ok_or_else(|| ContractError::malformed(&path, "apiKey without valid in"))?,
                },
                Some("http") => SecurityScheme::Http {
                    scheme: field("scheme").unwrap_or("bearer").to_ascii_lowercase(),
                },
                Some("oauth2") => SecurityScheme::OAuth2,
                Some("openIdConnect") => SecurityScheme::OpenIdConnect,
                Some("mutualTLS") => SecurityScheme::MutualTls,
                other => {
                    return Err(ContractError::malformed(
                        &path,
                        format!("unknown security scheme type {:?}", other),
                    ))
                }
            };
            schemes.insert(name.clone(), scheme);
        }
        Ok(schemes)
    }
}
