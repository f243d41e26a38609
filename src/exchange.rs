//! Exchange orchestration.
//!
//! Resolves the operation for a request, then runs every parameter, header
//! and body through deserialize, cast and unmarshal. Failures of single
//! items are collected into the result next to whatever could still be
//! produced; only resolution failures end an exchange early.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::contract::{Contract, MediaType, Parameter, RequestBody};
use crate::error::{BodyError, ExchangeError, ParameterError, ResolutionError, StyleError};
use crate::media_types::{find_media_type, MediaTypeDeserializer};
use crate::resolver::{find_response, OperationResolver, Resolved, ResolvedSummary};
use crate::schema::SchemaContext;
use crate::security;
use crate::styles::StyleDeserializer;
use crate::typed::Typed;
use crate::types::{Direction, MultiMap, Options, ParamLocation};

/// Header parameters the contract may declare but that are never
/// evaluated as parameters.
const RESERVED_HEADERS: &[&str] = &["accept", "content-type", "authorization"];

/// Where a request is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'r> {
    /// A regular request: `host_url` is `scheme://host[:port]`, `path`
    /// starts at the first `/` after it.
    Url { host_url: &'r str, path: &'r str },
    /// A webhook dispatched by name.
    Webhook(&'r str),
}

/// Transport view of an HTTP request.
pub trait HttpRequest {
    fn method(&self) -> &str;
    fn target(&self) -> Target<'_>;
    fn parameters(&self) -> &RequestParameters;
    fn body(&self) -> Option<&[u8]>;
    fn content_type(&self) -> Option<&str>;
}

/// Transport view of an HTTP response.
pub trait HttpResponse {
    fn status(&self) -> u16;
    fn headers(&self) -> &MultiMap;
    fn body(&self) -> Option<&[u8]>;
    fn content_type(&self) -> Option<&str>;
}

/// Raw request values by location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParameters {
    pub query: MultiMap,
    /// Case-insensitive.
    pub header: MultiMap,
    pub cookie: MultiMap,
    pub path: MultiMap,
}

impl RequestParameters {
    pub fn location(&self, location: ParamLocation) -> &MultiMap {
        match location {
            ParamLocation::Path => &self.path,
            ParamLocation::Query => &self.query,
            ParamLocation::Header => &self.header,
            ParamLocation::Cookie => &self.cookie,
        }
    }
}

impl Default for RequestParameters {
    fn default() -> Self {
        Self {
            query: MultiMap::new(),
            header: MultiMap::case_insensitive(),
            cookie: MultiMap::new(),
            path: MultiMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SimpleTarget {
    Url { host_url: String, path: String },
    Webhook(String),
}

/// In-memory [`HttpRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleRequest {
    method: String,
    target: SimpleTarget,
    parameters: RequestParameters,
    body: Option<Vec<u8>>,
    content_type: Option<String>,
}

impl SimpleRequest {
    /// Request for `path` on `host_url`. A query string in `path` is parsed
    /// into the query parameters.
    pub fn new(host_url: impl Into<String>, method: impl Into<String>, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };
        let request = Self {
            method: method.into(),
            target: SimpleTarget::Url {
                host_url: host_url.into(),
                path: path.to_string(),
            },
            parameters: RequestParameters::default(),
            body: None,
            content_type: None,
        };
        match query {
            Some(query) => request.with_query_string(query),
            None => request,
        }
    }

    /// Request delivered to webhook `name`.
    pub fn webhook(name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: SimpleTarget::Webhook(name.into()),
            parameters: RequestParameters::default(),
            body: None,
            content_type: None,
        }
    }

    /// Append every pair of a raw `a=1&b=2` query string.
    pub fn with_query_string(mut self, query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            self.parameters.query.insert(key, value);
        }
        self
    }

    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters.query.insert(name, value);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters.header.insert(name, value);
        self
    }

    pub fn with_cookie(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters.cookie.insert(name, value);
        self
    }

    pub fn with_path_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters.path.set(name, value);
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = Some(body.into());
        self
    }
}

impl HttpRequest for SimpleRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn target(&self) -> Target<'_> {
        match &self.target {
            SimpleTarget::Url { host_url, path } => Target::Url { host_url, path },
            SimpleTarget::Webhook(name) => Target::Webhook(name),
        }
    }

    fn parameters(&self) -> &RequestParameters {
        &self.parameters
    }

    fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .or_else(|| self.parameters.header.get("content-type"))
    }
}

/// In-memory [`HttpResponse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleResponse {
    status: u16,
    headers: MultiMap,
    body: Option<Vec<u8>>,
    content_type: Option<String>,
}

impl SimpleResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: MultiMap::case_insensitive(),
            body: None,
            content_type: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = Some(body.into());
        self
    }
}

impl HttpResponse for SimpleResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn headers(&self) -> &MultiMap {
        &self.headers
    }

    fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .or_else(|| self.headers.get("content-type"))
    }
}

/// Typed parameters by location.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Parameters {
    pub path: IndexMap<String, Typed>,
    pub query: IndexMap<String, Typed>,
    pub header: IndexMap<String, Typed>,
    pub cookie: IndexMap<String, Typed>,
}

impl Parameters {
    pub fn location(&self, location: ParamLocation) -> &IndexMap<String, Typed> {
        match location {
            ParamLocation::Path => &self.path,
            ParamLocation::Query => &self.query,
            ParamLocation::Header => &self.header,
            ParamLocation::Cookie => &self.cookie,
        }
    }

    fn location_mut(&mut self, location: ParamLocation) -> &mut IndexMap<String, Typed> {
        match location {
            ParamLocation::Path => &mut self.path,
            ParamLocation::Query => &mut self.query,
            ParamLocation::Header => &mut self.header,
            ParamLocation::Cookie => &mut self.cookie,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty() && self.query.is_empty() && self.header.is_empty() && self.cookie.is_empty()
    }
}

/// Outcome of unmarshalling a request. Errors and partial data coexist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestResult {
    pub operation: ResolvedSummary,
    pub parameters: Parameters,
    pub body: Option<Typed>,
    /// Credentials of the satisfied security requirement, by scheme name.
    pub security: Option<IndexMap<String, String>>,
    pub errors: Vec<ExchangeError>,
}

impl RequestResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of unmarshalling a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseResult {
    pub data: Option<Typed>,
    pub headers: IndexMap<String, Typed>,
    pub errors: Vec<ExchangeError>,
}

impl ResponseResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Unmarshals requests and responses against one contract.
#[derive(Debug)]
pub struct ExchangeUnmarshaller<'c> {
    contract: &'c Contract,
    options: Options,
}

impl<'c> ExchangeUnmarshaller<'c> {
    pub fn new(contract: &'c Contract, options: Options) -> Self {
        Self { contract, options }
    }

    /// Locate the operation a request addresses.
    pub fn resolve(&self, request: &dyn HttpRequest) -> Result<Resolved<'c>, ResolutionError> {
        let resolver = OperationResolver::new(self.contract, self.options.base_url.as_deref());
        match request.target() {
            Target::Url { host_url, path } => {
                let full_url = join_target(host_url, path);
                resolver.find(request.method(), &full_url)
            }
            Target::Webhook(name) => resolver.find_webhook(request.method(), name),
        }
    }

    /// Unmarshal every parameter, the body and the security of a request.
    ///
    /// # Errors
    ///
    /// Only resolution failures are returned as `Err`; everything else is
    /// recorded in [`RequestResult::errors`].
    pub fn unmarshal_request(&self, request: &dyn HttpRequest) -> Result<RequestResult, ResolutionError> {
        let resolved = self.resolve(request)?;
        let ctx = self.context(Direction::Request);
        let mut errors = Vec::new();

        // Resolved captures take the place of whatever the transport put in
        // the path map.
        let mut bag = request.parameters().clone();
        for (name, value) in &resolved.path_variables {
            bag.path.set(name, value.clone());
        }

        let mut parameters = Parameters::default();
        for param in merged_parameters(&resolved) {
            if param.location == ParamLocation::Header
                && RESERVED_HEADERS.contains(&param.name.to_ascii_lowercase().as_str())
            {
                continue;
            }
            tracing::trace!(name = %param.name, location = %param.location, "evaluating parameter");
            match self.parameter(ctx, param, bag.location(param.location)) {
                Ok(Some(value)) => {
                    parameters
                        .location_mut(param.location)
                        .insert(param.name.clone(), value);
                }
                Ok(None) => {}
                Err(source) => errors.push(ExchangeError::Parameter {
                    name: param.name.clone(),
                    location: param.location,
                    source,
                }),
            }
        }

        let body = match self.request_body(ctx, resolved.operation.request_body.as_ref(), request) {
            Ok(body) => body,
            Err(e) => {
                errors.push(ExchangeError::Body(e));
                None
            }
        };

        let requirements = resolved
            .operation
            .security
            .as_deref()
            .unwrap_or(&self.contract.security);
        let security = match security::evaluate(
            requirements,
            &self.contract.security_schemes,
            self.options.credentials.as_ref(),
            &bag,
        ) {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                errors.push(ExchangeError::Security(e));
                None
            }
        };

        tracing::debug!(
            path = resolved.path_template(),
            errors = errors.len(),
            "request unmarshalled"
        );
        Ok(RequestResult {
            operation: resolved.summary(),
            parameters,
            body,
            security,
            errors,
        })
    }

    /// Unmarshal the headers and body of the response to `request`.
    ///
    /// # Errors
    ///
    /// Resolution failures of the request, and `ResponseNotFound` when the
    /// operation declares nothing for the status.
    pub fn unmarshal_response(
        &self,
        request: &dyn HttpRequest,
        response: &dyn HttpResponse,
    ) -> Result<ResponseResult, ResolutionError> {
        let resolved = self.resolve(request)?;
        let declared = find_response(resolved.operation, response.status())?;
        let ctx = self.context(Direction::Response);
        let mut errors = Vec::new();

        let mut headers = IndexMap::new();
        for (name, header) in &declared.headers {
            if name.eq_ignore_ascii_case("content-type") {
                continue;
            }
            match self.parameter(ctx, header, response.headers()) {
                Ok(Some(value)) => {
                    headers.insert(name.clone(), value);
                }
                Ok(None) => {}
                Err(source) => errors.push(ExchangeError::Header {
                    name: name.clone(),
                    source,
                }),
            }
        }

        let data = match self.body(ctx, &declared.content, response.body(), response.content_type()) {
            Ok(data) => data,
            Err(e) => {
                errors.push(ExchangeError::Body(e));
                None
            }
        };

        tracing::debug!(
            path = resolved.path_template(),
            status = response.status(),
            errors = errors.len(),
            "response unmarshalled"
        );
        Ok(ResponseResult {
            data,
            headers,
            errors,
        })
    }

    fn context(&self, direction: Direction) -> SchemaContext<'_> {
        self.contract.context(direction, &self.options.formats)
    }

    /// Deserialize, cast and unmarshal one parameter. `Ok(None)` means an
    /// optional parameter was absent and has no default.
    fn parameter(
        &self,
        ctx: SchemaContext<'_>,
        param: &Parameter,
        location: &MultiMap,
    ) -> Result<Option<Typed>, ParameterError> {
        let schema = param.value_schema();

        let raw = match &param.content {
            Some((mimetype, media)) => match location.get(&param.name) {
                Some(raw) => Some(
                    MediaTypeDeserializer::new(ctx.arena, media.schema)
                        .strict(self.options.strict_media_types)
                        .deserialize(mimetype, raw.as_bytes())?,
                ),
                None => None,
            },
            None => {
                if param.location == ParamLocation::Query
                    && !param.allow_empty_value
                    && location.get(&param.name) == Some("")
                {
                    return Err(ParameterError::EmptyValue);
                }
                match StyleDeserializer::for_parameter(param, ctx.arena).deserialize(location) {
                    Ok(value) => Some(value),
                    Err(StyleError::NotFound { .. }) => None,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let value = match raw {
            Some(value) => value,
            None if param.required => return Err(ParameterError::Missing),
            None => match schema.and_then(|id| ctx.schema(id).default.clone()) {
                Some(default) => default,
                None => return Ok(None),
            },
        };

        let Some(schema) = schema else {
            return Ok(Some(Typed::from(&value)));
        };
        let value = ctx.caster().cast(schema, value)?;
        Ok(Some(ctx.unmarshaller().unmarshal(schema, &value)?))
    }

    fn request_body(
        &self,
        ctx: SchemaContext<'_>,
        declared: Option<&RequestBody>,
        request: &dyn HttpRequest,
    ) -> Result<Option<Typed>, BodyError> {
        let Some(declared) = declared else {
            return Ok(None);
        };
        let present = request.body().filter(|body| !body.is_empty());
        if present.is_none() && declared.required {
            return Err(BodyError::Missing);
        }
        self.body(ctx, &declared.content, present, request.content_type())
    }

    fn body(
        &self,
        ctx: SchemaContext<'_>,
        content: &IndexMap<String, MediaType>,
        body: Option<&[u8]>,
        content_type: Option<&str>,
    ) -> Result<Option<Typed>, BodyError> {
        let Some(body) = body.filter(|body| !body.is_empty()) else {
            return Ok(None);
        };
        if content.is_empty() {
            return Ok(None);
        }

        // Without a content type, the first declared media type applies.
        let (mimetype, media) = match content_type {
            Some(content_type) => {
                let (_, media) = find_media_type(content, content_type).ok_or_else(|| {
                    BodyError::MediaTypeNotFound {
                        mimetype: content_type.to_string(),
                    }
                })?;
                (content_type, media)
            }
            None => match content.first() {
                Some((mimetype, media)) => (mimetype.as_str(), media),
                None => return Ok(None),
            },
        };

        let (value, binary): (Value, _) = MediaTypeDeserializer::new(ctx.arena, media.schema)
            .strict(self.options.strict_media_types)
            .deserialize_body(mimetype, body)?;
        let mut typed = match media.schema {
            Some(schema) => {
                let value = ctx.caster().cast(schema, value)?;
                ctx.unmarshaller().unmarshal(schema, &value)?
            }
            None => Typed::from(&value),
        };
        binary.restore(&mut typed);
        Ok(Some(typed))
    }
}

/// Operation parameters first, then path-level ones not overridden by an
/// operation parameter of the same name and location.
fn merged_parameters<'c>(resolved: &Resolved<'c>) -> Vec<&'c Parameter> {
    let mut merged: Vec<&'c Parameter> = Vec::new();
    for param in resolved
        .operation
        .parameters
        .iter()
        .chain(resolved.path.parameters.iter())
    {
        let duplicate = merged
            .iter()
            .any(|p| p.location == param.location && p.name == param.name);
        if !duplicate {
            merged.push(param);
        }
    }
    merged
}

fn join_target(host_url: &str, path: &str) -> String {
    let host_url = host_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", host_url, path)
    } else {
        format!("{}/{}", host_url, path)
    }
}
