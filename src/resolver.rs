//! Operation resolution - finds the path, operation and server for a request.
//!
//! Exact path suffixes win over templated ones; among templates, fewer
//! variables means more concrete. For each candidate path the method must
//! name an operation, and the URL prefix left of the path must match one of
//! the effective servers.

use percent_encoding::percent_decode_str;
use serde::Serialize;

use crate::contract::{Contract, Operation, PathItem, Response, Server};
use crate::error::ResolutionError;
use crate::templating::{Captures, PathMatch, ServerTemplate};

/// The outcome of resolving a request against a contract.
#[derive(Debug, Clone)]
pub struct Resolved<'c> {
    pub path: &'c PathItem,
    pub operation: &'c Operation,
    /// `None` for webhooks.
    pub server: Option<&'c Server>,
    /// Path variables, percent-decoded.
    pub path_variables: Captures,
    /// Server variable defaults overlaid with captured values.
    pub server_variables: Captures,
}

impl Resolved<'_> {
    pub fn path_template(&self) -> &str {
        self.path.template.as_str()
    }

    pub fn server_url(&self) -> Option<&str> {
        self.server.map(|s| s.url.as_str())
    }

    /// Serializable view for reports.
    pub fn summary(&self) -> ResolvedSummary {
        ResolvedSummary {
            path: self.path_template().to_string(),
            method: self.operation.method.clone(),
            operation_id: self.operation.operation_id.clone(),
            server: self.server_url().map(String::from),
            path_variables: self.path_variables.clone(),
            server_variables: self.server_variables.clone(),
        }
    }
}

/// Owned, serializable description of a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSummary {
    pub path: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    pub path_variables: Captures,
    pub server_variables: Captures,
}

/// Resolves requests against one contract.
#[derive(Debug, Clone)]
pub struct OperationResolver<'c> {
    contract: &'c Contract,
    base_url: Option<String>,
}

impl<'c> OperationResolver<'c> {
    pub fn new(contract: &'c Contract, base_url: Option<&str>) -> Self {
        Self {
            contract,
            base_url: base_url.map(String::from),
        }
    }

    /// Find the operation serving `method` on `full_url`
    /// (`scheme://host[:port]/path`, query string ignored).
    ///
    /// # Errors
    ///
    /// `PathNotFound` when no path matches, `OperationNotFound` when
    /// matching paths lack the method, and `ServerNotFound` when no server
    /// accepts the URL prefix of any path that has the operation.
    pub fn find(&self, method: &str, full_url: &str) -> Result<Resolved<'c>, ResolutionError> {
        let method = method.to_ascii_lowercase();
        let url = strip_query(full_url);

        let candidates = self.candidate_paths(url);
        if candidates.is_empty() {
            return Err(ResolutionError::PathNotFound {
                url: url.to_string(),
            });
        }

        let mut operation_found = false;
        for (item, matched) in candidates {
            let Some(operation) = item.operations.get(&method) else {
                continue;
            };
            operation_found = true;

            let prefix = &url[..matched.start];
            for server in effective_servers(self.contract, item, operation) {
                if let Some(captures) = self.match_server(server, prefix) {
                    let resolved = Resolved {
                        path: item,
                        operation,
                        server: Some(server),
                        path_variables: decode_captures(matched.variables),
                        server_variables: overlay_defaults(server, captures),
                    };
                    tracing::debug!(
                        method = %method,
                        path = resolved.path_template(),
                        server = %server.url,
                        "resolved operation"
                    );
                    return Ok(resolved);
                }
            }
            tracing::trace!(path = item.template.as_str(), prefix, "no server matched");
        }

        if operation_found {
            Err(ResolutionError::ServerNotFound {
                url: url.to_string(),
            })
        } else {
            Err(ResolutionError::OperationNotFound {
                url: url.to_string(),
                method,
            })
        }
    }

    /// Find a webhook operation by webhook name and method.
    pub fn find_webhook(&self, method: &str, name: &str) -> Result<Resolved<'c>, ResolutionError> {
        let method = method.to_ascii_lowercase();
        let item = self
            .contract
            .webhooks
            .get(name)
            .ok_or_else(|| ResolutionError::WebhookNotFound {
                name: name.to_string(),
            })?;
        let operation =
            item.operations
                .get(&method)
                .ok_or_else(|| ResolutionError::OperationNotFound {
                    url: name.to_string(),
                    method: method.clone(),
                })?;
        tracing::debug!(method = %method, webhook = name, "resolved webhook");
        Ok(Resolved {
            path: item,
            operation,
            server: None,
            path_variables: Captures::new(),
            server_variables: Captures::new(),
        })
    }

    /// Exact suffix matches in document order, then template matches by
    /// ascending variable count.
    fn candidate_paths(&self, url: &str) -> Vec<(&'c PathItem, PathMatch)> {
        let mut exact = Vec::new();
        let mut templated = Vec::new();
        for item in &self.contract.paths {
            if let Some(m) = item.template.match_exact(url) {
                exact.push((item, m));
            } else if let Some(m) = item.template.match_template(url) {
                templated.push((item, m));
            }
        }
        // Stable: equal counts keep document order.
        templated.sort_by_key(|(item, _)| item.template.variables().len());
        exact.extend(templated);
        exact
    }

    fn match_server(&self, server: &Server, prefix: &str) -> Option<Captures> {
        let captures = if server.is_absolute() {
            server.template.match_full(prefix)?
        } else if let Some(base) = &self.base_url {
            let joined = join_url(base, &server.url);
            ServerTemplate::parse(&joined).ok()?.match_full(prefix)?
        } else {
            server.template.match_full(path_part(prefix))?
        };

        let allowed = captures.iter().all(|(name, value)| {
            server
                .variables
                .get(name)
                .map_or(true, |v| v.allowed.is_empty() || v.allowed.contains(value))
        });
        allowed.then_some(captures)
    }
}

/// Find the response declared for `status`: exact code, then `NXX`, then
/// `default`.
pub fn find_response(operation: &Operation, status: u16) -> Result<&Response, ResolutionError> {
    let exact = status.to_string();
    let range = format!("{}XX", status / 100);
    operation
        .responses
        .get(&exact)
        .or_else(|| {
            operation
                .responses
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(&range))
                .map(|(_, response)| response)
        })
        .or_else(|| operation.responses.get("default"))
        .ok_or(ResolutionError::ResponseNotFound { status })
}

/// Operation servers override path servers, which override the contract's.
fn effective_servers<'c>(
    contract: &'c Contract,
    item: &'c PathItem,
    operation: &'c Operation,
) -> Vec<&'c Server> {
    [&operation.servers, &item.servers, &contract.servers]
        .into_iter()
        .find(|servers| !servers.is_empty())
        .map(|servers| servers.iter().collect())
        .unwrap_or_else(|| vec![contract.default_server()])
}

fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Path portion of an absolute URL prefix; relative prefixes are returned
/// unchanged.
fn path_part(prefix: &str) -> &str {
    match prefix.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end + 3;
            match prefix[authority_start..].find('/') {
                Some(slash) => &prefix[authority_start + slash..],
                None => "",
            }
        }
        None => prefix,
    }
}

/// Textual reference resolution, keeping `{var}` placeholders intact.
fn join_url(base: &str, relative: &str) -> String {
    if relative.starts_with('/') {
        let origin_end = base
            .find("://")
            .and_then(|i| base[i + 3..].find('/').map(|j| i + 3 + j))
            .unwrap_or(base.len());
        format!("{}{}", &base[..origin_end], relative)
    } else {
        let relative = relative.strip_prefix("./").unwrap_or(relative);
        let dir_end = match base.find("://") {
            Some(i) => base[i + 3..].rfind('/').map_or(base.len(), |j| i + 3 + j),
            None => base.rfind('/').map_or(0, |j| j),
        };
        format!("{}/{}", &base[..dir_end], relative)
    }
}

fn decode_captures(captures: Captures) -> Captures {
    captures
        .into_iter()
        .map(|(name, value)| {
            let decoded = percent_decode_str(&value).decode_utf8_lossy().into_owned();
            (name, decoded)
        })
        .collect()
}

fn overlay_defaults(server: &Server, captures: Captures) -> Captures {
    let mut variables: Captures = server
        .variables
        .iter()
        .map(|(name, v)| (name.clone(), v.default.clone()))
        .collect();
    variables.extend(captures);
    variables
}
