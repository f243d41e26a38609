//! Security requirement evaluation.
//!
//! Requirements are alternatives: the first one whose schemes are all
//! satisfied wins. Extracting a credential for a single scheme is the job
//! of a [`CredentialProvider`].

use indexmap::IndexMap;

use crate::contract::{SecurityRequirement, SecurityScheme};
use crate::error::SecurityError;
use crate::exchange::RequestParameters;
use crate::types::ParamLocation;

/// Extracts the credential a request presents for one security scheme.
pub trait CredentialProvider: Send + Sync {
    /// Return the raw credential for scheme `name`.
    ///
    /// # Errors
    ///
    /// `MissingCredential` when the request carries none, `Unsupported`
    /// when the scheme type cannot be checked by this provider.
    fn credential(
        &self,
        name: &str,
        scheme: &SecurityScheme,
        parameters: &RequestParameters,
    ) -> Result<String, SecurityError>;
}

/// Reads API keys from their declared location and HTTP, OAuth2 and
/// OpenID Connect credentials from the `Authorization` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCredentials;

impl CredentialProvider for StandardCredentials {
    fn credential(
        &self,
        name: &str,
        scheme: &SecurityScheme,
        parameters: &RequestParameters,
    ) -> Result<String, SecurityError> {
        let missing = || SecurityError::MissingCredential {
            scheme: name.to_string(),
        };
        match scheme {
            SecurityScheme::ApiKey {
                name: key,
                location,
            } => {
                let source = match location {
                    ParamLocation::Header => &parameters.header,
                    ParamLocation::Query => &parameters.query,
                    ParamLocation::Cookie => &parameters.cookie,
                    ParamLocation::Path => &parameters.path,
                };
                source.get(key).map(String::from).ok_or_else(missing)
            }
            SecurityScheme::Http { scheme: auth } => authorization(parameters, auth).ok_or_else(missing),
            SecurityScheme::OAuth2 | SecurityScheme::OpenIdConnect => {
                authorization(parameters, "bearer").ok_or_else(missing)
            }
            SecurityScheme::MutualTls => Err(SecurityError::Unsupported {
                scheme: name.to_string(),
            }),
        }
    }
}

/// Credential after `<scheme> ` in the Authorization header.
fn authorization(parameters: &RequestParameters, scheme: &str) -> Option<String> {
    let header = parameters.header.get("authorization")?.trim();
    let (given, credential) = header.split_once(' ')?;
    let credential = credential.trim();
    (given.eq_ignore_ascii_case(scheme) && !credential.is_empty()).then(|| credential.to_string())
}

/// Evaluate `requirements` in order.
///
/// Returns the credentials of the first fully satisfied requirement, keyed
/// by scheme name. An empty requirement list, or an empty requirement
/// (`{}`), needs nothing.
///
/// # Errors
///
/// `UnknownScheme` when a requirement names an undeclared scheme, and
/// `NotSatisfied` when no alternative is met.
pub fn evaluate(
    requirements: &[SecurityRequirement],
    schemes: &IndexMap<String, SecurityScheme>,
    provider: &dyn CredentialProvider,
    parameters: &RequestParameters,
) -> Result<IndexMap<String, String>, SecurityError> {
    if requirements.is_empty() {
        return Ok(IndexMap::new());
    }

    'requirements: for requirement in requirements {
        let mut credentials = IndexMap::new();
        for name in requirement.schemes.keys() {
            let scheme = schemes
                .get(name)
                .ok_or_else(|| SecurityError::UnknownScheme {
                    scheme: name.clone(),
                })?;
            match provider.credential(name, scheme, parameters) {
                Ok(credential) => {
                    credentials.insert(name.clone(), credential);
                }
                Err(e) => {
                    tracing::trace!(scheme = %name, error = %e, "security scheme not satisfied");
                    continue 'requirements;
                }
            }
        }
        tracing::debug!(schemes = ?requirement.names(), "security requirement satisfied");
        return Ok(credentials);
    }

    Err(SecurityError::NotSatisfied {
        requirements: requirements.iter().map(SecurityRequirement::names).collect(),
    })
}
