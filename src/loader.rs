//! Contract document loading from files and strings.
//!
//! Handles JSON and YAML sources. Only local `#/...` references are
//! followed; fetching other documents is left to the caller.

use std::path::Path;

use percent_encoding::percent_decode_str;
use serde_json::Value;

use crate::contract::Contract;
use crate::error::ContractError;

/// Load a contract document from a file path.
///
/// `.yaml` / `.yml` files are parsed as YAML, everything else as JSON.
///
/// # Errors
///
/// Returns `ContractError::FileNotFound` if the file doesn't exist, or a
/// parse error if the content is not valid JSON/YAML.
pub fn load_document(path: &Path) -> Result<Value, ContractError> {
    if !path.exists() {
        return Err(ContractError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| ContractError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&content).map_err(|source| ContractError::InvalidYaml { source })
    } else {
        load_document_str(&content)
    }
}

/// Load a contract document from a string.
///
/// Content starting with `{` is parsed as JSON, anything else as YAML.
pub fn load_document_str(content: &str) -> Result<Value, ContractError> {
    if content.trim_start().starts_with('{') {
        serde_json::from_str(content).map_err(|source| ContractError::InvalidJson { source })
    } else {
        serde_yaml::from_str(content).map_err(|source| ContractError::InvalidYaml { source })
    }
}

/// Load and build a contract from a file path.
pub fn load_contract(path: &Path) -> Result<Contract, ContractError> {
    let document = load_document(path)?;
    Contract::from_value(&document)
}

/// Navigate a JSON Pointer fragment (e.g. "#/components/schemas/Pet").
///
/// Segments are unescaped (`~1` = `/`, `~0` = `~`) and percent-decoded.
pub fn navigate_fragment<'d>(document: &'d Value, fragment: &str) -> Result<&'d Value, ContractError> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Ok(document);
    }

    let mut current = document;
    for part in path.split('/') {
        let key = decode_pointer_segment(part);
        current = match current {
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            other => other.get(&key),
        }
        .ok_or_else(|| ContractError::UnresolvableRef {
            reference: fragment.to_string(),
        })?;
    }
    Ok(current)
}

/// Follow `$ref` chains of a non-schema object (parameter, response, ...).
pub(crate) fn dereference<'d>(
    document: &'d Value,
    mut value: &'d Value,
) -> Result<&'d Value, ContractError> {
    // Bounded so that a reference loop cannot spin forever.
    for _ in 0..32 {
        let Some(reference) = value.get("$ref").and_then(Value::as_str) else {
            return Ok(value);
        };
        if !reference.starts_with('#') {
            return Err(ContractError::UnresolvableRef {
                reference: reference.to_string(),
            });
        }
        value = navigate_fragment(document, reference)?;
    }
    Err(ContractError::malformed("#", "reference chain too deep"))
}

fn decode_pointer_segment(segment: &str) -> String {
    let decoded = segment.replace("~1", "/").replace("~0", "~");
    percent_decode_str(&decoded).decode_utf8_lossy().into_owned()
}
