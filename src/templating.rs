//! Path and server URL templates.
//!
//! `{name}` placeholders become capture groups; everything else must match
//! literally. Variable names are kept beside the regex so that names which
//! are not valid regex group names (`pet-id`) still work.

use indexmap::IndexMap;
use regex::Regex;

/// Variables captured by a template match, in template order.
pub type Captures = IndexMap<String, String>;

#[derive(Debug, Clone)]
struct Compiled {
    raw: String,
    variables: Vec<String>,
    regex: Regex,
}

fn compile(raw: &str, capture: &str, anchor_start: bool) -> Result<Compiled, regex::Error> {
    let mut pattern = String::new();
    if anchor_start {
        pattern.push('^');
    }
    let mut variables = Vec::new();
    let mut rest = raw;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|c| open + c) else {
            break;
        };
        pattern.push_str(&regex::escape(&rest[..open]));
        pattern.push_str(capture);
        variables.push(rest[open + 1..close].to_string());
        rest = &rest[close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');
    Ok(Compiled {
        raw: raw.to_string(),
        variables,
        regex: Regex::new(&pattern)?,
    })
}

fn collect(variables: &[String], caps: &regex::Captures<'_>) -> Captures {
    variables
        .iter()
        .enumerate()
        .filter_map(|(i, name)| caps.get(i + 1).map(|m| (name.clone(), m.as_str().to_string())))
        .collect()
}

/// A path template such as `/pets/{petId}`.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    inner: Compiled,
}

/// Outcome of matching a path template against the tail of a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    /// Byte offset in the URL where the matched path begins; everything
    /// before it is the server part.
    pub start: usize,
    pub variables: Captures,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            inner: compile(raw, "([^/]+)", false)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.inner.raw
    }

    pub fn variables(&self) -> &[String] {
        &self.inner.variables
    }

    pub fn is_literal(&self) -> bool {
        self.inner.variables.is_empty()
    }

    /// Fast path: the URL ends with the template text verbatim.
    pub fn match_exact(&self, url: &str) -> Option<PathMatch> {
        url.ends_with(&self.inner.raw).then(|| PathMatch {
            start: url.len() - self.inner.raw.len(),
            variables: Captures::new(),
        })
    }

    /// Template match: placeholders capture non-slash text, the rest of the
    /// template must match the URL tail exactly.
    pub fn match_template(&self, url: &str) -> Option<PathMatch> {
        let caps = self.inner.regex.captures(url)?;
        let whole = caps.get(0)?;
        Some(PathMatch {
            start: whole.start(),
            variables: collect(&self.inner.variables, &caps),
        })
    }
}

/// A server URL template such as `https://{region}.example.com/v1`.
#[derive(Debug, Clone)]
pub struct ServerTemplate {
    inner: Compiled,
}

impl ServerTemplate {
    pub fn parse(raw: &str) -> Result<Self, regex::Error> {
        let trimmed = raw.strip_suffix('/').unwrap_or(raw);
        Ok(Self {
            inner: compile(trimmed, "([^/]+)", true)?,
        })
    }

    /// Template text without a trailing slash.
    pub fn as_str(&self) -> &str {
        &self.inner.raw
    }

    pub fn variables(&self) -> &[String] {
        &self.inner.variables
    }

    /// Match the whole of `candidate` (trailing slash ignored).
    pub fn match_full(&self, candidate: &str) -> Option<Captures> {
        let candidate = candidate.strip_suffix('/').unwrap_or(candidate);
        if candidate == self.inner.raw {
            return Some(Captures::new());
        }
        let caps = self.inner.regex.captures(candidate)?;
        Some(collect(&self.inner.variables, &caps))
    }
}
