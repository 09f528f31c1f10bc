use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::error::BackendError;

const RESPONSE_TOKEN: &str = "%RESPONSE%";

/// One step of a structured path: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// How a translated string is pulled out of a response body.
///
/// Configured as a tagged string (`J%RESPONSE%.data[0].dst` or
/// `Rclass="t0">([^<]*)<`) and resolved once, when the backend is configured.
#[derive(Debug, Clone)]
pub enum ExtractionRule {
    /// Decode the body as JSON and walk to a string leaf.
    StructuredPath(Vec<PathSegment>),
    /// Match the raw body and take capture group 1.
    Pattern(Regex),
}

/// Reason a rule string could not be resolved.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("{0}")]
    Malformed(String),

    #[error("invalid pattern")]
    Pattern(#[source] regex::Error),
}

impl ExtractionRule {
    pub fn parse(rule: &str) -> Result<Self, RuleError> {
        let mut chars = rule.chars();
        match chars.next() {
            Some('J') => parse_path(chars.as_str()).map(ExtractionRule::StructuredPath),
            Some('R') => {
                let re = Regex::new(chars.as_str()).map_err(RuleError::Pattern)?;
                if re.captures_len() < 2 {
                    return Err(RuleError::Malformed(
                        "pattern has no capture group".to_string(),
                    ));
                }
                Ok(ExtractionRule::Pattern(re))
            }
            Some(tag) => Err(RuleError::Malformed(format!("unknown rule tag '{tag}'"))),
            None => Err(RuleError::Malformed("rule is empty".to_string())),
        }
    }

    pub fn extract(&self, body: &str) -> Result<String, BackendError> {
        match self {
            ExtractionRule::StructuredPath(path) => {
                let root: Value =
                    serde_json::from_str(body).map_err(|e| BackendError::Decode(e.to_string()))?;
                let mut node = &root;
                for segment in path {
                    node = match segment {
                        PathSegment::Key(key) => node.get(key.as_str()),
                        PathSegment::Index(i) => node.get(*i),
                    }
                    .ok_or(BackendError::Miss)?;
                }
                node.as_str().map(str::to_string).ok_or(BackendError::Miss)
            }
            ExtractionRule::Pattern(re) => re
                .captures(body)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .ok_or(BackendError::Miss),
        }
    }
}

/// Parses `%RESPONSE%` followed by `.key`, `[0]` and `["key"]` steps.
fn parse_path(path: &str) -> Result<Vec<PathSegment>, RuleError> {
    let rest = path
        .strip_prefix(RESPONSE_TOKEN)
        .ok_or_else(|| RuleError::Malformed(format!("path must start with {RESPONSE_TOKEN}")))?;

    let mut segments = Vec::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut key = String::new();
                while let Some(&next) = chars.peek() {
                    if next == '.' || next == '[' {
                        break;
                    }
                    key.push(next);
                    chars.next();
                }
                if key.is_empty() {
                    return Err(RuleError::Malformed("empty key after '.'".to_string()));
                }
                segments.push(PathSegment::Key(key));
            }
            '[' => {
                let mut inner = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(next);
                }
                if !closed {
                    return Err(RuleError::Malformed("unclosed '['".to_string()));
                }
                segments.push(parse_bracket(&inner)?);
            }
            other => {
                return Err(RuleError::Malformed(format!(
                    "unexpected '{other}' in path"
                )))
            }
        }
    }
    Ok(segments)
}

fn parse_bracket(inner: &str) -> Result<PathSegment, RuleError> {
    let inner = inner.trim();
    for quote in ['"', '\''] {
        if let Some(key) = inner
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return Ok(PathSegment::Key(key.to_string()));
        }
    }
    inner
        .parse::<usize>()
        .map(PathSegment::Index)
        .map_err(|_| RuleError::Malformed(format!("bad index '[{inner}]'")))
}
