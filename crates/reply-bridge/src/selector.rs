//! # Header Selectors
//!
//! Header equality filters for selective receive, written as
//! `operation = 'sayHello' AND key = 'K7'`.

use bridge_types::Message;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Selector parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    /// Expression has no clauses
    #[error("Empty selector expression")]
    Empty,
    /// Clause is not of the form `key = 'value'`
    #[error("Invalid selector clause '{0}': expected key = 'value'")]
    InvalidClause(String),
}

/// Matches messages whose headers equal every configured value.
///
/// An empty selector matches every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSelector {
    criteria: BTreeMap<String, String>,
}

impl HeaderSelector {
    /// Selector matching every message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header criterion.
    #[must_use]
    pub fn with(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.criteria.insert(header.into(), value.into());
        self
    }

    /// Parse `key = 'value'` clauses joined by `AND` (case-insensitive).
    /// Quotes around values are optional.
    pub fn parse(expression: &str) -> Result<Self, SelectorError> {
        if expression.trim().is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut selector = Self::new();
        for clause in split_clauses(expression) {
            let (header, value) = parse_clause(clause)?;
            selector.criteria.insert(header, value);
        }
        Ok(selector)
    }

    /// Returns true if every criterion matches a header of `message`.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        self.criteria
            .iter()
            .all(|(header, value)| message.header_as_string(header).as_deref() == Some(value.as_str()))
    }

    /// Configured criteria, ordered by header name.
    pub fn criteria(&self) -> impl Iterator<Item = (&str, &str)> {
        self.criteria.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if the selector has no criteria.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

impl FromStr for HeaderSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for HeaderSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self
            .criteria
            .iter()
            .map(|(header, value)| format!("{header} = '{value}'"))
            .collect();
        f.write_str(&clauses.join(" AND "))
    }
}

/// Split on ` AND ` outside of quoted values.
fn split_clauses(expression: &str) -> Vec<&str> {
    const SEPARATOR: &[u8] = b" and ";

    let bytes = expression.as_bytes();
    let mut clauses = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\'' {
            in_quotes = !in_quotes;
        } else if !in_quotes
            && bytes.len() - i >= SEPARATOR.len()
            && bytes[i..i + SEPARATOR.len()].eq_ignore_ascii_case(SEPARATOR)
        {
            clauses.push(&expression[start..i]);
            i += SEPARATOR.len();
            start = i;
            continue;
        }
        i += 1;
    }
    clauses.push(&expression[start..]);
    clauses
}

fn parse_clause(clause: &str) -> Result<(String, String), SelectorError> {
    let invalid = || SelectorError::InvalidClause(clause.trim().to_string());

    let (header, value) = clause.split_once('=').ok_or_else(invalid)?;
    let header = header.trim();
    let value = value.trim();
    if header.is_empty() || value.is_empty() {
        return Err(invalid());
    }

    let value = if value.starts_with('\'') {
        value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .ok_or_else(invalid)?
    } else {
        value
    };

    Ok((header.to_string(), value.to_string()))
}
