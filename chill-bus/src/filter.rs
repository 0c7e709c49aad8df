//! Subscription selector filters.
//!
//! A filter is a conjunction of property equality clauses:
//!
//! ```text
//! session_host = 'gse-1' AND session_id = '42'
//! ```
//!
//! The `AND` keyword is case-insensitive. An empty filter matches every
//! envelope.

use core::fmt;
use std::str::FromStr;

use crate::{BusError, Envelope};

/// Property carrying the host of the publishing session.
pub const SESSION_HOST: &str = "session_host";
/// Property carrying the numeric id of the publishing session.
pub const SESSION_ID: &str = "session_id";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    name: String,
    value: String,
}

/// A parsed selector filter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    /// A filter that matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse(expression: &str) -> Result<Self, BusError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Ok(Self::all());
        }

        let clauses = split_and(expression)
            .into_iter()
            .map(parse_clause)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clauses })
    }

    /// The filter selecting one monitoring session's traffic.
    ///
    /// Unset parts of the session identity are left out; with neither set the
    /// filter matches everything.
    pub fn for_session(host: Option<&str>, session_id: Option<u64>) -> Self {
        let mut filter = Self::all();
        if let Some(host) = host.filter(|h| !h.is_empty()) {
            filter = filter.and(SESSION_HOST, host);
        }
        if let Some(id) = session_id.filter(|id| *id > 0) {
            filter = filter.and(SESSION_ID, id.to_string());
        }
        filter
    }

    pub fn and(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.clauses.push(Clause {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.clauses
            .iter()
            .all(|c| envelope.property(&c.name) == Some(c.value.as_str()))
    }
}

impl FromStr for Filter {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{} = '{}'", clause.name, clause.value)?;
        }
        Ok(())
    }
}

/// Split on the `AND` keyword outside quoted values.
fn split_and(expression: &str) -> Vec<&str> {
    let bytes = expression.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => quoted = !quoted,
            b if !quoted && b.is_ascii_whitespace() => {
                let rest = &expression[i..];
                let word = rest.trim_start();
                let skipped = rest.len() - word.len();
                if word.get(..3).is_some_and(|w| w.eq_ignore_ascii_case("and"))
                    && word.as_bytes().get(3).is_some_and(u8::is_ascii_whitespace)
                {
                    parts.push(&expression[start..i]);
                    i += skipped + 3;
                    start = i;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&expression[start..]);
    parts
}

fn parse_clause(text: &str) -> Result<Clause, BusError> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| BusError::Filter(format!("expected name = 'value' in {text:?}")))?;

    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(BusError::Filter(format!("bad property name in {text:?}")));
    }

    let value = value.trim();
    let value = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .ok_or_else(|| BusError::Filter(format!("value must be quoted in {text:?}")))?;

    Ok(Clause {
        name: name.to_string(),
        value: value.to_string(),
    })
}
