//! Consumer-side message filters.
//!
//! A subscription's selector is "no session affinity, or affinity to my
//! session" AND the optional client-supplied expression. Client expressions
//! are conjunctions of `name = 'value'` and `name <> 'value'` terms.

use crate::broker::message::BrokerMessage;

/// Property carrying session affinity.
pub const SESSION_PROPERTY: &str = "session";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid selector '{expression}': {reason}")]
pub struct SelectorError {
    pub expression: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Term {
    name: String,
    op: Op,
    value: String,
}

impl Term {
    fn matches(&self, message: &BrokerMessage) -> bool {
        match (message.property(&self.name), self.op) {
            (Some(v), Op::Eq) => v == self.value,
            (Some(v), Op::Ne) => v != self.value,
            // Comparisons against a missing property are unknown, hence false.
            (None, _) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageSelector {
    session_id: Option<String>,
    terms: Vec<Term>,
    expression: Option<String>,
}

impl MessageSelector {
    /// Selector accepting every message.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn new(session_id: Option<&str>, expression: Option<&str>) -> Result<Self, SelectorError> {
        let terms = match expression {
            Some(expr) if !expr.trim().is_empty() => parse(expr)?,
            _ => Vec::new(),
        };
        Ok(Self {
            session_id: session_id.map(str::to_string),
            terms,
            expression: expression.map(str::to_string),
        })
    }

    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref()
    }

    pub fn matches(&self, message: &BrokerMessage) -> bool {
        let affinity = match (message.property(SESSION_PROPERTY), &self.session_id) {
            (None, _) => true,
            (Some(target), Some(mine)) => target == mine,
            (Some(_), None) => false,
        };
        affinity && self.terms.iter().all(|t| t.matches(message))
    }
}

fn parse(expression: &str) -> Result<Vec<Term>, SelectorError> {
    let error = |reason| SelectorError {
        expression: expression.to_string(),
        reason,
    };

    split_and(expression)
        .into_iter()
        .map(|raw| {
            let (name, op, value) =
                split_operator(raw).ok_or_else(|| error("expected '=' or '<>'"))?;

            let name = name.trim();
            let valid_name = name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid_name {
                return Err(error("invalid property name"));
            }

            let value = value
                .trim()
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .filter(|v| !v.contains('\''))
                .ok_or_else(|| error("value must be a quoted string literal"))?;

            Ok(Term {
                name: name.to_string(),
                op,
                value: value.to_string(),
            })
        })
        .collect()
}

/// Split a term at its first `=` or `<>` outside of quotes.
fn split_operator(term: &str) -> Option<(&str, Op, &str)> {
    let bytes = term.as_bytes();
    let mut quoted = false;
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'\'' => quoted = !quoted,
            b'=' if !quoted => return Some((&term[..i], Op::Eq, &term[i + 1..])),
            b'<' if !quoted && bytes.get(i + 1) == Some(&b'>') => {
                return Some((&term[..i], Op::Ne, &term[i + 2..]))
            }
            _ => {}
        }
    }
    None
}

/// Split on the keyword AND (any case) outside of quotes.
fn split_and(expression: &str) -> Vec<&str> {
    let bytes = expression.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => quoted = !quoted,
            b' ' if !quoted
                && bytes.len() >= i + 5
                && bytes[i + 1..i + 4].eq_ignore_ascii_case(b"and")
                && bytes[i + 4] == b' ' =>
            {
                parts.push(&expression[start..i]);
                start = i + 5;
                i += 4;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&expression[start..]);
    parts
}
