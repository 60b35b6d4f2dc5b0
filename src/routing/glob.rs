//! Destination glob patterns.
//!
//! # Syntax
//! - `*` matches any run of characters, including `/`
//! - `?` matches exactly one character
//! - `{name}` captures one or more characters up to the next `/`
//!
//! Everything else is literal. Matching is anchored to the whole string.
//!
//! # Design Decisions
//! - Patterns without tokens compare as plain strings, no regex is built
//! - Compiled patterns are shared through `PatternCache`, a bounded LRU owned
//!   by whoever needs it; a miss simply recompiles

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

/// Default number of compiled patterns kept by a `PatternCache`.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GlobError {
    #[error("pattern '{pattern}' has an unterminated capture")]
    UnterminatedCapture { pattern: String },

    #[error("pattern '{pattern}' has an invalid capture name '{name}'")]
    InvalidCaptureName { pattern: String, name: String },

    #[error("pattern '{pattern}' failed to compile: {reason}")]
    Compile { pattern: String, reason: String },
}

#[derive(Debug, Clone)]
enum Kind {
    Exact,
    Regex { regex: Regex, names: Vec<String> },
}

/// A compiled destination pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    kind: Kind,
}

impl GlobPattern {
    pub fn compile(pattern: &str) -> Result<Self, GlobError> {
        if !pattern.contains(['*', '?', '{']) {
            return Ok(Self {
                source: pattern.to_string(),
                kind: Kind::Exact,
            });
        }

        let mut expr = String::with_capacity(pattern.len() * 2 + 2);
        let mut names = Vec::new();
        expr.push('^');

        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => {
                                return Err(GlobError::UnterminatedCapture {
                                    pattern: pattern.to_string(),
                                })
                            }
                        }
                    }
                    if !is_capture_name(&name) || names.contains(&name) {
                        return Err(GlobError::InvalidCaptureName {
                            pattern: pattern.to_string(),
                            name,
                        });
                    }
                    expr.push_str(&format!("(?P<{name}>[^/]+)"));
                    names.push(name);
                }
                c => expr.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| GlobError::Compile {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source: pattern.to_string(),
            kind: Kind::Regex { regex, names },
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the pattern has no wildcard or capture tokens.
    pub fn is_literal(&self) -> bool {
        matches!(self.kind, Kind::Exact)
    }

    pub fn matches(&self, input: &str) -> bool {
        match &self.kind {
            Kind::Exact => self.source == input,
            Kind::Regex { regex, .. } => regex.is_match(input),
        }
    }

    /// Named captures when `input` matches, `None` otherwise. A literal
    /// pattern that matches yields an empty map.
    pub fn captures(&self, input: &str) -> Option<HashMap<String, String>> {
        match &self.kind {
            Kind::Exact => (self.source == input).then(HashMap::new),
            Kind::Regex { regex, names } => {
                let caps = regex.captures(input)?;
                Some(
                    names
                        .iter()
                        .filter_map(|n| caps.name(n).map(|m| (n.clone(), m.as_str().to_string())))
                        .collect(),
                )
            }
        }
    }
}

fn is_capture_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Entry {
    pattern: Arc<GlobPattern>,
    last_used: u64,
}

/// Bounded least-recently-used cache of compiled patterns, keyed by text.
pub struct PatternCache {
    capacity: usize,
    clock: AtomicU64,
    entries: Mutex<HashMap<String, Entry>>,
}

impl PatternCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, pattern: &str) -> Result<Arc<GlobPattern>, GlobError> {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        if let Some(entry) = self.entries.lock().get_mut(pattern) {
            entry.last_used = tick;
            return Ok(entry.pattern.clone());
        }

        // Compile outside the lock; a concurrent miss compiles twice and the
        // results are equivalent.
        let compiled = Arc::new(GlobPattern::compile(pattern)?);

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(pattern) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }
        entries.insert(
            pattern.to_string(),
            Entry {
                pattern: compiled.clone(),
                last_used: tick,
            },
        );
        Ok(compiled)
    }

    pub fn matches(&self, pattern: &str, input: &str) -> Result<bool, GlobError> {
        Ok(self.get(pattern)?.matches(input))
    }

    pub fn captures(
        &self,
        pattern: &str,
        input: &str,
    ) -> Result<Option<HashMap<String, String>>, GlobError> {
        Ok(self.get(pattern)?.captures(input))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.entries.lock().contains_key(pattern)
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for PatternCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, input: &str) -> bool {
        GlobPattern::compile(pattern).unwrap().matches(input)
    }

    #[test]
    fn star_and_question_mark() {
        assert!(matches("/foo/bar/*", "/foo/bar/blagh"));
        assert!(!matches("/foo/bar/?", "/foo/bar/blagh"));
        assert!(matches("/foo/bar/?", "/foo/bar/b"));
        assert!(matches("/topic/*", "/topic/a/b"));
    }

    #[test]
    fn matching_is_anchored() {
        assert!(!matches("/topic/a", "/topic/ab"));
        assert!(!matches("/topic/?", "x/topic/a"));
    }

    #[test]
    fn dots_are_literal() {
        assert!(matches("/foo.bar/*", "/foo.bar/x"));
        assert!(!matches("/foo.bar/*", "/fooXbar/x"));
    }

    #[test]
    fn captures_named_segments() {
        let pattern = GlobPattern::compile("/foo.bar/{hello}/blagh").unwrap();
        let caps = pattern.captures("/foo.bar/hello-world/blagh").unwrap();
        assert_eq!(caps.get("hello").map(String::as_str), Some("hello-world"));
        assert!(pattern.captures("/foo.bar/a/b/blagh").is_none());
    }

    #[test]
    fn literal_fast_path() {
        let pattern = GlobPattern::compile("/queue/orders").unwrap();
        assert!(pattern.is_literal());
        assert_eq!(pattern.captures("/queue/orders"), Some(HashMap::new()));
        assert!(pattern.captures("/queue/other").is_none());
    }

    #[test]
    fn rejects_bad_captures() {
        assert!(matches!(
            GlobPattern::compile("/a/{open"),
            Err(GlobError::UnterminatedCapture { .. })
        ));
        assert!(matches!(
            GlobPattern::compile("/a/{}"),
            Err(GlobError::InvalidCaptureName { .. })
        ));
        assert!(matches!(
            GlobPattern::compile("/{x}/{x}"),
            Err(GlobError::InvalidCaptureName { .. })
        ));
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let cache = PatternCache::new(2);
        cache.get("/a/*").unwrap();
        cache.get("/b/*").unwrap();
        cache.get("/a/*").unwrap();
        cache.get("/c/*").unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("/a/*"));
        assert!(!cache.contains("/b/*"));

        // A miss recompiles to an equivalent matcher.
        assert!(cache.matches("/b/*", "/b/x").unwrap());
    }
}
