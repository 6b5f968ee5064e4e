//! Cache key derivation.

use std::fmt;

const QUERY_SEPARATOR: char = '?';

/// Identifies one cacheable page: its path plus query string.
///
/// The key is opaque to the stores; both tiers index by [`CacheKey::as_str`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// `path` alone when the query is empty, otherwise `path?query`.
    pub fn from_request(path: &str, query: &str) -> Self {
        let query = query.strip_prefix(QUERY_SEPARATOR).unwrap_or(query);
        if query.is_empty() {
            return Self(path.to_string());
        }

        let mut key = String::with_capacity(path.len() + query.len() + 1);
        key.push_str(path);
        key.push(QUERY_SEPARATOR);
        key.push_str(query);
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
