//! Cache key generation.
//!
//! Keys are content-addressed: the same logical query always produces
//! the same key, regardless of parameter ordering or string casing.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::sources::DataSource;

/// Content-addressed cache key: `source:hex-digest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Generate a key from a source and its canonicalized parameters.
    pub fn generate(source: DataSource, params: &Value) -> Self {
        let canonical = canonicalize(params);
        let mut hasher = Sha256::new();
        hasher.update(source.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(canonical.to_string().as_bytes());
        let hash = hasher.finalize();
        CacheKey(format!("{}:{:x}", source.as_str(), hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The source segment of the key.
    pub fn source_prefix(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form for logs.
        let digest = self.0.split(':').nth(1).unwrap_or("");
        write!(f, "{}:{}", self.source_prefix(), &digest[..digest.len().min(12)])
    }
}

/// Canonicalize a parameter value: object keys sorted (serde_json maps
/// already iterate sorted), string values trimmed and lowercased, floats
/// rounded to four decimal places so tolerance-level jitter collides.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_lowercase()),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.is_f64() {
                    let rounded = (f * 10_000.0).round() / 10_000.0;
                    return serde_json::Number::from_f64(rounded)
                        .map(Value::Number)
                        .unwrap_or_else(|| Value::Number(n.clone()));
                }
            }
            Value::Number(n.clone())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_identical_logical_queries_collide() {
        let a = CacheKey::generate(
            DataSource::WebSearch,
            &json!({"q": "African AI startups", "num": 10}),
        );
        let b = CacheKey::generate(
            DataSource::WebSearch,
            &json!({"num": 10, "q": "  african ai STARTUPS "}),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_source_separates_keys() {
        let params = json!({"q": "x"});
        let a = CacheKey::generate(DataSource::WebSearch, &params);
        let b = CacheKey::generate(DataSource::Scholar, &params);
        assert_ne!(a, b);
        assert_eq!(a.source_prefix(), "websearch");
        assert_eq!(b.source_prefix(), "scholar");
    }

    #[test]
    fn test_float_tolerance_clamping() {
        let a = CacheKey::generate(DataSource::Scholar, &json!({"threshold": 0.30001}));
        let b = CacheKey::generate(DataSource::Scholar, &json!({"threshold": 0.3000149}));
        assert_eq!(a, b);

        let c = CacheKey::generate(DataSource::Scholar, &json!({"threshold": 0.31}));
        assert_ne!(a, c);
    }

    #[test]
    fn test_array_order_is_preserved() {
        // Geographic focus ["Kenya","Nigeria"] is a different query from
        // ["Nigeria","Kenya"] only if the provider treats order as
        // significant; canonicalization leaves arrays alone.
        let a = CacheKey::generate(DataSource::Intelligence, &json!({"focus": ["kenya", "nigeria"]}));
        let b = CacheKey::generate(DataSource::Intelligence, &json!({"focus": ["nigeria", "kenya"]}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_integers_survive_canonicalization() {
        let v = canonicalize(&json!({"num": 10}));
        assert_eq!(v["num"], json!(10));
    }

    proptest! {
        #[test]
        fn prop_canonicalize_is_idempotent(q in ".{0,40}", n in 0usize..100) {
            let value = json!({"q": q, "num": n});
            let once = canonicalize(&value);
            let twice = canonicalize(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
