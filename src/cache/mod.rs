//! Two-tier response cache with negative caching.
//!
//! Every rate-limited or costly provider call is memoized here, keyed by
//! `(data_source, canonicalized-params)`. Known-empty and known-failed
//! queries are cached negatively so the upstream is not re-queried until
//! the entry expires. Lookups probe the in-memory LRU tier first, then
//! the durable SQLite tier; writes go through the durable tier before
//! the memory tier so a crash can never leave memory claiming an entry
//! durable does not hold.

mod durable;
mod flight;
mod key;
mod memory;

pub use durable::DEFAULT_COMPRESSION_THRESHOLD;
pub use flight::{Flight, FlightGuard, FlightOutcome, SingleFlight};
pub use key::{canonicalize, CacheKey};

use std::path::Path;
use std::sync::Mutex;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::clock::SharedClock;
use crate::config::CacheTtls;
use crate::error::Result;
use crate::sources::DataSource;

use durable::DurableTier;
use memory::MemoryTier;

/// Default byte budget for the in-memory tier.
pub const DEFAULT_MEMORY_BUDGET_BYTES: usize = 32 * 1024 * 1024;

/// Why a query was negatively cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeReason {
    InsufficientContent,
    RateLimited,
    ApiError,
    NetworkError,
    NoResults,
    ValidationFailed,
}

impl NegativeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientContent => "insufficient_content",
            Self::RateLimited => "rate_limited",
            Self::ApiError => "api_error",
            Self::NetworkError => "network_error",
            Self::NoResults => "no_results",
            Self::ValidationFailed => "validation_failed",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "insufficient_content" => Some(Self::InsufficientContent),
            "rate_limited" => Some(Self::RateLimited),
            "api_error" => Some(Self::ApiError),
            "network_error" => Some(Self::NetworkError),
            "no_results" => Some(Self::NoResults),
            "validation_failed" => Some(Self::ValidationFailed),
            _ => None,
        }
    }
}

/// A cached value: a payload or a negative marker.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Payload(Value),
    Negative(NegativeReason),
}

impl CachedValue {
    pub(crate) fn approximate_bytes(&self) -> usize {
        match self {
            Self::Payload(v) => v.to_string().len(),
            Self::Negative(_) => 32,
        }
    }
}

/// Outcome of a cache probe.
///
/// A negative hit surfaces distinctly from a miss so callers can
/// short-circuit without issuing a provider call.
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(Value),
    NegativeHit(NegativeReason),
    Miss,
}

impl Lookup {
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

/// Counters exposed by [`TieredCache::stats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub memory_hits: u64,
    pub durable_hits: u64,
    pub sets: u64,
    pub negative_hits: u64,
    pub evictions: u64,
}

/// The two-tier cache.
pub struct TieredCache {
    memory: Mutex<MemoryTier>,
    durable: DurableTier,
    flight: SingleFlight,
    stats: Mutex<CacheStats>,
    ttls: CacheTtls,
    clock: SharedClock,
}

impl TieredCache {
    /// Open a cache with a durable tier at `path`.
    pub fn open(path: impl AsRef<Path>, ttls: CacheTtls, clock: SharedClock) -> Result<Self> {
        Ok(Self {
            memory: Mutex::new(MemoryTier::new(DEFAULT_MEMORY_BUDGET_BYTES)),
            durable: DurableTier::open(path)?,
            flight: SingleFlight::new(),
            stats: Mutex::new(CacheStats::default()),
            ttls,
            clock,
        })
    }

    /// Fully in-memory cache (tests and mock-data mode).
    pub fn in_memory(ttls: CacheTtls, clock: SharedClock) -> Result<Self> {
        Ok(Self {
            memory: Mutex::new(MemoryTier::new(DEFAULT_MEMORY_BUDGET_BYTES)),
            durable: DurableTier::in_memory()?,
            flight: SingleFlight::new(),
            stats: Mutex::new(CacheStats::default()),
            ttls,
            clock,
        })
    }

    /// Compute the content-addressed key for a query.
    pub fn key(&self, source: DataSource, params: &Value) -> CacheKey {
        CacheKey::generate(source, params)
    }

    /// Probe both tiers.
    pub fn lookup(&self, source: DataSource, params: &Value) -> Result<Lookup> {
        let key = self.key(source, params);
        self.lookup_key(&key)
    }

    /// Probe both tiers by precomputed key.
    pub fn lookup_key(&self, key: &CacheKey) -> Result<Lookup> {
        let now = self.clock.now();

        let from_memory = {
            let mut memory = self.memory.lock().expect("memory tier poisoned");
            memory.get(key.as_str(), now)
        };
        if let Some(entry) = from_memory {
            return Ok(self.record_hit(entry.value, true));
        }

        if let Some((value, expires_at)) = self.durable.get(key.as_str(), now)? {
            // Promote to the memory tier with the remaining lifetime.
            let mut memory = self.memory.lock().expect("memory tier poisoned");
            memory.put(key.as_str().to_string(), value.clone(), expires_at);
            drop(memory);
            return Ok(self.record_hit(value, false));
        }

        let mut stats = self.stats.lock().expect("stats poisoned");
        stats.misses += 1;
        Ok(Lookup::Miss)
    }

    fn record_hit(&self, value: CachedValue, from_memory: bool) -> Lookup {
        let mut stats = self.stats.lock().expect("stats poisoned");
        match value {
            CachedValue::Payload(payload) => {
                stats.hits += 1;
                if from_memory {
                    stats.memory_hits += 1;
                } else {
                    stats.durable_hits += 1;
                }
                Lookup::Hit(payload)
            }
            CachedValue::Negative(reason) => {
                stats.negative_hits += 1;
                Lookup::NegativeHit(reason)
            }
        }
    }

    /// Write a positive entry through both tiers with the source's TTL.
    pub fn store(&self, source: DataSource, params: &Value, payload: Value) -> Result<()> {
        self.store_with_ttl(source, params, payload, self.ttls.positive(source))
    }

    /// Write a positive entry with an explicit TTL.
    pub fn store_with_ttl(
        &self,
        source: DataSource,
        params: &Value,
        payload: Value,
        ttl: Duration,
    ) -> Result<()> {
        let key = self.key(source, params);
        self.write(key, source, CachedValue::Payload(payload), ttl)
    }

    /// Write a negative entry with the reason's default TTL.
    pub fn store_negative(
        &self,
        source: DataSource,
        params: &Value,
        reason: NegativeReason,
    ) -> Result<()> {
        let ttl = self.negative_ttl(source, reason);
        self.store_negative_with_ttl(source, params, reason, ttl)
    }

    /// Write a negative entry with an explicit TTL.
    pub fn store_negative_with_ttl(
        &self,
        source: DataSource,
        params: &Value,
        reason: NegativeReason,
        ttl: Duration,
    ) -> Result<()> {
        let key = self.key(source, params);
        debug!(key = %key, reason = reason.as_str(), "negative cache write");
        self.write(key, source, CachedValue::Negative(reason), ttl)
    }

    /// Negative TTL policy: shorter than the positive TTL for the same
    /// source, scaled by how transient the reason is.
    pub fn negative_ttl(&self, source: DataSource, reason: NegativeReason) -> Duration {
        match reason {
            NegativeReason::RateLimited | NegativeReason::NetworkError => Duration::minutes(30),
            NegativeReason::ApiError => Duration::hours(1),
            NegativeReason::InsufficientContent | NegativeReason::ValidationFailed => {
                Duration::hours(2)
            }
            NegativeReason::NoResults => self.ttls.no_results(source),
        }
    }

    fn write(&self, key: CacheKey, source: DataSource, value: CachedValue, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let expires_at = now + ttl;

        // Durable first: memory must never claim what durable lacks.
        self.durable
            .put(key.as_str(), source.as_str(), &value, now, expires_at)?;

        let mut memory = self.memory.lock().expect("memory tier poisoned");
        memory.put(key.as_str().to_string(), value, expires_at);
        let evictions = memory.evictions();
        drop(memory);

        let mut stats = self.stats.lock().expect("stats poisoned");
        stats.sets += 1;
        stats.evictions = evictions;
        Ok(())
    }

    /// Remove every entry whose key starts with `prefix` (typically a
    /// source name); returns the count removed from the durable tier.
    pub fn invalidate(&self, prefix: &str) -> Result<usize> {
        let mut memory = self.memory.lock().expect("memory tier poisoned");
        memory.remove_prefix(prefix);
        drop(memory);
        self.durable.remove_prefix(prefix)
    }

    /// Drop negative entries, optionally only for one source.
    pub fn clear_negative(&self, source: Option<DataSource>) -> Result<usize> {
        let mut memory = self.memory.lock().expect("memory tier poisoned");
        match source {
            Some(s) => {
                let prefix = format!("{}:", s.as_str());
                memory.remove_matching(|k, e| {
                    k.starts_with(&prefix) && matches!(e.value, CachedValue::Negative(_))
                });
            }
            None => {
                memory.remove_matching(|_, e| matches!(e.value, CachedValue::Negative(_)));
            }
        }
        drop(memory);
        self.durable.clear_negative(source.map(|s| s.as_str()))
    }

    /// TTL-based eviction of the durable tier.
    pub fn cleanup_expired(&self) -> Result<usize> {
        self.durable.cleanup_expired(self.clock.now())
    }

    /// Join the single-flight group for a key.
    pub fn begin_flight(&self, key: &CacheKey) -> Flight {
        self.flight.begin(key.as_str())
    }

    /// Snapshot the counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().expect("stats poisoned").clone()
    }
}
