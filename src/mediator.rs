//! Rate-limited call mediator.
//!
//! Every outbound provider call passes through here: cache consult,
//! single-flight collapse, per-source concurrency permit, token-bucket
//! rate limit, bounded retries with backoff, result classification, and
//! daily cost accounting. Adapters never see a raw transport.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, timeout, Duration as TokioDuration};
use tracing::{debug, warn};

use crate::cache::{Flight, FlightOutcome, Lookup, NegativeReason, TieredCache};
use crate::clock::{day_of, SharedClock};
use crate::config::{CostLimits, SourcePolicy};
use crate::error::{Error, Result};
use crate::sources::DataSource;

/// Minimum serialized `content` length below which a payload is treated
/// as insufficient and negatively cached.
pub const MIN_CONTENT_LEN: usize = 50;

/// Negative TTL applied when the daily cost ceiling suppresses a call.
const COST_LIMIT_NEGATIVE_TTL_MINUTES: i64 = 15;

/// How a mediated call was satisfied.
#[derive(Debug, Clone)]
pub enum Mediated {
    /// The provider was called and returned this payload.
    Fresh(Value),
    /// Served from the cache without a provider call.
    Cached(Value),
    /// A negative cache entry suppressed the call.
    Suppressed(NegativeReason),
}

impl Mediated {
    /// The payload, if the call produced one.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Fresh(v) | Self::Cached(v) => Some(v),
            Self::Suppressed(_) => None,
        }
    }

    pub fn was_upstream_call(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Daily spend ledger. Reset happens lazily at the first call of a new day.
struct CostLedger {
    day: NaiveDate,
    total_usd: f64,
    by_source: HashMap<DataSource, f64>,
}

impl CostLedger {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            total_usd: 0.0,
            by_source: HashMap::new(),
        }
    }

    fn roll_over(&mut self, today: NaiveDate) {
        if today != self.day {
            self.day = today;
            self.total_usd = 0.0;
            self.by_source.clear();
        }
    }

    fn charge(&mut self, source: DataSource, cost: f64) {
        self.total_usd += cost;
        *self.by_source.entry(source).or_insert(0.0) += cost;
    }
}

/// Snapshot of the day's spending.
#[derive(Debug, Clone)]
pub struct CostSnapshot {
    pub day: NaiveDate,
    pub total_usd: f64,
    pub by_source: HashMap<DataSource, f64>,
    pub limit_usd: f64,
}

impl CostSnapshot {
    pub fn remaining_usd(&self) -> f64 {
        (self.limit_usd - self.total_usd).max(0.0)
    }
}

/// Token bucket refilled continuously from elapsed time.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_ms: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = (requests_per_minute as f64).max(1.0);
        Self {
            capacity,
            tokens: capacity,
            refill_per_ms: capacity / 60_000.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed_ms = self.last_refill.elapsed().as_millis() as f64;
        self.last_refill = Instant::now();
        self.tokens = (self.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
    }

    /// Take one token, or report how long until one is available.
    fn try_take(&mut self) -> std::result::Result<(), TokioDuration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            let wait_ms = (deficit / self.refill_per_ms).ceil() as u64;
            Err(TokioDuration::from_millis(wait_ms.max(1)))
        }
    }
}

struct SourceState {
    permits: Arc<Semaphore>,
    bucket: Mutex<TokenBucket>,
    policy: SourcePolicy,
}

/// The mediator. One instance is shared by all adapters.
pub struct Mediator {
    cache: Arc<TieredCache>,
    clock: SharedClock,
    cost: CostLimits,
    policies: HashMap<DataSource, SourcePolicy>,
    states: Mutex<HashMap<DataSource, Arc<SourceState>>>,
    ledger: Mutex<CostLedger>,
}

impl Mediator {
    pub fn new(
        cache: Arc<TieredCache>,
        clock: SharedClock,
        cost: CostLimits,
        policies: HashMap<DataSource, SourcePolicy>,
    ) -> Self {
        let today = day_of(clock.now());
        Self {
            cache,
            clock,
            cost,
            policies,
            states: Mutex::new(HashMap::new()),
            ledger: Mutex::new(CostLedger::new(today)),
        }
    }

    /// Shared cache handle, for status surfaces.
    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Today's spend so far.
    pub async fn cost_snapshot(&self) -> CostSnapshot {
        let mut ledger = self.ledger.lock().await;
        ledger.roll_over(day_of(self.clock.now()));
        CostSnapshot {
            day: ledger.day,
            total_usd: ledger.total_usd,
            by_source: ledger.by_source.clone(),
            limit_usd: self.cost.daily_limit_usd,
        }
    }

    async fn state_for(&self, source: DataSource) -> Arc<SourceState> {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get(&source) {
            return Arc::clone(state);
        }
        let policy = self.policies.get(&source).cloned().unwrap_or_default();
        let state = Arc::new(SourceState {
            permits: Arc::new(Semaphore::new(policy.max_concurrency.max(1))),
            bucket: Mutex::new(TokenBucket::new(policy.requests_per_minute)),
            policy,
        });
        states.insert(source, Arc::clone(&state));
        state
    }

    /// Mediate one provider call.
    ///
    /// `execute` performs the actual transport and is invoked at most
    /// once per attempt; it is never invoked when the cache or the
    /// single-flight table can satisfy the call.
    pub async fn call<F, Fut>(&self, source: DataSource, params: &Value, execute: F) -> Result<Mediated>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let key = self.cache.key(source, params);

        match self.cache.lookup_key(&key)? {
            Lookup::Hit(payload) => return Ok(Mediated::Cached(payload)),
            Lookup::NegativeHit(reason) => return Ok(Mediated::Suppressed(reason)),
            Lookup::Miss => {}
        }

        // Collapse concurrent misses for the same key into one call.
        let guard = match self.cache.begin_flight(&key) {
            Flight::Leader(guard) => guard,
            Flight::Follower(mut rx) => {
                return match rx.recv().await {
                    Ok(FlightOutcome::Ready) => match self.cache.lookup_key(&key)? {
                        Lookup::Hit(payload) => Ok(Mediated::Cached(payload)),
                        Lookup::NegativeHit(reason) => Ok(Mediated::Suppressed(reason)),
                        Lookup::Miss => Err(Error::Internal(
                            "flight completed without a cache write".to_string(),
                        )),
                    },
                    Ok(FlightOutcome::Failed(message)) => Err(Error::network(message)),
                    Err(_) => Err(Error::Internal("flight channel closed".to_string())),
                };
            }
        };

        let state = self.state_for(source).await;

        // Cost ceiling check happens before any resource acquisition.
        let call_cost = self.cost.call_cost(source);
        if call_cost > 0.0 {
            let mut ledger = self.ledger.lock().await;
            ledger.roll_over(day_of(self.clock.now()));
            if ledger.total_usd >= self.cost.daily_limit_usd {
                let spent = ledger.total_usd;
                drop(ledger);
                self.cache.store_negative_with_ttl(
                    source,
                    params,
                    NegativeReason::ApiError,
                    chrono::Duration::minutes(COST_LIMIT_NEGATIVE_TTL_MINUTES),
                )?;
                guard.complete(FlightOutcome::Ready);
                return Err(Error::cost_limit(
                    source.as_str(),
                    spent,
                    self.cost.daily_limit_usd,
                ));
            }
        }

        let _permit = state
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Internal("source permit pool closed".to_string()))?;

        if let Err(err) = self.acquire_token(&state, source).await {
            self.cache
                .store_negative(source, params, NegativeReason::RateLimited)?;
            guard.complete(FlightOutcome::Ready);
            return Err(err);
        }

        match self.execute_with_retry(&state.policy, source, &execute).await {
            Ok(payload) => {
                if insufficient_content(&payload) {
                    self.cache.store_negative(
                        source,
                        params,
                        NegativeReason::InsufficientContent,
                    )?;
                    guard.complete(FlightOutcome::Ready);
                    return Ok(Mediated::Suppressed(NegativeReason::InsufficientContent));
                }

                if call_cost > 0.0 {
                    let mut ledger = self.ledger.lock().await;
                    ledger.roll_over(day_of(self.clock.now()));
                    ledger.charge(source, call_cost);
                }

                self.cache.store(source, params, payload.clone())?;
                guard.complete(FlightOutcome::Ready);
                Ok(Mediated::Fresh(payload))
            }
            Err(err) => {
                // Only the flight winner decides the negative entry.
                let cached = match negative_reason_for(&err) {
                    Some(reason) => {
                        self.cache.store_negative(source, params, reason)?;
                        true
                    }
                    None => false,
                };
                if cached {
                    guard.complete(FlightOutcome::Ready);
                } else {
                    guard.complete(FlightOutcome::Failed(err.to_string()));
                }
                Err(err)
            }
        }
    }

    async fn acquire_token(&self, state: &SourceState, source: DataSource) -> Result<()> {
        let deadline = Instant::now() + TokioDuration::from_millis(state.policy.token_wait_ms);
        loop {
            let wait = {
                let mut bucket = state.bucket.lock().await;
                match bucket.try_take() {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };
            if Instant::now() + wait > deadline {
                warn!(source = source.as_str(), "token acquisition deadline exceeded");
                return Err(Error::rate_limited(source.as_str()));
            }
            sleep(wait).await;
        }
    }

    async fn execute_with_retry<F, Fut>(
        &self,
        policy: &SourcePolicy,
        source: DataSource,
        execute: &F,
    ) -> Result<Value>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let deadline = TokioDuration::from_millis(policy.attempt_timeout_ms);
            let result = match timeout(deadline, execute()).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(policy.attempt_timeout_ms)),
            };

            match result {
                Ok(payload) => return Ok(payload),
                Err(err) => {
                    attempt += 1;
                    let retryable = err.is_retryable() && !err.is_terminal();
                    if !retryable || attempt >= policy.max_attempts {
                        return Err(err);
                    }
                    let delay = backoff_with_jitter(policy.backoff_base_ms, attempt);
                    debug!(
                        source = source.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient failure"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Exponential backoff with sub-interval jitter derived from the system
/// clock's nanosecond component.
fn backoff_with_jitter(base_ms: u64, attempt: u32) -> TokioDuration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(10));
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let jitter = nanos % (exp / 2 + 1);
    TokioDuration::from_millis(exp / 2 + jitter)
}

/// A payload whose `content` field is implausibly short carries nothing
/// worth caching positively.
fn insufficient_content(payload: &Value) -> bool {
    match payload.get("content").and_then(Value::as_str) {
        Some(content) => content.trim().len() < MIN_CONTENT_LEN,
        None => false,
    }
}

fn negative_reason_for(err: &Error) -> Option<NegativeReason> {
    match err {
        Error::RateLimited { .. } => Some(NegativeReason::RateLimited),
        Error::Network(_) | Error::Timeout { .. } => Some(NegativeReason::NetworkError),
        Error::Api { .. } => Some(NegativeReason::ApiError),
        Error::Validation(_) => Some(NegativeReason::ValidationFailed),
        // Auth failures are terminal, not transient: caching them would
        // mask a credential fix for the TTL duration.
        _ => None,
    }
}
