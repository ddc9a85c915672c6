//! Rate-limited SPARQL dispatcher
//!
//! The Wikidata Query Service allows a handful of concurrent queries per
//! client and answers HTTP 429 with a `Retry-After` header when that budget
//! is exceeded. Every SPARQL request in the process goes through one
//! [`QueryDispatcher`], which enforces:
//! - at most `max_concurrent` requests awaiting a response at any time
//! - a global cooldown after a 429, during which nothing new is admitted
//! - a bounded number of attempts per logical query
//!
//! Author: hephaex@gmail.com

use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use wikiner_core::WikidataConfig;

use crate::{QueryError, SparqlTransport};

// ============================================================================
// Configuration
// ============================================================================

/// Dispatcher limits and backoff settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Requests allowed in flight at once
    pub max_concurrent: usize,
    /// Attempts per logical query
    pub max_attempts: u32,
    /// Cooldown used when a 429 has no usable Retry-After
    pub default_retry_after: Duration,
    /// Added to every cooldown
    pub cooldown_margin: Duration,
    /// Advertised delays above this are clamped to it
    pub max_cooldown: Duration,
    /// Upper bound of the random pause after a timeout
    pub timeout_jitter: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&WikidataConfig::default())
    }
}

impl From<&WikidataConfig> for DispatcherConfig {
    fn from(config: &WikidataConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_queries.max(1),
            max_attempts: config.max_attempts.max(1),
            default_retry_after: Duration::from_secs(config.default_retry_after_secs),
            cooldown_margin: Duration::from_millis(config.cooldown_margin_ms),
            max_cooldown: Duration::from_secs(config.max_cooldown_secs),
            timeout_jitter: Duration::from_millis(config.timeout_jitter_ms),
        }
    }
}

// ============================================================================
// Retry hint
// ============================================================================

/// Delay advertised by a throttled response
///
/// Reads `Retry-After` as whole seconds (some proxies send `Retry_After`).
/// Anything missing or unparsable, including the HTTP-date form, yields
/// `default`.
pub fn retry_hint(headers: &HeaderMap, default: Duration) -> Duration {
    ["retry-after", "retry_after"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

// ============================================================================
// Cooldown flag
// ============================================================================

/// Global "stop admitting" flag holding the instant it is expected to clear
struct Cooldown {
    state: watch::Sender<Option<Instant>>,
}

impl Cooldown {
    fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    fn is_active(&self) -> bool {
        self.state.borrow().is_some()
    }

    async fn wait_until_clear(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so this only returns once cleared
        let _ = rx.wait_for(Option::is_none).await;
    }

    /// Start a cooldown unless one is already running
    fn try_begin(&self, until: Instant) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = Some(until);
                true
            }
        })
    }

    fn end(&self) {
        self.state.send_replace(None);
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Shared gateway to the SPARQL endpoint
pub struct QueryDispatcher {
    transport: Arc<dyn SparqlTransport>,
    gate: Semaphore,
    cooldown: Cooldown,
    config: DispatcherConfig,
    stats: Arc<DispatcherStats>,
}

impl QueryDispatcher {
    pub fn new(transport: Arc<dyn SparqlTransport>, config: DispatcherConfig) -> Self {
        Self {
            transport,
            gate: Semaphore::new(config.max_concurrent),
            cooldown: Cooldown::new(),
            config,
            stats: Arc::new(DispatcherStats::default()),
        }
    }

    /// Run a query, retrying failed attempts
    ///
    /// Returns the parsed JSON body of the first successful attempt, or
    /// [`QueryError::Exhausted`] once every attempt has failed.
    pub async fn send(&self, query: &str) -> Result<serde_json::Value, QueryError> {
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.config.max_attempts {
            match self.attempt(query).await {
                Ok(body) => {
                    self.stats.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(body);
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %err,
                        "SPARQL attempt failed"
                    );
                    if err == QueryError::Timeout {
                        tokio::time::sleep(self.jitter()).await;
                    }
                    last_error = err.to_string();
                }
            }
        }

        self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
        Err(QueryError::Exhausted {
            attempts: self.config.max_attempts,
            last: last_error,
        })
    }

    async fn attempt(&self, query: &str) -> Result<serde_json::Value, QueryError> {
        let permit = self.admit().await?;
        self.stats.attempts.fetch_add(1, Ordering::Relaxed);
        let reply = self.transport.execute(query).await;
        drop(permit);

        let reply = reply.inspect_err(|err| {
            if *err == QueryError::Timeout {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
            }
        })?;

        if reply.status == StatusCode::TOO_MANY_REQUESTS {
            self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
            let wait = self.cooldown_for(&reply.headers);
            self.drive_cooldown(wait).await;
            return Err(QueryError::RateLimited { retry_after: wait });
        }

        if reply.status != StatusCode::OK {
            return Err(QueryError::Status {
                status: reply.status.as_u16(),
                body: reply.body,
            });
        }

        serde_json::from_str(&reply.body).map_err(|e| QueryError::Malformed(e.to_string()))
    }

    /// Wait for the cooldown to clear, then for a free slot
    async fn admit(&self) -> Result<SemaphorePermit<'_>, QueryError> {
        loop {
            self.cooldown.wait_until_clear().await;
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| QueryError::Transport("admission gate closed".to_string()))?;

            // A cooldown may have started while we were queued on the gate
            if !self.cooldown.is_active() {
                return Ok(permit);
            }
            drop(permit);
        }
    }

    /// Only the first request to see a 429 sleeps out the cooldown; the
    /// others just fail this attempt and queue behind the flag.
    async fn drive_cooldown(&self, wait: Duration) {
        let now = Instant::now();
        let until = now
            .checked_add(wait)
            .or_else(|| now.checked_add(self.config.max_cooldown))
            .unwrap_or(now);
        if !self.cooldown.try_begin(until) {
            debug!("cooldown already active");
            return;
        }

        warn!(wait_ms = wait.as_millis() as u64, "rate limit exceeded, pausing SPARQL admissions");
        tokio::time::sleep(wait).await;
        self.cooldown.end();
        info!("SPARQL cooldown cleared");
    }

    /// Advertised delay, clamped, plus the safety margin
    fn cooldown_for(&self, headers: &HeaderMap) -> Duration {
        retry_hint(headers, self.config.default_retry_after)
            .min(self.config.max_cooldown)
            .saturating_add(self.config.cooldown_margin)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.config.timeout_jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Whether new requests are currently held back
    pub fn is_cooling_down(&self) -> bool {
        self.cooldown.is_active()
    }

    /// Free admission slots right now
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters describing dispatcher traffic
#[derive(Debug, Default)]
pub struct DispatcherStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    timeouts: AtomicU64,
    rate_limited: AtomicU64,
    exhausted: AtomicU64,
}

impl DispatcherStats {
    /// Requests actually handed to the transport
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Logical queries that got an answer
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// 429 responses seen
    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    /// Logical queries that ran out of attempts
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> DispatcherStatsReport {
        DispatcherStatsReport {
            attempts: self.attempts(),
            successes: self.successes(),
            timeouts: self.timeouts(),
            rate_limited: self.rate_limited(),
            exhausted: self.exhausted(),
        }
    }
}

/// Serializable snapshot of [`DispatcherStats`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherStatsReport {
    pub attempts: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub rate_limited: u64,
    pub exhausted: u64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{count_reply, rate_limited_reply, ScriptedTransport};
    use reqwest::header::HeaderValue;

    fn fast_config(max_concurrent: usize) -> DispatcherConfig {
        DispatcherConfig {
            max_concurrent,
            max_attempts: 5,
            default_retry_after: Duration::from_secs(30),
            cooldown_margin: Duration::ZERO,
            max_cooldown: Duration::from_secs(300),
            timeout_jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_retry_hint_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("12"));
        assert_eq!(
            retry_hint(&headers, Duration::from_secs(30)),
            Duration::from_secs(12)
        );
    }

    #[test]
    fn test_retry_hint_accepts_underscore_spelling() {
        let mut headers = HeaderMap::new();
        headers.insert("retry_after", HeaderValue::from_static(" 7 "));
        assert_eq!(
            retry_hint(&headers, Duration::from_secs(30)),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn test_retry_hint_defaults() {
        let default = Duration::from_secs(30);
        assert_eq!(retry_hint(&HeaderMap::new(), default), default);

        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_hint(&headers, default), default);
    }

    #[test]
    fn test_huge_retry_after_is_clamped() {
        let config = DispatcherConfig {
            cooldown_margin: Duration::from_secs(1),
            max_cooldown: Duration::from_secs(60),
            ..fast_config(5)
        };
        let dispatcher = QueryDispatcher::new(
            Arc::new(ScriptedTransport::memberships(&[])),
            config,
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("10000000000000000000"),
        );
        assert_eq!(dispatcher.cooldown_for(&headers), Duration::from_secs(61));

        headers.insert("retry-after", HeaderValue::from(u64::MAX));
        assert_eq!(dispatcher.cooldown_for(&headers), Duration::from_secs(61));

        headers.insert("retry-after", HeaderValue::from_static("5"));
        assert_eq!(dispatcher.cooldown_for(&headers), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_huge_retry_after_does_not_abort_query() {
        let transport = Arc::new(ScriptedTransport::new(|_, call| match call {
            0 => Ok(rate_limited_reply(10_000_000_000_000_000_000)),
            _ => Ok(count_reply(1)),
        }));
        let config = DispatcherConfig {
            max_cooldown: Duration::from_millis(50),
            ..fast_config(5)
        };
        let dispatcher = Arc::new(QueryDispatcher::new(transport.clone(), config));

        let task = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.send("SELECT 1").await })
        };
        let body = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("query stalled")
            .expect("query task panicked")
            .unwrap();

        assert_eq!(crate::sparql::parse_count(&body), Some(1));
        assert_eq!(transport.calls(), 2);
        assert_eq!(dispatcher.stats().rate_limited(), 1);
        assert!(!dispatcher.is_cooling_down());
    }

    #[test]
    fn test_config_from_wikidata_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.default_retry_after, Duration::from_secs(30));
        assert_eq!(config.cooldown_margin, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_send_returns_body() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(count_reply(3))));
        let dispatcher = QueryDispatcher::new(transport.clone(), fast_config(5));

        let body = dispatcher.send("SELECT 1").await.unwrap();
        assert_eq!(crate::sparql::parse_count(&body), Some(3));
        assert_eq!(transport.calls(), 1);
        assert_eq!(dispatcher.stats().successes(), 1);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_after_max_attempts() {
        let transport = Arc::new(ScriptedTransport::always_timeout());
        let dispatcher = QueryDispatcher::new(transport.clone(), fast_config(5));

        let err = dispatcher.send("SELECT 1").await.unwrap_err();
        assert!(matches!(err, QueryError::Exhausted { attempts: 5, .. }));
        assert_eq!(transport.calls(), 5);
        assert_eq!(dispatcher.stats().timeouts(), 5);
        assert_eq!(dispatcher.stats().exhausted(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_errors() {
        let transport = Arc::new(ScriptedTransport::new(|_, call| match call {
            0 => Err(QueryError::Transport("connection reset".to_string())),
            1 => Ok(crate::SparqlReply::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "oops",
            )),
            2 => Ok(crate::SparqlReply::new(StatusCode::OK, "<html>")),
            _ => Ok(count_reply(1)),
        }));
        let dispatcher = QueryDispatcher::new(transport.clone(), fast_config(5));

        let body = dispatcher.send("SELECT 1").await.unwrap();
        assert_eq!(crate::sparql::parse_count(&body), Some(1));
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_admission_bound_under_load() {
        let transport = Arc::new(
            ScriptedTransport::new(|_, _| Ok(count_reply(0)))
                .with_latency(Duration::from_millis(20)),
        );
        let dispatcher = Arc::new(QueryDispatcher::new(transport.clone(), fast_config(5)));

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move { dispatcher.send(&format!("SELECT {i}")).await })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            assert!(result.unwrap().is_ok());
        }

        assert_eq!(transport.calls(), 100);
        assert!(transport.max_in_flight() <= 5);
        assert_eq!(transport.max_in_flight(), 5);
        assert_eq!(dispatcher.available_slots(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cooldown_blocks_new_admissions() {
        let transport = Arc::new(ScriptedTransport::new(|_, call| {
            if call == 0 {
                Ok(rate_limited_reply(1))
            } else {
                Ok(count_reply(1))
            }
        }));
        let mut config = fast_config(5);
        config.cooldown_margin = Duration::from_millis(100);
        let dispatcher = Arc::new(QueryDispatcher::new(transport.clone(), config));

        let first = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.send("SELECT first").await })
        };

        // Let the throttled reply land before issuing the next query
        while !dispatcher.is_cooling_down() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let throttled_at = transport.call_times()[0];

        let second = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.send("SELECT second").await })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.calls(), 1, "no request may start during cooldown");

        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());

        let times = transport.call_times();
        assert_eq!(times.len(), 3);
        for started in &times[1..] {
            assert!(*started >= throttled_at + Duration::from_secs(1));
        }
        assert_eq!(dispatcher.stats().rate_limited(), 1);
        assert!(!dispatcher.is_cooling_down());

        // Once cleared, a fresh call is admitted straight away
        let before = Instant::now();
        assert!(dispatcher.send("SELECT third").await.is_ok());
        assert!(before.elapsed() < Duration::from_millis(500));
    }
}
