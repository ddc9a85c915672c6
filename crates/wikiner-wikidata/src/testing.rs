//! In-memory stand-ins for the Wikimedia services
//!
//! Enabled for this crate's tests and, through the `test-utils` feature,
//! for downstream crates.

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use wikiner_core::{Qid, Title};

use crate::classifier::HUMAN_QID;
use crate::{ClaimLookup, QueryError, SparqlReply, SparqlTransport, TitleResolver};

/// SPARQL JSON result with a single `count` binding
pub fn count_reply(count: u64) -> SparqlReply {
    let body = serde_json::json!({
        "head": { "vars": ["count"] },
        "results": { "bindings": [{
            "count": {
                "datatype": "http://www.w3.org/2001/XMLSchema#integer",
                "type": "literal",
                "value": count.to_string(),
            }
        }] }
    });
    SparqlReply::new(StatusCode::OK, body.to_string())
}

/// HTTP 429 advertising `retry_after_secs`
pub fn rate_limited_reply(retry_after_secs: u64) -> SparqlReply {
    let mut reply = SparqlReply::new(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests");
    reply
        .headers
        .insert("retry-after", HeaderValue::from(retry_after_secs));
    reply
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolves titles from a fixed table
pub struct StaticResolver {
    titles: HashMap<String, Qid>,
    calls: AtomicUsize,
}

impl StaticResolver {
    /// `entries` are (normalized title, QID) pairs
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            titles: entries
                .iter()
                .map(|(title, qid)| (title.to_string(), Qid::new(*qid)))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TitleResolver for StaticResolver {
    async fn resolve(&self, title: &Title) -> Option<Qid> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.titles.get(title.as_str()).cloned()
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Reports the listed QIDs as humans and everything else as claim-less
pub struct StaticClaims {
    humans: HashSet<Qid>,
    calls: AtomicUsize,
}

impl StaticClaims {
    pub fn new(humans: &[&str]) -> Self {
        Self {
            humans: humans.iter().map(|q| Qid::new(*q)).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClaimLookup for StaticClaims {
    async fn instance_of(&self, qid: &Qid) -> Option<Qid> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.humans.contains(qid).then(|| Qid::new(HUMAN_QID))
    }
}

// ============================================================================
// SPARQL transport
// ============================================================================

type Script = dyn Fn(&str, usize) -> Result<SparqlReply, QueryError> + Send + Sync;

/// Transport answering from a closure `(query, call index) -> reply`
///
/// Records call count, start times, and the highest number of calls that
/// were in progress at the same time.
pub struct ScriptedTransport {
    script: Box<Script>,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<Instant>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, usize) -> Result<SparqlReply, QueryError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Count 1 for each listed (item, root class) pair, 0 otherwise
    pub fn memberships(pairs: &[(&str, &str)]) -> Self {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(item, root)| (format!("wd:{item} AS ?item"), format!("wd:{root} .")))
            .collect();

        Self::new(move |query, _| {
            let member = pairs
                .iter()
                .any(|(item, root)| query.contains(item.as_str()) && query.contains(root.as_str()));
            Ok(count_reply(u64::from(member)))
        })
    }

    /// Every call times out
    pub fn always_timeout() -> Self {
        Self::new(|_, _| Err(QueryError::Timeout))
    }

    /// Hold each call for `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Start time of every call, in call order
    pub fn call_times(&self) -> Vec<Instant> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SparqlTransport for ScriptedTransport {
    async fn execute(&self, query: &str) -> Result<SparqlReply, QueryError> {
        let index = {
            let mut started = self.started.lock().unwrap_or_else(PoisonError::into_inner);
            started.push(Instant::now());
            self.calls.fetch_add(1, Ordering::SeqCst)
        };
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.to_string());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reply = (self.script)(query, index);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}
