//! WikiNER Wikidata - Remote lookups and category classification
//!
//! Everything that talks to Wikimedia services lives here:
//! - Title -> QID resolution through the Wikipedia action API
//! - Direct "instance of" claim lookups through the Wikidata action API
//! - SPARQL count queries through a shared, rate-limited dispatcher
//! - The category classifier and its QID cache
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use wikiner_core::{Qid, Title};

pub mod cache;
pub mod claims;
pub mod classifier;
pub mod dispatcher;
pub mod resolver;
pub mod sparql;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cache::{CacheStats, QidCache, SeedOutcome};
pub use claims::WikidataClaims;
pub use classifier::{CategoryClassifier, CategoryRule, CATEGORY_RULES, HUMAN_QID};
pub use dispatcher::{retry_hint, DispatcherConfig, DispatcherStats, QueryDispatcher};
pub use resolver::WikipediaResolver;
pub use sparql::WikidataSparql;

// ============================================================================
// Errors
// ============================================================================

/// Failure of a single remote query attempt (or of all of them)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited, cooling down for {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("gave up after {attempts} attempts (last error: {last})")]
    Exhausted { attempts: u32, last: String },
}

impl From<reqwest::Error> for QueryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e.to_string())
        }
    }
}

// ============================================================================
// Transport Types
// ============================================================================

/// Raw HTTP reply from the SPARQL endpoint
#[derive(Debug, Clone)]
pub struct SparqlReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl SparqlReply {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Resolves a page title to its Wikidata item
#[async_trait]
pub trait TitleResolver: Send + Sync {
    /// Never fails: lookup problems are logged and reported as `None`
    async fn resolve(&self, title: &Title) -> Option<Qid>;
}

/// Reads direct claims of a Wikidata item
#[async_trait]
pub trait ClaimLookup: Send + Sync {
    /// Target of the item's first "instance of" (P31) claim
    async fn instance_of(&self, qid: &Qid) -> Option<Qid>;
}

/// Sends a single SPARQL request; retries and throttling are the
/// dispatcher's job
#[async_trait]
pub trait SparqlTransport: Send + Sync {
    async fn execute(&self, query: &str) -> Result<SparqlReply, QueryError>;
}
