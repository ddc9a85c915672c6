//! QID -> category cache
//!
//! Memoizes classification results for the lifetime of a run so that an
//! item reached through several titles (redirects, other language editions)
//! is classified once. A cached `None` means "known, no category".
//!
//! Uses the moka crate for a thread-safe, async-compatible map whose
//! `get_with` coalesces concurrent initializations of the same key.
//!
//! Author: hephaex@gmail.com

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use wikiner_core::{Category, Qid};

// ============================================================================
// QID Cache
// ============================================================================

/// Outcome of seeding one QID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// New entry
    Inserted,
    /// Already present with the same category
    Duplicate,
    /// Already present with a different category; the existing one is kept
    Conflict { kept: Option<Category> },
}

/// Shared QID -> category memo
///
/// Not `Clone`: share it behind an `Arc` once seeding is done, which also
/// rules out seeding (`&mut self`) after workers hold a reference.
pub struct QidCache {
    cache: Cache<Qid, Option<Category>>,
    stats: Arc<CacheStats>,
}

impl QidCache {
    /// Create an empty, unbounded cache
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().build(),
            stats: Arc::new(CacheStats::new("qid-category")),
        }
    }

    /// Look up a QID. `Some(None)` means known, no category.
    pub async fn get(&self, qid: &Qid) -> Option<Option<Category>> {
        let result = self.cache.get(qid).await;

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        result
    }

    /// Return the cached category or run `classify` to fill it in
    ///
    /// Concurrent callers for the same QID wait on a single `classify`
    /// future instead of each issuing their own remote queries.
    pub async fn get_or_classify<F>(&self, qid: &Qid, classify: F) -> Option<Category>
    where
        F: Future<Output = Option<Category>>,
    {
        let computed = AtomicBool::new(false);
        let category = self
            .cache
            .get_with(qid.clone(), async {
                computed.store(true, Ordering::Relaxed);
                classify.await
            })
            .await;

        if computed.load(Ordering::Relaxed) {
            self.stats.record_miss();
            self.stats.record_write();
        } else {
            self.stats.record_hit();
        }

        category
    }

    /// Insert a result from a previous run. First value wins.
    pub async fn seed(&mut self, qid: Qid, category: Option<Category>) -> SeedOutcome {
        let outcome = match self.cache.get(&qid).await {
            Some(existing) if existing == category => SeedOutcome::Duplicate,
            Some(existing) => SeedOutcome::Conflict { kept: existing },
            None => {
                self.cache.insert(qid, category).await;
                SeedOutcome::Inserted
            }
        };

        if outcome == SeedOutcome::Inserted {
            self.stats.record_seed();
        }
        outcome
    }

    /// Check if a QID is cached, without touching statistics
    pub fn contains(&self, qid: &Qid) -> bool {
        self.cache.contains_key(qid)
    }

    /// Number of cached QIDs, after flushing moka's pending bookkeeping
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }
}

impl Default for QidCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Statistics for cache effectiveness monitoring
#[derive(Debug)]
pub struct CacheStats {
    /// Cache name for identification
    name: String,
    /// Lookups answered from the cache
    hits: AtomicU64,
    /// Lookups that required classification
    misses: AtomicU64,
    /// Entries written by classification
    writes: AtomicU64,
    /// Entries written by seeding
    seeded: AtomicU64,
}

impl CacheStats {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            seeded: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_seed(&self) {
        self.seeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn seeded(&self) -> u64 {
        self.seeded.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Get a summary report
    pub fn report(&self) -> CacheStatsReport {
        CacheStatsReport {
            name: self.name.clone(),
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            seeded: self.seeded(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub seeded: u64,
    pub hit_rate: f64,
}

// ============================================================================
// Tests
// ============================================================================
