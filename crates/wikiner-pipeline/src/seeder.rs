//! Cache seeding from earlier runs
//!
//! Mapping files produced for other language editions (or an interrupted
//! run) already hold QID -> category answers. Loading them before the pool
//! starts means those items are never queried again.

use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use wikiner_core::{NerMapping, Result};
use wikiner_wikidata::{QidCache, SeedOutcome};

use crate::aggregator::load_mapping;

/// What seeding did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Mapping files read
    pub files: usize,
    /// Records that carried a QID
    pub records: usize,
    /// Distinct QIDs added to the cache
    pub inserted: usize,
    /// Repeats that agreed with the cached value
    pub duplicates: usize,
    /// Repeats that disagreed; the first value was kept
    pub conflicts: usize,
}

/// Seed `cache` from an in-memory mapping
pub async fn seed_from_mapping(
    cache: &mut QidCache,
    mapping: &NerMapping,
    report: &mut SeedReport,
) {
    for (title, record) in mapping {
        let Some(qid) = record.identifier.clone() else {
            continue;
        };
        report.records += 1;

        let category = record.effective_category();
        match cache.seed(qid.clone(), category).await {
            SeedOutcome::Inserted => report.inserted += 1,
            SeedOutcome::Duplicate => report.duplicates += 1,
            SeedOutcome::Conflict { kept } => {
                report.conflicts += 1;
                warn!(
                    %qid,
                    %title,
                    kept = ?kept,
                    ignored = ?category,
                    "conflicting seed category, keeping the first"
                );
            }
        }
    }
}

/// Build a cache from zero or more previous mapping files
///
/// Must run before the pool starts; the returned cache is meant to be
/// wrapped in an `Arc` and handed to the classifier.
pub async fn seed_from_files(paths: &[PathBuf]) -> Result<(QidCache, SeedReport)> {
    let mut cache = QidCache::new();
    let mut report = SeedReport::default();

    for path in paths {
        let mapping = load_mapping(path)?;
        seed_from_mapping(&mut cache, &mapping, &mut report).await;
        report.files += 1;
        info!(path = %path.display(), entries = mapping.len(), "seeded cache from mapping");
    }

    if report.files > 0 {
        info!(
            files = report.files,
            inserted = report.inserted,
            duplicates = report.duplicates,
            conflicts = report.conflicts,
            "cache seeding complete"
        );
    }
    Ok((cache, report))
}
