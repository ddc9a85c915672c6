//! Grouping a title mapping by entity
//!
//! Redirects and spelling variants resolve to the same QID, so a mapping
//! with many titles usually covers far fewer entities. Consolidation turns
//! it around: one entry per QID with every surface form that named it.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use wikiner_core::{Category, NerMapping, Qid};

/// One entity and the titles that resolved to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityGroup {
    pub category: Category,
    /// Titles with underscores turned back into spaces
    pub titles: BTreeSet<String>,
}

pub type ConsolidatedMap = BTreeMap<Qid, EntityGroup>;

/// Grouped mapping plus what was found along the way
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationReport {
    pub entities: ConsolidatedMap,
    /// QIDs whose titles disagreed on the category
    pub ambiguous: BTreeSet<Qid>,
    /// Titles left out for lacking a QID or a category
    pub skipped: usize,
}

impl ConsolidationReport {
    /// Distinct titles across all entities
    pub fn title_count(&self) -> usize {
        self.entities.values().map(|g| g.titles.len()).sum()
    }

    pub fn log(&self) {
        info!(
            qids = self.entities.len(),
            titles = self.title_count(),
            ambiguous = self.ambiguous.len(),
            skipped = self.skipped,
            "consolidation complete"
        );
    }
}

/// Group `mapping` by QID; the first category seen for a QID is kept
pub fn consolidate(mapping: &NerMapping) -> ConsolidationReport {
    let mut report = ConsolidationReport::default();

    for (title, record) in mapping {
        let (Some(qid), Some(category)) = (&record.identifier, record.category) else {
            report.skipped += 1;
            continue;
        };

        let group = report
            .entities
            .entry(qid.clone())
            .or_insert_with(|| EntityGroup {
                category,
                titles: BTreeSet::new(),
            });
        group.titles.insert(title.display_name());

        if group.category != category && report.ambiguous.insert(qid.clone()) {
            warn!(%qid, kept = %group.category, other = %category, "ambiguous category for QID");
        }
    }

    debug!(skipped = report.skipped, "mapping grouped by QID");
    report
}
