//! End-of-run counts

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;
use wikiner_core::{Category, NerMapping};

/// Counts over a finished mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub titles: usize,
    pub resolved: usize,
    pub classified: usize,
    pub per_category: BTreeMap<Category, usize>,
}

impl RunSummary {
    pub fn from_mapping(mapping: &NerMapping) -> Self {
        let mut summary = Self {
            titles: mapping.len(),
            per_category: Category::ALL.iter().map(|c| (*c, 0)).collect(),
            ..Self::default()
        };

        for record in mapping.values() {
            if record.is_resolved() {
                summary.resolved += 1;
            }
            if let Some(category) = record.effective_category() {
                summary.classified += 1;
                *summary.per_category.entry(category).or_default() += 1;
            }
        }
        summary
    }

    /// Titles that resolved but matched no category
    pub fn uncategorized(&self) -> usize {
        self.resolved - self.classified
    }

    pub fn log(&self) {
        info!(
            titles = self.titles,
            resolved = self.resolved,
            classified = self.classified,
            uncategorized = self.uncategorized(),
            "run summary"
        );
        for (category, count) in &self.per_category {
            info!(category = %category, count, "category total");
        }
    }
}
