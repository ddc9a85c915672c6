//! WikiNER Pipeline - Parallel classification of Wikipedia titles
//!
//! Takes a title list through resolution and classification on a sharded
//! worker pool and writes the resulting title -> record mapping.
//!
//! # Flow
//!
//! ```text
//! seed files ──► QidCache ─┐
//!                          ▼
//! titles ──► shards ──► workers ──► partials ──► merge ──► ner_list.json
//!                          │
//!                          └──► progress reporter
//! ```
//!
//! Author: hephaex@gmail.com

pub mod aggregator;
pub mod consolidate;
pub mod pool;
pub mod progress;
pub mod runner;
pub mod seeder;
pub mod summary;

pub use aggregator::{load_mapping, merge, persist, to_pretty_json, write_json};
pub use consolidate::{consolidate, ConsolidatedMap, ConsolidationReport, EntityGroup};
pub use pool::{annotate, partition, PoolConfig, WorkerPool};
pub use progress::{ProgressReporter, ReporterStats, WorkerProgress};
pub use runner::{run_classify, run_classify_with, ClassifyJob, ClassifyOutcome, RemoteServices};
pub use seeder::{seed_from_files, seed_from_mapping, SeedReport};
pub use summary::RunSummary;

use std::path::Path;
use wikiner_core::{Result, Title, WikinerError};

/// Read a newline-separated title list, skipping blank lines
pub fn load_titles(path: &Path) -> Result<Vec<Title>> {
    let content = std::fs::read_to_string(path).map_err(|e| WikinerError::io(path, e))?;
    Ok(content.lines().filter_map(Title::parse).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_titles_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("titles.txt");
        std::fs::write(&path, "Mahatma Gandhi\n\n   \nISRO\r\nभारत\n").unwrap();

        let titles = load_titles(&path).unwrap();
        let names: Vec<&str> = titles.iter().map(Title::as_str).collect();
        assert_eq!(names, vec!["Mahatma_Gandhi", "ISRO", "भारत"]);
    }

    #[test]
    fn test_load_titles_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_titles(&dir.path().join("absent.txt")),
            Err(WikinerError::Io { .. })
        ));
    }
}
