//! Sharded worker pool
//!
//! The title list is cut into contiguous shards, one per worker. Each worker
//! walks its shard in order (resolve, then classify) and fills a private
//! partial map, so nothing is shared for writing apart from the QID cache
//! and the dispatcher inside the classifier.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info};
use wikiner_core::{EntityRecord, NerMapping, PipelineConfig, Result, Title, WikinerError};
use wikiner_wikidata::{CategoryClassifier, TitleResolver};

use crate::aggregator::{self, PartialResult};
use crate::progress::{ProgressReporter, WorkerProgress};

/// Split `titles` into at most `workers` contiguous shards
///
/// Every shard but the last holds `ceil(len / workers)` titles; the last may
/// be shorter. Fewer shards are returned when there are fewer titles than
/// workers.
pub fn partition<T: Clone>(titles: &[T], workers: usize) -> Vec<Vec<T>> {
    if titles.is_empty() {
        return Vec::new();
    }
    let size = titles.len().div_ceil(workers.max(1));
    titles.chunks(size).map(<[T]>::to_vec).collect()
}

/// Pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pause between starting consecutive workers
    pub spawn_stagger: Duration,
    /// Interval of the progress reporter
    pub progress_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PoolConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            spawn_stagger: config.spawn_stagger(),
            progress_interval: config.progress_interval(),
        }
    }
}

/// Runs resolution and classification over a title list
pub struct WorkerPool {
    resolver: Arc<dyn TitleResolver>,
    classifier: Arc<CategoryClassifier>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(
        resolver: Arc<dyn TitleResolver>,
        classifier: Arc<CategoryClassifier>,
        config: PoolConfig,
    ) -> Self {
        Self {
            resolver,
            classifier,
            config,
        }
    }

    /// Process every title and return the merged mapping
    ///
    /// Blocks until all shards are done. A worker that panics does not stop
    /// the others; its failure is returned after they finish.
    pub async fn run(&self, titles: &[Title], worker_count: usize) -> Result<NerMapping> {
        let shards = partition(titles, worker_count);
        let progress = Arc::new(WorkerProgress::new(shards.len()));
        let reporter = ProgressReporter::spawn(
            Arc::clone(&progress),
            titles.len(),
            self.config.progress_interval,
        );

        info!(
            titles = titles.len(),
            workers = shards.len(),
            "starting workers"
        );

        let mut tasks = JoinSet::new();
        for (worker, shard) in shards.into_iter().enumerate() {
            if worker > 0 && !self.config.spawn_stagger.is_zero() {
                tokio::time::sleep(self.config.spawn_stagger).await;
            }

            let resolver = Arc::clone(&self.resolver);
            let classifier = Arc::clone(&self.classifier);
            let progress = Arc::clone(&progress);
            tasks.spawn(async move {
                let partial =
                    process_shard(worker, &shard, resolver.as_ref(), &classifier, &progress).await;
                (worker, partial)
            });
        }

        let mut partials = Vec::new();
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((worker, partial)) => partials.push((worker, partial)),
                Err(e) => {
                    error!(error = %e, "worker failed");
                    failure.get_or_insert(WikinerError::Worker(e.to_string()));
                }
            }
        }

        let reports = reporter.stats();
        reporter.stop().await;
        info!(
            processed = progress.total(),
            progress_reports = reports.reports(),
            "workers completed"
        );

        if let Some(err) = failure {
            return Err(err);
        }

        // Shard order, so a title repeated across shards keeps its last occurrence
        partials.sort_by_key(|(worker, _)| *worker);
        Ok(aggregator::merge(
            partials.into_iter().map(|(_, partial)| partial),
        ))
    }
}

/// Record for one title
pub async fn annotate(
    title: &Title,
    resolver: &dyn TitleResolver,
    classifier: &CategoryClassifier,
) -> EntityRecord {
    match resolver.resolve(title).await {
        Some(qid) => {
            let category = classifier.classify(&qid).await;
            EntityRecord::resolved(qid, category)
        }
        None => EntityRecord::unresolved(),
    }
}

async fn process_shard(
    worker: usize,
    shard: &[Title],
    resolver: &dyn TitleResolver,
    classifier: &CategoryClassifier,
    progress: &WorkerProgress,
) -> PartialResult {
    let mut partial = PartialResult::new();
    for title in shard {
        let record = annotate(title, resolver, classifier).await;
        partial.insert(title.clone(), record);
        progress.record(worker);
    }
    partial
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partition_even_split() {
        let titles: Vec<u32> = (0..8).collect();
        let shards = partition(&titles, 4);
        assert_eq!(shards, vec![vec![0, 1], vec![2, 3], vec![4, 5], vec![6, 7]]);
    }

    #[test]
    fn test_partition_short_last_shard() {
        let titles: Vec<u32> = (0..10).collect();
        let shards = partition(&titles, 4);
        let sizes: Vec<_> = shards.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_partition_more_workers_than_titles() {
        let titles = vec!["a", "b"];
        assert_eq!(partition(&titles, 8), vec![vec!["a"], vec!["b"]]);
        assert!(partition::<u8>(&[], 8).is_empty());
    }

    #[test]
    fn test_partition_zero_workers_means_one() {
        let titles = vec![1, 2, 3];
        assert_eq!(partition(&titles, 0), vec![vec![1, 2, 3]]);
    }

    proptest! {
        #[test]
        fn prop_partition_covers_input_in_order(
            titles in proptest::collection::vec(any::<u16>(), 0..300),
            workers in 1usize..40,
        ) {
            let shards = partition(&titles, workers);

            prop_assert!(shards.len() <= workers);
            prop_assert!(shards.iter().all(|s| !s.is_empty()));

            let flattened: Vec<u16> = shards.iter().flatten().copied().collect();
            prop_assert_eq!(flattened, titles.clone());

            if let Some((last, full)) = shards.split_last() {
                let size = full.first().map_or(last.len(), Vec::len);
                prop_assert!(full.iter().all(|s| s.len() == size));
                prop_assert!(last.len() <= size);
            }
        }
    }
}
