//! One complete classification run
//!
//! seed cache -> resolve and classify every title -> write the mapping

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use wikiner_core::{AppConfig, Result};
use wikiner_wikidata::cache::CacheStatsReport;
use wikiner_wikidata::dispatcher::DispatcherStatsReport;
use wikiner_wikidata::{
    CategoryClassifier, ClaimLookup, DispatcherConfig, QueryDispatcher, SparqlTransport,
    TitleResolver, WikidataClaims, WikidataSparql, WikipediaResolver,
};

use crate::aggregator::persist;
use crate::pool::{PoolConfig, WorkerPool};
use crate::seeder::{seed_from_files, SeedReport};
use crate::summary::RunSummary;
use crate::load_titles;

/// Inputs of a classification run
#[derive(Debug, Clone)]
pub struct ClassifyJob {
    /// Newline-separated page titles
    pub titles_file: PathBuf,
    /// Directory receiving the mapping file
    pub output_dir: PathBuf,
    /// Mapping files from earlier runs used to pre-fill the cache
    pub seeds: Vec<PathBuf>,
    /// Overrides `pipeline.workers`
    pub workers: Option<usize>,
}

/// The remote services a run talks to
pub struct RemoteServices {
    pub resolver: Arc<dyn TitleResolver>,
    pub claims: Arc<dyn ClaimLookup>,
    pub transport: Arc<dyn SparqlTransport>,
}

impl RemoteServices {
    /// HTTP clients for the configured Wikipedia edition and Wikidata
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let user_agent = config.user_agent.as_str();
        Ok(Self {
            resolver: Arc::new(WikipediaResolver::from_config(&config.wikipedia, user_agent)?),
            claims: Arc::new(WikidataClaims::from_config(&config.wikidata, user_agent)?),
            transport: Arc::new(WikidataSparql::from_config(&config.wikidata, user_agent)?),
        })
    }
}

/// What a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyOutcome {
    pub output: PathBuf,
    pub summary: RunSummary,
    pub seed: SeedReport,
    pub cache: CacheStatsReport,
    pub dispatcher: DispatcherStatsReport,
}

/// Run against the live Wikimedia services
pub async fn run_classify(config: &AppConfig, job: &ClassifyJob) -> Result<ClassifyOutcome> {
    let services = RemoteServices::from_config(config)?;
    run_classify_with(config, job, services).await
}

/// Run against the given services
pub async fn run_classify_with(
    config: &AppConfig,
    job: &ClassifyJob,
    services: RemoteServices,
) -> Result<ClassifyOutcome> {
    config.validate()?;

    let titles = load_titles(&job.titles_file)?;
    let workers = job.workers.unwrap_or(config.pipeline.workers).max(1);
    info!(
        language = %config.wikipedia.language,
        titles = titles.len(),
        workers,
        seeds = job.seeds.len(),
        "classification run starting"
    );

    // Seeding finishes here, before the cache is shared
    let (cache, seed) = seed_from_files(&job.seeds).await?;
    let cache = Arc::new(cache);

    let dispatcher = Arc::new(QueryDispatcher::new(
        services.transport,
        DispatcherConfig::from(&config.wikidata),
    ));
    let classifier = Arc::new(CategoryClassifier::new(
        services.claims,
        Arc::clone(&dispatcher),
        Arc::clone(&cache),
    ));
    let pool = WorkerPool::new(
        services.resolver,
        classifier,
        PoolConfig::from(&config.pipeline),
    );

    let mapping = pool.run(&titles, workers).await?;

    let output = job.output_dir.join(&config.pipeline.output_file_name);
    persist(&mapping, &output)?;

    let summary = RunSummary::from_mapping(&mapping);
    summary.log();

    let cache = cache.stats().report();
    info!(
        hits = cache.hits,
        misses = cache.misses,
        seeded = cache.seeded,
        hit_rate = cache.hit_rate,
        "cache statistics"
    );
    let dispatcher = dispatcher.stats().report();
    info!(
        attempts = dispatcher.attempts,
        successes = dispatcher.successes,
        timeouts = dispatcher.timeouts,
        rate_limited = dispatcher.rate_limited,
        exhausted = dispatcher.exhausted,
        "query statistics"
    );

    Ok(ClassifyOutcome {
        output,
        summary,
        seed,
        cache,
        dispatcher,
    })
}
