//! WikiNER CLI - Command-line interface
//!
//! Usage:
//!   wikiner classify <lang> <titles_file> <output_dir> [--seed FILE]... [--workers N]
//!   wikiner consolidate <mapping_file> [--output FILE]
//!
//! Both accept `--config FILE`; without it configuration comes from
//! `WIKINER_*` environment variables on top of defaults.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wikiner_core::{AppConfig, LoggingConfig};
use wikiner_pipeline::{consolidate, load_mapping, run_classify, write_json, ClassifyJob};

#[derive(Parser)]
#[command(name = "wikiner")]
#[command(about = "Tag Wikipedia titles with NER categories using Wikidata")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and classify a list of titles
    Classify {
        /// Wikipedia language code (e.g. "hi")
        lang: String,
        /// File with one title per line
        titles_file: PathBuf,
        /// Directory for the mapping file
        output_dir: PathBuf,
        /// Mapping file from an earlier run to pre-fill the cache (repeatable)
        #[arg(long = "seed", value_name = "FILE")]
        seeds: Vec<PathBuf>,
        /// Number of parallel workers
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Group a mapping file by Wikidata item
    Consolidate {
        /// Mapping file written by `classify`
        mapping_file: PathBuf,
        /// Write the grouped mapping here
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref()).context("failed to load configuration")?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Classify {
            lang,
            titles_file,
            output_dir,
            seeds,
            workers,
        } => {
            config.wikipedia.language = lang;
            if let Some(workers) = workers {
                config.pipeline.workers = workers;
            }

            let job = ClassifyJob {
                titles_file,
                output_dir,
                seeds,
                workers,
            };
            let outcome = run_classify(&config, &job)
                .await
                .context("classification run failed")?;

            println!("Wrote {}", outcome.output.display());
            println!(
                "{} titles, {} resolved, {} classified",
                outcome.summary.titles, outcome.summary.resolved, outcome.summary.classified
            );
            for (category, count) in &outcome.summary.per_category {
                println!("  {category:<13} {count}");
            }
        }
        Commands::Consolidate {
            mapping_file,
            output,
        } => {
            let mapping = load_mapping(&mapping_file)?;
            let report = consolidate(&mapping);
            report.log();

            println!(
                "{} QIDs, {} titles, {} ambiguous, {} skipped",
                report.entities.len(),
                report.title_count(),
                report.ambiguous.len(),
                report.skipped
            );
            if let Some(path) = output {
                write_json(&report.entities, &path)?;
                info!(path = %path.display(), "consolidated mapping written");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classify_with_repeated_seeds() {
        let cli = Cli::try_parse_from([
            "wikiner",
            "classify",
            "hi",
            "titles.txt",
            "out",
            "--seed",
            "ta.json",
            "--seed",
            "bn.json",
            "--workers",
            "8",
        ])
        .unwrap();

        match cli.command {
            Commands::Classify {
                lang,
                seeds,
                workers,
                ..
            } => {
                assert_eq!(lang, "hi");
                assert_eq!(seeds, vec![PathBuf::from("ta.json"), PathBuf::from("bn.json")]);
                assert_eq!(workers, Some(8));
            }
            Commands::Consolidate { .. } => panic!("expected classify"),
        }
    }

    #[test]
    fn test_config_flag_is_global() {
        let cli = Cli::try_parse_from([
            "wikiner",
            "consolidate",
            "ner_list.json",
            "--config",
            "wikiner.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("wikiner.toml")));
    }

    #[test]
    fn test_classify_requires_output_dir() {
        assert!(Cli::try_parse_from(["wikiner", "classify", "hi", "titles.txt"]).is_err());
    }
}
