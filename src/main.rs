//! `rankeval`: evaluate every configured version against the ratings and
//! print the evaluation-level metrics per version.

use anyhow::{Context, Result};
use clap::Parser;
use rankeval::metrics::factory::factory_for;
use rankeval::orchestrator::{EvaluationReport, Evaluator, StrategyKind};
use rankeval::persistence::{JsonPersistenceHandler, SqlitePersistenceHandler};
use rankeval::ratings::load_ratings;
use rankeval::search::{InMemorySearchPlatform, SearchPlatform};
use rankeval::template::{FileTemplateResolver, InMemoryTemplateResolver, TemplateResolver};
use rankeval::{Config, Evaluation};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "rankeval", version, about = "Versioned relevance-metrics evaluation")]
struct Args {
    /// Configuration file (default: $RANKEVAL_CONFIG or ./config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured execution strategy.
    #[arg(long, value_enum)]
    strategy: Option<StrategyKind>,

    /// Do not print the summary table.
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.evaluation.log_level.as_str()),
    )
    .init();

    let versions = config.versions()?;
    let mut evaluation = Evaluation::new(config.evaluation.name.clone(), versions);
    let declared_index = load_ratings(config.ratings(), &mut evaluation)?;
    let index = declared_index
        .or_else(|| config.evaluation.index.clone())
        .context("no index: set evaluation.index or declare one in the ratings")?;

    let platform: Arc<dyn SearchPlatform> = match &config.search.responses {
        Some(path) => Arc::new(InMemorySearchPlatform::load(path)?),
        None => {
            log::warn!("search.responses not set: every query returns no hits");
            Arc::new(InMemorySearchPlatform::new())
        }
    };
    let templates: Arc<dyn TemplateResolver> = match &config.evaluation.templates {
        Some(root) => Arc::new(FileTemplateResolver::new(root)),
        None => Arc::new(InMemoryTemplateResolver::new()),
    };

    let factory = factory_for(config.metrics.parameterized.clone())?;
    let strategy = args.strategy.unwrap_or(config.execution.strategy);
    let mut evaluator = Evaluator::new(factory.as_ref(), &config.metric_ids(), platform, templates)?
        .with_index(index)
        .with_fields(config.evaluation.fields.clone())
        .with_strategy(strategy.build(
            config.execution.evaluation_workers,
            config.execution.query_workers,
        ));
    if let Some(dir) = &config.persistence.json_dir {
        evaluator = evaluator.with_persistence(Arc::new(JsonPersistenceHandler::new(dir)));
    }
    if let Some(path) = &config.persistence.sqlite_path {
        evaluator = evaluator.with_persistence(Arc::new(SqlitePersistenceHandler::new(path)));
    }

    let report = evaluator.run(evaluation).await?;
    if !args.quiet {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &EvaluationReport) {
    let document = &report.document;
    println!(
        "\n=== {} ({} queries, {:.2}s) ===",
        document.name,
        document.query_count(),
        report.elapsed.as_secs_f64()
    );

    let width = document.metrics.keys().map(String::len).max().unwrap_or(6).max(6);
    print!("{:width$}", "metric", width = width);
    for version in &document.versions {
        print!("  {:>10}", version);
    }
    println!();
    for (name, metric) in &document.metrics {
        print!("{:width$}", name, width = width);
        for version in &document.versions {
            match metric.versions.get(version) {
                Some(value) => print!("  {:>10}", value.value.to_string()),
                None => print!("  {:>10}", "-"),
            }
        }
        println!();
    }

    if !report.failures.is_empty() {
        println!("\n{} query versions without data:", report.failures.len());
        for failure in &report.failures {
            println!("  {} [{}]: {}", failure.query, failure.version, failure.message);
        }
    }
    for failure in &report.instantiation_failures {
        println!("Metric {} skipped: {}", failure.metric, failure.message);
    }
}
