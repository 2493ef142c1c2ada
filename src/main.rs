//! Catalog Analyzer
//!
//! Analyzes the directories given on the command line, or every directory in
//! the catalog, and reports what each one was classified as. Can also refresh
//! stale provider metadata.

use catalog_analyzer::core::config::{CliArgs, Config};
use catalog_analyzer::core::detector::{DetectionEngine, DetectionRule};
use catalog_analyzer::core::{
    AnalysisCallback, AnalysisRequest, AnalysisResult, AnalysisScheduler, Logger, MediaAnalyzer,
    Submission,
};
use catalog_analyzer::db::{DatabaseManager, SqliteCatalogStore};
use catalog_analyzer::provider::{ProviderManager, TmdbProvider};

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Media types TMDB is queried for
const TMDB_MEDIA_TYPES: &[&str] = &["movie", "tv_show", "anime"];

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let config = match Config::load(&cli_args) {
        Ok(cfg) => cfg,
        Err(e) => {
            // logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!(version = catalog_analyzer::VERSION, "Starting catalog analyzer");
    info!(
        path = ?config.database.path,
        pool_size = config.database.connection_pool_size,
        "Database configuration"
    );

    let db = Arc::new(
        DatabaseManager::new(
            &config.database.path,
            config.database.connection_pool_size,
            config.database.busy_timeout(),
        )
        .context("Failed to open catalog database")?,
    );
    info!(path = %db.db_path().display(), "Catalog database opened");
    let store = Arc::new(SqliteCatalogStore::new(db));

    let media_types = store.list_media_types().await?;
    let rules = match &config.detection.rules_file {
        Some(path) => DetectionRule::load_file(path)
            .with_context(|| format!("Failed to load detection rules from {}", path.display()))?,
        None => DetectionRule::defaults(),
    };
    let classifier = Arc::new(
        DetectionEngine::new(rules, &media_types)?
            .with_min_confidence(config.detection.min_confidence),
    );
    info!(rules = classifier.rule_count(), "Detection engine ready");

    let tmdb = TmdbProvider::new(
        config.providers.tmdb_api_key(),
        &config.providers.tmdb_base_url,
        Duration::from_secs(config.providers.request_timeout),
        &config.providers.user_agent,
    )?;
    let providers =
        Arc::new(ProviderManager::new().with_provider(Arc::new(tmdb), TMDB_MEDIA_TYPES));
    info!(providers = providers.provider_count(), "Metadata providers registered");

    let analyzer = Arc::new(
        MediaAnalyzer::new(store, classifier, providers)
            .with_config(config.analyzer.analyzer_config()),
    );

    if cli_args.directories.is_empty() && !cli_args.analyze_all && !cli_args.refresh_metadata {
        warn!("Nothing to do: pass --directory, --analyze-all or --refresh-metadata");
        return Ok(());
    }

    let mut failures = 0usize;
    if !cli_args.directories.is_empty() || cli_args.analyze_all {
        failures += run_analyses(&cli_args, &config, Arc::clone(&analyzer)).await?;
    }

    if cli_args.refresh_metadata {
        let report = analyzer
            .refresh_external_metadata(
                config.analyzer.refresh_max_age(),
                config.analyzer.refresh_batch,
            )
            .await?;
        failures += report.failed;
    }

    if failures > 0 {
        anyhow::bail!("{} analyses or refreshes failed", failures);
    }
    Ok(())
}

/// Run the requested directories through the scheduler and wait for them;
/// returns how many failed
async fn run_analyses(
    cli_args: &CliArgs,
    config: &Config,
    analyzer: Arc<MediaAnalyzer>,
) -> Result<usize> {
    let scheduler = Arc::new(AnalysisScheduler::new(analyzer, config.analyzer.scheduler_config()));
    scheduler.start().await?;

    let priority = cli_args.priority.unwrap_or(config.analyzer.default_priority);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut expected = 0usize;
    let cancel = CancellationToken::new();

    for directory in &cli_args.directories {
        let request = AnalysisRequest::new(directory.as_str(), cli_args.share.as_str(), priority)
            .with_callback(reporter(&tx, directory.clone()));
        match scheduler.submit_request(request, &cancel).await? {
            Submission::Queued { .. } => expected += 1,
            Submission::Coalesced { .. } => {
                info!(directory = %directory, "Duplicate directory skipped")
            }
        }
    }

    if cli_args.analyze_all {
        let summary = scheduler
            .submit_all(&cancel, |directory| {
                Some(Box::new(reporter(&tx, directory.directory_path.clone())) as AnalysisCallback)
            })
            .await?;
        expected += summary.queued;
    }
    drop(tx);

    let mut failures = 0usize;
    while expected > 0 {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!(remaining = expected, "Interrupted, waiting for running analyses");
                break;
            }
            next = rx.recv() => {
                let Some((directory, outcome)) = next else { break };
                expected -= 1;
                match outcome {
                    Ok(result) => match &result.media_item {
                        Some(item) => info!(
                            directory = %directory,
                            media_item_id = item.id,
                            title = %item.title,
                            year = ?item.year,
                            media_type = item
                                .media_type
                                .as_ref()
                                .map_or("unknown", |t| t.name.as_str()),
                            files = result.updated_files.len(),
                            file_failures = result.file_failures.len(),
                            "Directory cataloged"
                        ),
                        None => info!(directory = %directory, "Directory not recognized as media"),
                    },
                    Err(e) => {
                        failures += 1;
                        error!(
                            directory = %directory,
                            error = %e,
                            retryable = e.is_retryable(),
                            "Directory analysis failed"
                        );
                    }
                }
            }
        }
    }

    scheduler.stop().await;
    Ok(failures)
}

type Outcome = (String, catalog_analyzer::core::Result<AnalysisResult>);

fn reporter(
    tx: &mpsc::UnboundedSender<Outcome>,
    directory: String,
) -> impl FnOnce(catalog_analyzer::core::Result<AnalysisResult>) + Send + 'static {
    let tx = tx.clone();
    move |outcome| {
        let _ = tx.send((directory, outcome));
    }
}
