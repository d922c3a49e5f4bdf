use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use augur_core::status::now_timestamp;
use augur_core::{
    ActivityCounter, CollectionRoutine, InMemoryStore, OutcomeHandlers, RepoLookup, StatusStore,
    WeightEstimator,
};
use augur_db::Database;
use augur_github::GitHubClient;
use augur_worker::{load_config, phases, CollectionScheduler, TokioEngine};

#[derive(Parser)]
#[command(name = "augur-worker")]
#[command(about = "Schedules repository collection chains", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "AUGUR_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single pass, wait for its chains, then exit
    #[arg(long)]
    once: bool,

    /// Log the ranked candidates without dispatching anything
    #[arg(long)]
    dry_run: bool,

    /// Register a repository before the first pass (repeatable)
    #[arg(long = "repo")]
    repos: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "augur_worker=debug,augur_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone())?;

    tracing::info!("Starting Augur Worker on the {} track", cfg.collection.track);

    let (store, repos) = open_store(cfg.database_url.as_deref(), &cli.repos).await?;
    let outcomes = OutcomeHandlers::new(store.clone(), repos.clone());

    let counter: Option<Arc<dyn ActivityCounter>> = match cfg.github_token.clone() {
        Some(token) => {
            let client: Arc<dyn ActivityCounter> = Arc::new(GitHubClient::new(token)?);
            Some(client)
        }
        None => {
            tracing::warn!("GITHUB_TOKEN not set, candidates are taken in store order");
            None
        }
    };

    let registry = phases::collection_phases(
        cfg.collection.track,
        cfg.enabled_phases(),
        counter.is_some(),
    );
    tracing::info!("Collection phases: {:?}", registry.names());

    let runners = phases::standard_runners(outcomes.clone(), repos.clone(), counter.clone());
    let engine = TokioEngine::new(runners, outcomes.clone(), cfg.collection.max_concurrent_chains);
    let routine = CollectionRoutine::new(
        registry,
        repos.clone(),
        Arc::new(engine.clone()),
        Arc::new(outcomes),
    );

    let mut scheduler = CollectionScheduler::new(store, repos, routine, engine, cfg.collection.clone());
    if let Some(counter) = counter {
        scheduler = scheduler.with_estimator(WeightEstimator::new(counter));
    }

    if cli.dry_run {
        for (rank, candidate) in scheduler.plan(now_timestamp()).await?.iter().enumerate() {
            tracing::info!("#{} {} (weight {:.2})", rank + 1, candidate.repo_git, candidate.weight);
        }
        return Ok(());
    }

    // Start worker loop
    let mut ticker = interval(Duration::from_secs(cfg.collection.interval_secs.max(1)));

    loop {
        ticker.tick().await;

        match scheduler.run_pass(now_timestamp()).await {
            Ok(started) if !started.is_empty() => {
                tracing::info!("Dispatched {} collection chains", started.len());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Collection pass failed: {}", e);
            }
        }

        if cli.once {
            scheduler.engine().wait_idle().await;
            tracing::info!("Single pass finished");
            return Ok(());
        }
    }
}

async fn open_store(
    database_url: Option<&str>,
    seed: &[String],
) -> Result<(Arc<dyn StatusStore>, Arc<dyn RepoLookup>)> {
    if let Some(url) = database_url {
        let db = Database::new(url, 5).await?;
        db.init_schema().await?;
        for repo_git in seed {
            db.add_repository(repo_git).await?;
        }
        let db = Arc::new(db);
        let store: Arc<dyn StatusStore> = db.clone();
        let repos: Arc<dyn RepoLookup> = db;
        return Ok((store, repos));
    }

    tracing::warn!("DATABASE_URL not set, using the in-memory status store");
    let store = InMemoryStore::new();
    for repo_git in seed {
        store.add_repository(repo_git).await;
    }
    let memory = Arc::new(store);
    let store: Arc<dyn StatusStore> = memory.clone();
    let repos: Arc<dyn RepoLookup> = memory;
    Ok((store, repos))
}
