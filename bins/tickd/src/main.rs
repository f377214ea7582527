//! TickCache daemon
//!
//! Connects to the upstream market-data feed, keeps the two-tier tick
//! cache and the position PnL cache current, and runs the maintenance
//! jobs around them.

mod jobs;
mod shutdown;

use anyhow::{Context, Result};
use cli::{Cli, Commands, LogFormatArg};
use config::{generate_default_config, load_config, save_config, validate_config, MasterConfig};
use market_data::{
    DistributedTickStore, FeedDependencies, FeedError, FeedSettings, FeedSubscriptionManager, NseSession,
    PnlUpdate, StoreWatchlist, TickStore, TrackerIndex, WsFeedConnector,
};
use observability::{init_logging, init_logging_from_str, init_metrics, LogFormat};
use pnl::{PnlStoreSettings, PositionPnlStore};
use shutdown::{join_all, ShutdownController};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage::{create_kv_store, InMemoryTrackerStore, PostgresTrackerStore, TrackerStore};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Updates beyond this are dropped; the next tick supersedes them
const PNL_QUEUE_CAPACITY: usize = 10_000;
const SUPERVISOR_PERIOD: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start {
            config,
            log_format,
            metrics_port,
        } => start_command(config, log_format, metrics_port).await,
        Commands::Validate { config } => {
            init_logging("tickd", LogFormat::Pretty)?;
            info!("Executing 'validate' command");
            validate_command(config).await
        }
        Commands::Init { output } => {
            init_logging("tickd", LogFormat::Pretty)?;
            info!("Executing 'init' command");
            init_command(output).await
        }
    }
}

async fn start_command(
    config_path: PathBuf,
    log_format: Option<LogFormatArg>,
    metrics_port: Option<u16>,
) -> Result<()> {
    let config = load_config(&config_path)?;

    let format = match log_format {
        Some(arg) => arg.as_str().to_string(),
        None => config.logging.format.clone(),
    };
    init_logging_from_str("tickd", &format)?;
    info!(path = ?config_path, "TickCache starting...");

    let report = validate_config(&config);
    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }
    if !report.is_valid() {
        error!(error_count = report.errors.len(), "Configuration validation failed");
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot start due to configuration errors");
    }

    match (metrics_port, config.metrics.enabled) {
        (Some(port), _) => init_metrics(port)?,
        (None, true) => init_metrics(config.metrics.port)?,
        (None, false) => debug!("Metrics exporter disabled"),
    }

    run(config).await
}

async fn connect_trackers(config: &MasterConfig) -> Result<Arc<dyn TrackerStore>> {
    match &config.database {
        Some(database) => {
            let store = PostgresTrackerStore::connect(database)
                .await
                .context("Failed to connect to the tracker database")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database configured, positions and watchlist are in-memory only");
            Ok(Arc::new(InMemoryTrackerStore::new()))
        }
    }
}

async fn run(config: MasterConfig) -> Result<()> {
    let kv = create_kv_store(config.redis.as_ref())
        .await
        .context("Failed to create key-value store")?;
    let trackers = connect_trackers(&config).await?;

    let distributed = Arc::new(DistributedTickStore::from_config(kv.clone(), &config.cache));
    let tick_store = Arc::new(TickStore::new(Some(distributed.clone())));

    let index = Arc::new(TrackerIndex::new());
    match index.refresh(trackers.as_ref()).await {
        Ok(positions) => info!(positions, "Open positions loaded"),
        Err(e) => warn!(error = %e, "Open positions unavailable at startup"),
    }

    let pnl_store = Arc::new(PositionPnlStore::new(
        kv.clone(),
        trackers.clone(),
        PnlStoreSettings::from_config(&config.cache, &config.pnl),
    ));
    let (pnl_tx, pnl_rx) = mpsc::channel::<PnlUpdate>(PNL_QUEUE_CAPACITY);

    let manager = FeedSubscriptionManager::new(
        FeedSettings::from_config(&config.feed),
        FeedDependencies {
            connector: Arc::new(WsFeedConnector::from_config(&config.feed)),
            tick_store: tick_store.clone(),
            watchlist: Arc::new(StoreWatchlist::new(trackers.clone(), config.feed.watchlist_env.clone())),
            positions: index.clone(),
            session: Arc::new(NseSession::new()),
            pnl_sink: Some(Arc::new(pnl_tx)),
        },
    );

    match manager.start().await {
        Ok(()) => {}
        Err(FeedError::MissingCredentials) => {
            anyhow::bail!("Feed credentials are missing, set feed.client_id and feed.access_token")
        }
        Err(e) => warn!(error = %e, "Initial feed start failed, supervisor will retry"),
    }

    let shutdown = ShutdownController::with_signals();
    let refresh_every = Duration::from_secs(config.pnl.index_refresh_seconds);
    let prune_every = Duration::from_secs(config.cache.prune_interval_seconds);
    let purge_every = Duration::from_secs(config.pnl.purge_interval_seconds);

    let handles = vec![
        (
            "feed-supervisor",
            tokio::spawn(jobs::run_feed_supervisor(
                manager.clone(),
                SUPERVISOR_PERIOD,
                shutdown.child_token(),
            )),
        ),
        (
            "position-refresh",
            tokio::spawn(jobs::run_position_refresh(
                trackers.clone(),
                index.clone(),
                manager.clone(),
                refresh_every,
                shutdown.child_token(),
            )),
        ),
        (
            "tick-prune",
            tokio::spawn(jobs::run_tick_prune(
                distributed.clone(),
                index.clone(),
                manager.clone(),
                config.cache.prune_max_age(),
                prune_every,
                shutdown.child_token(),
            )),
        ),
        (
            "pnl-purge",
            tokio::spawn(jobs::run_pnl_purge(pnl_store.clone(), purge_every, shutdown.child_token())),
        ),
        (
            "pnl-worker",
            tokio::spawn(jobs::run_pnl_worker(
                pnl_rx,
                index.clone(),
                pnl_store.clone(),
                shutdown.child_token(),
            )),
        ),
    ];

    info!(
        mode = %config.feed.mode,
        redis = config.redis.is_some(),
        database = config.database.is_some(),
        "TickCache running"
    );
    shutdown.wait_for_shutdown().await;

    info!("Shutting down");
    manager.stop().await;
    join_all(handles, SHUTDOWN_GRACE).await;
    jobs::flush_pnl(&index, &pnl_store).await;
    info!(cached_ticks = tick_store.len(), "TickCache stopped");
    Ok(())
}

async fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Feed: {} ({})", config.feed.url, config.feed.mode);
    println!("Credentials: {}", if config.feed.has_credentials() { "present" } else { "missing" });
    println!(
        "Tick store: {}",
        if config.redis.is_some() { "redis" } else { "in-memory" }
    );
    println!(
        "Tracker store: {}",
        if config.database.is_some() { "postgres" } else { "in-memory" }
    );
    println!("PnL sync interval: {}s", config.pnl.sync_interval_seconds);

    Ok(())
}

async fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Set FEED_CLIENT_ID, FEED_ACCESS_TOKEN and DATABASE_URL");
    println!(
        "  2. Run 'tickd validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  3. Run 'tickd start --config {:?}' to start",
        output_path
    );

    Ok(())
}
