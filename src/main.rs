//! Operational CLI for the search-query performance sync pipeline.
//!
//! `sync` runs one job and prints the structured result (exit code 0/1),
//! `schedule` runs the periodic loop, `status`/`check` expose the
//! monitoring views, `cleanup` applies the retention policy.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use sqp_sync::application::{
    ManualSyncOptions, NestedDataTransformer, SchedulerSettings, SyncLogger, SyncPipeline,
    SyncScheduler,
};
use sqp_sync::domain::{PeriodType, SyncHistoryFilter, SyncStatus, SyncWindow};
use sqp_sync::infrastructure::config::AppConfig;
use sqp_sync::infrastructure::logging::init_logging_with_config;
use sqp_sync::infrastructure::store::{PerformanceRepository, StoreConnection};
use sqp_sync::infrastructure::warehouse::{
    AggregationQueryBuilder, AsinFilterStrategy, HttpWarehouseClient, WarehouseClient,
    WarehousePool,
};

#[derive(Debug, Parser)]
#[command(name = "sqp-sync", version)]
#[command(about = "Search-query performance sync pipeline")]
struct Cli {
    /// Config file path; created with defaults when missing.
    #[arg(long, default_value = "config/sqp-sync.json")]
    config: PathBuf,

    /// Override the operational store URL from the config file.
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one sync over an explicit or computed window.
    Sync(SyncArgs),
    /// Run the periodic scheduler until ctrl-c.
    Schedule,
    /// Print in-flight runs, recent history, and metrics.
    Status(StatusArgs),
    /// Run alert detection and print any alerts.
    Check,
    /// Delete run records older than the retention window.
    Cleanup(CleanupArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Window start (YYYY-MM-DD); requires --end-date.
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Window end (YYYY-MM-DD); requires --start-date.
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Restrict the sync to these ASINs.
    #[arg(long, value_delimiter = ',')]
    asins: Vec<String>,

    /// weekly | monthly | quarterly | yearly.
    #[arg(long)]
    period_type: Option<PeriodType>,

    /// Extract and validate without writing; reports the would-write count.
    #[arg(long)]
    dry_run: bool,

    /// Sync even when the warehouse reports nothing new.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    /// Metrics window in hours.
    #[arg(long, default_value_t = 24)]
    window_hours: i64,

    /// History entries to include.
    #[arg(long, default_value_t = 10)]
    limit: i64,
}

#[derive(Debug, Args)]
struct CleanupArgs {
    /// Override the configured retention window, in days.
    #[arg(long)]
    retention_days: Option<i64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = AppConfig::load(&cli.config).await?;
    if let Some(database_url) = cli.database_url {
        config.store.database_url = database_url;
    }
    init_logging_with_config(&config.logging)?;

    let store =
        StoreConnection::connect(&config.store.database_url, config.store.max_connections)
            .await
            .context("failed to open the operational store")?;
    store.migrate().await.context("store migration failed")?;

    match cli.command {
        Command::Sync(args) => run_sync(&config, &store, args).await,
        Command::Schedule => {
            let scheduler = build_scheduler(&config, &store, config.sync.asin_filter.clone())?;
            scheduler.run().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status(args) => run_status(&config, &store, args).await,
        Command::Check => run_check(&config, &store).await,
        Command::Cleanup(args) => run_cleanup(&config, &store, args).await,
    }
}

fn build_pipeline(
    config: &AppConfig,
    store: &StoreConnection,
    filter: AsinFilterStrategy,
) -> Result<SyncPipeline> {
    let prototype =
        HttpWarehouseClient::new(&config.warehouse).context("failed to build warehouse client")?;
    let pool = WarehousePool::new(config.warehouse.pool_size, move || {
        Box::new(prototype.clone()) as Box<dyn WarehouseClient>
    });
    let query_builder = AggregationQueryBuilder::new(config.warehouse.source_table.clone());
    let repo = PerformanceRepository::new(store.pool().clone());
    let transformer = NestedDataTransformer::new(
        repo.clone(),
        config.sync.query_batch_size,
        config.sync.summary_batch_size,
    );
    Ok(SyncPipeline::new(pool, query_builder, filter, transformer, repo))
}

fn build_scheduler(
    config: &AppConfig,
    store: &StoreConnection,
    filter: AsinFilterStrategy,
) -> Result<SyncScheduler<SyncPipeline>> {
    let pipeline = build_pipeline(config, store, filter)?;
    let logger = Arc::new(SyncLogger::new(store.pool().clone(), config.alerts.clone()));
    Ok(SyncScheduler::new(
        Arc::new(pipeline),
        logger,
        SchedulerSettings::from_config(config),
    ))
}

async fn run_sync(config: &AppConfig, store: &StoreConnection, args: SyncArgs) -> Result<ExitCode> {
    let window = match (args.start_date, args.end_date) {
        (Some(start), Some(end)) => {
            Some(SyncWindow::new(start, end).map_err(anyhow::Error::msg)?)
        }
        (None, None) => None,
        _ => bail!("--start-date and --end-date must be provided together"),
    };

    let filter = if args.asins.is_empty() {
        config.sync.asin_filter.clone()
    } else {
        AsinFilterStrategy::Specific { asins: args.asins }
    };

    let mut settings = SchedulerSettings::from_config(config);
    if let Some(period_type) = args.period_type {
        settings.period_type = period_type;
    }

    let pipeline = build_pipeline(config, store, filter)?;
    let logger = Arc::new(SyncLogger::new(store.pool().clone(), config.alerts.clone()));
    let scheduler = SyncScheduler::new(Arc::new(pipeline), logger, settings);

    let result = scheduler
        .trigger_manual_sync(ManualSyncOptions {
            window,
            dry_run: args.dry_run,
            force: args.force,
        })
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_status(
    config: &AppConfig,
    store: &StoreConnection,
    args: StatusArgs,
) -> Result<ExitCode> {
    let logger = SyncLogger::new(store.pool().clone(), config.alerts.clone());

    let in_flight = logger
        .get_sync_history(&SyncHistoryFilter {
            status: Some(SyncStatus::Started),
            ..Default::default()
        })
        .await?;
    let recent = logger
        .get_sync_history(&SyncHistoryFilter {
            limit: Some(args.limit),
            ..Default::default()
        })
        .await?;
    let metrics = logger.get_metrics(args.window_hours).await?;

    let status = serde_json::json!({
        "is_running": !in_flight.is_empty(),
        "current_sync_id": in_flight.first().map(|run| run.id.clone()),
        "metrics": metrics,
        "recent_runs": recent,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_check(config: &AppConfig, store: &StoreConnection) -> Result<ExitCode> {
    let logger = SyncLogger::new(store.pool().clone(), config.alerts.clone());

    let mut alerts = Vec::new();
    if let Some(alert) = logger.check_for_alerts().await? {
        alerts.push(alert);
    }
    if let Some(alert) = logger.check_for_long_running_sync().await? {
        alerts.push(alert);
    }
    println!("{}", serde_json::to_string_pretty(&alerts)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_cleanup(
    config: &AppConfig,
    store: &StoreConnection,
    args: CleanupArgs,
) -> Result<ExitCode> {
    let logger = SyncLogger::new(store.pool().clone(), config.alerts.clone());
    let retention_days = args.retention_days.unwrap_or(config.alerts.retention_days);
    let deleted = logger.cleanup_old_logs(retention_days).await?;
    println!("{}", serde_json::json!({ "deleted": deleted }));
    Ok(ExitCode::SUCCESS)
}
