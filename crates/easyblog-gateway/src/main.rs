use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use easyblog_core::config::{DeployConfig, EasyblogConfig};
use easyblog_deploy::{ErrorLog, Redeployer};
use easyblog_scheduler::{
    CommandInvoker, SchedulerEngine, SqliteTaskRunStore, TaskRegistry, TaskRunStore,
};
use tracing::{error, info, warn};

mod allowlist;
mod app;
mod http;
mod prune;
mod trigger;

use allowlist::{AllowListSource, GithubMeta, StaticAllowList};
use trigger::SpawnRedeploy;

#[derive(Parser)]
#[command(
    name = "easyblog",
    version,
    about = "Blog operations: webhook redeploys and recurring maintenance tasks"
)]
struct Cli {
    /// Config file (default: $EASYBLOG_CONFIG, then ~/.easyblog/easyblog.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the deploy webhook.
    Serve,
    /// Run the configured [[tasks]] until Ctrl-C.
    Scheduler,
    /// Fetch, reset, install, collect static files and restart, for one commit or tag.
    Redeploy {
        /// Commit hash or tag to deploy.
        reference: String,
    },
    /// Show recent task runs.
    History {
        /// Only runs of this task.
        #[arg(long)]
        task: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete all but the newest database backups.
    PruneBackups {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, default_value_t = 10)]
        keep: usize,
        /// Substring a backup file name must contain.
        #[arg(long, default_value = "db_jiri_one")]
        pattern: String,
        /// Report what would be deleted without deleting it.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easyblog=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    // load config: --config > EASYBLOG_CONFIG env > ~/.easyblog/easyblog.toml
    let config = match EasyblogConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // A detached redeploy has no terminal; leave a trace where operators look.
            if let Command::Redeploy { ref reference } = cli.command {
                let log = ErrorLog::new(DeployConfig::default().error_log);
                let _ = log.append_abort(reference, &format!("cannot load configuration: {e}"));
            }
            return Err(e).context("cannot load configuration");
        }
    };

    match cli.command {
        Command::Serve => serve(config, cli.config).await,
        Command::Scheduler => scheduler(config).await,
        Command::Redeploy { reference } => redeploy(config, reference).await,
        Command::History { task, limit } => history(&config, task.as_deref(), limit),
        Command::PruneBackups {
            dir,
            keep,
            pattern,
            dry_run,
        } => prune_backups(&dir, &pattern, keep, dry_run),
    }
}

async fn serve(config: EasyblogConfig, config_path: Option<String>) -> anyhow::Result<()> {
    let webhook = config.webhook;
    if webhook.secret.as_deref().map_or(true, str::is_empty) {
        warn!("webhook.secret is not set; /deploy_api/ will answer 501");
    }

    let allow_list: Arc<dyn AllowListSource> = match webhook.allow_ranges {
        Some(ref ranges) => {
            info!(ranges = ranges.len(), "using static webhook allow-list");
            Arc::new(StaticAllowList::parse(ranges).context("invalid webhook.allow_ranges")?)
        }
        None => Arc::new(GithubMeta::new(
            webhook.meta_url.clone(),
            Duration::from_secs(webhook.allow_list_ttl_secs),
            Duration::from_secs(webhook.fetch_timeout_secs),
        )?),
    };
    let trigger = Arc::new(SpawnRedeploy::current(config_path).context("cannot locate own executable")?);

    let state = Arc::new(app::AppState::new(webhook.secret, allow_list, trigger));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    info!("easyblog gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}

async fn scheduler(config: EasyblogConfig) -> anyhow::Result<()> {
    let registry = match TaskRegistry::from_config(&config.tasks, &config.scheduler) {
        Ok(registry) => registry,
        Err(e) if e.is_config() => {
            error!(error = %e, "task configuration rejected, scheduler not started");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let store = open_store(&config)?;
    let invoker = Arc::new(CommandInvoker::new(config.scheduler.max_output_chars));
    let engine = SchedulerEngine::new(registry, store, invoker);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(engine.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, stopping task loops");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}

async fn redeploy(config: EasyblogConfig, reference: String) -> anyhow::Result<()> {
    let redeployer = Redeployer::new(config.deploy);
    tokio::task::spawn_blocking(move || redeployer.run(&reference)).await??;
    Ok(())
}

fn history(config: &EasyblogConfig, task: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let runs = store.recent_runs(task, limit)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!(
        "{:>6}  {:<20}  {:<7}  {:<20}  {:<20}  OUTPUT",
        "ID", "TASK", "STATUS", "STARTED", "FINISHED"
    );
    for run in runs {
        let finished = run
            .finished_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>6}  {:<20}  {:<7}  {:<20}  {:<20}  {}",
            run.id,
            run.name,
            run.status(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            finished,
            run.output.lines().next().unwrap_or("")
        );
    }
    Ok(())
}

fn prune_backups(dir: &std::path::Path, pattern: &str, keep: usize, dry_run: bool) -> anyhow::Result<()> {
    let report = prune::prune_backups(dir, pattern, keep, dry_run)
        .with_context(|| format!("cannot prune backups in {}", dir.display()))?;
    let verb = if dry_run { "would delete" } else { "deleted" };
    for path in &report.removed {
        println!("{verb} {}", path.display());
    }
    println!("kept {}, {verb} {}", report.kept.len(), report.removed.len());
    Ok(())
}

fn open_store(config: &EasyblogConfig) -> anyhow::Result<Arc<SqliteTaskRunStore>> {
    let db_path = &config.database.path;
    easyblog_core::ensure_parent_dir(db_path)?;
    info!(path = %db_path, "opening SQLite database");
    Ok(Arc::new(SqliteTaskRunStore::open(db_path)?))
}
