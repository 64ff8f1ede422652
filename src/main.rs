//! # Zapline: Trigger Monitoring & Action Execution
//!
//! Polls mailbox and price triggers, receives webhooks, and runs each fired
//! Zap's actions in order while recording every run.
//!
//! Usage:
//!   zapline                          # Scheduler + HTTP gateway in one process
//!   zapline --mode poller            # Scheduler only, hands off over HTTP
//!   zapline --mode executor          # HTTP gateway only
//!   zapline --config ./zapline.toml --port 8080

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zapline_channels::{CoinGeckoFeed, GmailMailbox};
use zapline_core::ZaplineConfig;
use zapline_core::config::{ExecutorMode, HandoffMode, SchedulerConfig};
use zapline_core::traits::ActionExecutor;
use zapline_gateway::AppState;
use zapline_scheduler::{
    EdgeDetector, ExecutionEngine, HttpHandoff, LiveExecutor, LocalHandoff, MailboxMonitor,
    PriceMonitor, RunHandoff, SimulatedExecutor, TriggerScheduler, ZapDb,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Scheduler and gateway, in-process hand-off.
    All,
    /// Scheduler only; events go to `scheduler.execute_url`.
    Poller,
    /// Gateway only.
    Executor,
}

#[derive(Parser)]
#[command(name = "zapline", version, about = "⚡ Zapline: trigger monitoring and action execution")]
struct Cli {
    /// Config file (default: ~/.zapline/config.toml)
    #[arg(short, long, env = "ZAPLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Which parts of the pipeline to run
    #[arg(short, long, value_enum, default_value_t = Mode::All)]
    mode: Mode,

    /// Gateway port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n.max(1))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "zapline=debug,zapline_core=debug,zapline_channels=debug,zapline_scheduler=debug,zapline_gateway=debug,tower_http=debug"
    } else {
        "zapline=info,zapline_core=info,zapline_channels=info,zapline_scheduler=info,zapline_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => ZaplineConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ZaplineConfig::load()?,
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let db_path = expand_path(&config.database.path);
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(ZapDb::open(&db_path)?);
    tracing::info!("💾 Zap database: {db_path}");

    let executor: Arc<dyn ActionExecutor> = match config.executor.mode {
        ExecutorMode::Simulated => Arc::new(SimulatedExecutor),
        ExecutorMode::Live => Arc::new(LiveExecutor::new(
            secs(config.executor.action_timeout_secs),
            config.executor.smtp.clone(),
        )?),
    };
    let engine = Arc::new(ExecutionEngine::new(
        db.clone(),
        db.clone(),
        executor,
        secs(config.executor.action_timeout_secs),
    ));
    tracing::info!("🛠️ Action executor: {:?}", config.executor.mode);

    if let Some(handoff) = build_handoff(cli.mode, &config.scheduler, &engine)? {
        let scheduler = build_scheduler(&config, db.clone(), handoff)?;
        scheduler.spawn(Duration::from_secs(config.scheduler.startup_delay_secs));
    }

    if cli.mode == Mode::Poller {
        tracing::info!("📡 Poller running, handing off to {}", config.scheduler.execute_url);
        tokio::signal::ctrl_c().await?;
        tracing::info!("👋 Shutting down");
        return Ok(());
    }

    let state = AppState::new(db, engine);
    tokio::select! {
        served = zapline_gateway::start(&config.gateway, state) => served?,
        _ = tokio::signal::ctrl_c() => tracing::info!("👋 Shutting down"),
    }
    Ok(())
}

/// How fired events reach the engine. Executor-only processes run no scheduler.
fn build_handoff(
    mode: Mode,
    scheduler: &SchedulerConfig,
    engine: &Arc<ExecutionEngine>,
) -> Result<Option<Arc<dyn RunHandoff>>> {
    let handoff: Arc<dyn RunHandoff> = match (mode, scheduler.handoff) {
        (Mode::Executor, _) => return Ok(None),
        (Mode::All, HandoffMode::Local) => Arc::new(LocalHandoff::new(engine.clone())),
        _ => Arc::new(HttpHandoff::new(
            &scheduler.execute_url,
            secs(scheduler.handoff_timeout_secs),
        )?),
    };
    Ok(Some(handoff))
}

/// Wire the mailbox and price monitors around one shared edge detector.
fn build_scheduler(
    config: &ZaplineConfig,
    db: Arc<ZapDb>,
    handoff: Arc<dyn RunHandoff>,
) -> Result<Arc<TriggerScheduler>> {
    let detector = Arc::new(EdgeDetector::new(config.scheduler.first_observation));
    let mailbox = Arc::new(GmailMailbox::new(&config.mailbox)?);
    let feed = Arc::new(CoinGeckoFeed::new(&config.price_feed)?);

    let mailbox_monitor = MailboxMonitor::new(
        mailbox,
        db.clone(),
        detector.clone(),
        config.mailbox.mark_as_read,
    );
    let scheduler = TriggerScheduler::new(db, detector, handoff)
        .with_monitor(
            Arc::new(mailbox_monitor),
            secs(config.scheduler.mailbox_interval_secs),
        )
        .with_monitor(
            Arc::new(PriceMonitor::new(feed)),
            secs(config.scheduler.price_interval_secs),
        );
    Ok(Arc::new(scheduler))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Arc<ExecutionEngine> {
        let db = Arc::new(ZapDb::open(":memory:").unwrap());
        Arc::new(ExecutionEngine::new(
            db.clone(),
            db,
            Arc::new(SimulatedExecutor),
            Duration::from_secs(5),
        ))
    }

    #[test]
    fn test_handoff_per_mode() {
        let engine = engine();
        let local = SchedulerConfig::default();
        let http = SchedulerConfig {
            handoff: HandoffMode::Http,
            ..SchedulerConfig::default()
        };

        assert!(build_handoff(Mode::Executor, &local, &engine).unwrap().is_none());
        assert!(build_handoff(Mode::Executor, &http, &engine).unwrap().is_none());
        assert!(build_handoff(Mode::All, &local, &engine).unwrap().is_some());
        assert!(build_handoff(Mode::All, &http, &engine).unwrap().is_some());
        assert!(build_handoff(Mode::Poller, &local, &engine).unwrap().is_some());
    }

    #[test]
    fn test_cli_modes() {
        let cli = Cli::try_parse_from(["zapline"]).unwrap();
        assert_eq!(cli.mode, Mode::All);
        let cli = Cli::try_parse_from(["zapline", "--mode", "executor", "-p", "8080"]).unwrap();
        assert_eq!(cli.mode, Mode::Executor);
        assert_eq!(cli.port, Some(8080));
    }
}
