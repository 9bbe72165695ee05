//! Covenant Daemon - policy acknowledgement gatekeeper
//!
//! `covenantd` provides:
//! - Reconciliation sweeps, once or on a schedule
//! - Replay of recorded platform events through the engine
//! - The onboarding post carrying the acknowledgement button
//! - Read-only ledger reports

use anyhow::Context;
use clap::{Parser, Subcommand};
use covenant_daemon::app;
use covenant_daemon::config::DaemonConfig;
use covenant_daemon::report;
use covenant_gate::{EventDispatcher, ExecutionMode, GatekeeperEngine, ReconciliationScheduler};
use covenant_types::{GateEvent, PolicyVersion, SpaceId};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Covenant Daemon CLI
#[derive(Parser)]
#[command(name = "covenantd")]
#[command(about = "Covenant - mandatory policy acknowledgement for group spaces", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "COVENANT_CONFIG")]
    config: Option<String>,

    /// Log effects instead of performing them
    #[arg(long, env = "COVENANT_REHEARSAL")]
    rehearsal: bool,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "COVENANT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "COVENANT_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reconciliation sweep and print its counters
    Sweep,

    /// Sweep on a schedule until interrupted
    Watch {
        /// Seconds between sweeps (overrides the configuration file)
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Feed JSON-lines events through the engine, printing one report per event
    Replay {
        /// Event file; standard input when omitted
        file: Option<PathBuf>,

        /// Handle events concurrently instead of in file order
        #[arg(long)]
        concurrent: bool,
    },

    /// Post the onboarding message with the acknowledgement button
    Onboard {
        #[arg(allow_negative_numbers = true)]
        space: i64,
    },

    /// Read-only ledger reports
    Report {
        #[command(subcommand)]
        report: ReportCommand,
    },
}

#[derive(Subcommand)]
enum ReportCommand {
    /// Members who acknowledged the policy in a space
    WhoAcknowledged {
        #[arg(long, allow_negative_numbers = true)]
        space: i64,

        /// Version to report on; the configured version when omitted
        #[arg(long)]
        version: Option<String>,
    },

    /// Known members still owing an acknowledgement
    Unacknowledged {
        #[arg(long, allow_negative_numbers = true)]
        space: i64,

        #[arg(long)]
        version: Option<String>,
    },

    /// Record counts per version
    Stats {
        #[arg(long, allow_negative_numbers = true)]
        space: i64,
    },

    /// Dump records as JSON lines
    Export {
        #[arg(long, allow_negative_numbers = true)]
        space: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration, then apply CLI overrides
    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.rehearsal {
        config.mode = ExecutionMode::Rehearsal;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json {
        config.logging.json = true;
    }

    init_tracing(&config.logging.level, config.logging.json);

    match cli.command {
        Command::Sweep => {
            let engine = app::build_engine(&config).await?;
            let (_tx, rx) = watch::channel(false);
            let sweep = ReconciliationScheduler::new(engine, rx).sweep().await;
            print_json(&sweep)?;
        }

        Command::Watch { interval_secs } => {
            if let Some(secs) = interval_secs {
                config.scheduler.interval_secs = secs;
            }
            let engine = app::build_engine(&config).await?;
            watch_until_shutdown(engine, &config).await?;
        }

        Command::Replay { file, concurrent } => {
            let engine = app::build_engine(&config).await?;
            let events = read_events(file).await?;
            replay(engine, events, concurrent).await?;
        }

        Command::Onboard { space } => {
            let space = SpaceId::new(space);
            let notice = config.policy.to_policy()?.onboarding_notice();
            if config.mode.is_rehearsal() {
                tracing::info!(
                    target: "covenant::rehearsal",
                    space = %space,
                    text = %notice.text,
                    "Would post onboarding message"
                );
            } else {
                let telegram = app::build_telegram(&config)?;
                let message_id = telegram
                    .inner()
                    .post_onboarding(space, &notice)
                    .await
                    .context("Failed to post onboarding message")?;
                println!("{}", message_id);
            }
        }

        Command::Report { report } => run_report(&config, report).await?,
    }

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    // Logs go to stderr so reports on stdout stay machine readable.
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

async fn watch_until_shutdown(
    engine: Arc<GatekeeperEngine>,
    config: &DaemonConfig,
) -> anyhow::Result<()> {
    let (tx, rx) = watch::channel(false);
    let scheduler = ReconciliationScheduler::new(engine, rx)
        .with_sweep_on_start(config.scheduler.sweep_on_start);
    let period = config.scheduler.interval();

    let handle = tokio::spawn(async move { scheduler.run(period).await });

    shutdown_signal().await;
    tx.send(true).ok();

    handle.await.context("Scheduler task failed")?;
    tracing::info!("Covenant daemon shutting down");
    Ok(())
}

async fn read_events(file: Option<PathBuf>) -> anyhow::Result<Vec<GateEvent>> {
    let text = match &file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read standard input")?;
            text
        }
    };

    let mut events = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<GateEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => tracing::warn!(line = index + 1, error = %e, "Skipping unreadable event"),
        }
    }
    Ok(events)
}

async fn replay(
    engine: Arc<GatekeeperEngine>,
    events: Vec<GateEvent>,
    concurrent: bool,
) -> anyhow::Result<()> {
    tracing::info!(events = events.len(), concurrent, "Replaying events");

    if concurrent {
        let dispatcher = EventDispatcher::new(engine);
        for result in dispatcher.dispatch_all(events).await {
            if let Ok(report) = result {
                print_json(&report)?;
            }
        }
        return Ok(());
    }

    for event in events {
        match engine.handle(event).await {
            Ok(report) => print_json(&report)?,
            Err(e) => tracing::warn!(error = %e, "Event rejected"),
        }
    }
    Ok(())
}

async fn run_report(config: &DaemonConfig, command: ReportCommand) -> anyhow::Result<()> {
    let ledger = app::build_ledger(&config.storage).await?;
    let configured = config.policy.to_policy()?.version().clone();
    let version = |requested: Option<String>| -> anyhow::Result<PolicyVersion> {
        match requested {
            Some(v) => PolicyVersion::new(v).context("Invalid version"),
            None => Ok(configured.clone()),
        }
    };

    let mut stdout = std::io::stdout().lock();
    match command {
        ReportCommand::WhoAcknowledged { space, version: v } => {
            report::who_acknowledged(ledger.as_ref(), SpaceId::new(space), &version(v)?, &mut stdout)
                .await?;
        }
        ReportCommand::Unacknowledged { space, version: v } => {
            report::unacknowledged(ledger.as_ref(), SpaceId::new(space), &version(v)?, &mut stdout)
                .await?;
        }
        ReportCommand::Stats { space } => {
            report::stats(ledger.as_ref(), SpaceId::new(space), &mut stdout).await?;
        }
        ReportCommand::Export { space } => {
            report::export(ledger.as_ref(), space.map(SpaceId::new), &mut stdout).await?;
        }
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
