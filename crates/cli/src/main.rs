// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `msched` — the admin CLI for the step scheduler engine.
//!
//! Exposes exactly the three operations the core names: `dispatch`,
//! `cooldown`, `retry-step`. Everything else (job business logic, queue
//! transport, notifications) is an external collaborator's concern and has
//! no CLI surface here.

mod commands;
mod config;
mod exit_error;
mod store;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use config::Config;
use exit_error::{ExitError, EXIT_INTERNAL_ERROR};
use store::Store;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_GIT_HASH"), ")");

#[derive(Parser)]
#[command(name = "msched", version = VERSION, about = "Persistent workflow step scheduler")]
struct Cli {
    /// Database URL the engine's `StepRepository` connects to. Falls back
    /// to `MS_DATABASE_URL`. The sentinel value `memory` selects an
    /// in-process store, for local trials and the CLI's own test suite.
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one atomic dispatch tick, or loop round-robin across
    /// groups until Ctrl-C.
    Dispatch {
        /// Tick this group directly instead of letting the round-robin
        /// scheduler pick the next one due.
        #[arg(long)]
        group: Option<String>,

        /// Keep ticking at the configured poll interval instead of running
        /// once and exiting.
        #[arg(long = "loop")]
        loop_mode: bool,
    },
    /// Toggle the global cooling-down flag.
    Cooldown {
        #[command(subcommand)]
        action: CooldownAction,
    },
    /// Force a step stuck in Dispatched or Running back to Pending.
    RetryStep {
        /// The step's numeric id.
        id: i64,
    },
}

#[derive(Subcommand)]
enum CooldownAction {
    On,
    Off,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _log_guard = init_tracing();

    if let Err(err) = run(cli).await {
        tracing::error!(%err, "msched exited with an error");
        eprintln!("error: {err}");
        std::process::exit(err.code);
    }
}

async fn run(cli: Cli) -> Result<(), ExitError> {
    let config = Config::load(cli.database_url).map_err(|err| ExitError::new(EXIT_INTERNAL_ERROR, err.to_string()))?;
    let store = Store::connect(&config.database_url)
        .await
        .map_err(|err| ExitError::new(EXIT_INTERNAL_ERROR, err.to_string()))?;
    let repo = store.as_repository();

    match cli.command {
        Command::Dispatch { group, loop_mode } => {
            if loop_mode {
                commands::dispatch::run_loop(repo, config.poll_interval).await
            } else {
                commands::dispatch::run_once(repo, group, chrono::Utc::now()).await
            }
        }
        Command::Cooldown { action } => {
            let value = matches!(action, CooldownAction::On);
            commands::cooldown::set(repo, value).await
        }
        Command::RetryStep { id } => {
            commands::retry_step::force_retry(repo, id, config.stale_dispatch_threshold).await
        }
    }
}

/// Structured logging via `tracing` + `tracing-subscriber`, with a rotating
/// file sink under the platform state dir via `tracing-appender`.
/// Returns the worker guard; dropping it flushes the non-blocking writer,
/// so the caller must hold it for the process lifetime.
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = Config::log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(log_dir, "msched.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry().with(filter).with(stderr_layer).with(file_layer).init();

    guard
}
