// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process configuration.
//!
//! The engine itself takes no configuration beyond a [`StepRepository`]
//! (`martingalian_store::StepRepository`); everything here is the CLI
//! process's own settings, loaded from `MS_`-prefixed environment
//! variables, following this codebase's env-driven config pattern rather
//! than a config file (the core has no business config to discover, per
//! the non-goals).

use std::time::Duration;

/// Default poll interval between beats of `dispatch --loop`.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default stale-dispatch lookback surfaced by `retry-step`.
const DEFAULT_STALE_DISPATCH_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// This process's own settings: where the store lives, how often a
/// `--loop` dispatch beats, the default cooldown state for a freshly
/// provisioned deployment, and the lookback `retry-step` warns against.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub poll_interval: Duration,
    pub cooldown_default: bool,
    pub stale_dispatch_threshold: Duration,
}

impl Config {
    /// Load from the environment, letting an explicit `--database-url` CLI
    /// flag override `MS_DATABASE_URL`.
    pub fn load(database_url_flag: Option<String>) -> anyhow::Result<Self> {
        let database_url = database_url_flag
            .or_else(|| std::env::var("MS_DATABASE_URL").ok())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no database URL: pass --database-url or set MS_DATABASE_URL"
                )
            })?;

        let poll_interval = env_duration_ms("MS_POLL_INTERVAL_MS").unwrap_or(DEFAULT_POLL_INTERVAL);
        let stale_dispatch_threshold =
            env_duration_ms("MS_STALE_DISPATCH_THRESHOLD_MS").unwrap_or(DEFAULT_STALE_DISPATCH_THRESHOLD);
        let cooldown_default = std::env::var("MS_COOLDOWN_DEFAULT")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            database_url,
            poll_interval,
            cooldown_default,
            stale_dispatch_threshold,
        })
    }

    /// The directory the dispatcher's own log file rotates into
    /// (`tracing-appender`), defaulting to the platform state dir.
    pub fn log_dir() -> std::path::PathBuf {
        dirs::state_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
            .unwrap_or_else(std::env::temp_dir)
            .join("martingalian")
    }
}

fn env_duration_ms(key: &str) -> Option<Duration> {
    std::env::var(key).ok()?.parse::<u64>().ok().map(Duration::from_millis)
}
