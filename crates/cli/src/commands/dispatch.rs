// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `msched dispatch` — runs one tick for a group, or loops picking the next
//! group round-robin.

use std::time::Duration;

use martingalian_engine::{DispatcherTick, EngineError, GroupScheduler, InlineTransport, JobRegistry};
use martingalian_store::StepRepository;
use tracing::{info, warn};

use crate::exit_error::{ExitError, EXIT_LOCK_CONTENTION};

/// Run exactly one tick.
///
/// If `group` is given, ticks that group directly. Otherwise asks the
/// [`GroupScheduler`] for the next one due — if nothing is runnable
/// or the deployment is cooling down, that's still exit 0: there was simply
/// nothing to dispatch this beat.
pub async fn run_once(
    repo: &dyn StepRepository,
    group: Option<String>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), ExitError> {
    let registry = JobRegistry::new();
    let transport = InlineTransport::new(repo, &registry);
    let tick = DispatcherTick::new(repo, &registry, &transport);

    let target_group = match group {
        Some(g) => Some(Some(g)),
        None => GroupScheduler::new(repo).next_group(now).await.map_err(ExitError::from)?,
    };

    let Some(target_group) = target_group else {
        info!("nothing to dispatch this beat");
        return Ok(());
    };

    match tick.run(target_group.as_deref(), now).await {
        Ok(Some(report)) => {
            info!(
                progress = ?report.progress,
                dispatched = report.dispatched.len(),
                "tick complete"
            );
            Ok(())
        }
        Ok(None) => {
            warn!(group = ?target_group, "group already dispatching (lock contention)");
            Err(ExitError::new(EXIT_LOCK_CONTENTION, "group is already dispatching"))
        }
        Err(err) => Err(map_tick_error(err)),
    }
}

/// Loop beats at `poll_interval` until Ctrl-C, each beat picking the next
/// due group via round-robin.
pub async fn run_loop(repo: &dyn StepRepository, poll_interval: Duration) -> Result<(), ExitError> {
    let registry = JobRegistry::new();
    let transport = InlineTransport::new(repo, &registry);
    let tick = DispatcherTick::new(repo, &registry, &transport);
    let scheduler = GroupScheduler::new(repo);

    info!(?poll_interval, "dispatch loop started; ctrl-c to stop");
    loop {
        let now = chrono::Utc::now();
        match scheduler.next_group(now).await {
            Ok(Some(group)) => match tick.run(group.as_deref(), now).await {
                Ok(Some(report)) => {
                    info!(?group, progress = ?report.progress, dispatched = report.dispatched.len(), "tick complete");
                }
                Ok(None) => {
                    warn!(?group, "group already dispatching; skipping beat");
                }
                Err(err) => {
                    warn!(?group, %err, "tick failed; continuing loop");
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(%err, "failed to select next group; continuing loop");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received; stopping dispatch loop");
                return Ok(());
            }
        }
    }
}

fn map_tick_error(err: EngineError) -> ExitError {
    ExitError::from(err)
}
