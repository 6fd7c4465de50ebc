// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `msched retry-step <id>` — the one sanctioned manual repair operation
//!: force a
//! step stuck in Dispatched or Running back to Pending. No background
//! timer or auto-reset ships in the core; this is always an explicit admin
//! action.

use martingalian_core::{StepId, StepState};
use martingalian_store::StepRepository;
use tracing::{info, warn};

use crate::exit_error::ExitError;

pub async fn force_retry(
    repo: &dyn StepRepository,
    step_id: i64,
    stale_dispatch_threshold: std::time::Duration,
) -> Result<(), ExitError> {
    let id = StepId::new(step_id);

    // Only `Running` carries a timestamp this schema can compare against
    // (`started_at`); a step stuck in `Dispatched` has none, so there's no
    // reliable age to warn about there.
    if let Some(step) = repo.get_step(id).await? {
        if step.state == StepState::Running {
            if let Some(started_at) = step.started_at {
                let age = chrono::Utc::now() - started_at;
                let threshold = chrono::Duration::from_std(stale_dispatch_threshold).unwrap_or_default();
                if age < threshold {
                    warn!(
                        ?step_id,
                        age_ms = age.num_milliseconds(),
                        threshold_ms = threshold.num_milliseconds(),
                        "forcing a step that has not yet crossed the configured stale-dispatch threshold"
                    );
                }
            }
        }
    }

    let step = martingalian_engine::force_retry(repo, id).await?;
    info!(?step_id, state = %step.state, "step forced back to pending");
    Ok(())
}
