// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `GroupScheduler`: round-robin group selection with
//! microsecond fairness, gated by the global cooling-down flag.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use martingalian_store::StepRepository;
use tracing::debug;

/// Picks the next group due for a tick.
pub struct GroupScheduler<'a> {
    repo: &'a dyn StepRepository,
}

impl<'a> GroupScheduler<'a> {
    pub fn new(repo: &'a dyn StepRepository) -> Self {
        Self { repo }
    }

    /// Select the group with the oldest `last_selected_at` and stamp its
    /// cursor to `now`. Returns `None` if cooling down or
    /// if there are no groups to select from.
    ///
    /// The returned `Option<String>` is the group itself: `None` means the
    /// null-group sentinel for ungrouped steps, not "no group selected".
    pub async fn next_group(&self, now: DateTime<Utc>) -> Result<Option<Option<String>>, EngineError> {
        if self.repo.is_cooling_down().await? {
            debug!("cooling down; yielding this beat");
            return Ok(None);
        }

        let Some(group) = self.repo.oldest_selected_group().await? else {
            return Ok(None);
        };

        self.repo.mark_group_selected(group.as_deref(), now).await?;
        debug!(?group, "selected group for this beat");
        Ok(Some(group))
    }
}

#[cfg(test)]
#[path = "group_scheduler_tests.rs"]
mod tests;
