// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `DispatcherTick`: one atomic dispatch cycle for a single
//! group — lock, cascade, select, hand off, teardown.

use crate::cascade::{CascadeEngine, CascadeOutcome};
use crate::error::EngineError;
use crate::job::{JobRegistry, JobRunner};
use crate::transition::TransitionExecutor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use martingalian_core::{Step, StepId, StepState, TickProgress};
use martingalian_store::{StepPatch, StepRepository};
use tracing::{debug, info, warn};

/// Where a dispatched step's job actually runs: inline (the `sync` sentinel
/// queue) or handed off to a named transport. The engine never depends
/// on transport ordering or delivery guarantees — it only needs somewhere
/// to put the step id.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn enqueue(&self, queue: &str, step_id: StepId) -> Result<(), EngineError>;
}

/// A transport that runs named queues inline too, via the same
/// [`JobRunner`] `DispatcherTick` uses for `sync` steps. Stands in for a
/// real broker in tests and in the single-process CLI; a production
/// deployment supplies its own [`QueueTransport`] backed by the chosen
/// broker. `DispatcherTick` never routes a `sync` step through here —
/// see `hand_off`.
pub struct InlineTransport<'a> {
    repo: &'a dyn StepRepository,
    registry: &'a JobRegistry,
}

impl<'a> InlineTransport<'a> {
    pub fn new(repo: &'a dyn StepRepository, registry: &'a JobRegistry) -> Self {
        Self { repo, registry }
    }
}

#[async_trait]
impl<'a> QueueTransport for InlineTransport<'a> {
    async fn enqueue(&self, queue: &str, step_id: StepId) -> Result<(), EngineError> {
        debug!(?step_id, queue, "running step inline (no external transport configured)");
        JobRunner::new(self.repo, self.registry).run(step_id, Utc::now()).await?;
        Ok(())
    }
}

/// Outcome of one tick, for the caller's logging/metrics.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub progress: TickProgress,
    pub dispatched: Vec<StepId>,
}

/// Runs one tick for a single group.
pub struct DispatcherTick<'a> {
    repo: &'a dyn StepRepository,
    registry: &'a JobRegistry,
    transport: &'a dyn QueueTransport,
}

impl<'a> DispatcherTick<'a> {
    pub fn new(repo: &'a dyn StepRepository, registry: &'a JobRegistry, transport: &'a dyn QueueTransport) -> Self {
        Self { repo, registry, transport }
    }

    /// Run the tick for `group`. Returns `Ok(None)` if the lock was already
    /// held (step 0 denied) or the tick is otherwise a no-op this beat.
    pub async fn run(&self, group: Option<&str>, now: DateTime<Utc>) -> Result<Option<TickReport>, EngineError> {
        let Some(tick_id) = self.repo.acquire_group_lock(group, now).await? else {
            debug!(?group, "group already dispatching; skipping this beat");
            return Ok(None);
        };
        info!(?group, ?tick_id, "tick started");

        let outcome = self.run_body(group, tick_id, now).await;

        let progress = match &outcome {
            Ok(report) => report.progress,
            Err(_) => TickProgress::LockDenied,
        };
        // A failed tick always releases its group lock; teardown runs on
        // every exit path regardless of whether the body returned an error.
        self.repo.release_group_lock(group, tick_id, progress, now).await?;
        info!(?group, ?tick_id, ?progress, "tick released lock");

        outcome.map(Some)
    }

    async fn run_body(
        &self,
        group: Option<&str>,
        tick_id: martingalian_core::TickId,
        now: DateTime<Utc>,
    ) -> Result<TickReport, EngineError> {
        let cascade = CascadeEngine::new(self.repo);
        match cascade.run_passes(group, now).await? {
            CascadeOutcome::Mutated(progress) => {
                debug!(?group, ?progress, "cascade pass mutated state; short-circuiting tick");
                return Ok(TickReport {
                    progress,
                    dispatched: Vec::new(),
                });
            }
            CascadeOutcome::Clean => {}
        }

        let dispatched = self.select_and_dispatch(group, tick_id, now).await?;
        self.hand_off(&dispatched, now).await?;

        Ok(TickReport {
            progress: TickProgress::SelectionAndHandoff,
            dispatched: dispatched.iter().map(|s| s.id).collect(),
        })
    }

    /// Step 7: select Pending candidates and transition each to Dispatched,
    /// stamping `tick_id` on the ones that succeed. Guard rejections and
    /// stale rows are recovered locally — a candidate that no longer
    /// qualifies is simply left for a later tick.
    async fn select_and_dispatch(
        &self,
        group: Option<&str>,
        tick_id: martingalian_core::TickId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Step>, EngineError> {
        let executor = TransitionExecutor::new(self.repo);
        let candidates = self.repo.select_dispatch_candidates(group, now).await?;
        let mut dispatched = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let extra = StepPatch::default().tick_id(tick_id);
            match executor.transition(candidate.id, StepState::Dispatched, now, extra).await {
                Ok(step) => dispatched.push(step),
                Err(EngineError::GuardDenied { .. }) => {}
                Err(EngineError::Store(martingalian_store::StoreError::StepNotFound(_))) => {}
                Err(EngineError::StaleState(_)) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(dispatched)
    }

    /// Step 8: hand each dispatched step to its queue. The `sync` sentinel
    /// is the dispatcher's own call, not the transport's: a sync step runs
    /// right here via `JobRunner` and never reaches `QueueTransport` at
    /// all, so a real broker plugged in as the transport can never see it.
    async fn hand_off(&self, dispatched: &[Step], now: DateTime<Utc>) -> Result<(), EngineError> {
        for step in dispatched {
            if step.is_sync() {
                debug!(step_id = ?step.id, "running sync step inline");
                JobRunner::new(self.repo, self.registry).run(step.id, now).await?;
                continue;
            }
            if let Err(err) = self.transport.enqueue(&step.queue, step.id).await {
                warn!(step_id = ?step.id, queue = %step.queue, %err, "hand-off failed");
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
