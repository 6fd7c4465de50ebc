// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `JobRunner` and the job plug-in contract.
//!
//! Job classes register a typed factory at process start instead of being
//! located by reflection; `JobRunner` reads
//! the dispatched step, builds its job from the registry, transitions
//! Dispatched→Running, invokes it, and applies the outcome it reports.

use crate::error::EngineError;
use crate::retry::RetryPolicy;
use crate::transition::TransitionExecutor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use martingalian_core::{Step, StepId, StepState};
use martingalian_store::{StepPatch, StepRepository, StoreError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// The step reference and any other per-invocation context a job needs.
pub struct JobContext<'a> {
    pub step: &'a Step,
}

/// What a job declares happened once its work function returns. `JobRunner` applies the declared outcome as the actual
/// transition.
#[derive(Debug, Clone)]
pub enum StepOutcomeReport {
    Completed { response: Option<Value> },
    Skipped,
    Stopped,
    /// The job observed a business failure and wants the usual retry
    /// bound applied, as opposed to an uncaught panic/error.
    Failed { error_message: String },
    /// A parent step's job, having spawned its child block, leaves itself
    /// Running rather than transitioning: `CascadeEngine`'s `FailParents`/
    /// `CompleteParents` passes observe the child
    /// block on later ticks and conclude the parent once it settles.
    LeftRunning,
}

/// An error the job body raised. Distinct from
/// [`StepOutcomeReport::Failed`]: this is the uncaught case, which skips the retry bound and fails the
/// step directly.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The one capability a job must provide.
#[async_trait]
pub trait StepJob: Send + Sync {
    async fn execute(&self, ctx: &JobContext<'_>) -> Result<StepOutcomeReport, JobError>;
}

type Factory = Box<dyn Fn(Value) -> Result<Box<dyn StepJob>, EngineError> + Send + Sync>;

/// Maps a step's `class` string to a typed job factory, replacing
/// runtime reflection.
#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<String, Factory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `J` under `class`. `J` must be `Deserialize`: argument
    /// matching falls out of serde's own field-name matching plus
    /// `#[serde(default)]` on optional constructor parameters.
    pub fn register<J>(&mut self, class: impl Into<String>)
    where
        J: StepJob + DeserializeOwned + 'static,
    {
        let class = class.into();
        let class_for_error = class.clone();
        self.factories.insert(
            class,
            Box::new(move |arguments| {
                serde_json::from_value::<J>(arguments).map(|job| Box::new(job) as Box<dyn StepJob>).map_err(|err| {
                    EngineError::MissingArgument {
                        class: class_for_error.clone(),
                        argument: err.to_string(),
                    }
                })
            }),
        );
    }

    /// Build the job named by `class` from `arguments`, or fail with
    /// `UnknownJobClass`/`MissingArgument`.
    pub fn construct(&self, class: &str, arguments: Value) -> Result<Box<dyn StepJob>, EngineError> {
        let factory = self
            .factories
            .get(class)
            .ok_or_else(|| EngineError::UnknownJobClass(class.to_string()))?;
        factory(arguments)
    }
}

/// Runs one dispatched step to a terminal or retrying state.
pub struct JobRunner<'a> {
    repo: &'a dyn StepRepository,
    registry: &'a JobRegistry,
}

impl<'a> JobRunner<'a> {
    pub fn new(repo: &'a dyn StepRepository, registry: &'a JobRegistry) -> Self {
        Self { repo, registry }
    }

    /// Reload `step_id`, refuse to proceed if it isn't Dispatched
    /// (double-dispatch defense), run it, and apply the outcome.
    pub async fn run(&self, step_id: StepId, now: DateTime<Utc>) -> Result<Step, EngineError> {
        let dispatched = self
            .repo
            .get_step(step_id)
            .await?
            .ok_or(StoreError::StepNotFound(step_id))?;

        if dispatched.state != StepState::Dispatched {
            warn!(?step_id, state = %dispatched.state, "refusing to run a step that is not Dispatched");
            return Err(EngineError::StaleState(step_id));
        }

        let executor = TransitionExecutor::new(self.repo);

        let job = match self.registry.construct(&dispatched.class, dispatched.arguments.clone()) {
            Ok(job) => job,
            Err(err) => {
                error!(?step_id, class = %dispatched.class, %err, "job construction failed");
                let extra = StepPatch::default().error_message(err.to_string());
                executor.transition(step_id, StepState::Failed, now, extra).await?;
                return Err(err);
            }
        };

        let running = executor.transition(step_id, StepState::Running, now, StepPatch::default()).await?;
        info!(?step_id, class = %running.class, "step running");

        let ctx = JobContext { step: &running };
        match job.execute(&ctx).await {
            Ok(StepOutcomeReport::Completed { response }) => {
                let mut extra = StepPatch::default();
                if let Some(response) = response {
                    extra = extra.response(response);
                }
                Ok(executor.transition(step_id, StepState::Completed, now, extra).await?)
            }
            Ok(StepOutcomeReport::Skipped) => {
                Ok(executor.transition(step_id, StepState::Skipped, now, StepPatch::default()).await?)
            }
            Ok(StepOutcomeReport::Stopped) => {
                Ok(executor.transition(step_id, StepState::Stopped, now, StepPatch::default()).await?)
            }
            Ok(StepOutcomeReport::Failed { error_message }) => {
                info!(?step_id, "job reported failure; handing off to retry policy");
                Ok(RetryPolicy::new(self.repo).handle_failure(&running, now, error_message).await?)
            }
            Ok(StepOutcomeReport::LeftRunning) => {
                debug!(?step_id, "parent job left step Running pending its child block");
                Ok(running)
            }
            Err(err) => {
                error!(?step_id, %err, "job raised an uncaught error");
                let extra = StepPatch::default()
                    .error_message(err.0.clone())
                    .error_stack_trace(format!("{err:?}"));
                Ok(executor.transition(step_id, StepState::Failed, now, extra).await?)
            }
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
