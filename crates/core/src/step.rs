// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Step entity — the central unit of work the scheduler dispatches.

use crate::id::{BlockUuid, StepId, TickId, WorkflowUuid};
use crate::state::{Priority, StepState, StepType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel queue name meaning "do not enqueue, execute inline".
pub const SYNC_QUEUE: &str = "sync";

/// A polymorphic binding from a step to a business entity the engine never
/// dereferences. `kind` is the relation's type
/// tag (e.g. a trading-order kind); `id` is an opaque identifier in that
/// domain's own id space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relatable {
    pub kind: String,
    pub id: String,
}

impl Relatable {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// A unit of work belonging to a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub canonical: Option<String>,
    pub workflow_id: WorkflowUuid,

    pub block_uuid: BlockUuid,
    pub child_block_uuid: Option<BlockUuid>,
    pub index: Option<i32>,

    pub step_type: StepType,
    pub execution_mode: String,
    pub group: Option<String>,

    pub state: StepState,
    pub queue: String,

    pub class: String,
    pub arguments: Value,
    pub priority: Priority,
    pub can_cool_down: bool,

    pub dispatch_after: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub retries: u32,
    pub tick_id: Option<TickId>,
    pub hostname: Option<String>,

    pub response: Option<Value>,
    pub error_message: Option<String>,
    pub error_stack_trace: Option<String>,
    pub step_log: Option<String>,

    pub relatable: Option<Relatable>,
}

impl Step {
    /// True if this step spawns a child block.
    pub fn is_parent(&self) -> bool {
        self.child_block_uuid.is_some()
    }

    /// Sentinel-queue check: `queue = "sync"` means run inline.
    pub fn is_sync(&self) -> bool {
        self.queue == SYNC_QUEUE
    }

    /// Stamp `started_at`/`completed_at` into a millisecond duration (Invariant 5).
    pub fn compute_duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some((completed - started).num_milliseconds().max(0))
            }
            _ => None,
        }
    }
}

/// Builder for constructing a step prior to persistence — the only path by
/// which a step comes into existence.
pub struct StepBuilder {
    step: Step,
}

impl StepBuilder {
    /// A `default`-type step, created Pending, with no child block, no index
    /// (order-independent), queue `sync`, default priority.
    pub fn new(workflow_id: WorkflowUuid, block_uuid: BlockUuid, class: impl Into<String>) -> Self {
        Self {
            step: Step {
                id: StepId::new(0),
                canonical: None,
                workflow_id,
                block_uuid,
                child_block_uuid: None,
                index: None,
                step_type: StepType::Default,
                execution_mode: "default".to_string(),
                group: None,
                state: StepState::Pending,
                queue: SYNC_QUEUE.to_string(),
                class: class.into(),
                arguments: Value::Object(Default::default()),
                priority: Priority::Default,
                can_cool_down: true,
                dispatch_after: None,
                started_at: None,
                completed_at: None,
                duration_ms: None,
                retries: 0,
                tick_id: None,
                hostname: None,
                response: None,
                error_message: None,
                error_stack_trace: None,
                step_log: None,
                relatable: None,
            },
        }
    }

    pub fn id(mut self, id: StepId) -> Self {
        self.step.id = id;
        self
    }

    pub fn canonical(mut self, name: impl Into<String>) -> Self {
        self.step.canonical = Some(name.into());
        self
    }

    pub fn index(mut self, index: i32) -> Self {
        self.step.index = Some(index);
        self
    }

    pub fn child_block_uuid(mut self, block: BlockUuid) -> Self {
        self.step.child_block_uuid = Some(block);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.step.group = Some(group.into());
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.step.queue = queue.into();
        self
    }

    pub fn arguments(mut self, arguments: Value) -> Self {
        self.step.arguments = arguments;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.step.priority = priority;
        self
    }

    pub fn relatable(mut self, relatable: Relatable) -> Self {
        self.step.relatable = Some(relatable);
        self
    }

    /// Build a `resolve-exception` step instead of the default type.
    ///
    /// Per Invariant 4, such steps start in `NotRunnable`, never `Pending`.
    pub fn resolve_exception(mut self) -> Self {
        self.step.step_type = StepType::ResolveException;
        self.step.state = StepState::NotRunnable;
        self
    }

    pub fn build(self) -> Step {
        self.step
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
