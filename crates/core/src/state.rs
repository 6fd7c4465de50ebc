// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step states and the three invariant buckets they partition into.

use serde::{Deserialize, Serialize};

/// The state of a [`crate::step::Step`].
///
/// Legal transitions are enumerated in `martingalian-engine`'s state machine
/// table; this type only knows the vocabulary and the bucket classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    NotRunnable,
    Dispatched,
    Running,
    Completed,
    Skipped,
    Failed,
    Stopped,
    Cancelled,
}

crate::simple_display! {
    StepState {
        Pending => "pending",
        NotRunnable => "not_runnable",
        Dispatched => "dispatched",
        Running => "running",
        Completed => "completed",
        Skipped => "skipped",
        Failed => "failed",
        Stopped => "stopped",
        Cancelled => "cancelled",
    }
}

impl StepState {
    /// *active* = {Pending, NotRunnable, Dispatched, Running}.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::NotRunnable | Self::Dispatched | Self::Running
        )
    }

    /// *concluded-ok* = {Completed, Skipped}.
    pub const fn is_concluded(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// *failed* = {Failed, Stopped, Cancelled}.
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped | Self::Cancelled)
    }

    /// "Terminal" = concluded-ok ∪ failed.
    pub const fn is_terminal(self) -> bool {
        self.is_concluded() || self.is_failed()
    }
}

/// Step kind: a normal unit of work, or an error-recovery slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    Default,
    ResolveException,
}

crate::simple_display! {
    StepType {
        Default => "default",
        ResolveException => "resolve-exception",
    }
}

/// Dispatch priority. Does not affect ordering guarantees; a hint for
/// operators and for `selectDispatchCandidates` tie-breaking in an
/// implementation that honors it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Default,
    High,
}

crate::simple_display! {
    Priority {
        Default => "default",
        High => "high",
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
