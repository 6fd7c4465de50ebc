// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::id::{BlockUuid, WorkflowUuid};
use crate::state::StepState;
use crate::step::{Step, StepBuilder};

/// Build a Pending, orphan, sync, order-independent step with a fixed
/// class name — the common starting point for guard and cascade tests.
pub fn pending_step(workflow: WorkflowUuid, block: BlockUuid, class: &str) -> Step {
    StepBuilder::new(workflow, block, class).build()
}

/// Build a step at a given index within a block, still Pending/orphan.
pub fn indexed_step(workflow: WorkflowUuid, block: BlockUuid, class: &str, index: i32) -> Step {
    StepBuilder::new(workflow, block, class).index(index).build()
}

/// Force a step directly into an arbitrary state, bypassing the state
/// machine — only for assembling fixtures, never production code.
pub fn with_state(mut step: Step, state: StepState) -> Step {
    step.state = state;
    step
}

pub mod strategies {
    use crate::state::StepState;
    use proptest::prelude::*;

    /// Every [`StepState`] with uniform probability, for bucket-invariant
    /// property tests.
    pub fn arb_step_state() -> impl Strategy<Value = StepState> {
        prop_oneof![
            Just(StepState::Pending),
            Just(StepState::NotRunnable),
            Just(StepState::Dispatched),
            Just(StepState::Running),
            Just(StepState::Completed),
            Just(StepState::Skipped),
            Just(StepState::Failed),
            Just(StepState::Stopped),
            Just(StepState::Cancelled),
        ]
    }

    /// A state drawn from the *concluded* bucket only.
    pub fn arb_concluded_state() -> impl Strategy<Value = StepState> {
        prop_oneof![Just(StepState::Completed), Just(StepState::Skipped)]
    }

    /// A state drawn from the *failed* bucket only.
    pub fn arb_failed_state() -> impl Strategy<Value = StepState> {
        prop_oneof![
            Just(StepState::Failed),
            Just(StepState::Stopped),
            Just(StepState::Cancelled),
        ]
    }
}
