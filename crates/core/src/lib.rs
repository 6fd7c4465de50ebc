// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! martingalian-core: shared data model for the step scheduler engine.
//!
//! Holds the [`Step`] entity, its [`StepState`] machine vocabulary, the
//! [`Tick`] and [`DispatchGroup`] records the scheduler uses for group
//! round-robin and mutual exclusion, and the id/clock primitives the rest
//! of the workspace builds on.

pub mod macros;

pub mod clock;
pub mod group;
pub mod id;
pub mod state;
pub mod step;
pub mod tick;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use group::DispatchGroup;
pub use id::{BlockUuid, StepId, TickId, WorkflowUuid};
pub use state::{Priority, StepState, StepType};
pub use step::{Relatable, Step, StepBuilder, SYNC_QUEUE};
pub use tick::{Tick, TickProgress};
