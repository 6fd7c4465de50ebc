// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A partial update to a [`Step`](martingalian_core::Step) row.
//!
//! `updateStep(step, patch)` needs to both *set* a nullable column
//! and explicitly *clear* one (e.g. Running→Pending clears `started_at`),
//! which a plain `Option<T>` can't distinguish from "leave unchanged". A
//! three-way [`Field`] carries that distinction through to the SQL layer.

use chrono::{DateTime, Utc};
use martingalian_core::{StepState, TickId};
use serde_json::Value;

/// One column's update instruction: leave it alone, set it to a value, or
/// null it out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Field<T> {
    #[default]
    Unchanged,
    Set(T),
    Clear,
}

impl<T> Field<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Field::Unchanged)
    }

    /// `other` wins when it carries an instruction; otherwise `self` stands.
    fn merge(self, other: Field<T>) -> Field<T> {
        if other.is_unchanged() {
            self
        } else {
            other
        }
    }
}

/// A patch applied atomically by `TransitionExecutor::transition` and by
/// `JobRunner`/`RetryPolicy` when they stamp side-effect fields alongside a
/// state transition.
#[derive(Debug, Clone, Default)]
pub struct StepPatch {
    pub state: Option<StepState>,
    pub dispatch_after: Field<DateTime<Utc>>,
    pub started_at: Field<DateTime<Utc>>,
    pub completed_at: Field<DateTime<Utc>>,
    pub duration_ms: Field<i64>,
    pub retries: Option<u32>,
    pub tick_id: Field<TickId>,
    pub hostname: Field<String>,
    pub response: Field<Value>,
    pub error_message: Field<String>,
    pub error_stack_trace: Field<String>,
    pub step_log: Field<String>,
}

impl StepPatch {
    pub fn to_state(state: StepState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn state(mut self, state: StepState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn dispatch_after(mut self, at: DateTime<Utc>) -> Self {
        self.dispatch_after = Field::Set(at);
        self
    }

    pub fn clear_dispatch_after(mut self) -> Self {
        self.dispatch_after = Field::Clear;
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Field::Set(at);
        self
    }

    pub fn clear_started_at(mut self) -> Self {
        self.started_at = Field::Clear;
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Field::Set(at);
        self
    }

    pub fn clear_completed_at(mut self) -> Self {
        self.completed_at = Field::Clear;
        self
    }

    pub fn duration_ms(mut self, ms: i64) -> Self {
        self.duration_ms = Field::Set(ms);
        self
    }

    pub fn clear_duration_ms(mut self) -> Self {
        self.duration_ms = Field::Clear;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn tick_id(mut self, id: TickId) -> Self {
        self.tick_id = Field::Set(id);
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Field::Set(hostname.into());
        self
    }

    pub fn clear_hostname(mut self) -> Self {
        self.hostname = Field::Clear;
        self
    }

    pub fn response(mut self, value: Value) -> Self {
        self.response = Field::Set(value);
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Field::Set(message.into());
        self
    }

    pub fn error_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.error_stack_trace = Field::Set(trace.into());
        self
    }

    pub fn step_log(mut self, log: impl Into<String>) -> Self {
        self.step_log = Field::Set(log.into());
        self
    }

    /// Layer `other` on top of `self`: any instruction `other` carries wins,
    /// fields `other` leaves `Unchanged` keep `self`'s instruction. Used by
    /// `TransitionExecutor` to apply side-effect fields (timestamps,
    /// hostname, retry count) alongside caller-supplied fields
    /// (`error_message`, `response`, ...) in one write.
    pub fn merge(self, other: StepPatch) -> StepPatch {
        StepPatch {
            state: other.state.or(self.state),
            dispatch_after: self.dispatch_after.merge(other.dispatch_after),
            started_at: self.started_at.merge(other.started_at),
            completed_at: self.completed_at.merge(other.completed_at),
            duration_ms: self.duration_ms.merge(other.duration_ms),
            retries: other.retries.or(self.retries),
            tick_id: self.tick_id.merge(other.tick_id),
            hostname: self.hostname.merge(other.hostname),
            response: self.response.merge(other.response),
            error_message: self.error_message.merge(other.error_message),
            error_stack_trace: self.error_stack_trace.merge(other.error_stack_trace),
            step_log: self.step_log.merge(other.step_log),
        }
    }
}
