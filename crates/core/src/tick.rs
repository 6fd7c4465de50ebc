// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Tick record — one row per attempted
//! dispatch cycle for a group.

use crate::id::TickId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The stage a [`Tick`] reached before it short-circuited or completed,
/// numbered to match the steps of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TickProgress {
    /// Lock denied or not yet acquired.
    LockDenied = 0,
    SkipDescendants = 1,
    CancelDownstream = 2,
    PromoteResolveException = 3,
    FailParents = 4,
    CascadeFailureToChildren = 5,
    CompleteParents = 6,
    /// Selection and hand-off ran; teardown released the lock normally.
    SelectionAndHandoff = 7,
}

impl TickProgress {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::LockDenied,
            1 => Self::SkipDescendants,
            2 => Self::CancelDownstream,
            3 => Self::PromoteResolveException,
            4 => Self::FailParents,
            5 => Self::CascadeFailureToChildren,
            6 => Self::CompleteParents,
            7 => Self::SelectionAndHandoff,
            _ => return None,
        })
    }
}

/// One attempted atomic dispatch cycle for a single group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub id: TickId,
    pub group: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: TickProgress,
    pub duration_ms: Option<i64>,
}

impl Tick {
    pub fn new(group: Option<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: TickId::new(),
            group,
            started_at,
            completed_at: None,
            progress: TickProgress::LockDenied,
            duration_ms: None,
        }
    }

    /// Stamp completion and compute duration (Invariant 5's same arithmetic,
    /// applied to a tick instead of a step).
    pub fn complete(&mut self, at: DateTime<Utc>, progress: TickProgress) {
        self.completed_at = Some(at);
        self.progress = progress;
        self.duration_ms = Some((at - self.started_at).num_milliseconds().max(0));
    }
}

#[cfg(test)]
#[path = "tick_tests.rs"]
mod tests;
