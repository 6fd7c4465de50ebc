// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The DispatchGroup record — the cross-process
//! mutual-exclusion flag and round-robin fairness cursor for one group.

use crate::id::TickId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The sentinel group name for ungrouped steps (`group = null` on the step
/// row). The scheduler treats this as one additional round-robin entry
/// alongside every named group.
pub const NULL_GROUP: &str = "";

/// One row of `steps_dispatcher`: the lock flag and fairness cursor for a
/// single scheduler group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchGroup {
    pub group: String,
    pub can_dispatch: bool,
    pub current_tick_id: Option<TickId>,
    pub last_tick_completed: Option<DateTime<Utc>>,
    /// Microsecond-precision cursor used for round-robin fairness.
    pub last_selected_at: Option<DateTime<Utc>>,
}

impl DispatchGroup {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            can_dispatch: false,
            current_tick_id: None,
            last_tick_completed: None,
            last_selected_at: None,
        }
    }
}

#[cfg(test)]
#[path = "group_tests.rs"]
mod tests;
