// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Custom error type that carries a process exit code.
//!
//! Commands return `ExitError` instead of calling `std::process::exit()`
//! directly, letting `main()` own process termination in one place.

use std::fmt;

/// Lock contention on `acquireGroupLock` — benign, but the CLI still needs a non-zero exit for
/// scripts that want to distinguish "nothing to do" from "ran".
pub const EXIT_LOCK_CONTENTION: i32 = 2;

/// Anything else: a guard rejection on an admin-forced transition, a store
/// error, a bad id.
pub const EXIT_INTERNAL_ERROR: i32 = 1;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(EXIT_INTERNAL_ERROR, message)
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExitError {}

impl From<martingalian_engine::EngineError> for ExitError {
    fn from(err: martingalian_engine::EngineError) -> Self {
        ExitError::internal(err.to_string())
    }
}

impl From<martingalian_store::StoreError> for ExitError {
    fn from(err: martingalian_store::StoreError) -> Self {
        ExitError::internal(err.to_string())
    }
}
