// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builds the [`StepRepository`] this process talks to from its configured
//! database URL.
//!
//! The sentinel URL `memory` selects [`MemoryStepRepository`] instead of
//! connecting to Postgres — `martingalian_store` exposes it as a regular
//! public adapter (it backs the engine's own test suite), so the
//! `tests/specs/cli` black-box suite can drive the real `msched` binary
//! against it without a live database.

use martingalian_store::{MemoryStepRepository, PgStepRepository, StepRepository};

pub enum Store {
    Memory(MemoryStepRepository),
    Postgres(PgStepRepository),
}

impl Store {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        if database_url == "memory" {
            return Ok(Store::Memory(MemoryStepRepository::new()));
        }
        let repo = PgStepRepository::connect(database_url).await?;
        repo.run_migrations().await?;
        Ok(Store::Postgres(repo))
    }

    pub fn as_repository(&self) -> &dyn StepRepository {
        match self {
            Store::Memory(repo) => repo,
            Store::Postgres(repo) => repo,
        }
    }
}
