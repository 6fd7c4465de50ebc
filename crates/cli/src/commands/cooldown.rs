// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `msched cooldown {on|off}` — toggles the global pause flag.

use martingalian_store::StepRepository;
use tracing::info;

use crate::exit_error::ExitError;

pub async fn set(repo: &dyn StepRepository, value: bool) -> Result<(), ExitError> {
    repo.set_cooling_down(value).await?;
    info!(cooling_down = value, "cooldown flag updated");
    Ok(())
}
