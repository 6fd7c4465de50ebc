//! `msched retry-step <id>` against a freshly created `memory` store, which
//! never has any steps in it — so every id is unknown.

use crate::prelude::cli;

#[test]
fn retry_step_on_an_unknown_id_fails() {
    cli().args(&["retry-step", "1"]).fails().stderr_has("error");
}

#[test]
fn retry_step_requires_an_id() {
    cli().args(&["retry-step"]).fails().stderr_has("Usage");
}

#[test]
fn retry_step_rejects_a_non_numeric_id() {
    cli().args(&["retry-step", "not-a-number"]).fails();
}
