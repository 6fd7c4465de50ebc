//! `msched cooldown {on|off}` against a freshly created `memory` store.

use crate::prelude::cli;

#[test]
fn cooldown_on_succeeds() {
    cli().args(&["cooldown", "on"]).passes();
}

#[test]
fn cooldown_off_succeeds() {
    cli().args(&["cooldown", "off"]).passes();
}

#[test]
fn cooldown_requires_an_action() {
    cli().args(&["cooldown"]).fails().stderr_has("Usage");
}
