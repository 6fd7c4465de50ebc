//! `msched --help` / `msched --version` output.

use crate::prelude::cli;

#[test]
fn help_lists_the_three_subcommands() {
    cli()
        .args(&["--help"])
        .passes()
        .stdout_has("dispatch")
        .stdout_has("cooldown")
        .stdout_has("retry-step");
}

#[test]
fn version_reports_the_crate_version() {
    cli().args(&["--version"]).passes().stdout_has(env!("CARGO_PKG_VERSION"));
}

#[test]
fn dispatch_help_documents_group_and_loop_flags() {
    cli()
        .args(&["dispatch", "--help"])
        .passes()
        .stdout_has("--group")
        .stdout_has("--loop");
}

#[test]
fn cooldown_help_documents_on_and_off() {
    cli()
        .args(&["cooldown", "--help"])
        .passes()
        .stdout_has("on")
        .stdout_has("off");
}

#[test]
fn missing_subcommand_fails_with_usage() {
    cli().args(&[]).fails().stderr_has("Usage");
}
