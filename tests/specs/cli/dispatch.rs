//! `msched dispatch` against a freshly created `memory` store, which never
//! has any steps in it — so every beat is a legitimate no-op (exit 0).

use crate::prelude::cli;

#[test]
fn dispatch_on_an_empty_store_is_a_no_op() {
    cli().args(&["dispatch"]).passes();
}

#[test]
fn dispatch_with_an_explicit_group_on_an_empty_store_is_a_no_op() {
    cli().args(&["dispatch", "--group", "billing"]).passes();
}

#[test]
fn dispatch_rejects_an_unparseable_database_url() {
    cli()
        .env("MS_DATABASE_URL", "not-a-valid-url")
        .args(&["dispatch"])
        .fails()
        .stderr_has("error");
}
