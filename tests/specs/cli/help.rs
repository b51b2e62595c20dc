//! `ade` help output specs.

use crate::prelude::*;

#[test]
fn ade_no_args_shows_usage_and_exits_nonzero() {
    cli().fails().stderr_has("Usage:");
}

#[test]
fn ade_help_shows_usage() {
    cli().args(&["--help"]).passes().stdout_has("Usage:");
}

#[test]
fn ade_help_shows_subcommands() {
    cli()
        .args(&["--help"])
        .passes()
        .stdout_has("server")
        .stdout_has("worker")
        .stdout_has("admin");
}

#[test]
fn ade_server_help_shows_usage() {
    cli().args(&["server", "--help"]).passes().stdout_has("Usage:");
}

#[test]
fn ade_worker_help_shows_usage() {
    cli().args(&["worker", "--help"]).passes().stdout_has("Usage:");
}

#[test]
fn ade_admin_help_shows_subcommands() {
    cli()
        .args(&["admin", "--help"])
        .passes()
        .stdout_has("migrate")
        .stdout_has("create-user")
        .stdout_has("assign-role");
}

#[test]
fn ade_version_shows_version() {
    cli().args(&["--version"]).passes().stdout_has("ade");
}
