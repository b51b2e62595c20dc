//! Entry point for the workspace's black-box CLI specs. Each submodule
//! under `specs/` spawns the `ade` binary via `assert_cmd` and asserts on
//! its exit status/stdout/stderr, the way `oj`'s own `tests/specs/` tree
//! does. Tests that need a live Postgres (anything touching `ade server`
//! or `ade worker` past startup) are out of scope here: the binary needs
//! `ADE_DATABASE_URL` to do anything beyond print help, and this harness
//! has no database fixture to provision one against.

mod prelude;

mod cli {
    mod help;
}
