//! Rust compile check for workspaces that produce a crate.

use std::process::Command;
use std::time::Duration;

use crate::core::types::TestRecord;

use super::{AdapterContext, command_record, skip_record};

const SUITE: &str = "rust_check";
const RUST_CHECK_TIMEOUT: Duration = Duration::from_secs(300);

pub fn cargo_check(ctx: &AdapterContext<'_>) -> Vec<TestRecord> {
    if !ctx.workspace_dir.join("Cargo.toml").exists() {
        return Vec::new();
    }
    if !ctx.caps.languages.rust.available {
        return vec![skip_record("cargo check", SUITE, "rust_unavailable")];
    }

    let mut cmd = Command::new("cargo");
    cmd.arg("check");
    vec![command_record(
        "cargo check",
        SUITE,
        cmd,
        ctx.workspace_dir,
        RUST_CHECK_TIMEOUT,
    )]
}
