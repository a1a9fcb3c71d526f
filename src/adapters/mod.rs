//! Objective test executors.
//!
//! Adapters are selected by file type and gated on environment
//! availability: a missing prerequisite yields `skip` records, never `fail`,
//! so "pass" always means "every test that ran, passed". Adapters never
//! return errors to the orchestrator; launch failures and timeouts become
//! fail records with an explicit reason.

pub mod docker;
pub mod gpu;
pub mod python;
pub mod rust;
pub mod security;

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::core::error::EngineError;
use crate::core::types::{TestRecord, TestStatus};
use crate::io::config::EngineConfig;
use crate::io::probe::EnvironmentCapabilities;
use crate::io::process::run_command;

/// Bound on stdout/stderr excerpts stored in a [`TestRecord`].
pub(crate) const EXCERPT_LIMIT: usize = 500;
/// Bound on raw subprocess output kept in memory.
pub(crate) const OUTPUT_LIMIT_BYTES: usize = 100_000;

/// Everything an adapter needs for one round.
pub struct AdapterContext<'a> {
    pub workspace_dir: &'a Path,
    /// Workspace-relative paths written this round.
    pub files_created: &'a [String],
    pub caps: &'a EnvironmentCapabilities,
    pub session_id: &'a str,
    pub config: &'a EngineConfig,
}

/// Run every applicable adapter against the workspace, in a fixed order.
#[instrument(skip_all, fields(files = ctx.files_created.len()))]
pub fn run_all(ctx: &AdapterContext<'_>) -> Vec<TestRecord> {
    let mut records = Vec::new();
    records.extend(python::syntax_checks(ctx));
    records.extend(python::unit_tests(ctx));
    records.extend(rust::cargo_check(ctx));
    records.extend(docker::builds(ctx));
    records.extend(gpu::smoke_tests(ctx));
    records.extend(security::scans(ctx));
    debug!(records = records.len(), "adapters complete");
    records
}

/// Run one command and fold its outcome into a [`TestRecord`].
///
/// All commands run with `cwd = workspace_dir`; callers pass file arguments
/// relative to it. Timeouts and launch failures are values here, not errors.
pub(crate) fn command_record(
    test_name: &str,
    suite: &str,
    mut cmd: Command,
    cwd: &Path,
    timeout: Duration,
) -> TestRecord {
    cmd.current_dir(cwd);
    match run_command(cmd, timeout, OUTPUT_LIMIT_BYTES) {
        Ok(output) => {
            let result = if output.timed_out || !output.success() {
                TestStatus::Fail
            } else {
                TestStatus::Pass
            };
            TestRecord {
                test_name: test_name.to_string(),
                suite: suite.to_string(),
                result,
                stdout_excerpt: output.stdout_excerpt(EXCERPT_LIMIT),
                stderr_excerpt: output.stderr_excerpt(EXCERPT_LIMIT),
                exit_code: output.exit_code,
                duration_ms: output.duration.as_millis() as u64,
                reason: output.timed_out.then(|| "timeout".to_string()),
            }
        }
        Err(err) => {
            let detail = match err.downcast_ref::<EngineError>() {
                Some(EngineError::SubprocessLaunch(detail)) => detail.clone(),
                _ => err.to_string(),
            };
            TestRecord {
                test_name: test_name.to_string(),
                suite: suite.to_string(),
                result: TestStatus::Fail,
                stdout_excerpt: String::new(),
                stderr_excerpt: detail,
                exit_code: None,
                duration_ms: 0,
                reason: Some("launch_failed".to_string()),
            }
        }
    }
}

/// A record for a test that could not run because a prerequisite is absent.
pub(crate) fn skip_record(test_name: &str, suite: &str, why: &str) -> TestRecord {
    TestRecord {
        test_name: test_name.to_string(),
        suite: suite.to_string(),
        result: TestStatus::Skip,
        stdout_excerpt: String::new(),
        stderr_excerpt: String::new(),
        exit_code: None,
        duration_ms: 0,
        reason: Some(why.to_string()),
    }
}

/// A record produced without a subprocess (e.g. the secrets sweep).
pub(crate) fn inline_record(
    test_name: &str,
    suite: &str,
    result: TestStatus,
    detail: &str,
) -> TestRecord {
    TestRecord {
        test_name: test_name.to_string(),
        suite: suite.to_string(),
        result,
        stdout_excerpt: detail.chars().take(EXCERPT_LIMIT).collect(),
        stderr_excerpt: String::new(),
        exit_code: None,
        duration_ms: 0,
        reason: None,
    }
}
