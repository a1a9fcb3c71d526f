//! GPU smoke tests.
//!
//! Five sub-tests, each in its own bounded subprocess. Without a detected
//! GPU every sub-test is skipped. Scratch files (the CUDA hello world) live
//! in a session-scoped temp directory, never in the workspace: the
//! workspace belongs to the Coder.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use crate::core::types::{TestRecord, TestStatus};

use super::{AdapterContext, command_record, skip_record};

const SUITE: &str = "gpu";
const SUBTEST_TIMEOUT: Duration = Duration::from_secs(30);

const CUDA_HELLO: &str = r#"#include <stdio.h>

__global__ void hello() {
    printf("hello from gpu thread %d\n", threadIdx.x);
}

int main() {
    hello<<<1, 1>>>();
    cudaDeviceSynchronize();
    return 0;
}
"#;

const SUB_TESTS: [&str; 5] = [
    "nvidia-smi",
    "nvcc present",
    "cuda hello world",
    "tensorflow gpu",
    "pytorch cuda",
];

pub fn smoke_tests(ctx: &AdapterContext<'_>) -> Vec<TestRecord> {
    if !ctx.caps.gpu.any() {
        return SUB_TESTS
            .iter()
            .map(|name| skip_record(name, SUITE, "gpu_unavailable"))
            .collect();
    }

    let mut records = Vec::with_capacity(SUB_TESTS.len());

    let mut smi = Command::new("nvidia-smi");
    smi.args(["--query-gpu=name", "--format=csv,noheader"]);
    records.push(soften_missing_tool(command_record(
        "nvidia-smi",
        SUITE,
        smi,
        ctx.workspace_dir,
        SUBTEST_TIMEOUT,
    )));

    let mut nvcc = Command::new("nvcc");
    nvcc.arg("--version");
    let nvcc_record = command_record(
        "nvcc present",
        SUITE,
        nvcc,
        ctx.workspace_dir,
        SUBTEST_TIMEOUT,
    );
    let nvcc_available = nvcc_record.result == TestStatus::Pass;
    records.push(soften_missing_tool(nvcc_record));

    records.push(if nvcc_available {
        cuda_hello_record(ctx)
    } else {
        skip_record("cuda hello world", SUITE, "nvcc_unavailable")
    });

    records.push(framework_record(
        ctx,
        "tensorflow gpu",
        "import sys, tensorflow as tf; sys.exit(0 if len(tf.config.list_physical_devices('GPU')) > 0 else 1)",
    ));
    records.push(framework_record(
        ctx,
        "pytorch cuda",
        "import sys, torch; sys.exit(0 if torch.cuda.is_available() else 1)",
    ));

    records
}

/// Compile and run the minimal CUDA program inside a scratch dir.
fn cuda_hello_record(ctx: &AdapterContext<'_>) -> TestRecord {
    let scratch = scratch_dir(ctx.session_id);
    if fs::create_dir_all(&scratch).is_err() {
        return skip_record("cuda hello world", SUITE, "scratch_dir_unavailable");
    }
    let source = scratch.join("gpu_hello.cu");
    if fs::write(&source, CUDA_HELLO).is_err() {
        return skip_record("cuda hello world", SUITE, "scratch_dir_unavailable");
    }

    let mut compile = Command::new("nvcc");
    compile.args(["gpu_hello.cu", "-o", "gpu_hello"]);
    let compiled = command_record("cuda hello world", SUITE, compile, &scratch, SUBTEST_TIMEOUT);
    if compiled.result != TestStatus::Pass {
        return compiled;
    }

    let run = Command::new("./gpu_hello");
    command_record("cuda hello world", SUITE, run, &scratch, SUBTEST_TIMEOUT)
}

fn framework_record(ctx: &AdapterContext<'_>, name: &str, script: &str) -> TestRecord {
    let Some(python) = ctx.caps.python_command() else {
        return skip_record(name, SUITE, "python_unavailable");
    };
    let mut cmd = Command::new(python);
    cmd.args(["-c", script]);
    let record = command_record(name, SUITE, cmd, ctx.workspace_dir, SUBTEST_TIMEOUT);
    soften_missing_tool(record)
}

/// An uninstalled framework or missing compiler is an absent prerequisite,
/// not a failing test.
fn soften_missing_tool(record: TestRecord) -> TestRecord {
    let missing = record.reason.as_deref() == Some("launch_failed")
        || record.stderr_excerpt.contains("ModuleNotFoundError")
        || record.stderr_excerpt.contains("ImportError");
    if record.result == TestStatus::Fail && missing {
        return TestRecord {
            result: TestStatus::Skip,
            reason: Some("prerequisite_missing".to_string()),
            ..record
        };
    }
    record
}

fn scratch_dir(session_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("aav3-gpu-{session_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::EngineConfig;
    use crate::io::probe::{EnvironmentCapabilities, GpuCaps};

    #[test]
    fn no_gpu_skips_every_sub_test() {
        let temp = tempfile::tempdir().expect("tempdir");
        let caps = EnvironmentCapabilities::default();
        let config = EngineConfig::default();
        let ctx = AdapterContext {
            workspace_dir: temp.path(),
            files_created: &[],
            caps: &caps,
            session_id: "t3st1d00",
            config: &config,
        };
        let records = smoke_tests(&ctx);
        assert_eq!(records.len(), SUB_TESTS.len());
        assert!(records.iter().all(|r| r.result == TestStatus::Skip));
        assert!(
            records
                .iter()
                .all(|r| r.reason.as_deref() == Some("gpu_unavailable"))
        );
    }

    #[test]
    fn missing_framework_import_softens_to_skip() {
        let record = TestRecord {
            test_name: "tensorflow gpu".to_string(),
            suite: SUITE.to_string(),
            result: TestStatus::Fail,
            stdout_excerpt: String::new(),
            stderr_excerpt: "ModuleNotFoundError: No module named 'tensorflow'".to_string(),
            exit_code: Some(1),
            duration_ms: 10,
            reason: None,
        };
        let softened = soften_missing_tool(record);
        assert_eq!(softened.result, TestStatus::Skip);
        assert_eq!(softened.reason.as_deref(), Some("prerequisite_missing"));
    }

    #[test]
    fn genuine_failure_is_not_softened() {
        let record = TestRecord {
            test_name: "pytorch cuda".to_string(),
            suite: SUITE.to_string(),
            result: TestStatus::Fail,
            stdout_excerpt: String::new(),
            stderr_excerpt: "RuntimeError: CUDA driver version is insufficient".to_string(),
            exit_code: Some(1),
            duration_ms: 10,
            reason: None,
        };
        let unchanged = soften_missing_tool(record.clone());
        assert_eq!(unchanged, record);
    }

    #[test]
    fn amd_only_gpu_still_runs_the_suite() {
        let temp = tempfile::tempdir().expect("tempdir");
        let caps = EnvironmentCapabilities {
            gpu: GpuCaps {
                amd: true,
                ..GpuCaps::default()
            },
            ..EnvironmentCapabilities::default()
        };
        let config = EngineConfig::default();
        let ctx = AdapterContext {
            workspace_dir: temp.path(),
            files_created: &[],
            caps: &caps,
            session_id: "t3st1d00",
            config: &config,
        };
        let records = smoke_tests(&ctx);
        assert_eq!(records.len(), SUB_TESTS.len());
        // An absent nvidia-smi on an AMD-only host is a skip, never a
        // launch failure.
        assert!(
            records
                .iter()
                .all(|r| r.reason.as_deref() != Some("launch_failed"))
        );
    }
}
