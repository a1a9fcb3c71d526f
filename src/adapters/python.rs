//! Python syntax checks and unit-test discovery.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::core::types::{TestRecord, TestStatus};

use super::{AdapterContext, command_record, skip_record};

const SYNTAX_SUITE: &str = "python_syntax";
const UNITTEST_SUITE: &str = "python_unittest";

/// Compile every created `.py` file to bytecode without executing it.
pub fn syntax_checks(ctx: &AdapterContext<'_>) -> Vec<TestRecord> {
    let python_files: Vec<&str> = ctx
        .files_created
        .iter()
        .map(String::as_str)
        .filter(|path| path.ends_with(".py"))
        .collect();
    if python_files.is_empty() {
        return Vec::new();
    }

    let Some(python) = ctx.caps.python_command() else {
        return python_files
            .into_iter()
            .map(|path| skip_record(path, SYNTAX_SUITE, "python_unavailable"))
            .collect();
    };

    let timeout = Duration::from_secs(ctx.config.python_syntax_timeout_secs);
    python_files
        .into_iter()
        .map(|path| {
            let mut cmd = Command::new(python);
            cmd.args(["-m", "py_compile", path]);
            command_record(path, SYNTAX_SUITE, cmd, ctx.workspace_dir, timeout)
        })
        .collect()
}

/// Both test-file conventions are discovered. `unittest discover` defaults
/// to `test*.py` only, so each convention gets its own explicit `-p` pass;
/// without it, `*_test.py` files silently collect zero tests.
struct DiscoveryPattern {
    glob: &'static str,
    prefix: &'static str,
    suffix: &'static str,
}

impl DiscoveryPattern {
    fn matches(&self, path: &str) -> bool {
        let name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        name.starts_with(self.prefix) && name.ends_with(self.suffix)
    }
}

const DISCOVERY_PATTERNS: [DiscoveryPattern; 2] = [
    DiscoveryPattern {
        glob: "test_*.py",
        prefix: "test_",
        suffix: ".py",
    },
    DiscoveryPattern {
        glob: "*_test.py",
        prefix: "",
        suffix: "_test.py",
    },
];

/// Run unittest discovery for every test-file convention present in the
/// workspace, one record per discovery pass.
pub fn unit_tests(ctx: &AdapterContext<'_>) -> Vec<TestRecord> {
    let mut names: Vec<String> = ctx.files_created.to_vec();
    names.extend(workspace_files(ctx.workspace_dir));

    let mut records = Vec::new();
    for pattern in &DISCOVERY_PATTERNS {
        if !names.iter().any(|path| pattern.matches(path)) {
            continue;
        }
        let test_name = format!("unittest discover {}", pattern.glob);
        match ctx.caps.python_command() {
            Some(python) => records.push(discovery_record(ctx, python, pattern.glob, &test_name)),
            None => records.push(skip_record(&test_name, UNITTEST_SUITE, "python_unavailable")),
        }
    }
    records
}

/// One discovery pass. A zero-exit run that collected no tests verified
/// nothing and must not count as a pass; it is demoted to a skip.
fn discovery_record(
    ctx: &AdapterContext<'_>,
    python: &str,
    pattern: &str,
    test_name: &str,
) -> TestRecord {
    let timeout = Duration::from_secs(ctx.config.unit_test_timeout_secs);
    let mut cmd = Command::new(python);
    cmd.args(["-m", "unittest", "discover", "-p", pattern, "-v"]);
    let mut record = command_record(test_name, UNITTEST_SUITE, cmd, ctx.workspace_dir, timeout);
    if record.result == TestStatus::Pass && ran_count(&record.stderr_excerpt) == Some(0) {
        record.result = TestStatus::Skip;
        record.reason = Some("no_tests_collected".to_string());
    }
    record
}

/// Parse unittest's trailing `Ran N tests in ...` summary line.
fn ran_count(stderr: &str) -> Option<u32> {
    stderr.lines().rev().find_map(|line| {
        let rest = line.trim().strip_prefix("Ran ")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

fn workspace_files(dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    collect_files(dir, dir, &mut out);
    out
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestStatus;
    use crate::io::config::EngineConfig;
    use crate::test_support::{detect_python, python_only_caps};
    use std::fs;

    fn ctx<'a>(
        workspace: &'a Path,
        files: &'a [String],
        caps: &'a crate::io::probe::EnvironmentCapabilities,
        config: &'a EngineConfig,
    ) -> AdapterContext<'a> {
        AdapterContext {
            workspace_dir: workspace,
            files_created: files,
            caps,
            session_id: "t3st1d00",
            config,
        }
    }

    #[test]
    fn non_python_files_produce_no_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let caps = python_only_caps();
        let config = EngineConfig::default();
        let files = vec!["notes.txt".to_string()];
        assert!(syntax_checks(&ctx(temp.path(), &files, &caps, &config)).is_empty());
    }

    #[test]
    fn missing_python_yields_skip_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let caps = crate::io::probe::EnvironmentCapabilities::default();
        let config = EngineConfig::default();
        let files = vec!["hello.py".to_string()];
        let records = syntax_checks(&ctx(temp.path(), &files, &caps, &config));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, TestStatus::Skip);
        assert_eq!(records[0].reason.as_deref(), Some("python_unavailable"));
    }

    #[test]
    fn valid_and_invalid_syntax_are_told_apart() {
        let Some(_) = detect_python() else {
            return;
        };
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("good.py"), "x = 1\n").expect("write");
        fs::write(temp.path().join("bad.py"), "def broken(\n").expect("write");

        let caps = python_only_caps();
        let config = EngineConfig::default();
        let files = vec!["good.py".to_string(), "bad.py".to_string()];
        let records = syntax_checks(&ctx(temp.path(), &files, &caps, &config));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].result, TestStatus::Pass);
        assert_eq!(records[1].result, TestStatus::Fail);
        assert!(records[1].exit_code != Some(0));
    }

    #[test]
    fn unittest_runs_only_when_test_files_exist() {
        let Some(_) = detect_python() else {
            return;
        };
        let temp = tempfile::tempdir().expect("tempdir");
        let caps = python_only_caps();
        let config = EngineConfig::default();

        let files = vec!["hello.py".to_string()];
        fs::write(temp.path().join("hello.py"), "x = 1\n").expect("write");
        assert!(unit_tests(&ctx(temp.path(), &files, &caps, &config)).is_empty());

        fs::write(
            temp.path().join("test_hello.py"),
            "import unittest\n\nclass T(unittest.TestCase):\n    def test_ok(self):\n        self.assertTrue(True)\n",
        )
        .expect("write");
        let files = vec!["hello.py".to_string(), "test_hello.py".to_string()];
        let records = unit_tests(&ctx(temp.path(), &files, &caps, &config));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].test_name, "unittest discover test_*.py");
        assert_eq!(records[0].result, TestStatus::Pass);
    }

    /// `*_test.py`-named files need their own discovery pass; the default
    /// `test*.py` pattern would collect nothing from them.
    #[test]
    fn suffix_named_tests_are_discovered() {
        let Some(_) = detect_python() else {
            return;
        };
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("util_test.py"),
            "import unittest\n\nclass T(unittest.TestCase):\n    def test_ok(self):\n        self.assertTrue(True)\n",
        )
        .expect("write");

        let caps = python_only_caps();
        let config = EngineConfig::default();
        let files = vec!["util_test.py".to_string()];
        let records = unit_tests(&ctx(temp.path(), &files, &caps, &config));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].test_name, "unittest discover *_test.py");
        assert_eq!(records[0].result, TestStatus::Pass);
    }

    /// A test-looking file from which discovery collects zero tests proves
    /// nothing; the zero-exit run must not count as a pass.
    #[test]
    fn zero_collected_tests_demote_to_skip() {
        let Some(_) = detect_python() else {
            return;
        };
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("test_nothing.py"), "x = 1\n").expect("write");

        let caps = python_only_caps();
        let config = EngineConfig::default();
        let files = vec!["test_nothing.py".to_string()];
        let records = unit_tests(&ctx(temp.path(), &files, &caps, &config));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, TestStatus::Skip);
        assert_eq!(records[0].reason.as_deref(), Some("no_tests_collected"));
    }

    #[test]
    fn both_conventions_get_their_own_pass() {
        let Some(_) = detect_python() else {
            return;
        };
        let temp = tempfile::tempdir().expect("tempdir");
        let case = "import unittest\n\nclass T(unittest.TestCase):\n    def test_ok(self):\n        self.assertTrue(True)\n";
        fs::write(temp.path().join("test_a.py"), case).expect("write");
        fs::write(temp.path().join("b_test.py"), case).expect("write");

        let caps = python_only_caps();
        let config = EngineConfig::default();
        let files = vec!["test_a.py".to_string(), "b_test.py".to_string()];
        let records = unit_tests(&ctx(temp.path(), &files, &caps, &config));
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.result == TestStatus::Pass));
    }

    #[test]
    fn test_file_naming_rules() {
        let prefix = &DISCOVERY_PATTERNS[0];
        let suffix = &DISCOVERY_PATTERNS[1];
        assert!(prefix.matches("test_hello.py"));
        assert!(suffix.matches("pkg/tests/util_test.py"));
        assert!(!prefix.matches("hello.py") && !suffix.matches("hello.py"));
        assert!(!prefix.matches("test_data.json") && !suffix.matches("test_data.json"));
        assert!(!prefix.matches("contest.py") && !suffix.matches("contest.py"));
    }

    #[test]
    fn ran_count_parses_the_summary_line() {
        assert_eq!(ran_count("test_ok ... ok\n----\nRan 1 test in 0.001s\n\nOK\n"), Some(1));
        assert_eq!(ran_count("----\nRan 0 tests in 0.000s\n\nOK\n"), Some(0));
        assert_eq!(ran_count("no summary here"), None);
    }
}
