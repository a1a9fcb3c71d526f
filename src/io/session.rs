//! Session directory layout and artifact persistence.
//!
//! Current artifacts (`plan.json`, `implementation.json`, ...) are written
//! with a temp-file-and-rename discipline so external observers never see a
//! partial file. Per-round history directories are append-only.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::error::EngineError;

/// Paths inside one session's artifacts directory.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub session_id: String,
    /// `<base>/aav3_<session_id>/`
    pub root: PathBuf,
    pub workspace_dir: PathBuf,
    pub environment_path: PathBuf,
    pub plan_path: PathBuf,
    pub research_path: PathBuf,
    pub implementation_path: PathBuf,
    pub implementation_history_dir: PathBuf,
    pub review_path: PathBuf,
    pub test_result_path: PathBuf,
    pub test_history_dir: PathBuf,
    pub consensus_path: PathBuf,
    pub conversation_path: PathBuf,
    pub verdict_path: PathBuf,
}

impl SessionPaths {
    pub fn new(artifacts_base: &Path, session_id: &str) -> Self {
        let root = artifacts_base.join(format!("aav3_{session_id}"));
        Self {
            session_id: session_id.to_string(),
            workspace_dir: root.join("workspace"),
            environment_path: root.join("environment.json"),
            plan_path: root.join("plan.json"),
            research_path: root.join("research.json"),
            implementation_path: root.join("implementation.json"),
            implementation_history_dir: root.join("implementation_history"),
            review_path: root.join("review.json"),
            test_result_path: root.join("test_result.json"),
            test_history_dir: root.join("test_history"),
            consensus_path: root.join("consensus.json"),
            conversation_path: root.join("conversation.jsonl"),
            verdict_path: root.join("verdict.json"),
            root,
        }
    }

    /// Eagerly create the session directories. Both the workspace and the
    /// artifacts persist after the run.
    pub fn create_all(&self) -> Result<()> {
        for dir in [
            &self.root,
            &self.workspace_dir,
            &self.implementation_history_dir,
            &self.test_history_dir,
        ] {
            fs::create_dir_all(dir).map_err(|err| {
                EngineError::Filesystem(format!("create {}: {err}", dir.display()))
            })?;
        }
        Ok(())
    }

    /// Frozen per-round copy, e.g. `implementation_history/round_0.json`.
    pub fn implementation_round_path(&self, round: u32) -> PathBuf {
        self.implementation_history_dir
            .join(format!("round_{round}.json"))
    }

    pub fn test_round_path(&self, round: u32) -> PathBuf {
        self.test_history_dir.join(format!("round_{round}.json"))
    }
}

/// Serialize `value` to pretty-printed JSON with a trailing newline, via a
/// temp file and rename.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    write_atomic(path, &payload)
}

/// Append one compact JSON object as a single line of a `.jsonl` log.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_string(value).context("serialize jsonl record")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| EngineError::Filesystem(format!("open {}: {err}", path.display())))?;
    file.write_all(line.as_bytes())
        .map_err(|err| EngineError::Filesystem(format!("append {}: {err}", path.display())))?;
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| EngineError::Filesystem(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent)
        .map_err(|err| EngineError::Filesystem(format!("create {}: {err}", parent.display())))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .map_err(|err| EngineError::Filesystem(format!("write {}: {err}", tmp_path.display())))?;
    fs::rename(&tmp_path, path)
        .map_err(|err| EngineError::Filesystem(format!("replace {}: {err}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn paths_are_stable() {
        let paths = SessionPaths::new(Path::new("/tmp/out"), "ab12cd34");
        assert!(paths.root.ends_with("aav3_ab12cd34"));
        assert!(paths.workspace_dir.ends_with("aav3_ab12cd34/workspace"));
        assert!(paths.verdict_path.ends_with("verdict.json"));
        assert!(
            paths
                .implementation_round_path(3)
                .ends_with("implementation_history/round_3.json")
        );
        assert!(paths.test_round_path(0).ends_with("test_history/round_0.json"));
    }

    #[test]
    fn create_all_builds_the_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SessionPaths::new(temp.path(), "ff00ff00");
        paths.create_all().expect("create");
        assert!(paths.workspace_dir.is_dir());
        assert!(paths.implementation_history_dir.is_dir());
        assert!(paths.test_history_dir.is_dir());
    }

    #[test]
    fn write_json_is_pretty_with_trailing_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("value.json");
        write_json(&path, &json!({"a": 1})).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "{\n  \"a\": 1\n}\n");
        assert!(!temp.path().join("value.json.tmp").exists());
    }

    #[test]
    fn append_jsonl_is_one_compact_object_per_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("log.jsonl");
        append_jsonl(&path, &json!({"n": 1})).expect("append");
        append_jsonl(&path, &json!({"n": 2})).expect("append");
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "{\"n\":1}\n{\"n\":2}\n");
    }
}
