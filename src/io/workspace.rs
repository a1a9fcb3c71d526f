//! Materialization of Coder file proposals into the session workspace.
//!
//! Agents never touch the filesystem; the orchestrator applies every
//! [`FileSpec`] here. Paths are validated before any byte is written: a
//! single escaping path rejects the whole batch.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::core::error::EngineError;
use crate::core::types::FileSpec;

/// Resolve `relative` under `workspace_dir`, rejecting absolute paths and
/// any `..` traversal.
pub fn resolve_workspace_path(workspace_dir: &Path, relative: &str) -> Result<PathBuf> {
    if relative.trim().is_empty() {
        return Err(EngineError::Filesystem("empty file path".to_string()).into());
    }
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return Err(EngineError::Filesystem(format!(
            "absolute path {relative:?} escapes the workspace"
        ))
        .into());
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(EngineError::Filesystem(format!(
                    "path {relative:?} escapes the workspace"
                ))
                .into());
            }
        }
    }
    Ok(workspace_dir.join(candidate))
}

/// Write all `files` under `workspace_dir`, overwriting previous contents.
///
/// Each write is atomic: parent dirs created, content written to a temp
/// file, then renamed into place. Returns the workspace-relative paths that
/// were written, in input order.
pub fn materialize(workspace_dir: &Path, files: &[FileSpec]) -> Result<Vec<String>> {
    // Validate the full batch first so a traversal attempt writes nothing.
    let mut resolved = Vec::with_capacity(files.len());
    for spec in files {
        resolved.push(resolve_workspace_path(workspace_dir, &spec.path)?);
    }

    let mut written = Vec::with_capacity(files.len());
    for (spec, target) in files.iter().zip(&resolved) {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                EngineError::Filesystem(format!("create {}: {err}", parent.display()))
            })?;
        }
        let tmp = target.with_extension("aav3.tmp");
        fs::write(&tmp, &spec.content)
            .map_err(|err| EngineError::Filesystem(format!("write {}: {err}", tmp.display())))?;
        fs::rename(&tmp, target).map_err(|err| {
            EngineError::Filesystem(format!("replace {}: {err}", target.display()))
        })?;
        debug!(path = %spec.path, bytes = spec.content.len(), "wrote workspace file");
        written.push(spec.path.clone());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(path: &str, content: &str) -> FileSpec {
        FileSpec {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn writes_files_with_parents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let written = materialize(
            temp.path(),
            &[
                spec("hello.py", "print('hi')\n"),
                spec("pkg/mod/util.py", "X = 1\n"),
            ],
        )
        .expect("materialize");
        assert_eq!(written, vec!["hello.py", "pkg/mod/util.py"]);
        let contents = fs::read_to_string(temp.path().join("pkg/mod/util.py")).expect("read");
        assert_eq!(contents, "X = 1\n");
    }

    #[test]
    fn overwrites_on_later_rounds() {
        let temp = tempfile::tempdir().expect("tempdir");
        materialize(temp.path(), &[spec("a.py", "v1\n")]).expect("round 0");
        materialize(temp.path(), &[spec("a.py", "v2\n")]).expect("round 1");
        let contents = fs::read_to_string(temp.path().join("a.py")).expect("read");
        assert_eq!(contents, "v2\n");
    }

    #[test]
    fn rejects_absolute_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = materialize(temp.path(), &[spec("/etc/passwd", "nope")]).unwrap_err();
        let engine = err.downcast_ref::<EngineError>().expect("engine error");
        assert_eq!(engine.kind(), "filesystem");
    }

    #[test]
    fn rejects_parent_traversal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = materialize(temp.path(), &[spec("../outside.txt", "nope")]).unwrap_err();
        let engine = err.downcast_ref::<EngineError>().expect("engine error");
        assert_eq!(engine.kind(), "filesystem");
        assert!(!temp.path().parent().unwrap().join("outside.txt").exists());
    }

    #[test]
    fn rejects_embedded_traversal() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(materialize(temp.path(), &[spec("ok/../../escape.txt", "nope")]).is_err());
    }

    #[test]
    fn one_bad_path_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = materialize(
            temp.path(),
            &[spec("good.txt", "fine"), spec("../bad.txt", "nope")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("escapes the workspace"));
        assert!(!temp.path().join("good.txt").exists());
    }

    #[test]
    fn resolved_paths_stay_under_the_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolved = resolve_workspace_path(temp.path(), "sub/dir/file.txt").expect("resolve");
        assert!(resolved.starts_with(temp.path()));
    }
}
