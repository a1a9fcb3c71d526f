//! Docker image builds for proposed Dockerfiles.
//!
//! The `-f` argument is always a path relative to the build context, and the
//! build context is always the workspace root. Absolute `-f` paths have
//! broken builds before; they are forbidden here.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::core::types::TestRecord;

use super::{AdapterContext, command_record, skip_record};

const SUITE: &str = "docker";

pub fn builds(ctx: &AdapterContext<'_>) -> Vec<TestRecord> {
    let dockerfiles: Vec<&str> = ctx
        .files_created
        .iter()
        .map(String::as_str)
        .filter(|path| is_dockerfile(path))
        .collect();
    if dockerfiles.is_empty() {
        return Vec::new();
    }

    if !ctx.caps.docker.available {
        return dockerfiles
            .into_iter()
            .map(|path| skip_record(path, SUITE, "docker_unavailable"))
            .collect();
    }

    let timeout = Duration::from_secs(ctx.config.docker_build_timeout_secs);
    dockerfiles
        .into_iter()
        .enumerate()
        .map(|(index, path)| {
            let tag = image_tag(ctx.session_id, index);
            let mut cmd = Command::new("docker");
            cmd.args(["build", "-f", path, "-t", tag.as_str(), "."]);
            command_record(path, SUITE, cmd, ctx.workspace_dir, timeout)
        })
        .collect()
}

pub fn image_tag(session_id: &str, index: usize) -> String {
    format!("aav3-session-{session_id}-{index}")
}

fn is_dockerfile(path: &str) -> bool {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains("Dockerfile"))
}
