//! Subprocess execution with timeouts and bounded output capture.
//!
//! Every probe and test adapter funnels through [`run_command`]. Output is
//! drained concurrently while the child runs so full pipes never deadlock,
//! and only the first `output_limit_bytes` of each stream is retained.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use wait_timeout::ChildExt;

use crate::core::error::EngineError;

/// Captured outcome of a child process.
#[derive(Debug)]
pub struct CommandOutput {
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Lossy UTF-8 view of stdout, trimmed, bounded to `limit` chars.
    pub fn stdout_excerpt(&self, limit: usize) -> String {
        excerpt(&self.stdout, limit)
    }

    /// Lossy UTF-8 view of stderr, trimmed, bounded to `limit` chars.
    pub fn stderr_excerpt(&self, limit: usize) -> String {
        excerpt(&self.stderr, limit)
    }
}

fn excerpt(bytes: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(limit).collect();
    out.push_str("...");
    out
}

/// Run `cmd` with a timeout, draining stdout/stderr concurrently.
///
/// A spawn failure (binary missing, permission denied) is
/// [`EngineError::SubprocessLaunch`]; callers that treat launch failures as
/// test records downcast for it. A timeout kills the child and is reported
/// in [`CommandOutput::timed_out`], not as an error.
pub fn run_command(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|err| EngineError::SubprocessLaunch(err.to_string()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let stdout = join_reader(stdout_handle).context("join stdout reader")?;
    let stderr = join_reader(stderr_handle).context("join stderr reader")?;

    Ok(CommandOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        timed_out,
        duration: started.elapsed(),
    })
}

fn join_reader(handle: thread::JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Drain `reader` to completion, keeping at most `limit` bytes. Bytes past
/// the limit are discarded while the pipe continues to drain.
fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            buf.extend_from_slice(&chunk[..n.min(remaining)]);
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_exit_code_and_output() {
        let output = run_command(
            sh("printf hello; printf oops >&2; exit 3"),
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout_excerpt(100), "hello");
        assert_eq!(output.stderr_excerpt(100), "oops");
    }

    #[test]
    fn timeout_kills_and_reports() {
        let output = run_command(sh("sleep 5"), Duration::from_millis(100), 1024).expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[test]
    fn output_is_bounded() {
        let output = run_command(
            sh("head -c 100000 /dev/zero | tr '\\0' 'a'"),
            Duration::from_secs(5),
            64,
        )
        .expect("run");
        assert_eq!(output.stdout.len(), 64);
    }

    #[test]
    fn missing_binary_is_a_launch_failure() {
        let cmd = Command::new("definitely-not-a-real-binary-aav3");
        let err = run_command(cmd, Duration::from_secs(1), 1024).unwrap_err();
        let engine = err.downcast_ref::<EngineError>().expect("engine error");
        assert_eq!(engine.kind(), "subprocess_launch");
    }

    #[test]
    fn excerpt_truncates_long_streams() {
        let output = run_command(sh("printf abcdefghij"), Duration::from_secs(5), 1024)
            .expect("run");
        assert_eq!(output.stdout_excerpt(4), "abcd...");
    }
}
