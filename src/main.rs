//! Thin CLI entrypoint for the deliberation engine.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use aav3::io::config::{ConfigOverrides, EngineConfig};
use aav3::io::llm::OpenAiClient;
use aav3::io::probe;
use aav3::logging;
use aav3::orchestrator::{Orchestrator, SessionRequest};

#[derive(Parser)]
#[command(
    name = "aav3",
    version,
    about = "Autonomous multi-agent deliberation engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one deliberation session for a task.
    Run {
        /// Task brief: a file path, or inline prose if no such file exists.
        #[arg(long)]
        task: String,
        /// Session id override (auto-generated hex if omitted).
        #[arg(long)]
        session_id: Option<String>,
        /// Upper bound on test/fix iterations.
        #[arg(long)]
        max_rounds: Option<u32>,
        /// Approval share required for `approved = true`.
        #[arg(long)]
        consensus_threshold: Option<f64>,
        /// LLM model identifier.
        #[arg(long)]
        model: Option<String>,
        /// Base directory for session artifacts.
        #[arg(long, default_value = "sessions")]
        artifacts_dir: PathBuf,
        /// Optional TOML config file (layered below env vars and flags).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the environment capability report.
    Probe,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            task,
            session_id,
            max_rounds,
            consensus_threshold,
            model,
            artifacts_dir,
            config,
        } => {
            let overrides = ConfigOverrides {
                consensus_threshold,
                max_rounds,
                model,
            };
            let cfg = EngineConfig::resolve_from_process_env(&overrides, config.as_deref())?;
            let task_text = read_task(&task)?;

            let client = OpenAiClient::from_env(&cfg.model)?;
            let orchestrator = Orchestrator::new(cfg, &client);
            let verdict = orchestrator.run(&SessionRequest {
                task_text,
                session_id,
                artifacts_base: artifacts_dir,
            })?;

            println!(
                "session {}: status={:?} approved={} approval_rate={:.2} rounds_used={}",
                verdict.session_id,
                verdict.status,
                verdict.approved,
                verdict.approval_rate,
                verdict.rounds_used
            );
            // Exit 0 for any clean terminal status, approved or not; only
            // an errored session is non-zero.
            Ok(match verdict.status {
                aav3::core::types::SessionStatus::Error => 1,
                _ => 0,
            })
        }
        Command::Probe => {
            let caps = probe::probe();
            println!("{}", caps.summary);
            println!();
            println!("{}", probe::render_constraints(&caps));
            Ok(0)
        }
    }
}

/// Treat the task argument as a file path when it names an existing file,
/// otherwise as inline prose.
fn read_task(task: &str) -> Result<String> {
    let path = Path::new(task);
    if path.is_file() {
        return std::fs::read_to_string(path).with_context(|| format!("read task {}", path.display()));
    }
    Ok(task.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_flags() {
        let cli = Cli::parse_from([
            "aav3",
            "run",
            "--task",
            "build a thing",
            "--max-rounds",
            "3",
            "--consensus-threshold",
            "0.5",
        ]);
        match cli.command {
            Command::Run {
                task,
                max_rounds,
                consensus_threshold,
                ..
            } => {
                assert_eq!(task, "build a thing");
                assert_eq!(max_rounds, Some(3));
                assert_eq!(consensus_threshold, Some(0.5));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn parse_probe() {
        let cli = Cli::parse_from(["aav3", "probe"]);
        assert!(matches!(cli.command, Command::Probe));
    }

    #[test]
    fn inline_task_passes_through() {
        let text = read_task("no such file, just prose").expect("task");
        assert_eq!(text, "no such file, just prose");
    }

    #[test]
    fn task_file_is_read() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("task.md");
        std::fs::write(&path, "# Task\nDo the thing.\n").expect("write");
        let text = read_task(path.to_str().expect("utf8")).expect("task");
        assert!(text.contains("Do the thing."));
    }
}
