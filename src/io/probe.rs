//! Preflight environment-capability probe.
//!
//! Runs once per session before planning. Every detection command is bounded
//! by a short timeout; a probe that fails or times out records the
//! capability as absent and never aborts the session. The rendered
//! constraint block is injected into the Planner prompt so proposed tests
//! are feasible on this host.

use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::io::process::run_command;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_OUTPUT_LIMIT: usize = 16 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerCaps {
    pub available: bool,
    pub compose: bool,
    pub buildx: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuCaps {
    pub nvidia: bool,
    pub amd: bool,
    pub apple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuda_version: Option<String>,
    #[serde(default)]
    pub devices: Vec<String>,
}

impl GpuCaps {
    pub fn any(&self) -> bool {
        self.nvidia || self.amd || self.apple
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageCaps {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Binary name the probe found, e.g. `python3` vs `python`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Languages {
    pub python: LanguageCaps,
    pub node: LanguageCaps,
    pub rust: LanguageCaps,
    pub go: LanguageCaps,
    pub java: LanguageCaps,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityTools {
    pub git: bool,
    pub grep: bool,
    pub rg: bool,
    pub trivy: bool,
    pub syft: bool,
    pub grype: bool,
    pub pip_audit: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAccess {
    pub internet: bool,
    pub github: bool,
    pub pypi: bool,
    pub npm: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultimediaTools {
    pub ffmpeg: bool,
    pub imagemagick: bool,
    pub opencv: bool,
}

/// Host capabilities, computed once per session and persisted as
/// `environment.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentCapabilities {
    pub docker: DockerCaps,
    pub gpu: GpuCaps,
    pub languages: Languages,
    pub security: SecurityTools,
    pub network: NetworkAccess,
    pub multimedia: MultimediaTools,
    pub summary: String,
}

impl EnvironmentCapabilities {
    /// Binary to use for Python subprocesses, when Python is available.
    pub fn python_command(&self) -> Option<&str> {
        self.languages.python.command.as_deref()
    }
}

/// Run the full probe suite.
#[instrument(skip_all)]
pub fn probe() -> EnvironmentCapabilities {
    let mut caps = EnvironmentCapabilities {
        docker: probe_docker(),
        gpu: probe_gpu(),
        languages: probe_languages(),
        security: probe_security_tools(),
        network: probe_network(),
        multimedia: probe_multimedia(),
        summary: String::new(),
    };
    caps.summary = render_summary(&caps);
    debug!(summary = %caps.summary, "environment probe complete");
    caps
}

fn probe_docker() -> DockerCaps {
    let Some(version) = probe_stdout("docker", &["--version"]) else {
        return DockerCaps::default();
    };
    DockerCaps {
        available: true,
        compose: probe_ok("docker", &["compose", "version"]),
        buildx: probe_ok("docker", &["buildx", "version"]),
        version: Some(version),
    }
}

fn probe_gpu() -> GpuCaps {
    let mut caps = GpuCaps::default();

    if let Some(devices) = probe_stdout(
        "nvidia-smi",
        &["--query-gpu=name,driver_version,memory.total", "--format=csv,noheader"],
    ) {
        caps.nvidia = true;
        caps.devices = devices.lines().map(|line| line.trim().to_string()).collect();
        caps.cuda_version = probe_stdout("nvcc", &["--version"]).and_then(|out| {
            out.lines()
                .find(|line| line.to_lowercase().contains("release"))
                .map(|line| line.trim().to_string())
        });
    }

    caps.amd = probe_ok("rocm-smi", &["--showproductname"]);
    caps.apple = cfg!(target_os = "macos") && cfg!(target_arch = "aarch64");
    caps
}

fn probe_languages() -> Languages {
    Languages {
        python: probe_language(&["python3", "python"], &["--version"]),
        node: probe_language(&["node"], &["--version"]),
        rust: probe_language(&["cargo"], &["--version"]),
        go: probe_language(&["go"], &["version"]),
        java: probe_language(&["java"], &["-version"]),
    }
}

/// Try each candidate binary in order; the first that responds wins. Some
/// runtimes (java) print their version to stderr, so both streams count.
fn probe_language(candidates: &[&str], args: &[&str]) -> LanguageCaps {
    for candidate in candidates {
        let mut cmd = Command::new(candidate);
        cmd.args(args);
        let Ok(output) = run_command(cmd, PROBE_TIMEOUT, PROBE_OUTPUT_LIMIT) else {
            continue;
        };
        if !output.success() {
            continue;
        }
        let banner = {
            let stdout = output.stdout_excerpt(PROBE_OUTPUT_LIMIT);
            if stdout.is_empty() {
                output.stderr_excerpt(PROBE_OUTPUT_LIMIT)
            } else {
                stdout
            }
        };
        return LanguageCaps {
            available: true,
            version: banner
                .lines()
                .next()
                .filter(|line| !line.is_empty())
                .map(str::to_string),
            command: Some(candidate.to_string()),
        };
    }
    LanguageCaps::default()
}

fn probe_security_tools() -> SecurityTools {
    SecurityTools {
        git: probe_ok("git", &["--version"]),
        grep: probe_ok("grep", &["--version"]),
        rg: probe_ok("rg", &["--version"]),
        trivy: probe_ok("trivy", &["--version"]),
        syft: probe_ok("syft", &["version"]),
        grype: probe_ok("grype", &["version"]),
        pip_audit: probe_ok("pip-audit", &["--version"]),
    }
}

fn probe_network() -> NetworkAccess {
    NetworkAccess {
        internet: probe_ok("ping", &["-c", "1", "-W", "2", "8.8.8.8"]),
        github: probe_ok("nslookup", &["github.com"]),
        pypi: probe_ok("nslookup", &["pypi.org"]),
        npm: probe_ok("nslookup", &["registry.npmjs.org"]),
    }
}

fn probe_multimedia() -> MultimediaTools {
    let opencv = probe_language(&["python3", "python"], &["--version"])
        .command
        .map(|python| probe_ok(&python, &["-c", "import cv2"]))
        .unwrap_or(false);
    MultimediaTools {
        ffmpeg: probe_ok("ffmpeg", &["-version"]),
        imagemagick: probe_ok("convert", &["--version"]),
        opencv,
    }
}

fn probe_ok(program: &str, args: &[&str]) -> bool {
    let mut cmd = Command::new(program);
    cmd.args(args);
    match run_command(cmd, PROBE_TIMEOUT, PROBE_OUTPUT_LIMIT) {
        Ok(output) => output.success(),
        Err(_) => false,
    }
}

fn probe_stdout(program: &str, args: &[&str]) -> Option<String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    match run_command(cmd, PROBE_TIMEOUT, PROBE_OUTPUT_LIMIT) {
        Ok(output) if output.success() => {
            let text = output.stdout_excerpt(PROBE_OUTPUT_LIMIT);
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

fn render_summary(caps: &EnvironmentCapabilities) -> String {
    let mut lines = Vec::new();
    match &caps.docker.version {
        Some(version) if caps.docker.available => lines.push(format!("✓ Docker: {version}")),
        _ => lines.push("✗ Docker: not available".to_string()),
    }
    if caps.gpu.nvidia {
        lines.push(format!("✓ NVIDIA GPU: {} device(s)", caps.gpu.devices.len()));
    } else if caps.gpu.amd {
        lines.push("✓ AMD GPU detected".to_string());
    } else if caps.gpu.apple {
        lines.push("✓ Apple Silicon GPU detected".to_string());
    } else {
        lines.push("✗ No GPU detected".to_string());
    }
    lines.push(if caps.network.internet {
        "✓ Network: internet access available".to_string()
    } else {
        "✗ Network: no internet access".to_string()
    });
    let langs = available_languages(&caps.languages);
    lines.push(format!(
        "✓ Languages: {}",
        if langs.is_empty() {
            "none".to_string()
        } else {
            langs.join(", ")
        }
    ));
    lines.join("\n")
}

fn available_languages(languages: &Languages) -> Vec<&'static str> {
    let mut available = Vec::new();
    for (name, caps) in [
        ("python", &languages.python),
        ("node", &languages.node),
        ("rust", &languages.rust),
        ("go", &languages.go),
        ("java", &languages.java),
    ] {
        if caps.available {
            available.push(name);
        }
    }
    available
}

/// Render the constraint block injected into the Planner prompt.
///
/// Missing capabilities are phrased as prohibitions so the Planner does not
/// propose tests the host cannot run.
pub fn render_constraints(caps: &EnvironmentCapabilities) -> String {
    let mut lines = vec![
        "ENVIRONMENT CAPABILITIES & CONSTRAINTS:".to_string(),
        String::new(),
    ];

    if !caps.docker.available {
        lines.push(
            "⚠ Docker NOT available: do not propose Docker builds or container-based tests."
                .to_string(),
        );
    }
    if !caps.gpu.any() {
        lines.push(
            "⚠ No GPU detected: do not propose GPU-dependent tests (CUDA, TensorFlow GPU, PyTorch GPU)."
                .to_string(),
        );
    }
    if !caps.network.internet {
        lines.push(
            "⚠ No network access: do not propose tests requiring downloads, git clone, or package installs."
                .to_string(),
        );
    }

    if caps.docker.available {
        let version = caps.docker.version.as_deref().unwrap_or("unknown version");
        lines.push(format!("✓ Docker available ({version}): Docker builds and container tests are allowed."));
        if caps.docker.compose {
            lines.push("✓ Docker Compose available: multi-container setups are allowed.".to_string());
        }
    }
    if caps.gpu.nvidia {
        let cuda = caps.gpu.cuda_version.as_deref().unwrap_or("CUDA version unknown");
        lines.push(format!(
            "✓ NVIDIA GPU present ({cuda}): CUDA/TensorFlow/PyTorch GPU tests are allowed."
        ));
    }
    if caps.network.internet {
        lines.push("✓ Network available: downloads, clones, and package installs are allowed.".to_string());
    }
    let langs = available_languages(&caps.languages);
    if !langs.is_empty() {
        lines.push(format!("✓ Languages: {}", langs.join(", ")));
    }
    let mut sec = Vec::new();
    for (name, present) in [
        ("git", caps.security.git),
        ("rg", caps.security.rg),
        ("trivy", caps.security.trivy),
        ("syft", caps.security.syft),
        ("grype", caps.security.grype),
        ("pip-audit", caps.security.pip_audit),
    ] {
        if present {
            sec.push(name);
        }
    }
    if !sec.is_empty() {
        lines.push(format!("✓ Security tools: {}", sec.join(", ")));
    }

    lines.push(String::new());
    lines.push("Propose only tests that match the capabilities above.".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_with(docker: bool, nvidia: bool, internet: bool) -> EnvironmentCapabilities {
        EnvironmentCapabilities {
            docker: DockerCaps {
                available: docker,
                version: docker.then(|| "Docker version 27.0".to_string()),
                ..DockerCaps::default()
            },
            gpu: GpuCaps {
                nvidia,
                cuda_version: nvidia.then(|| "release 12.4".to_string()),
                devices: if nvidia { vec!["RTX 4090".to_string()] } else { Vec::new() },
                ..GpuCaps::default()
            },
            network: NetworkAccess {
                internet,
                ..NetworkAccess::default()
            },
            languages: Languages {
                python: LanguageCaps {
                    available: true,
                    version: Some("Python 3.12.0".to_string()),
                    command: Some("python3".to_string()),
                },
                ..Languages::default()
            },
            ..EnvironmentCapabilities::default()
        }
    }

    #[test]
    fn missing_docker_renders_a_prohibition() {
        let block = render_constraints(&caps_with(false, false, false));
        assert!(block.contains("⚠ Docker NOT available"));
        assert!(block.contains("do not propose Docker builds"));
        assert!(!block.contains("✓ Docker available"));
    }

    #[test]
    fn present_capabilities_render_allowances() {
        let block = render_constraints(&caps_with(true, true, true));
        assert!(block.contains("✓ Docker available (Docker version 27.0)"));
        assert!(block.contains("✓ NVIDIA GPU present (release 12.4)"));
        assert!(!block.contains("⚠ Docker NOT available"));
        assert!(block.contains("✓ Languages: python"));
    }

    #[test]
    fn summary_covers_the_major_axes() {
        let caps = EnvironmentCapabilities {
            summary: render_summary(&caps_with(false, false, false)),
            ..caps_with(false, false, false)
        };
        assert!(caps.summary.contains("✗ Docker"));
        assert!(caps.summary.contains("✗ No GPU"));
        assert!(caps.summary.contains("Languages: python"));
    }

    #[test]
    fn capabilities_round_trip_through_json() {
        let caps = caps_with(true, false, true);
        let encoded = serde_json::to_string(&caps).expect("serialize");
        let decoded: EnvironmentCapabilities = serde_json::from_str(&encoded).expect("parse");
        assert_eq!(decoded, caps);
    }

    /// The real probe must never panic or error, whatever this host has.
    #[test]
    fn probe_runs_to_completion() {
        let caps = probe();
        assert!(!caps.summary.is_empty());
    }
}
