//! Engine configuration with strict CLI > env > file > default precedence.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::error::EngineError;

/// Resolved engine configuration for one session.
///
/// The optional TOML file is intended to be edited by humans; missing fields
/// fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Approval share required for `approved = true`.
    pub consensus_threshold: f64,

    /// Upper bound on test/fix iterations.
    pub max_rounds: u32,

    /// LLM model identifier.
    pub model: String,

    /// Per-LLM-call timeout. Agents emit entire file contents as JSON, so
    /// this is deliberately generous.
    pub llm_timeout_secs: u64,

    /// Per-file Python syntax check timeout.
    pub python_syntax_timeout_secs: u64,

    /// Per-Dockerfile build timeout.
    pub docker_build_timeout_secs: u64,

    /// Unit-test run timeout.
    pub unit_test_timeout_secs: u64,

    /// Lowest vulnerability severity that fails the security scan.
    pub security_fail_severity: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consensus_threshold: 0.67,
            max_rounds: 50,
            model: "gpt-4".to_string(),
            llm_timeout_secs: 900,
            python_syntax_timeout_secs: 30,
            docker_build_timeout_secs: 600,
            unit_test_timeout_secs: 120,
            security_fail_severity: "high".to_string(),
        }
    }
}

/// CLI-level overrides, the highest-precedence layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub consensus_threshold: Option<f64>,
    pub max_rounds: Option<u32>,
    pub model: Option<String>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.consensus_threshold) {
            return Err(EngineError::Config(format!(
                "consensus_threshold must be within [0, 1], got {}",
                self.consensus_threshold
            ))
            .into());
        }
        if self.max_rounds == 0 {
            return Err(EngineError::Config("max_rounds must be > 0".to_string()).into());
        }
        if self.model.trim().is_empty() {
            return Err(EngineError::Config("model must be non-empty".to_string()).into());
        }
        for (name, value) in [
            ("llm_timeout_secs", self.llm_timeout_secs),
            ("python_syntax_timeout_secs", self.python_syntax_timeout_secs),
            ("docker_build_timeout_secs", self.docker_build_timeout_secs),
            ("unit_test_timeout_secs", self.unit_test_timeout_secs),
        ] {
            if value == 0 {
                return Err(EngineError::Config(format!("{name} must be > 0")).into());
            }
        }
        if !matches!(
            self.security_fail_severity.as_str(),
            "low" | "medium" | "high" | "critical"
        ) {
            return Err(EngineError::Config(format!(
                "security_fail_severity must be one of low/medium/high/critical, got {}",
                self.security_fail_severity
            ))
            .into());
        }
        Ok(())
    }

    /// Resolve the effective config from explicit layers.
    ///
    /// Precedence: CLI overrides > environment variables > config file >
    /// hardcoded defaults. `env` is passed explicitly so resolution stays a
    /// pure function.
    pub fn resolve(
        overrides: &ConfigOverrides,
        env: &BTreeMap<String, String>,
        config_path: Option<&Path>,
    ) -> Result<EngineConfig> {
        let mut cfg = match config_path {
            Some(path) if path.exists() => load_config_file(path)?,
            _ => EngineConfig::default(),
        };

        apply_env(&mut cfg, env)?;

        if let Some(threshold) = overrides.consensus_threshold {
            cfg.consensus_threshold = threshold;
        }
        if let Some(max_rounds) = overrides.max_rounds {
            cfg.max_rounds = max_rounds;
        }
        if let Some(model) = &overrides.model {
            cfg.model = model.clone();
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve against the real process environment.
    pub fn resolve_from_process_env(
        overrides: &ConfigOverrides,
        config_path: Option<&Path>,
    ) -> Result<EngineConfig> {
        let env: BTreeMap<String, String> = std::env::vars().collect();
        EngineConfig::resolve(overrides, &env, config_path)
    }
}

fn load_config_file(path: &Path) -> Result<EngineConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

fn apply_env(cfg: &mut EngineConfig, env: &BTreeMap<String, String>) -> Result<()> {
    if let Some(value) = env.get("AAV3_CONSENSUS_THRESHOLD") {
        cfg.consensus_threshold = parse_env("AAV3_CONSENSUS_THRESHOLD", value)?;
    }
    if let Some(value) = env.get("AAV3_MAX_ROUNDS") {
        cfg.max_rounds = parse_env("AAV3_MAX_ROUNDS", value)?;
    }
    if let Some(value) = env.get("OPENAI_MODEL") {
        cfg.model = value.clone();
    }
    if let Some(value) = env.get("AAV3_LLM_TIMEOUT_SECS") {
        cfg.llm_timeout_secs = parse_env("AAV3_LLM_TIMEOUT_SECS", value)?;
    }
    if let Some(value) = env.get("AAV3_PYTHON_SYNTAX_TIMEOUT_SECS") {
        cfg.python_syntax_timeout_secs = parse_env("AAV3_PYTHON_SYNTAX_TIMEOUT_SECS", value)?;
    }
    if let Some(value) = env.get("AAV3_DOCKER_BUILD_TIMEOUT_SECS") {
        cfg.docker_build_timeout_secs = parse_env("AAV3_DOCKER_BUILD_TIMEOUT_SECS", value)?;
    }
    if let Some(value) = env.get("AAV3_UNIT_TEST_TIMEOUT_SECS") {
        cfg.unit_test_timeout_secs = parse_env("AAV3_UNIT_TEST_TIMEOUT_SECS", value)?;
    }
    if let Some(value) = env.get("AAV3_SECURITY_FAIL_SEVERITY") {
        cfg.security_fail_severity = value.clone();
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::Config(format!("invalid {name}: {value:?}")).into())
}
