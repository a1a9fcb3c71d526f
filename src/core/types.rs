//! Shared deterministic types for the deliberation engine.
//!
//! These types define stable contracts between components and the on-disk
//! session artifacts. They must not depend on external state or I/O.

use serde::{Deserialize, Serialize};

/// The fixed cast of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentName {
    Planner,
    Researcher,
    Coder,
    Reviewer,
    Tester,
    Orchestrator,
}

impl AgentName {
    /// The five voting roles, in deliberation order.
    pub const DELIBERATORS: [AgentName; 5] = [
        AgentName::Planner,
        AgentName::Researcher,
        AgentName::Coder,
        AgentName::Reviewer,
        AgentName::Tester,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentName::Planner => "planner",
            AgentName::Researcher => "researcher",
            AgentName::Coder => "coder",
            AgentName::Reviewer => "reviewer",
            AgentName::Tester => "tester",
            AgentName::Orchestrator => "orchestrator",
        }
    }
}

/// Conversation-role tag on a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Plan,
    Research,
    Implementation,
    Review,
    TestResult,
    Consensus,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::Plan => "plan",
            MessageRole::Research => "research",
            MessageRole::Implementation => "implementation",
            MessageRole::Review => "review",
            MessageRole::TestResult => "test_result",
            MessageRole::Consensus => "consensus",
            MessageRole::System => "system",
        }
    }
}

/// One entry in the session's shared conversation log.
///
/// Append-only: messages are never edited or deleted after posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from_agent: AgentName,
    pub role: MessageRole,
    /// Free-form label, e.g. `"files_created"`, `"votes_in"`.
    pub message_type: String,
    pub content: serde_json::Value,
    /// RFC 3339, monotonically non-decreasing within a session.
    pub timestamp: String,
}

/// Planner output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub strategy: String,
    pub steps: Vec<String>,
    #[serde(default)]
    pub unknowns: Vec<String>,
    /// Early path hints; the Coder owns the authoritative file list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_to_create: Vec<String>,
}

/// Researcher confidence in its recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Researcher output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Research {
    pub findings: Vec<String>,
    pub recommendation: String,
    pub confidence: Confidence,
}

/// A single file the Coder wants materialized, relative to the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: String,
    pub content: String,
}

/// Coder output. `files_to_create` is the complete file set, not a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub files_to_create: Vec<FileSpec>,
    #[serde(default)]
    pub key_decisions: Vec<String>,
    pub status: String,
}

/// Reviewer verdict on the implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    NeedsRevision,
    Rejected,
}

impl ReviewVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewVerdict::Approved => "approved",
            ReviewVerdict::NeedsRevision => "needs_revision",
            ReviewVerdict::Rejected => "rejected",
        }
    }
}

/// Reviewer output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub verdict: ReviewVerdict,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Tester output: what to look for. The orchestrator runs the actual tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TesterNotes {
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Outcome of one executed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

/// One executed (or skipped) test, as recorded by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    pub test_name: String,
    /// Adapter suite, e.g. `"python_syntax"`, `"docker"`, `"security"`.
    pub suite: String,
    pub result: TestStatus,
    #[serde(default)]
    pub stdout_excerpt: String,
    #[serde(default)]
    pub stderr_excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Non-exit-code failure or skip cause: `"timeout"`, `"launch_failed"`,
    /// `"docker_unavailable"`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Round verdict: pass or back into the fix loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestVerdict {
    Pass,
    NeedsFixes,
}

/// Aggregated result of one TEST round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub verdict: TestVerdict,
    pub tests_executed: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,
    /// The failing records only.
    pub issues_found: Vec<TestRecord>,
}

impl TestResult {
    /// Aggregate records under the rule: pass iff no record failed and at
    /// least one passed. Skip-only rounds do not count as a pass.
    pub fn from_records(records: &[TestRecord]) -> Self {
        let passed = records
            .iter()
            .filter(|r| r.result == TestStatus::Pass)
            .count() as u32;
        let failed = records
            .iter()
            .filter(|r| r.result == TestStatus::Fail)
            .count() as u32;
        let verdict = if failed == 0 && passed > 0 {
            TestVerdict::Pass
        } else {
            TestVerdict::NeedsFixes
        };
        TestResult {
            verdict,
            tests_executed: records.len() as u32,
            tests_passed: passed,
            tests_failed: failed,
            issues_found: records
                .iter()
                .filter(|r| r.result == TestStatus::Fail)
                .cloned()
                .collect(),
        }
    }
}

/// A single agent's consensus ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    Approve,
    Reject,
}

/// Ballot with recorded reasoning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub vote: VoteChoice,
    #[serde(default)]
    pub reason: String,
}

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Done,
    Error,
    Cancelled,
}

/// One recorded failure in the final verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseError {
    pub phase: String,
    pub kind: String,
    pub message: String,
}

/// Final verdict summary, persisted as `verdict.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalVerdict {
    pub session_id: String,
    pub status: SessionStatus,
    pub approved: bool,
    pub approval_rate: f64,
    /// Echoed for auditability.
    pub consensus_threshold: f64,
    pub rounds_used: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_result: Option<TestResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_verdict: Option<ReviewVerdict>,
    pub duration_sec: f64,
    #[serde(default)]
    pub errors: Vec<PhaseError>,
}
