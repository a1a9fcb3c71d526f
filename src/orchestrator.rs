//! Six-phase deliberation state machine.
//!
//! PROBE → PLAN → RESEARCH → IMPLEMENT → TEST → [FIX_LOOP] → REVIEW →
//! CONSENSUS. The loop decision is structural, never delegated to an agent:
//! while the test verdict is `needs_fixes` and rounds remain, the Coder gets
//! a bounded fix context and the workspace is rewritten. Consensus is
//! recorded but never gates termination.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde_json::json;
use tracing::{info, warn};

use crate::adapters::{self, AdapterContext};
use crate::agents::AgentRuntime;
use crate::agents::prompt::{FixContext, HISTORY_WINDOW, PromptInputs, render_history};
use crate::core::consensus::{ConsensusResult, tally};
use crate::core::error::EngineError;
use crate::core::types::{
    AgentName, FinalVerdict, Implementation, MessageRole, PhaseError, Review, SessionStatus,
    TestResult, TestVerdict, Vote, VoteChoice,
};
use crate::io::config::EngineConfig;
use crate::io::llm::LlmClient;
use crate::io::probe::{self, EnvironmentCapabilities};
use crate::io::session::{SessionPaths, write_json};
use crate::io::workspace::materialize;
use crate::memory::SharedMemory;

/// Failing records carried into a fix prompt, at most.
const FIX_CONTEXT_ISSUES: usize = 10;

/// Cooperative cancellation flag, checked at every phase boundary.
///
/// The in-flight subprocess or LLM call completes (or times out) first;
/// there is no mid-phase rollback. A cancelled session still writes
/// `verdict.json` and preserves its partial workspace.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Inputs for one session run.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Free-form prose task brief.
    pub task_text: String,
    /// Optional caller-chosen id, for reproducible directory naming.
    pub session_id: Option<String>,
    /// Base directory under which `aav3_<id>/` is created.
    pub artifacts_base: PathBuf,
}

/// One-session deliberation driver. Construct one orchestrator per session;
/// nothing here is shared global state.
pub struct Orchestrator<'a, C: LlmClient> {
    config: EngineConfig,
    client: &'a C,
    cancel: CancelToken,
    /// Probe override for embedding and tests; `None` probes the real host.
    capabilities: Option<EnvironmentCapabilities>,
}

impl<'a, C: LlmClient> Orchestrator<'a, C> {
    pub fn new(config: EngineConfig, client: &'a C) -> Self {
        Self {
            config,
            client,
            cancel: CancelToken::new(),
            capabilities: None,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_capabilities(mut self, caps: EnvironmentCapabilities) -> Self {
        self.capabilities = Some(caps);
        self
    }

    /// Drive one session end to end. `verdict.json` is written for every
    /// terminal status, including errors and cancellation.
    pub fn run(&self, request: &SessionRequest) -> Result<FinalVerdict> {
        let started = Instant::now();
        self.config.validate()?;

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(generate_session_id);
        let paths = SessionPaths::new(&request.artifacts_base, &session_id);
        paths.create_all()?;
        info!(session_id = %session_id, root = %paths.root.display(), "session started");

        let mut session = Session {
            config: &self.config,
            runtime: AgentRuntime::new(
                self.client,
                Duration::from_secs(self.config.llm_timeout_secs),
            ),
            memory: SharedMemory::new(paths.conversation_path.clone()),
            paths,
            cancel: self.cancel.clone(),
            task: request.task_text.clone(),
            caps: EnvironmentCapabilities::default(),
            constraints: String::new(),
            phase: "init",
            rounds_used: 0,
            test_result: None,
            review: None,
            consensus: None,
            errors: Vec::new(),
        };

        let status = match session.deliberate(self.capabilities.clone()) {
            Ok(()) => SessionStatus::Done,
            Err(err) => {
                let (kind, cancelled) = match err.downcast_ref::<EngineError>() {
                    Some(EngineError::Cancelled) => ("cancelled", true),
                    Some(engine) => (engine.kind(), false),
                    None => ("internal", false),
                };
                if cancelled {
                    info!(phase = session.phase, "session cancelled");
                    SessionStatus::Cancelled
                } else {
                    warn!(phase = session.phase, error = %err, "session failed");
                    session.errors.push(PhaseError {
                        phase: session.phase.to_string(),
                        kind: kind.to_string(),
                        message: format!("{err:#}"),
                    });
                    SessionStatus::Error
                }
            }
        };

        let verdict = session.final_verdict(&session_id, status, started.elapsed());
        write_json(&session.paths.verdict_path, &verdict)?;
        info!(
            session_id = %session_id,
            status = ?verdict.status,
            approved = verdict.approved,
            rounds_used = verdict.rounds_used,
            "session complete"
        );
        Ok(verdict)
    }
}

struct Session<'a, C: LlmClient> {
    config: &'a EngineConfig,
    runtime: AgentRuntime<'a, C>,
    memory: SharedMemory,
    paths: SessionPaths,
    cancel: CancelToken,
    task: String,
    caps: EnvironmentCapabilities,
    constraints: String,
    phase: &'static str,
    rounds_used: u32,
    test_result: Option<TestResult>,
    review: Option<Review>,
    consensus: Option<ConsensusResult>,
    errors: Vec<PhaseError>,
}

impl<'a, C: LlmClient> Session<'a, C> {
    fn deliberate(&mut self, caps_override: Option<EnvironmentCapabilities>) -> Result<()> {
        // PROBE. Probe failures only reduce capabilities; never abort.
        self.phase = "probe";
        self.caps = caps_override.unwrap_or_else(probe::probe);
        self.constraints = probe::render_constraints(&self.caps);
        write_json(&self.paths.environment_path, &self.caps)?;
        self.memory.post(
            AgentName::Orchestrator,
            MessageRole::System,
            "session_started",
            json!({
                "task": self.task,
                "created_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                "consensus_threshold": self.config.consensus_threshold,
                "max_rounds": self.config.max_rounds,
                "environment_summary": self.caps.summary,
            }),
        )?;

        // PLAN.
        self.check_cancel()?;
        self.phase = "plan";
        let plan = self.retry_llm(|s| s.runtime.propose_plan(&s.inputs()))?;
        write_json(&self.paths.plan_path, &plan)?;
        self.memory.post(
            AgentName::Planner,
            MessageRole::Plan,
            "proposal",
            serde_json::to_value(&plan)?,
        )?;
        info!(steps = plan.steps.len(), unknowns = plan.unknowns.len(), "plan ready");

        // RESEARCH. Invoked even with zero unknowns; it may add
        // confirmations.
        self.check_cancel()?;
        self.phase = "research";
        let research = self.retry_llm(|s| s.runtime.research(&s.inputs(), &plan.unknowns))?;
        write_json(&self.paths.research_path, &research)?;
        self.memory.post(
            AgentName::Researcher,
            MessageRole::Research,
            "answer",
            serde_json::to_value(&research)?,
        )?;

        // IMPLEMENT, round 0.
        self.check_cancel()?;
        self.phase = "implement";
        let plan_json = serde_json::to_string_pretty(&plan)?;
        let research_json = serde_json::to_string_pretty(&research)?;
        let mut implementation =
            self.retry_llm(|s| s.runtime.implement(&s.inputs(), &plan_json, &research_json))?;
        let mut files_created = materialize(&self.paths.workspace_dir, &implementation.files_to_create)?;
        self.record_implementation(&implementation, 0, "artifact")?;

        // TEST and the bounded fix loop.
        let mut no_change_round = false;
        loop {
            self.check_cancel()?;
            self.phase = "test";
            let implementation_json = serde_json::to_string_pretty(&implementation)?;
            let notes = self
                .retry_llm(|s| s.runtime.propose_tests(&s.inputs(), &implementation_json))?;
            self.memory.post(
                AgentName::Tester,
                MessageRole::TestResult,
                "test_plan",
                serde_json::to_value(&notes)?,
            )?;

            let records = adapters::run_all(&AdapterContext {
                workspace_dir: &self.paths.workspace_dir,
                files_created: &files_created,
                caps: &self.caps,
                session_id: &self.paths.session_id,
                config: self.config,
            });
            let result = TestResult::from_records(&records);
            write_json(&self.paths.test_round_path(self.rounds_used), &result)?;
            write_json(&self.paths.test_result_path, &result)?;
            self.memory.post(
                AgentName::Tester,
                MessageRole::TestResult,
                "test_result",
                serde_json::to_value(&result)?,
            )?;
            info!(
                round = self.rounds_used,
                verdict = ?result.verdict,
                executed = result.tests_executed,
                failed = result.tests_failed,
                "test round complete"
            );
            let verdict = result.verdict;
            self.test_result = Some(result);

            if verdict == TestVerdict::Pass {
                break;
            }
            if self.rounds_used >= self.config.max_rounds {
                // Round budget spent: carry the failing result forward into
                // a forced review rather than retrying indefinitely.
                warn!(max_rounds = self.config.max_rounds, "round budget exhausted");
                break;
            }
            if no_change_round {
                // The previous fix changed nothing and the verdict is
                // unchanged; a further round would spin.
                warn!("fix pass produced no change; leaving the loop");
                break;
            }

            self.check_cancel()?;
            self.phase = "fix";
            let fix = FixContext {
                previous_implementation: serde_json::to_string_pretty(&implementation)?,
                test_failures: serde_json::to_string_pretty(
                    &self
                        .test_result
                        .as_ref()
                        .map(|r| {
                            r.issues_found
                                .iter()
                                .take(FIX_CONTEXT_ISSUES)
                                .cloned()
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default(),
                )?,
            };
            let fixed = self.retry_llm(|s| s.runtime.fix(&s.inputs(), &fix))?;
            self.rounds_used += 1;

            if fixed.files_to_create.is_empty() && !implementation.files_to_create.is_empty() {
                no_change_round = true;
                // The empty reply is not a new implementation: the current
                // snapshot, round history, and conversation keep carrying
                // the implementation the workspace still holds.
                self.record_implementation_round(
                    &implementation,
                    self.rounds_used,
                    "artifact_unchanged",
                )?;
            } else {
                implementation = fixed;
                files_created =
                    materialize(&self.paths.workspace_dir, &implementation.files_to_create)?;
                self.record_implementation(&implementation, self.rounds_used, "artifact_fixed")?;
            }
        }

        // REVIEW. Reached on pass or once the round budget is spent.
        self.check_cancel()?;
        self.phase = "review";
        let implementation_json = serde_json::to_string_pretty(&implementation)?;
        let review = self.retry_llm(|s| s.runtime.review(&s.inputs(), &implementation_json))?;
        write_json(&self.paths.review_path, &review)?;
        self.memory.post(
            AgentName::Reviewer,
            MessageRole::Review,
            "review",
            serde_json::to_value(&review)?,
        )?;
        self.review = Some(review);

        // CONSENSUS. Recorded, never gating: the session terminates either
        // way.
        self.check_cancel()?;
        self.phase = "consensus";
        let consensus = self.consensus_round(&implementation)?;
        write_json(&self.paths.consensus_path, &consensus)?;
        self.memory.post(
            AgentName::Orchestrator,
            MessageRole::Consensus,
            "votes_in",
            serde_json::to_value(&consensus)?,
        )?;
        self.consensus = Some(consensus);
        Ok(())
    }

    /// Ask every agent for a ballot. An unparseable or failed ballot is a
    /// reject, not a session error.
    fn consensus_round(&mut self, implementation: &Implementation) -> Result<ConsensusResult> {
        let summary = format!(
            "Implementation status: {}\nFiles: {}\nReview verdict: {}\nTest verdict: {}\nTests passed/failed: {}/{}",
            implementation.status,
            implementation.files_to_create.len(),
            self.review
                .as_ref()
                .map(|r| r.verdict.as_str())
                .unwrap_or("unknown"),
            self.test_result
                .as_ref()
                .map(|t| match t.verdict {
                    TestVerdict::Pass => "pass",
                    TestVerdict::NeedsFixes => "needs_fixes",
                })
                .unwrap_or("unknown"),
            self.test_result.as_ref().map(|t| t.tests_passed).unwrap_or(0),
            self.test_result.as_ref().map(|t| t.tests_failed).unwrap_or(0),
        );

        let mut ballots: BTreeMap<AgentName, Vote> = BTreeMap::new();
        for agent in AgentName::DELIBERATORS {
            let inputs = self.inputs();
            let ballot = match self.runtime.vote(agent, &inputs, &summary) {
                Ok(vote) => vote,
                Err(err) => {
                    warn!(agent = agent.as_str(), error = %err, "ballot rejected by default");
                    Vote {
                        vote: VoteChoice::Reject,
                        reason: format!("ballot invalid: {err}"),
                    }
                }
            };
            self.memory.post(
                agent,
                MessageRole::Consensus,
                "vote",
                serde_json::to_value(&ballot)?,
            )?;
            ballots.insert(agent, ballot);
        }
        Ok(tally(&ballots, self.config.consensus_threshold))
    }

    fn record_implementation(
        &mut self,
        implementation: &Implementation,
        round: u32,
        message_type: &str,
    ) -> Result<()> {
        write_json(&self.paths.implementation_path, implementation)?;
        self.record_implementation_round(implementation, round, message_type)
    }

    /// Freeze the implementation in effect for `round` and post it to the
    /// conversation, without touching the current snapshot.
    fn record_implementation_round(
        &mut self,
        implementation: &Implementation,
        round: u32,
        message_type: &str,
    ) -> Result<()> {
        write_json(&self.paths.implementation_round_path(round), implementation)?;
        self.memory.post(
            AgentName::Coder,
            MessageRole::Implementation,
            message_type,
            serde_json::to_value(implementation)?,
        )?;
        info!(
            round,
            files = implementation.files_to_create.len(),
            "implementation recorded"
        );
        Ok(())
    }

    fn inputs(&self) -> PromptInputs {
        let window = self.memory.history(Some(HISTORY_WINDOW), None);
        PromptInputs {
            task: self.task.clone(),
            constraints: self.constraints.clone(),
            history: render_history(&window),
        }
    }

    /// One in-place retry for transient LLM failures. Malformed output has
    /// already used its nudge retry inside the agent; it is terminal here.
    fn retry_llm<T>(&mut self, op: impl Fn(&mut Self) -> Result<T>) -> Result<T> {
        match op(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                let transient = matches!(
                    err.downcast_ref::<EngineError>(),
                    Some(EngineError::LlmTimeout { .. }) | Some(EngineError::LlmTransport(_))
                );
                if !transient {
                    return Err(err);
                }
                warn!(phase = self.phase, error = %err, "transient llm failure, retrying once");
                op(self)
            }
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }
        Ok(())
    }

    fn final_verdict(
        &self,
        session_id: &str,
        status: SessionStatus,
        elapsed: Duration,
    ) -> FinalVerdict {
        let (approved, approval_rate) = self
            .consensus
            .as_ref()
            .map(|c| (c.approved, c.approval_rate))
            .unwrap_or((false, 0.0));
        FinalVerdict {
            session_id: session_id.to_string(),
            status,
            approved,
            approval_rate,
            consensus_threshold: self.config.consensus_threshold,
            rounds_used: self.rounds_used,
            test_result: self.test_result.clone(),
            review_verdict: self.review.as_ref().map(|r| r.verdict),
            duration_sec: elapsed.as_secs_f64(),
            errors: self.errors.clone(),
        }
    }
}

/// Opaque hex session id, unique per run.
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:08x}", rng.gen_range(0..=u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_lowercase_hex() {
        let id = generate_session_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
