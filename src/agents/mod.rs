//! Role-specialized agents.
//!
//! Each role is a pure function of (task, environment constraints, history
//! window, role prompt) to a role-shaped JSON object. Agents never touch the
//! workspace; all filesystem effects are applied by the orchestrator.
//!
//! Every call runs the same pipeline: render prompt, call the LLM, extract
//! one JSON object from the reply, validate it against the role's JSON
//! Schema, parse. A shape failure earns exactly one corrective retry before
//! the error propagates.

pub mod prompt;

use std::time::Duration;

use anyhow::Result;
use jsonschema::Draft;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::error::EngineError;
use crate::core::extract::extract_object;
use crate::core::types::{
    AgentName, Implementation, Plan, Research, Review, TesterNotes, Vote,
};
use crate::io::llm::{LlmClient, LlmRequest};
use self::prompt::{FixContext, PromptEngine, PromptInputs};

const PLANNER_SCHEMA: &str = include_str!("schemas/planner_output.schema.json");
const RESEARCHER_SCHEMA: &str = include_str!("schemas/researcher_output.schema.json");
const CODER_SCHEMA: &str = include_str!("schemas/coder_output.schema.json");
const REVIEWER_SCHEMA: &str = include_str!("schemas/reviewer_output.schema.json");
const TESTER_SCHEMA: &str = include_str!("schemas/tester_output.schema.json");
const VOTE_SCHEMA: &str = include_str!("schemas/vote_output.schema.json");

/// File-heavy coder replies need more room than the 4k default.
const CODER_MAX_TOKENS: u32 = 16_000;

const PLANNER_SYSTEM: &str = "You are the strategic planning agent in a multi-agent system. \
Break tasks into concrete, actionable steps, identify what is unknown and needs research, \
and respect the stated environment constraints. Reply with JSON only.";

const RESEARCHER_SYSTEM: &str = "You are the research agent in a multi-agent system. \
Resolve open questions with short, verifiable facts and recommend an approach. \
Reply with JSON only.";

const CODER_SYSTEM: &str = "You are the coding agent in a multi-agent system. \
Implement the agreed plan as complete files with full contents, explain key decisions, \
and keep all paths relative to the workspace. Reply with JSON only.";

const REVIEWER_SYSTEM: &str = "You are the code review agent in a multi-agent system. \
Check implementations for bugs, security issues, and completeness; give specific, \
actionable feedback. Reply with JSON only.";

const TESTER_SYSTEM: &str = "You are the testing agent in a multi-agent system. \
Identify what objective validation should focus on and where failures are likely. \
Reply with JSON only.";

fn system_prompt(role: AgentName) -> &'static str {
    match role {
        AgentName::Planner => PLANNER_SYSTEM,
        AgentName::Researcher => RESEARCHER_SYSTEM,
        AgentName::Coder => CODER_SYSTEM,
        AgentName::Reviewer => REVIEWER_SYSTEM,
        AgentName::Tester => TESTER_SYSTEM,
        AgentName::Orchestrator => "You are the orchestrator.",
    }
}

/// The five role agents bound to one LLM client.
pub struct AgentRuntime<'a, C: LlmClient> {
    client: &'a C,
    engine: PromptEngine,
    llm_timeout: Duration,
}

impl<'a, C: LlmClient> AgentRuntime<'a, C> {
    pub fn new(client: &'a C, llm_timeout: Duration) -> Self {
        Self {
            client,
            engine: PromptEngine::new(),
            llm_timeout,
        }
    }

    pub fn propose_plan(&self, inputs: &PromptInputs) -> Result<Plan> {
        let user = self.engine.plan(inputs)?;
        self.call_validated(AgentName::Planner, &user, PLANNER_SCHEMA, None)
    }

    pub fn research(&self, inputs: &PromptInputs, unknowns: &[String]) -> Result<Research> {
        let user = self.engine.research(inputs, unknowns)?;
        self.call_validated(AgentName::Researcher, &user, RESEARCHER_SCHEMA, None)
    }

    pub fn implement(
        &self,
        inputs: &PromptInputs,
        plan_json: &str,
        research_json: &str,
    ) -> Result<Implementation> {
        let user = self.engine.implement(inputs, plan_json, research_json, None)?;
        self.call_validated(AgentName::Coder, &user, CODER_SCHEMA, Some(CODER_MAX_TOKENS))
    }

    /// Fix pass: the Coder sees only the previous implementation and the
    /// failing records, keeping the prompt bounded across many rounds.
    pub fn fix(&self, inputs: &PromptInputs, fix: &FixContext) -> Result<Implementation> {
        let user = self.engine.implement(inputs, "", "", Some(fix))?;
        self.call_validated(AgentName::Coder, &user, CODER_SCHEMA, Some(CODER_MAX_TOKENS))
    }

    pub fn review(&self, inputs: &PromptInputs, implementation_json: &str) -> Result<Review> {
        let user = self.engine.review(inputs, implementation_json)?;
        self.call_validated(AgentName::Reviewer, &user, REVIEWER_SCHEMA, None)
    }

    pub fn propose_tests(
        &self,
        inputs: &PromptInputs,
        implementation_json: &str,
    ) -> Result<TesterNotes> {
        let user = self.engine.test(inputs, implementation_json)?;
        self.call_validated(AgentName::Tester, &user, TESTER_SCHEMA, None)
    }

    /// Consensus ballot for any role.
    pub fn vote(&self, role: AgentName, inputs: &PromptInputs, summary: &str) -> Result<Vote> {
        let user = self.engine.vote(inputs, role.as_str(), summary)?;
        self.call_validated(role, &user, VOTE_SCHEMA, None)
    }

    fn call_validated<T: DeserializeOwned>(
        &self,
        role: AgentName,
        user_prompt: &str,
        schema: &str,
        max_tokens: Option<u32>,
    ) -> Result<T> {
        match self.attempt(role, user_prompt, schema, max_tokens) {
            Ok(value) => Ok(value),
            Err(err) => {
                let Some(engine) = err.downcast_ref::<EngineError>() else {
                    return Err(err);
                };
                let EngineError::MalformedAgentOutput { detail, .. } = engine else {
                    return Err(err);
                };
                warn!(role = role.as_str(), detail = %detail, "agent reply malformed, retrying once");
                let nudge = format!(
                    "{user_prompt}\n\nYour previous reply was not valid ({detail}). \
                     Return only a JSON object matching exactly the shape specified above."
                );
                self.attempt(role, &nudge, schema, max_tokens)
            }
        }
    }

    fn attempt<T: DeserializeOwned>(
        &self,
        role: AgentName,
        user_prompt: &str,
        schema: &str,
        max_tokens: Option<u32>,
    ) -> Result<T> {
        let mut request =
            LlmRequest::new(system_prompt(role), user_prompt).with_timeout(self.llm_timeout);
        if let Some(max_tokens) = max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        let reply = self.client.complete(&request)?;
        let value = extract_object(&reply)?;
        validate_shape(&value, schema, &reply)?;
        let parsed = serde_json::from_value(value)
            .map_err(|err| EngineError::malformed(format!("shape mismatch: {err}"), &reply))?;
        debug!(role = role.as_str(), "agent reply validated");
        Ok(parsed)
    }
}

/// Validate an extracted object against a role's JSON Schema (Draft
/// 2020-12). Violations are reported together, as malformed output.
fn validate_shape(instance: &Value, schema_src: &str, raw: &str) -> Result<()> {
    let schema: Value = serde_json::from_str(schema_src).expect("embedded schema should be valid");
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("embedded schema should compile");
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(EngineError::malformed(
            format!("schema violations: {}", messages.join("; ")),
            raw,
        )
        .into());
    }
    Ok(())
}
