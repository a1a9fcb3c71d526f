//! Prompt rendering for role agents.
//!
//! Templates are embedded at compile time and rendered with minijinja. The
//! conversation window is rendered as `[from_agent/role] <content>` blocks,
//! bounded per message so a single verbose agent cannot crowd out the rest
//! of the prompt.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::Message;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const RESEARCH_TEMPLATE: &str = include_str!("prompts/research.md");
const IMPLEMENT_TEMPLATE: &str = include_str!("prompts/implement.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");
const TEST_TEMPLATE: &str = include_str!("prompts/test.md");
const VOTE_TEMPLATE: &str = include_str!("prompts/vote.md");

/// Messages included in an agent's history window.
pub const HISTORY_WINDOW: usize = 10;
/// Per-message content bound in the rendered window.
const HISTORY_CONTENT_LIMIT: usize = 500;

/// Shared prompt inputs for one phase call.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub task: String,
    pub constraints: String,
    /// Rendered history window; empty at the start of the session.
    pub history: String,
}

/// Fix-pass context for the Coder: the previous implementation plus the
/// failing records, instead of the full conversation.
#[derive(Debug, Clone)]
pub struct FixContext {
    pub previous_implementation: String,
    pub test_failures: String,
}

/// Render a message window as `[from_agent/role] <content>` blocks.
pub fn render_history(messages: &[&Message]) -> String {
    let mut blocks = Vec::with_capacity(messages.len());
    for msg in messages {
        let content = msg.content.to_string();
        let bounded: String = if content.chars().count() > HISTORY_CONTENT_LIMIT {
            let mut text: String = content.chars().take(HISTORY_CONTENT_LIMIT).collect();
            text.push_str("...");
            text
        } else {
            content
        };
        blocks.push(format!(
            "[{}/{}] {}",
            msg.from_agent.as_str(),
            msg.role.as_str(),
            bounded
        ));
    }
    blocks.join("\n")
}

pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("plan", PLAN_TEMPLATE),
            ("research", RESEARCH_TEMPLATE),
            ("implement", IMPLEMENT_TEMPLATE),
            ("review", REVIEW_TEMPLATE),
            ("test", TEST_TEMPLATE),
            ("vote", VOTE_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("embedded template should be valid");
        }
        Self { env }
    }

    pub fn plan(&self, inputs: &PromptInputs) -> Result<String> {
        self.render("plan", context! {
            task => inputs.task.trim(),
            constraints => inputs.constraints.trim(),
            history => non_empty(&inputs.history),
        })
    }

    pub fn research(&self, inputs: &PromptInputs, unknowns: &[String]) -> Result<String> {
        self.render("research", context! {
            task => inputs.task.trim(),
            constraints => inputs.constraints.trim(),
            history => non_empty(&inputs.history),
            unknowns => unknowns,
        })
    }

    pub fn implement(
        &self,
        inputs: &PromptInputs,
        plan_json: &str,
        research_json: &str,
        fix: Option<&FixContext>,
    ) -> Result<String> {
        self.render("implement", context! {
            task => inputs.task.trim(),
            constraints => inputs.constraints.trim(),
            // Fix passes are bounded: previous implementation + failures only.
            history => fix.is_none().then(|| non_empty(&inputs.history)).flatten(),
            plan => non_empty(plan_json),
            research => non_empty(research_json),
            fix_previous => fix.map(|f| f.previous_implementation.as_str()),
            fix_failures => fix.map(|f| f.test_failures.as_str()),
        })
    }

    pub fn review(&self, inputs: &PromptInputs, implementation_json: &str) -> Result<String> {
        self.render("review", context! {
            task => inputs.task.trim(),
            history => non_empty(&inputs.history),
            implementation => implementation_json,
        })
    }

    pub fn test(&self, inputs: &PromptInputs, implementation_json: &str) -> Result<String> {
        self.render("test", context! {
            task => inputs.task.trim(),
            constraints => inputs.constraints.trim(),
            implementation => implementation_json,
        })
    }

    pub fn vote(&self, inputs: &PromptInputs, role: &str, summary: &str) -> Result<String> {
        self.render("vote", context! {
            task => inputs.task.trim(),
            role => role,
            summary => summary,
            history => non_empty(&inputs.history),
        })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name).context("lookup template")?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {name} template"))?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AgentName, MessageRole};
    use serde_json::json;

    fn inputs() -> PromptInputs {
        PromptInputs {
            task: "Create hello.py".to_string(),
            constraints: "⚠ Docker NOT available: do not propose Docker builds.".to_string(),
            history: String::new(),
        }
    }

    #[test]
    fn plan_prompt_carries_task_and_constraints() {
        let engine = PromptEngine::new();
        let prompt = engine.plan(&inputs()).expect("render");
        assert!(prompt.contains("Create hello.py"));
        assert!(prompt.contains("⚠ Docker NOT available"));
        assert!(prompt.contains("only a JSON object"));
    }

    #[test]
    fn research_prompt_lists_unknowns() {
        let engine = PromptEngine::new();
        let prompt = engine
            .research(&inputs(), &["Which Python version?".to_string()])
            .expect("render");
        assert!(prompt.contains("Which Python version?"));
    }

    #[test]
    fn implement_fix_pass_drops_history_and_adds_failures() {
        let engine = PromptEngine::new();
        let mut with_history = inputs();
        with_history.history = "[planner/proposal] {...}".to_string();
        let fix = FixContext {
            previous_implementation: "{\"files_to_create\": []}".to_string(),
            test_failures: "[{\"test_name\": \"syntax\"}]".to_string(),
        };
        let prompt = engine
            .implement(&with_history, "{}", "{}", Some(&fix))
            .expect("render");
        assert!(prompt.contains("previous implementation"));
        assert!(prompt.contains("syntax"));
        assert!(!prompt.contains("[planner/proposal]"));

        let initial = engine
            .implement(&with_history, "{}", "{}", None)
            .expect("render");
        assert!(initial.contains("[planner/proposal]"));
    }

    #[test]
    fn vote_prompt_names_the_role() {
        let engine = PromptEngine::new();
        let prompt = engine
            .vote(&inputs(), "reviewer", "tests passed")
            .expect("render");
        assert!(prompt.contains("reviewer"));
        assert!(prompt.contains("tests passed"));
    }

    #[test]
    fn history_blocks_are_tagged_and_bounded() {
        let long = "x".repeat(2000);
        let messages = vec![
            Message {
                from_agent: AgentName::Planner,
                role: MessageRole::Plan,
                message_type: "proposal".to_string(),
                content: json!({"strategy": "short"}),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
            },
            Message {
                from_agent: AgentName::Coder,
                role: MessageRole::Implementation,
                message_type: "artifact".to_string(),
                content: json!({"blob": long}),
                timestamp: "2026-01-01T00:00:01Z".to_string(),
            },
        ];
        let refs: Vec<&Message> = messages.iter().collect();
        let rendered = render_history(&refs);
        assert!(rendered.starts_with("[planner/plan]"));
        assert!(rendered.contains("[coder/implementation]"));
        let coder_line = rendered.lines().last().expect("line");
        assert!(coder_line.len() < 600);
        assert!(coder_line.ends_with("..."));
    }
}
