//! Coding agent loop.
//!
//! [`Agent::run`] drives the model against one repository: each iteration
//! sends the whole conversation plus the tool catalog, runs the requested
//! tools in order through a [`RepositoryAdapter`], and appends one assistant
//! turn and one bundled tool-result turn. The loop ends when the model stops
//! asking for tools, the model call fails, a landing fails, or the iteration
//! bound is reached.

mod emitter;
pub mod prompt;
mod staging;
pub mod tools;
mod types;

use std::sync::Arc;

use agent_core::provider::{
    Completion, CompletionRequest, LlmProvider, ToolUse, collect_completion,
};

pub use emitter::{StepEmitter, StepStream};
pub use staging::{StagedWrite, StagingBuffer};
pub use tools::{CATALOG_VERSION, ToolInput, ToolInputError, ToolName, catalog};
pub use types::{
    AgentStep, Content, ContentBlock, Conversation, LandingMode, LandingResult, Message, Role,
    RunOutcome, StopReason, TerminationReason, Tool, Usage,
};

use crate::core::repo::{RepoHost, RepositoryAdapter, ToolEffect};

/// Default bound on tool-using iterations per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Default response size cap per model call.
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Agent that edits a repository through tools.
#[derive(Clone)]
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    max_iterations: usize,
    mode: LandingMode,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("max_iterations", &self.max_iterations)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Agent {
    /// Create an agent with a provider.
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            mode: LandingMode::default(),
        }
    }

    /// Bound the number of tool-using iterations (at least one).
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: LandingMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub const fn mode(&self) -> LandingMode {
        self.mode
    }

    #[must_use]
    pub const fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run the loop to termination.
    ///
    /// Never fails: model and landing failures are reported as `error` steps
    /// and reflected in [`RunOutcome::termination`]. Staged writes are always
    /// returned, landed or not.
    pub async fn run(
        &self,
        host: &dyn RepoHost,
        system: &str,
        prompt: &str,
        emitter: &mut StepEmitter<'_>,
    ) -> RunOutcome {
        let tools = catalog(self.mode);
        let mut adapter = RepositoryAdapter::new(host, self.mode);
        let mut conversation = Conversation::with_system(system).with_user_text(prompt);
        let mut iterations = 0;
        let mut final_text = String::new();

        tracing::info!(
            provider = self.provider.name(),
            model = %self.model,
            mode = %self.mode,
            max_iterations = self.max_iterations,
            "starting agent run"
        );

        let termination = loop {
            let completion = match self.complete(&conversation, &tools, iterations).await {
                Ok(completion) => completion,
                Err(e) => {
                    tracing::warn!(iteration = iterations, error = %e, "model call failed");
                    emitter.emit(AgentStep::Error {
                        message: format!("Model request failed: {e}"),
                    });
                    break TerminationReason::ApiError;
                }
            };

            let text = completion.text();
            if !text.trim().is_empty() {
                emitter.emit(AgentStep::Thinking { text: text.clone() });
            }

            if completion.is_final() {
                final_text = text;
                emitter.emit(AgentStep::Done);
                break TerminationReason::Finished;
            }

            let calls = completion.tool_uses();
            conversation = conversation.with_assistant_turn(completion.blocks);

            let mut results = Vec::with_capacity(calls.len());
            let mut landing_failed = false;

            for call in &calls {
                if landing_failed {
                    results.push(ContentBlock::tool_result(
                        &call.id,
                        "Not executed: landing failed earlier in this turn",
                        true,
                    ));
                    continue;
                }

                emitter.emit(AgentStep::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });

                match adapter.execute(call).await {
                    Ok(execution) => {
                        emitter.emit(AgentStep::ToolResult {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            summary: summarize(&execution.content),
                            is_error: execution.is_error,
                        });
                        if let Some(effect) = execution.effect {
                            emitter.emit(effect_step(effect));
                        }
                        results.push(ContentBlock::tool_result(
                            &call.id,
                            execution.content,
                            execution.is_error,
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(tool = %call.name, error = %e, "landing failed");
                        let message = format!("Landing failed: {e}");
                        emitter.emit(AgentStep::ToolResult {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            summary: summarize(&message),
                            is_error: true,
                        });
                        emitter.emit(AgentStep::Error {
                            message: message.clone(),
                        });
                        results.push(ContentBlock::tool_result(
                            &call.id,
                            format!("Error: {message}"),
                            true,
                        ));
                        landing_failed = true;
                    }
                }
            }

            conversation = conversation.with_tool_results(results);
            iterations += 1;

            if landing_failed {
                break TerminationReason::LandingFailed;
            }
            if iterations >= self.max_iterations {
                tracing::info!(iterations, "iteration limit reached");
                break TerminationReason::IterationLimit;
            }
        };

        let (staging, landing) = adapter.into_parts();
        tracing::info!(
            ?termination,
            iterations,
            staged = staging.len(),
            landed = landing.is_some(),
            "agent run finished"
        );

        RunOutcome {
            staged: staging.into_writes(),
            landing,
            iterations,
            termination,
            final_text,
            conversation,
        }
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        tools: &[Tool],
        iteration: usize,
    ) -> agent_core::error::Result<Completion> {
        tracing::debug!(iteration, messages = conversation.len(), "requesting completion");

        let request = CompletionRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: conversation.messages().to_vec(),
            system: conversation.system().map(String::from),
            tools: Some(tools.to_vec()),
        };

        let stream = self.provider.stream(request).await?;
        let completion = collect_completion(stream, |_| {}).await?;

        if let Some(usage) = completion.usage {
            tracing::debug!(
                iteration,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "completion received"
            );
        }

        Ok(completion)
    }
}

fn effect_step(effect: ToolEffect) -> AgentStep {
    match effect {
        ToolEffect::Staged {
            write,
            original_content,
        } => AgentStep::FileWrite {
            path: write.path,
            content: write.content,
            description: write.description,
            original_content,
        },
        ToolEffect::Landed(result) => AgentStep::landed(&result),
    }
}

/// First line of a tool result, shortened for display.
fn summarize(content: &str) -> String {
    const MAX_CHARS: usize = 120;

    let mut lines = content.lines();
    let first = lines.next().unwrap_or_default();
    let rest = lines.count();

    let mut summary: String = first.chars().take(MAX_CHARS).collect();
    if first.chars().count() > MAX_CHARS {
        summary.push_str("...");
    }
    if rest > 0 {
        summary.push_str(&format!(" (+{rest} more lines)"));
    }
    summary
}

/// Short human-readable rendering of a tool call for logs and terminals.
#[must_use]
pub fn describe_call(call: &ToolUse) -> String {
    const MAX_LEN: usize = 60;

    let raw = ["path", "query", "branch_name", "commit_message"]
        .iter()
        .find_map(|key| call.input.get(key).and_then(|v| v.as_str()))
        .unwrap_or_default();

    let raw = if raw.chars().count() > MAX_LEN {
        format!("{}...", raw.chars().take(MAX_LEN - 3).collect::<String>())
    } else {
        raw.to_string()
    };

    format!("{}({raw})", call.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{MemoryHost, ScriptedProvider, ScriptedTurn};

    fn agent(provider: ScriptedProvider) -> (Agent, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        (Agent::new(provider.clone(), "test-model", 1024), provider)
    }

    async fn run(agent: &Agent, host: &MemoryHost) -> (RunOutcome, Vec<AgentStep>) {
        let mut steps = Vec::new();
        let outcome = {
            let mut emitter = StepEmitter::new(|s| steps.push(s));
            agent.run(host, "system", "Add a health check", &mut emitter).await
        };
        (outcome, steps)
    }

    fn kinds(steps: &[AgentStep]) -> Vec<&'static str> {
        steps.iter().map(AgentStep::kind).collect()
    }

    #[tokio::test]
    async fn text_only_reply_finishes_after_one_call() {
        let (agent, provider) = agent(ScriptedProvider::new([ScriptedTurn::text("Nothing to do.")]));
        let host = MemoryHost::new();

        let (outcome, steps) = run(&agent, &host).await;

        assert_eq!(outcome.termination, TerminationReason::Finished);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.final_text, "Nothing to do.");
        assert!(outcome.staged.is_empty());
        assert_eq!(kinds(&steps), ["thinking", "done"]);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn truncated_reply_finishes_without_running_its_tools() {
        let (agent, provider) = agent(ScriptedProvider::new([ScriptedTurn::tools(
            "Writing the route",
            [(
                "write_file",
                serde_json::json!({"path": "a.ts", "content": "1", "description": "d"}),
            )],
        )
        .stopped_by(StopReason::MaxTokens)]));
        let host = MemoryHost::new();

        let (outcome, steps) = run(&agent, &host).await;

        assert_eq!(outcome.termination, TerminationReason::Finished);
        assert_eq!(kinds(&steps), ["thinking", "done"]);
        assert!(outcome.staged.is_empty());
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.final_text, "Writing the route");
        assert_eq!(provider.calls(), 1);
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn each_iteration_appends_one_turn_pair() {
        let (agent, provider) = agent(ScriptedProvider::new([
            ScriptedTurn::tools(
                "Looking around.",
                [
                    ("list_directory", serde_json::json!({})),
                    ("read_file", serde_json::json!({"path": "a.ts"})),
                ],
            ),
            ScriptedTurn::text("Done."),
        ]));
        let host = MemoryHost::new().with_file("main", "a.ts", "x");

        let (outcome, steps) = run(&agent, &host).await;

        let messages = outcome.conversation.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[2].is_tool_result_turn());
        assert!(matches!(&messages[2].content, Content::Blocks(b) if b.len() == 2));

        assert_eq!(
            kinds(&steps),
            ["thinking", "tool_call", "tool_result", "tool_call", "tool_result", "thinking", "done"]
        );

        let second_request = &provider.requests()[1];
        assert_eq!(second_request.messages.len(), 3);
        assert_eq!(second_request.system.as_deref(), Some("system"));
    }

    #[tokio::test]
    async fn model_failure_ends_the_run_with_one_error() {
        let (agent, _) = agent(ScriptedProvider::new([
            ScriptedTurn::tools(
                "",
                [(
                    "write_file",
                    serde_json::json!({"path": "a.ts", "content": "1", "description": "d"}),
                )],
            ),
            ScriptedTurn::fail("rate limited"),
        ]));
        let host = MemoryHost::new();

        let (outcome, steps) = run(&agent, &host).await;

        assert_eq!(outcome.termination, TerminationReason::ApiError);
        assert_eq!(outcome.staged.len(), 1);
        let errors: Vec<_> = steps
            .iter()
            .filter(|s| matches!(s, AgentStep::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn iteration_bound_is_respected() {
        let (agent, provider) = agent(
            ScriptedProvider::new([]).repeat_forever(ScriptedTurn::tools(
                "",
                [("list_directory", serde_json::json!({}))],
            )),
        );
        let agent = agent.with_max_iterations(3);
        let host = MemoryHost::new();

        let (outcome, steps) = run(&agent, &host).await;

        assert_eq!(outcome.termination, TerminationReason::IterationLimit);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(provider.calls(), 3);
        assert!(!steps.iter().any(|s| matches!(s, AgentStep::Error { .. })));
        assert!(!steps.iter().any(|s| matches!(s, AgentStep::Done)));
    }

    #[tokio::test]
    async fn landing_failure_skips_remaining_calls() {
        let (agent, _) = agent(ScriptedProvider::new([ScriptedTurn::tools(
            "",
            [
                (
                    "write_file",
                    serde_json::json!({"path": "a.ts", "content": "1", "description": "d"}),
                ),
                (
                    "create_pull_request",
                    serde_json::json!({"title": "t", "body": "b", "branch_name": "taken"}),
                ),
                ("read_file", serde_json::json!({"path": "a.ts"})),
            ],
        )]));
        let host = MemoryHost::new().with_branch("taken");

        let (outcome, steps) = run(&agent, &host).await;

        assert_eq!(outcome.termination, TerminationReason::LandingFailed);
        assert_eq!(outcome.staged.len(), 1);
        assert!(outcome.landing.is_none());
        assert_eq!(
            steps.iter().filter(|s| matches!(s, AgentStep::Error { .. })).count(),
            1
        );
        assert_eq!(
            steps.iter().filter(|s| matches!(s, AgentStep::ToolCall { .. })).count(),
            2
        );

        let last = outcome.conversation.messages().last().unwrap();
        assert!(matches!(&last.content, Content::Blocks(b) if b.len() == 3));
    }

    #[test]
    fn summarize_keeps_first_line() {
        assert_eq!(summarize("one\ntwo\nthree"), "one (+2 more lines)");
        assert_eq!(summarize(""), "");
        assert!(summarize(&"x".repeat(200)).ends_with("..."));
    }

    #[test]
    fn describe_call_prefers_meaningful_fields() {
        let call = ToolUse {
            id: "1".to_string(),
            name: "read_file".to_string(),
            input: serde_json::json!({"path": "src/main.rs"}),
        };
        assert_eq!(describe_call(&call), "read_file(src/main.rs)");
    }
}
