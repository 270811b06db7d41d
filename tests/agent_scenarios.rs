//! End-to-end runs against a scripted model and an in-memory repository.

use std::sync::Arc;

use serde_json::json;

use repo_pilot::core::agent::{
    Agent, AgentStep, LandingMode, LandingResult, RunOutcome, StepEmitter, TerminationReason,
};
use repo_pilot::core::run::{Task, TaskRunner, auto_land};
use repo_pilot::core::testing::{HostCall, MemoryHost, ScriptedProvider, ScriptedTurn};

const SYSTEM: &str = "You are a test agent.";

async fn run_agent(agent: &Agent, host: &MemoryHost) -> (RunOutcome, Vec<AgentStep>) {
    let mut steps = Vec::new();
    let outcome = {
        let mut emitter = StepEmitter::new(|step| steps.push(step));
        agent
            .run(host, SYSTEM, "Add a health check endpoint", &mut emitter)
            .await
    };
    (outcome, steps)
}

fn count(steps: &[AgentStep], kind: &str) -> usize {
    steps.iter().filter(|s| s.kind() == kind).count()
}

fn write_file(path: &str, content: &str) -> (&'static str, serde_json::Value) {
    (
        "write_file",
        json!({"path": path, "content": content, "description": format!("update {path}")}),
    )
}

#[tokio::test]
async fn scenario_a_no_tool_calls_finishes_immediately() {
    let provider = Arc::new(ScriptedProvider::new([ScriptedTurn::text(
        "The endpoint already exists.",
    )]));
    let agent = Agent::new(provider.clone(), "test-model", 1024);
    let host = MemoryHost::new();

    let (outcome, steps) = run_agent(&agent, &host).await;

    assert_eq!(provider.calls(), 1);
    assert_eq!(outcome.termination, TerminationReason::Finished);
    assert!(outcome.staged.is_empty());
    assert!(outcome.landing.is_none());
    let kinds: Vec<_> = steps.iter().map(AgentStep::kind).collect();
    assert_eq!(kinds, ["thinking", "done"]);
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn scenario_b_read_write_and_open_pull_request() {
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedTurn::tools(
            "Let me look at the server first.",
            [("read_file", json!({"path": "server/index.ts"}))],
        ),
        ScriptedTurn::tools(
            "Adding the route.",
            [(
                "write_file",
                json!({
                    "path": "server/index.ts",
                    "content": "app.get('/health', ok);\napp.listen();\n",
                    "description": "add health route"
                }),
            )],
        ),
        ScriptedTurn::tools(
            "",
            [(
                "create_pull_request",
                json!({
                    "title": "Add health check",
                    "body": "Adds GET /health.",
                    "branch_name": "feature/health"
                }),
            )],
        ),
        ScriptedTurn::text("Opened a pull request."),
    ]));
    let agent = Agent::new(provider, "test-model", 1024);
    let host = MemoryHost::new().with_file("main", "server/index.ts", "app.listen();\n");

    let (outcome, steps) = run_agent(&agent, &host).await;

    assert_eq!(outcome.termination, TerminationReason::Finished);
    assert_eq!(outcome.staged.len(), 1);
    assert_eq!(outcome.staged[0].path, "server/index.ts");
    let Some(LandingResult::PullRequest {
        url,
        number,
        branch,
    }) = &outcome.landing
    else {
        panic!("expected a pull request, got {:?}", outcome.landing);
    };
    assert!(!url.is_empty());
    assert_eq!(*number, 1);
    assert_eq!(branch, "feature/health");

    assert_eq!(count(&steps, "tool_call"), 3);
    assert_eq!(count(&steps, "tool_result"), 3);
    assert_eq!(count(&steps, "file_write"), 1);
    assert_eq!(count(&steps, "pr_created"), 1);
    assert_eq!(count(&steps, "error"), 0);

    let original = steps.iter().find_map(|s| match s {
        AgentStep::FileWrite {
            original_content, ..
        } => Some(original_content.clone()),
        _ => None,
    });
    assert_eq!(original, Some(Some("app.listen();\n".to_string())));

    assert_eq!(
        host.file("feature/health", "server/index.ts").as_deref(),
        Some("app.get('/health', ok);\napp.listen();\n")
    );
    assert_eq!(
        host.file("main", "server/index.ts").as_deref(),
        Some("app.listen();\n")
    );

    let pr_body = host.calls().into_iter().find_map(|c| match c {
        HostCall::CreatePullRequest { body, base, .. } => Some((body, base)),
        _ => None,
    });
    let (body, base) = pr_body.unwrap();
    assert_eq!(base, "main");
    assert!(body.contains("`server/index.ts`: add health route"));
}

#[tokio::test]
async fn scenario_c_branch_conflict_fails_the_landing() {
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedTurn::tools("", [write_file("server/index.ts", "new")]),
        ScriptedTurn::tools(
            "",
            [(
                "create_pull_request",
                json!({"title": "t", "body": "b", "branch_name": "feature/health"}),
            )],
        ),
        ScriptedTurn::text("unreachable"),
    ]));
    let agent = Agent::new(provider.clone(), "test-model", 1024);
    let host = MemoryHost::new().with_branch("feature/health");

    let (outcome, steps) = run_agent(&agent, &host).await;

    assert_eq!(outcome.termination, TerminationReason::LandingFailed);
    assert_eq!(count(&steps, "error"), 1);
    assert_eq!(outcome.staged.len(), 1);
    assert!(outcome.landing.is_none());
    assert_eq!(provider.calls(), 2);
    assert!(
        host.calls()
            .iter()
            .all(|c| !matches!(c, HostCall::PutFile { .. } | HostCall::CreatePullRequest { .. }))
    );
}

#[tokio::test]
async fn scenario_d_iteration_limit_triggers_fallback_push() {
    let provider = Arc::new(
        ScriptedProvider::new([ScriptedTurn::tools(
            "Writing both files.",
            [write_file("a.ts", "a"), write_file("b.ts", "b")],
        )])
        .repeat_forever(ScriptedTurn::tools(
            "Still checking.",
            [("list_directory", json!({}))],
        )),
    );
    let runner = TaskRunner::new(Agent::new(provider.clone(), "test-model", 1024));
    let host = MemoryHost::new();

    let mut steps = Vec::new();
    let report = {
        let mut emitter = StepEmitter::new(|step| steps.push(step));
        runner
            .run(&host, "o/r", &Task::new("o/r", "Add two files"), &mut emitter)
            .await
    };

    assert_eq!(provider.calls(), 25);
    assert_eq!(report.summary.iterations, 25);
    assert_eq!(report.summary.termination, TerminationReason::IterationLimit);
    assert!(report.summary.fallback_used);
    let Some(LandingResult::DirectPush { commit_sha, files }) = &report.summary.landing else {
        panic!("expected a direct push");
    };
    assert_eq!(*files, 2);
    assert_eq!(Some(commit_sha.clone()), host.last_commit());
    assert_eq!(host.file("main", "a.ts").as_deref(), Some("a"));
    assert_eq!(host.file("main", "b.ts").as_deref(), Some("b"));

    let puts: Vec<_> = host
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            HostCall::PutFile { message, .. } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(puts, ["Add two files", "Add two files"]);

    assert_eq!(count(&steps, "error"), 0);
    assert_eq!(count(&steps, "done"), 0);
    assert_eq!(count(&steps, "push_created"), 1);
    assert!(matches!(steps.last(), Some(AgentStep::Complete { .. })));
}

#[tokio::test]
async fn staged_writes_keep_call_order() {
    let paths = ["c.ts", "a.ts", "b.ts", "d/e.ts"];
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedTurn::tools("", paths.iter().map(|p| write_file(p, "x"))),
        ScriptedTurn::text("done"),
    ]));
    let agent = Agent::new(provider, "test-model", 1024);
    let host = MemoryHost::new();

    let (outcome, steps) = run_agent(&agent, &host).await;

    let staged: Vec<_> = outcome.staged.iter().map(|w| w.path.as_str()).collect();
    assert_eq!(staged, paths);
    assert_eq!(count(&steps, "file_write"), paths.len());
    assert!(host.calls().iter().all(|c| !matches!(c, HostCall::PutFile { .. })));
}

#[tokio::test]
async fn repeated_writes_land_the_last_content() {
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedTurn::tools("", [write_file("a.ts", "first"), write_file("b.ts", "b")]),
        ScriptedTurn::tools(
            "",
            [
                write_file("a.ts", "second"),
                ("commit_and_push", json!({"commit_message": "Ship"})),
            ],
        ),
        ScriptedTurn::text("done"),
    ]));
    let agent = Agent::new(provider, "test-model", 1024).with_mode(LandingMode::DirectPush);
    let host = MemoryHost::new();

    let (outcome, _) = run_agent(&agent, &host).await;

    assert_eq!(outcome.staged.len(), 3);
    assert!(matches!(
        outcome.landing,
        Some(LandingResult::DirectPush { files: 2, .. })
    ));
    assert_eq!(host.file("main", "a.ts").as_deref(), Some("second"));

    let put_paths: Vec<_> = host
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            HostCall::PutFile { path, .. } => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(put_paths, ["a.ts", "b.ts"]);
}

#[tokio::test]
async fn landing_with_nothing_staged_never_reaches_the_host() {
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedTurn::tools(
            "",
            [(
                "create_pull_request",
                json!({"title": "t", "body": "b", "branch_name": "x"}),
            )],
        ),
        ScriptedTurn::text("Nothing to land."),
    ]));
    let agent = Agent::new(provider, "test-model", 1024);
    let host = MemoryHost::new();

    let (outcome, steps) = run_agent(&agent, &host).await;

    assert!(host.calls().is_empty());
    assert_eq!(outcome.termination, TerminationReason::Finished);
    let result = steps.iter().find_map(|s| match s {
        AgentStep::ToolResult {
            summary, is_error, ..
        } => Some((summary.clone(), *is_error)),
        _ => None,
    });
    let (summary, is_error) = result.unwrap();
    assert!(is_error);
    assert!(summary.contains("No files were written"));
}

#[tokio::test]
async fn model_calls_never_exceed_the_default_bound() {
    let provider = Arc::new(ScriptedProvider::new([]).repeat_forever(ScriptedTurn::tools(
        "",
        [
            ("list_directory", json!({})),
            ("search_code", json!({"query": "health"})),
        ],
    )));
    let agent = Agent::new(provider.clone(), "test-model", 1024);
    let host = MemoryHost::new();

    let (outcome, _) = run_agent(&agent, &host).await;

    assert_eq!(provider.calls(), 25);
    assert_eq!(outcome.iterations, 25);
    assert_eq!(outcome.termination, TerminationReason::IterationLimit);
}

#[tokio::test]
async fn fallback_is_skipped_when_nothing_was_staged() {
    let provider = Arc::new(ScriptedProvider::new([ScriptedTurn::text("Nothing to do.")]));
    let agent = Agent::new(provider, "test-model", 1024);
    let host = MemoryHost::new();

    let (outcome, _) = run_agent(&agent, &host).await;
    let landed = auto_land(&host, &outcome, "msg", &mut StepEmitter::discard()).await;

    assert!(landed.is_none());
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn conversation_is_replayable_from_disk() {
    let provider = Arc::new(ScriptedProvider::new([
        ScriptedTurn::tools("", [("read_file", json!({"path": "missing.ts"}))]),
        ScriptedTurn::text("The file does not exist."),
    ]));
    let agent = Agent::new(provider, "test-model", 1024);
    let host = MemoryHost::new();

    let (outcome, _) = run_agent(&agent, &host).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transcript.json");
    outcome.conversation.save(&path).unwrap();
    let loaded = repo_pilot::core::agent::Conversation::load(&path).unwrap();

    assert_eq!(loaded.system(), Some(SYSTEM));
    assert_eq!(loaded.len(), outcome.conversation.len());
    assert_eq!(loaded.len(), 3);
}
