use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context as _;

use super::RunArgs;
use super::render::render_step;
use crate::config::Config;
use crate::core::agent::prompt::ContextFile;
use crate::core::agent::{LandingMode, LandingResult, StepEmitter, TerminationReason, catalog};
use crate::core::history::{RunRecorder, RunSummary, StorageRecorder};
use crate::core::repo::GithubConnector;
use crate::core::run::{Task, TaskRunner, open_repository};
use crate::core::storage::Storage;

/// Build a task from command-line arguments, reading context files.
///
/// # Errors
///
/// Returns an error if a context file cannot be read.
pub fn task_from_args(args: &RunArgs) -> anyhow::Result<Task> {
    let mut context_files = Vec::with_capacity(args.context_files.len());
    for path in &args.context_files {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read context file {}", path.display()))?;
        context_files.push(ContextFile {
            path: path.display().to_string(),
            content,
        });
    }

    let mut task = Task::new(&args.repository, &args.prompt);
    task.title.clone_from(&args.title);
    task.description.clone_from(&args.description);
    task.context_files = context_files;
    task.mode = args.mode;
    task.max_iterations = args.max_iterations;
    task.auto_land = !args.no_fallback;
    Ok(task)
}

/// Run a task, streaming steps to stdout.
///
/// # Errors
///
/// Returns an error if configuration is incomplete, or if the run ended
/// without landing because the model or a landing call failed.
pub async fn run_task(args: RunArgs) -> anyhow::Result<()> {
    let config = Config::load()?;
    let task = task_from_args(&args)?;

    let directory = config.directory();
    let connector = GithubConnector::new(config.github.api_url.clone());
    let (repository, host) = open_repository(&directory, &connector, &task.repository)?;

    let recorder = Arc::new(StorageRecorder::new(Storage::new()?));
    let runner = TaskRunner::new(config.agent.agent()?).with_recorder(recorder);

    let mut stdout = std::io::stdout();
    let mut emitter = StepEmitter::new(move |step| {
        let rendered = render_step(&step);
        if !rendered.is_empty() {
            let _ = stdout.write_all(rendered.as_bytes());
            let _ = stdout.flush();
        }
    });

    let report = runner
        .run(host.as_ref(), &repository, &task, &mut emitter)
        .await;

    if let Some(path) = &args.transcript {
        report
            .conversation
            .save(path)
            .with_context(|| format!("failed to save transcript to {}", path.display()))?;
    }

    let summary = report.summary;
    if summary.landing.is_none()
        && matches!(
            summary.termination,
            TerminationReason::ApiError | TerminationReason::LandingFailed
        )
    {
        anyhow::bail!("run {} ended without landing any changes", summary.id);
    }

    Ok(())
}

/// Print the tool catalog for a mode.
///
/// # Errors
///
/// Returns an error if JSON output cannot be serialized.
pub fn print_tools(mode: LandingMode, json: bool) -> anyhow::Result<()> {
    let tools = catalog(mode);
    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    for tool in tools {
        let summary = tool.description.lines().next().unwrap_or_default();
        println!("{:<22} {summary}", tool.name);
    }
    Ok(())
}

/// Print recorded runs, newest first.
///
/// # Errors
///
/// Returns an error if run history cannot be read.
pub fn list_runs(format: &str, limit: usize) -> anyhow::Result<()> {
    let recorder = StorageRecorder::new(Storage::new()?);
    let runs = recorder.recent(limit)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else {
        println!("{}", runs_table(&runs));
    }
    Ok(())
}

fn runs_table(runs: &[RunSummary]) -> String {
    let mut out = format!(
        "{:<36} {:<24} {:<30} {:<16} Started\n",
        "ID", "Repository", "Title", "Outcome"
    );
    out.push_str(&"-".repeat(120));
    for run in runs {
        let started = chrono::DateTime::from_timestamp_millis(run.started_at).map_or_else(
            || "Unknown".to_string(),
            |dt| dt.format("%Y-%m-%d %H:%M").to_string(),
        );
        let title: String = run.title.chars().take(28).collect();
        let outcome = match &run.landing {
            Some(LandingResult::PullRequest { number, .. }) => {
                format!("PR #{number}")
            }
            Some(LandingResult::DirectPush { files, .. }) => {
                format!("pushed {files}")
            }
            None => "not landed".to_string(),
        };
        let _ = write!(
            out,
            "\n{:<36} {:<24} {:<30} {:<16} {started}",
            run.id, run.repository, title, outcome
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(context_files: Vec<std::path::PathBuf>) -> RunArgs {
        RunArgs {
            repository: "api".to_string(),
            prompt: "Add a health check".to_string(),
            title: None,
            description: Some("GET /health".to_string()),
            mode: Some(LandingMode::DirectPush),
            context_files,
            max_iterations: Some(4),
            no_fallback: true,
            transcript: None,
        }
    }

    #[test]
    fn task_carries_overrides_and_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.ts");
        std::fs::write(&path, "const app = express();").unwrap();

        let task = task_from_args(&args(vec![path])).unwrap();

        assert_eq!(task.repository, "api");
        assert_eq!(task.mode, Some(LandingMode::DirectPush));
        assert_eq!(task.max_iterations, Some(4));
        assert!(!task.auto_land);
        assert_eq!(task.context_files.len(), 1);
        assert_eq!(task.context_files[0].content, "const app = express();");
    }

    #[test]
    fn missing_context_file_is_an_error() {
        let err = task_from_args(&args(vec!["/nonexistent/file.ts".into()])).unwrap_err();
        assert!(err.to_string().contains("failed to read context file"));
    }

    #[test]
    fn table_lists_outcomes() {
        let run = RunSummary {
            id: "run-1".to_string(),
            repository: "o/r".to_string(),
            title: "Add health check".to_string(),
            landing: Some(LandingResult::PullRequest {
                url: "https://github.com/o/r/pull/7".to_string(),
                number: 7,
                branch: "feature/health".to_string(),
            }),
            files: vec!["a.ts".to_string()],
            message: String::new(),
            iterations: 2,
            termination: TerminationReason::Finished,
            fallback_used: false,
            started_at: 0,
            finished_at: 0,
        };

        let table = runs_table(&[run]);
        assert!(table.contains("run-1"));
        assert!(table.contains("PR #7"));
        assert!(table.contains("1970-01-01 00:00"));
    }
}
