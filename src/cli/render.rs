//! Terminal rendering of agent steps.

use std::fmt::Write as _;

use similar::{ChangeTag, TextDiff};

use crate::core::agent::AgentStep;

/// Characters of a tool input shown before eliding the rest.
const MAX_INPUT_CHARS: usize = 200;

/// Render one step as terminal text.
#[must_use]
pub fn render_step(step: &AgentStep) -> String {
    match step {
        AgentStep::Thinking { text } => format!("{}\n", text.trim_end()),
        AgentStep::ToolCall { name, input, .. } => {
            let mut input = input.to_string();
            if input.chars().count() > MAX_INPUT_CHARS {
                input = input.chars().take(MAX_INPUT_CHARS).collect::<String>() + "...";
            }
            format!("→ {name} {input}\n")
        }
        AgentStep::ToolResult {
            name,
            summary,
            is_error,
            ..
        } => {
            let marker = if *is_error { "✗" } else { "✓" };
            format!("  {marker} {name}: {summary}\n")
        }
        AgentStep::FileWrite {
            path,
            content,
            description,
            original_content,
        } => {
            let mut out = format!("✎ {path}: {description}\n");
            match original_content {
                Some(original) => {
                    let _ = writeln!(out, "--- a/{path}\n+++ b/{path}");
                    out.push_str(&line_diff(original, content));
                }
                None => {
                    let _ = writeln!(out, "+++ b/{path} (new file)");
                    out.push_str(&line_diff("", content));
                }
            }
            out
        }
        AgentStep::PrCreated {
            url,
            number,
            branch,
        } => format!("⇪ Opened pull request #{number} from {branch}: {url}\n"),
        AgentStep::PushCreated { commit_sha, files } => {
            format!("⇪ Pushed {files} file(s) as {commit_sha}\n")
        }
        AgentStep::Error { message } => format!("error: {message}\n"),
        AgentStep::Done => String::new(),
        AgentStep::Complete { message, .. } => format!("\n{message}\n"),
    }
}

/// Changed lines only, each prefixed with its sign.
fn line_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => continue,
        };
        output.push_str(sign);
        output.push_str(change.value());
        if !change.value().ends_with('\n') {
            output.push('\n');
        }
    }

    output
}
