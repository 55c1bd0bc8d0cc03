//! Derives a [`TaskContext`] from a session's message log and a handful of
//! workspace lookups.

mod agent_mode;
mod human_action;
mod signals;
mod task_type;
mod workspace_probe;

pub use human_action::is_human_only;
pub use signals::{normalize_command, shell_command_text};
pub use workspace_probe::{FsWorkspaceProbe, WorkspaceProbe};

use std::collections::BTreeSet;

use tracing::debug;

use crate::host_client::{Message, Role};

/// Inferred kind of work the user is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Coding,
    Docs,
    Research,
    Ops,
    Other,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Coding => "coding",
            TaskType::Docs => "docs",
            TaskType::Research => "research",
            TaskType::Ops => "ops",
            TaskType::Other => "other",
        }
    }
}

/// Whether the agent is in a read-only planning phase or actively building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Plan,
    Build,
}

/// Closed set of shell/text signals the extractor looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DetectedSignal {
    TestMention,
    BuildMention,
    PrMention,
    CiMention,
    TestCommand,
    BuildCommand,
    GhPr,
    GhPrCreate,
    GhPrView,
    GhPrStatus,
    GhPrChecks,
    GhIssue,
    GitPush,
}

impl DetectedSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectedSignal::TestMention => "test-mention",
            DetectedSignal::BuildMention => "build-mention",
            DetectedSignal::PrMention => "pr-mention",
            DetectedSignal::CiMention => "ci-mention",
            DetectedSignal::TestCommand => "test-command",
            DetectedSignal::BuildCommand => "build-command",
            DetectedSignal::GhPr => "gh-pr",
            DetectedSignal::GhPrCreate => "gh-pr-create",
            DetectedSignal::GhPrView => "gh-pr-view",
            DetectedSignal::GhPrStatus => "gh-pr-status",
            DetectedSignal::GhPrChecks => "gh-pr-checks",
            DetectedSignal::GhIssue => "gh-issue",
            DetectedSignal::GitPush => "git-push",
        }
    }
}

/// Everything the rest of the pipeline needs to know about the task at
/// hand, recomputed fresh on every reflection attempt.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_summary: String,
    pub task_type: TaskType,
    pub agent_mode: AgentMode,
    pub human_messages: Vec<Message>,
    pub tools_summary: String,
    pub detected_signals: BTreeSet<DetectedSignal>,
    pub recent_commands: Vec<String>,
    pub pushed_to_default_branch: bool,
    pub requires_tests: bool,
    pub requires_build: bool,
    pub requires_pr: bool,
    pub requires_ci: bool,
    pub requires_local_tests: bool,
    pub requires_local_tests_evidence: bool,
}

const TOOLS_SUMMARY_WINDOW: usize = 20;
const RECENT_COMMANDS_WINDOW: usize = 12;

/// Build a [`TaskContext`] from a session's full message history.
pub fn extract(messages: &[Message], probe: &dyn WorkspaceProbe) -> TaskContext {
    let human_messages: Vec<Message> = messages
        .iter()
        .filter(|m| m.role == Role::User && !m.is_reflection_injected())
        .cloned()
        .collect();

    let task_summary = if human_messages.len() <= 1 {
        human_messages
            .first()
            .map(|m| m.text())
            .unwrap_or_default()
    } else {
        human_messages
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}. {}", i + 1, m.text()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let last_assistant_text = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| m.text())
        .unwrap_or_default();

    let classification_text = format!("{task_summary}\n{last_assistant_text}");
    let task_type = task_type::infer(&classification_text);
    let agent_mode = agent_mode::infer(messages, &human_messages);

    let detected_signals = signals::detect(messages);
    let recent_commands = signals::recent_commands(messages, RECENT_COMMANDS_WINDOW);
    let pushed_to_default_branch = signals::pushed_to_default_branch_full_history(messages);
    let tools_summary = signals::tools_summary(messages, TOOLS_SUMMARY_WINDOW);

    let has_test_script = probe.has_test_script();
    let has_build_script = probe.has_build_script();
    let has_tests_dir = probe.has_tests_dir();
    let has_local_test_command_run = recent_commands.iter().any(|c| signals::is_test_command(c));

    let is_coding = task_type == TaskType::Coding;
    let requires_tests = is_coding
        && (has_test_script
            || has_tests_dir
            || detected_signals.contains(&DetectedSignal::TestMention));
    let requires_build =
        is_coding && (has_build_script || detected_signals.contains(&DetectedSignal::BuildMention));
    let requires_pr = is_coding;
    let requires_ci = is_coding;
    let requires_local_tests = requires_tests;
    let requires_local_tests_evidence = requires_tests && !has_local_test_command_run;

    let ctx = TaskContext {
        task_summary,
        task_type,
        agent_mode,
        human_messages,
        tools_summary,
        detected_signals,
        recent_commands,
        pushed_to_default_branch,
        requires_tests,
        requires_build,
        requires_pr,
        requires_ci,
        requires_local_tests,
        requires_local_tests_evidence,
    };

    debug!(
        target: "reflection_core::signal_extractor",
        task_type = ctx.task_type.as_str(),
        agent_mode = ?ctx.agent_mode,
        requires_tests = ctx.requires_tests,
        requires_build = ctx.requires_build,
        requires_pr = ctx.requires_pr,
        "inferred task context"
    );

    ctx
}
