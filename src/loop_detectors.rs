//! Pure functions over the assistant's tool calls that flag planning-only
//! and action-repeat pathological loops.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::host_client::{Message, Part, Role};
use crate::signal_extractor::{normalize_command, TaskType};

const READ_LIKE_NAMES: &[&str] = &[
    "read",
    "grep",
    "glob",
    "todowrite",
    "todoread",
    "task",
    "webfetch",
    "web_fetch",
    "knowledge_graph_read",
];

const WRITE_LIKE_NAMES: &[&str] = &["edit", "write", "apply_patch", "pr_create", "pr_update"];

fn write_like_shell() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(npm|yarn|pnpm)\s+run?\s*(build|test|lint|fmt|format)|^git\s+(add|commit|push|checkout|switch|merge|rebase)\b|^(mkdir|rm|mv|cp)\b",
        )
        .unwrap()
    })
}

fn read_like_shell() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^git\s+(status|log|diff|show|branch|remote|tag)\b|^(ls|cat|head|tail|find|grep|rg|wc|file)\b")
            .unwrap()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolKind {
    Write,
    Read,
    Neutral,
}

fn classify_tool(name: &str, input: &serde_json::Value) -> ToolKind {
    let lower = name.to_lowercase();
    if lower.starts_with("context7_") {
        return ToolKind::Read;
    }
    if READ_LIKE_NAMES.iter().any(|n| *n == lower) {
        return ToolKind::Read;
    }
    if WRITE_LIKE_NAMES.iter().any(|n| *n == lower) {
        return ToolKind::Write;
    }
    if let Some(cmd) = crate::signal_extractor::shell_command_text(&lower, input) {
        if write_like_shell().is_match(&cmd) {
            return ToolKind::Write;
        }
        if read_like_shell().is_match(&cmd) {
            return ToolKind::Read;
        }
    }
    ToolKind::Neutral
}

/// Assistant-only tool parts, in message order.
fn assistant_tool_parts(messages: &[Message]) -> Vec<(&str, &serde_json::Value)> {
    messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.parts.iter())
        .filter_map(|p| match p {
            Part::Tool { name, input, .. } => Some((name.as_str(), input)),
            _ => None,
        })
        .collect()
}

/// Planning-only loop: many tool calls, almost none of them write-like.
/// Only meaningful for coding tasks.
pub fn planning_loop(messages: &[Message], task_type: TaskType) -> bool {
    if task_type != TaskType::Coding {
        return false;
    }
    let tools = assistant_tool_parts(messages);
    let total = tools.len();
    if total < 8 {
        return false;
    }
    let writes = tools
        .iter()
        .filter(|(name, input)| classify_tool(name, input) == ToolKind::Write)
        .count();
    writes == 0 || (writes as f64 / total as f64) < 0.1
}

/// The fixed read-only tool names dropped before counting repeats: `read`,
/// `grep`, `glob`, and the todo tools. Unlike `classify_tool`'s broader
/// `Read` bucket, this does not also drop shell read-utilities (`git
/// status`, `ls`, `cat`, ...) — those count toward the action-repeat total.
fn is_named_read_only_tool(name: &str) -> bool {
    matches!(name, "read" | "grep" | "glob" | "todowrite" | "todoread")
}

/// Action-repeat loop: the same non-read-only tool invocation repeated.
pub fn action_loop(messages: &[Message]) -> bool {
    let tools = assistant_tool_parts(messages);
    let commands: Vec<(String, String)> = tools
        .into_iter()
        .filter(|(name, _)| !is_named_read_only_tool(&name.to_lowercase()))
        .map(|(name, input)| {
            let serialized = crate::signal_extractor::shell_command_text(name, input)
                .map(|c| normalize_command(&c))
                .unwrap_or_else(|| input.to_string());
            let prefix: String = serialized.chars().take(100).collect();
            (name.to_string(), prefix)
        })
        .collect();

    let total = commands.len();
    if total < 4 {
        return false;
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for (name, prefix) in &commands {
        *counts.entry(format!("{name}:{prefix}")).or_insert(0) += 1;
    }

    let repeated_total: usize = counts.values().filter(|c| **c >= 3).sum();
    (repeated_total as f64 / total as f64) >= 0.6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_client::ToolStatus;
    use chrono::Utc;
    use serde_json::json;

    fn assistant_with_tools(tools: Vec<(&str, serde_json::Value)>) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            abort_error: false,
            parts: tools
                .into_iter()
                .map(|(name, input)| Part::tool(name, input, ToolStatus::Success))
                .collect(),
        }
    }

    #[test]
    fn planning_loop_all_reads_detected() {
        let tools = (0..15).map(|_| ("read", json!({"path": "a.rs"}))).collect();
        let messages = vec![assistant_with_tools(tools)];
        assert!(planning_loop(&messages, TaskType::Coding));
    }

    #[test]
    fn planning_loop_with_enough_writes_not_detected() {
        let mut tools: Vec<(&str, serde_json::Value)> =
            (0..12).map(|_| ("read", json!({"path": "a.rs"}))).collect();
        tools.extend((0..3).map(|_| ("edit", json!({"path": "a.rs", "diff": "x"}))));
        let messages = vec![assistant_with_tools(tools)];
        assert!(!planning_loop(&messages, TaskType::Coding));
    }

    #[test]
    fn planning_loop_ignored_outside_coding() {
        let tools = (0..15).map(|_| ("read", json!({"path": "a.rs"}))).collect();
        let messages = vec![assistant_with_tools(tools)];
        assert!(!planning_loop(&messages, TaskType::Research));
    }

    #[test]
    fn action_loop_two_keys_each_three_times_detected() {
        let mut tools = Vec::new();
        for _ in 0..3 {
            tools.push(("bash", json!({"command": "cargo test"})));
        }
        for _ in 0..3 {
            tools.push(("bash", json!({"command": "cargo build"})));
        }
        let messages = vec![assistant_with_tools(tools)];
        assert!(action_loop(&messages));
    }

    #[test]
    fn five_distinct_git_commands_not_detected() {
        let tools = vec![
            ("bash", json!({"command": "git status"})),
            ("bash", json!({"command": "git diff"})),
            ("bash", json!({"command": "git add ."})),
            ("bash", json!({"command": "git commit -m x"})),
            ("bash", json!({"command": "git push origin feature"})),
        ];
        let messages = vec![assistant_with_tools(tools)];
        assert!(!action_loop(&messages));
    }

    #[test]
    fn repeated_shell_read_utility_detected_as_action_loop() {
        let tools = vec![
            ("bash", json!({"command": "git status"})),
            ("bash", json!({"command": "git status"})),
            ("bash", json!({"command": "git status"})),
            ("bash", json!({"command": "git status"})),
        ];
        let messages = vec![assistant_with_tools(tools)];
        assert!(action_loop(&messages));
    }

    #[test]
    fn named_read_only_tools_still_dropped_from_action_loop() {
        let tools = vec![
            ("read", json!({"path": "a.rs"})),
            ("read", json!({"path": "a.rs"})),
            ("read", json!({"path": "a.rs"})),
            ("read", json!({"path": "a.rs"})),
        ];
        let messages = vec![assistant_with_tools(tools)];
        assert!(!action_loop(&messages));
    }

    #[test]
    fn adding_read_only_tools_cannot_decrease_planning_loop() {
        let tools: Vec<(&str, serde_json::Value)> =
            (0..8).map(|_| ("read", json!({"path": "a.rs"}))).collect();
        let base = vec![assistant_with_tools(tools.clone())];
        assert!(planning_loop(&base, TaskType::Coding));

        let mut more = tools;
        more.push(("grep", json!({"pattern": "foo"})));
        let extended = vec![assistant_with_tools(more)];
        assert!(planning_loop(&extended, TaskType::Coding));
    }
}
