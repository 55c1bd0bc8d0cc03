//! Shell/text signal detection.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::host_client::{Message, Part, ToolStatus};

use super::DetectedSignal;

const SHELL_TOOL_NAMES: &[&str] = &["bash", "shell", "exec", "run_command", "terminal"];

fn test_mention() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\btest(s|ing)?\b").unwrap())
}

fn build_mention() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bbuild(s|ing)?\b").unwrap())
}

fn pr_mention() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bpr\b|pull request").unwrap())
}

fn ci_mention() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bci\b|continuous integration").unwrap())
}

fn test_command_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(npm|yarn|pnpm)\s+(run\s+)?test|cargo\s+test|pytest|go\s+test|make\s+test")
            .unwrap()
    })
}

fn build_command_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(npm|yarn|pnpm)\s+(run\s+)?build|cargo\s+build|make\s+build|go\s+build")
            .unwrap()
    })
}

fn gh_pr_create() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bgh\s+pr\s+create\b").unwrap())
}

fn gh_pr_view() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bgh\s+pr\s+view\b").unwrap())
}

fn gh_pr_status() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bgh\s+pr\s+status\b").unwrap())
}

fn gh_pr_checks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bgh\s+pr\s+checks\b").unwrap())
}

fn gh_pr_any() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bgh\s+pr\b").unwrap())
}

fn gh_issue() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bgh\s+issue\b").unwrap())
}

fn git_push() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bgit\s+push\b").unwrap())
}

fn git_push_default_branch() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)git\s+push(\s+(origin|head:))?\s*(main|master)\b").unwrap()
    })
}

fn timestamp_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{10,}").unwrap())
}

/// Extract the literal command text from a shell-like tool part, if any.
pub fn shell_command_text(name: &str, input: &serde_json::Value) -> Option<String> {
    if !SHELL_TOOL_NAMES.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        return None;
    }
    input
        .get("command")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Collapse whitespace, replace long digit runs (timestamps) with a fixed
/// token, and lowercase — shared normalization used for both detected
/// signals and loop-detector command keys.
pub fn normalize_command(cmd: &str) -> String {
    let collapsed = cmd.split_whitespace().collect::<Vec<_>>().join(" ");
    let de_timestamped = timestamp_run().replace_all(&collapsed, "TIMESTAMP");
    de_timestamped.to_lowercase()
}

pub fn is_test_command(cmd: &str) -> bool {
    test_command_pattern().is_match(cmd)
}

pub fn is_build_command(cmd: &str) -> bool {
    build_command_pattern().is_match(cmd)
}

/// All shell commands observed in the session, in message order.
fn all_shell_commands(messages: &[Message]) -> Vec<String> {
    let mut commands = Vec::new();
    for message in messages {
        for part in &message.parts {
            if let Part::Tool { name, input, .. } = part {
                if let Some(cmd) = shell_command_text(name, input) {
                    commands.push(cmd);
                }
            }
        }
    }
    commands
}

/// Scan the whole message log for the closed set of detected signals.
pub fn detect(messages: &[Message]) -> BTreeSet<DetectedSignal> {
    let mut out = BTreeSet::new();

    for message in messages {
        let text = message.text();
        if test_mention().is_match(&text) {
            out.insert(DetectedSignal::TestMention);
        }
        if build_mention().is_match(&text) {
            out.insert(DetectedSignal::BuildMention);
        }
        if pr_mention().is_match(&text) {
            out.insert(DetectedSignal::PrMention);
        }
        if ci_mention().is_match(&text) {
            out.insert(DetectedSignal::CiMention);
        }

        for part in &message.parts {
            if let Part::Tool { name, input, status } = part {
                if *status == ToolStatus::Error {
                    continue;
                }
                if let Some(cmd) = shell_command_text(name, input) {
                    if is_test_command(&cmd) {
                        out.insert(DetectedSignal::TestCommand);
                    }
                    if is_build_command(&cmd) {
                        out.insert(DetectedSignal::BuildCommand);
                    }
                    if gh_pr_any().is_match(&cmd) {
                        out.insert(DetectedSignal::GhPr);
                    }
                    if gh_pr_create().is_match(&cmd) {
                        out.insert(DetectedSignal::GhPrCreate);
                    }
                    if gh_pr_view().is_match(&cmd) {
                        out.insert(DetectedSignal::GhPrView);
                    }
                    if gh_pr_status().is_match(&cmd) {
                        out.insert(DetectedSignal::GhPrStatus);
                    }
                    if gh_pr_checks().is_match(&cmd) {
                        out.insert(DetectedSignal::GhPrChecks);
                    }
                    if gh_issue().is_match(&cmd) {
                        out.insert(DetectedSignal::GhIssue);
                    }
                    if git_push().is_match(&cmd) {
                        out.insert(DetectedSignal::GitPush);
                    }
                }
            }
        }
    }

    out
}

/// Whether any shell command in `commands` pushed directly to a default
/// branch (checked over the full session history, not just the recent
/// window).
pub fn pushed_to_default_branch_full_history(messages: &[Message]) -> bool {
    all_shell_commands(messages)
        .iter()
        .any(|c| git_push_default_branch().is_match(c))
}

/// Last `window` normalized shell commands from `messages`.
pub fn recent_commands(messages: &[Message], window: usize) -> Vec<String> {
    let all = all_shell_commands(messages);
    let start = all.len().saturating_sub(window);
    all[start..].iter().map(|c| normalize_command(c)).collect()
}

/// Plain-text summary of the last `window` tool invocations, newest last.
pub fn tools_summary(messages: &[Message], window: usize) -> String {
    let mut lines = Vec::new();
    for message in messages {
        for part in &message.parts {
            if let Part::Tool { name, input, status } = part {
                let status_str = match status {
                    ToolStatus::Running => "running",
                    ToolStatus::Success => "ok",
                    ToolStatus::Error => "error",
                };
                let detail = shell_command_text(name, input).unwrap_or_else(|| input.to_string());
                lines.push(format!("{name} [{status_str}]: {detail}"));
            }
        }
    }
    let start = lines.len().saturating_sub(window);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_timestamps() {
        assert_eq!(
            normalize_command("GIT   PUSH  origin 1732489200123"),
            "git push origin TIMESTAMP"
        );
    }

    #[test]
    fn detects_default_branch_push() {
        assert!(git_push_default_branch().is_match("git push origin main"));
        assert!(git_push_default_branch().is_match("git push HEAD:master"));
        assert!(!git_push_default_branch().is_match("git push origin feature/x"));
    }
}
