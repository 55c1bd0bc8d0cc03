//! Agent-mode inference: plan vs. build.

use std::sync::OnceLock;

use regex::Regex;

use crate::host_client::Message;

use super::AgentMode;

const PLAN_MARKERS: &[&str] = &[
    "plan mode ACTIVE",
    "plan mode is active",
    "read-only mode",
    "READ-ONLY phase",
];

fn plan_imperative() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(create|make|draft|generate|propose)\s+(a\s+)?plan\b").unwrap()
    })
}

fn system_reminder_plan_mention() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)plan mode|READ-ONLY phase").unwrap())
}

/// Infer the agent's mode from the full message log and the already-filtered
/// human-authored messages.
pub fn infer(messages: &[Message], human_messages: &[Message]) -> AgentMode {
    for message in messages {
        let text = message.text();
        if PLAN_MARKERS.iter().any(|m| text.contains(m)) {
            return AgentMode::Plan;
        }
    }

    // A system-reminder block attached to a user message that mentions plan
    // mode / the read-only phase also counts.
    for message in messages {
        if message.role == crate::host_client::Role::User
            && system_reminder_plan_mention().is_match(&message.text())
        {
            return AgentMode::Plan;
        }
    }

    if let Some(last_human) = human_messages.last() {
        if plan_imperative().is_match(&last_human.text()) {
            return AgentMode::Plan;
        }
    }

    AgentMode::Build
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_client::{Part, Role};
    use chrono::Utc;

    fn msg(role: Role, text: &str) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            abort_error: false,
            parts: vec![Part::text(text)],
        }
    }

    #[test]
    fn defaults_to_build() {
        let messages = vec![msg(Role::User, "fix the bug")];
        assert_eq!(infer(&messages, &messages), AgentMode::Build);
    }

    #[test]
    fn explicit_plan_marker() {
        let messages = vec![msg(Role::Assistant, "plan mode ACTIVE, drafting steps")];
        assert_eq!(infer(&messages, &[]), AgentMode::Plan);
    }

    #[test]
    fn plan_imperative_in_last_human_message() {
        let human = vec![msg(Role::User, "please draft a plan for the migration")];
        assert_eq!(infer(&human, &human), AgentMode::Plan);
    }
}
