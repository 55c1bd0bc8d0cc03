//! Human-only action classification, shared by the signal extractor and
//! the assessment evaluator's `needs_user_action` partitioning.

use std::sync::OnceLock;

use regex::Regex;

fn human_only_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)auth|oauth|2fa|mfa|captcha|otp|log in|sign in|verification code|passcode|api key|secret|token|credential|access key|session cookie|permission|consent|approve|approval|access request|grant access|invite|upload",
        )
        .unwrap()
    })
}

fn agent_action_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)run|rerun|execute|test|build|compile|lint|format|commit|push|merge|pr|ci|check|gh|npm|node|python|bash|curl|script|edit|write|update|fix|implement|add|remove|change|create|open|verify|capture|screenshot|record",
        )
        .unwrap()
    })
}

/// Whether `action` is something only a human can do: it matches a
/// human-only pattern and does NOT also match an agent-actionable one.
pub fn is_human_only(action: &str) -> bool {
    human_only_pattern().is_match(action) && !agent_action_pattern().is_match(action)
}
