//! Task-type inference cascade.

use std::sync::OnceLock;

use regex::Regex;

use super::TaskType;

fn research_verb() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)research|investigate|analyze|compare|evaluate|study").unwrap())
}

fn coding_verb() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)fix|implement|add|create|build|feature|refactor|improve|update").unwrap()
    })
}

fn github_issue_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"github\.com/[^/\s]+/[^/\s]+/issues/\d+").unwrap())
}

fn docs_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)docs?|readme|documentation").unwrap())
}

fn ops_verb() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)deploy|release|infra|ops|oncall|incident|runbook").unwrap())
}

fn personal_assistant_noun() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)gmail|email|filter|inbox|calendar|linkedin|recruiter|browser").unwrap()
    })
}

fn setup_verb() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)clean up|organize|configure|setup|set up|install").unwrap())
}

fn coding_noun() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)bug|error|regression").unwrap())
}

/// Classify `text` (concatenated human messages + last assistant reply)
/// into a [`TaskType`] following a fixed precedence cascade.
pub fn infer(text: &str) -> TaskType {
    let has_research = research_verb().is_match(text);
    let has_coding_verb = coding_verb().is_match(text);
    let has_issue_url = github_issue_url().is_match(text);

    if (has_research && has_coding_verb) || has_issue_url {
        return TaskType::Coding;
    }
    if has_research {
        return TaskType::Research;
    }
    if docs_pattern().is_match(text) {
        return TaskType::Docs;
    }
    if ops_verb().is_match(text) || personal_assistant_noun().is_match(text) || setup_verb().is_match(text) {
        return TaskType::Ops;
    }
    if has_coding_verb || coding_noun().is_match(text) {
        return TaskType::Coding;
    }
    TaskType::Other
}
