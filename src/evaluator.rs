//! The pure decision function that turns a parsed [`SelfAssessment`] plus a
//! [`TaskContext`] into a [`ReflectionAnalysis`] verdict. No I/O, no
//! `tracing` — a deterministic function over a report and accumulated
//! state, safe to call repeatedly in tests.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::signal_extractor::{is_human_only, TaskContext};

/// Evidence fields the respondent reports about test runs.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RunEvidence {
    #[serde(default)]
    pub ran: Option<bool>,
    #[serde(default)]
    pub results: Option<String>,
    #[serde(default)]
    pub ran_after_changes: Option<bool>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub skipped: Option<bool>,
    #[serde(default)]
    pub skip_reason: Option<String>,
}

impl RunEvidence {
    fn results_is_pass(&self) -> bool {
        self.results.as_deref() == Some("pass")
    }
}

/// PR-specific evidence.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PrEvidence {
    #[serde(default)]
    pub created: Option<bool>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ci_status: Option<String>,
    #[serde(default)]
    pub checked: Option<bool>,
}

/// The `evidence` object of a self-assessment.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Evidence {
    #[serde(default)]
    pub tests: RunEvidence,
    #[serde(default)]
    pub build: RunEvidence,
    #[serde(default)]
    pub pr: PrEvidence,
}

/// Self-reported task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfStatus {
    Complete,
    InProgress,
    Blocked,
    Stuck,
    WaitingForUser,
}

/// Structured self-assessment document an auxiliary session returns.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelfAssessment {
    #[serde(default)]
    pub status: Option<SelfStatus>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default)]
    pub remaining_work: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub needs_user_action: Vec<String>,
    #[serde(default)]
    pub stuck: bool,
    #[serde(default)]
    pub alternate_approach: Option<String>,
}

/// Severity of an incomplete verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Blocker,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "NONE",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Blocker => "BLOCKER",
        }
    }
}

/// The evaluator's verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ReflectionAnalysis {
    pub complete: bool,
    pub should_continue: bool,
    pub reason: String,
    pub missing: Vec<String>,
    pub next_actions: Vec<String>,
    pub requires_human_action: bool,
    pub severity: Severity,
}

fn dedup_preserve_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

fn test_build_severity_hint() -> &'static regex::Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)test|build").unwrap())
}

fn ci_check_severity_hint() -> &'static regex::Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)ci|check").unwrap())
}

/// `evaluate(SelfAssessment, TaskContext) -> ReflectionAnalysis`. Same
/// inputs always produce the same verdict.
pub fn evaluate(assessment: &SelfAssessment, ctx: &TaskContext) -> ReflectionAnalysis {
    let mut missing: Vec<String> = assessment.remaining_work.clone();
    let mut next_actions: Vec<String> = Vec::new();

    let (human_only, agent_actionable): (Vec<&String>, Vec<&String>) = assessment
        .needs_user_action
        .iter()
        .partition(|item| is_human_only(item));
    for item in &agent_actionable {
        missing.push((*item).clone());
        next_actions.push((*item).clone());
    }

    if ctx.requires_tests {
        if assessment.evidence.tests.ran != Some(true) {
            missing.push("Run tests".to_string());
        } else {
            if assessment.evidence.tests.skipped == Some(true)
                || assessment.evidence.tests.skip_reason.is_some()
            {
                missing.push("Do not skip required tests".to_string());
            }
            if !assessment.evidence.tests.results_is_pass() {
                missing.push("Fix failing tests".to_string());
            }
            if assessment.evidence.tests.ran_after_changes != Some(true) {
                missing.push("Re-run tests after latest changes".to_string());
            }
        }
    }

    if ctx.requires_local_tests {
        if assessment.evidence.tests.commands.is_empty() {
            missing.push("Provide local test commands".to_string());
        } else {
            let matches_recent = assessment
                .evidence
                .tests
                .commands
                .iter()
                .map(|c| crate::signal_extractor::normalize_command(c))
                .any(|normalized| ctx.recent_commands.contains(&normalized));
            if !matches_recent {
                missing.push("Provide local test commands from this session".to_string());
            }
        }
    }

    if ctx.requires_build {
        if assessment.evidence.build.ran != Some(true) {
            missing.push("Run build".to_string());
        } else {
            if assessment.evidence.build.skipped == Some(true)
                || assessment.evidence.build.skip_reason.is_some()
            {
                missing.push("Do not skip required build".to_string());
            }
            if !assessment.evidence.build.results_is_pass() {
                missing.push("Fix failing build".to_string());
            }
            if assessment.evidence.build.ran_after_changes != Some(true) {
                missing.push("Re-run build after latest changes".to_string());
            }
        }
    }

    if ctx.requires_pr {
        if assessment.evidence.pr.created != Some(true) {
            missing.push("Create PR".to_string());
        } else if ctx.requires_ci {
            if assessment.evidence.pr.url.is_none() {
                missing.push("Provide PR link".to_string());
            }
            let has_pr_signal = ctx.detected_signals.contains(&crate::signal_extractor::DetectedSignal::GhPrCreate)
                || ctx.detected_signals.contains(&crate::signal_extractor::DetectedSignal::GhPr);
            if !has_pr_signal {
                missing.push("Provide PR creation evidence".to_string());
            }
            if assessment.evidence.pr.checked != Some(true) {
                missing.push("Verify CI checks".to_string());
            } else if assessment.evidence.pr.ci_status.as_deref() != Some("pass") {
                missing.push("Fix failing CI".to_string());
            }
            let has_ci_signal = [
                crate::signal_extractor::DetectedSignal::GhPrChecks,
                crate::signal_extractor::DetectedSignal::GhPrView,
                crate::signal_extractor::DetectedSignal::GhPrStatus,
            ]
            .iter()
            .any(|s| ctx.detected_signals.contains(s));
            if !has_ci_signal {
                missing.push("Provide CI check evidence".to_string());
            }
        }
    }

    if ctx.pushed_to_default_branch {
        missing.push("Avoid direct push to default branch".to_string());
    }

    if assessment.stuck {
        missing.push("Rethink approach".to_string());
    }

    let requires_human_action = !human_only.is_empty()
        || missing.iter().any(|m| is_human_only(m))
        || next_actions.iter().any(|m| is_human_only(m))
        || assessment.next_steps.iter().any(|m| is_human_only(m));

    let confidence = assessment.confidence.unwrap_or(0.0);
    let complete = assessment.status == Some(SelfStatus::Complete)
        && missing.is_empty()
        && confidence >= 0.8
        && !requires_human_action;

    let all_items: Vec<&String> = missing.iter().chain(next_actions.iter()).collect();
    let mut severity = if all_items.iter().any(|i| test_build_severity_hint().is_match(i)) {
        Severity::High
    } else if all_items.iter().any(|i| ci_check_severity_hint().is_match(i)) {
        Severity::Medium
    } else if !all_items.is_empty() {
        Severity::Low
    } else {
        Severity::None
    };
    if requires_human_action && missing.is_empty() && next_actions.is_empty() {
        severity = Severity::Low;
    }

    next_actions.extend(assessment.next_steps.iter().cloned());
    let next_actions = dedup_preserve_order(next_actions);
    let missing = dedup_preserve_order(missing);

    let should_continue = missing.iter().any(|m| !is_human_only(m))
        || next_actions.iter().any(|m| !is_human_only(m));

    let reason = if complete {
        "Self-assessment confirms completion and all required workflow evidence is present."
            .to_string()
    } else if requires_human_action && !should_continue {
        "User action required before continuing.".to_string()
    } else if !missing.is_empty() || !next_actions.is_empty() {
        "Missing required workflow steps.".to_string()
    } else {
        "Task not confirmed complete.".to_string()
    };

    ReflectionAnalysis {
        complete,
        should_continue,
        reason,
        missing,
        next_actions,
        requires_human_action,
        severity,
    }
}

/// Fallback verdict produced by the LLM judge when the primary
/// self-assessment text cannot be parsed as JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeVerdict {
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub next_actions: Vec<String>,
    #[serde(default)]
    pub requires_human_action: bool,
}

/// Adapt a [`JudgeVerdict`] into a [`ReflectionAnalysis`] with the same
/// human-only partitioning rules the primary path uses.
pub fn adapt_judge_verdict(verdict: JudgeVerdict) -> ReflectionAnalysis {
    let missing = dedup_preserve_order(verdict.missing);
    let next_actions = dedup_preserve_order(verdict.next_actions);
    let requires_human_action = verdict.requires_human_action
        || missing.iter().any(|m| is_human_only(m))
        || next_actions.iter().any(|m| is_human_only(m));
    let should_continue =
        missing.iter().any(|m| !is_human_only(m)) || next_actions.iter().any(|m| !is_human_only(m));
    let severity = verdict.severity.unwrap_or(if verdict.complete {
        Severity::None
    } else if !missing.is_empty() || !next_actions.is_empty() {
        Severity::Medium
    } else {
        Severity::Low
    });
    let reason = verdict
        .feedback
        .unwrap_or_else(|| "Judge fallback verdict.".to_string());
    ReflectionAnalysis {
        complete: verdict.complete && !requires_human_action,
        should_continue,
        reason,
        missing,
        next_actions,
        requires_human_action,
        severity,
    }
}
