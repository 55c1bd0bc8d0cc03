//! Writes the verdict signal and the full analysis record under
//! `<workspace>/.reflection/`, plus the optional debug log. Verdict and
//! analysis files use a temp-file-then-rename sequence so peers never
//! observe a partially written file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::ReflectionResult;
use crate::evaluator::{ReflectionAnalysis, Severity};
use crate::signal_extractor::TaskContext;

const ANALYSIS_TEXT_LIMIT: usize = 4_000;

/// `{sessionId, complete, severity, timestamp}` — the sole signal peers
/// must read. Field names/types must match this shape bit-for-bit.
#[derive(Debug, Clone, Serialize)]
pub struct VerdictSignal {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub complete: bool,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct TaskRecord<'a> {
    summary: &'a str,
    #[serde(rename = "type")]
    task_type: &'a str,
    #[serde(rename = "agentMode")]
    agent_mode: String,
}

#[derive(Debug, Serialize)]
struct AnalysisRecord<'a> {
    task: TaskRecord<'a>,
    assessment: String,
    analysis: &'a ReflectionAnalysis,
    #[serde(rename = "crossReview", skip_serializing_if = "Option::is_none")]
    cross_review: Option<&'a str>,
    #[serde(rename = "routing", skip_serializing_if = "Option::is_none")]
    routing: Option<RoutingRecord<'a>>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct RoutingRecord<'a> {
    category: &'a str,
    model: String,
}

/// The reflection directory for a workspace, creating it lazily.
fn reflection_dir(workspace_dir: &Path) -> ReflectionResult<PathBuf> {
    let dir = workspace_dir.join(".reflection");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Write a file via temp-then-rename in the same directory, giving atomic
/// write-then-rename semantics.
fn write_atomic(dir: &Path, final_name: &str, contents: &[u8]) -> ReflectionResult<()> {
    let tmp_path = dir.join(format!(".{final_name}.tmp-{}", uuid::Uuid::new_v4()));
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, dir.join(final_name))?;
    Ok(())
}

impl Severity {
    fn serialize_as(self) -> String {
        self.as_str().to_string()
    }
}

/// Write the verdict signal file. Must happen before any follow-up prompt
/// or toast, so peers never observe a stale verdict after a follow-up lands.
pub fn write_verdict(
    workspace_dir: &Path,
    session_id_short: &str,
    complete: bool,
    severity: Severity,
    timestamp: DateTime<Utc>,
) -> ReflectionResult<()> {
    let dir = reflection_dir(workspace_dir)?;
    let signal = VerdictSignal {
        session_id: session_id_short.to_string(),
        complete,
        severity: severity.serialize_as(),
        timestamp,
    };
    let body = serde_json::to_vec_pretty(&signal)?;
    write_atomic(&dir, &format!("verdict_{session_id_short}.json"), &body)
}

/// Write the full analysis record (opaque to peers).
#[allow(clippy::too_many_arguments)]
pub fn write_analysis_record(
    workspace_dir: &Path,
    session_id_short: &str,
    epoch_ms: i64,
    ctx: &TaskContext,
    raw_assessment: &str,
    analysis: &ReflectionAnalysis,
    cross_review: Option<&str>,
    routing: Option<(&str, &crate::host_client::ModelSpec)>,
    timestamp: DateTime<Utc>,
) -> ReflectionResult<()> {
    let dir = reflection_dir(workspace_dir)?;
    let truncated_assessment: String = raw_assessment.chars().take(ANALYSIS_TEXT_LIMIT).collect();
    let record = AnalysisRecord {
        task: TaskRecord {
            summary: &ctx.task_summary,
            task_type: ctx.task_type.as_str(),
            agent_mode: format!("{:?}", ctx.agent_mode),
        },
        assessment: truncated_assessment,
        analysis,
        cross_review,
        routing: routing.map(|(category, model)| RoutingRecord {
            category,
            model: model.as_spec_string(),
        }),
        timestamp,
    };
    let body = serde_json::to_vec_pretty(&record)?;
    write_atomic(
        &dir,
        &format!("{session_id_short}_{epoch_ms}.json"),
        &body,
    )
}

/// Fire-and-forget debug log sink, gated by `REFLECTION_DEBUG`. Guarded by a
/// `tokio::sync::Mutex` so concurrent per-session tasks never interleave
/// partial lines; a write failure logs one `tracing::warn!` and is
/// otherwise swallowed — telemetry I/O must never block the main path.
pub struct DebugSink {
    path: PathBuf,
    lock: Mutex<()>,
    enabled: bool,
}

impl DebugSink {
    pub fn new(workspace_dir: &Path, enabled: bool) -> Self {
        Self {
            path: workspace_dir.join(".reflection").join("debug.log"),
            lock: Mutex::new(()),
            enabled,
        }
    }

    /// Append one line, fire-and-forget. Never writes to stdout/stderr.
    pub async fn log(&self, message: &str) {
        if !self.enabled {
            return;
        }
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let line = format!("[{}] [Reflection3] {message}\n", Utc::now().to_rfc3339());
        use std::io::Write as _;
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(error = %e, "debug log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_extractor::{AgentMode, TaskType};
    use std::collections::BTreeSet;

    fn ctx() -> TaskContext {
        TaskContext {
            task_summary: "Fix the bug".into(),
            task_type: TaskType::Coding,
            agent_mode: AgentMode::Build,
            human_messages: Vec::new(),
            tools_summary: String::new(),
            detected_signals: BTreeSet::new(),
            recent_commands: Vec::new(),
            pushed_to_default_branch: false,
            requires_tests: true,
            requires_build: false,
            requires_pr: true,
            requires_ci: true,
            requires_local_tests: true,
            requires_local_tests_evidence: true,
        }
    }

    fn analysis() -> ReflectionAnalysis {
        ReflectionAnalysis {
            complete: true,
            should_continue: false,
            reason: "done".into(),
            missing: Vec::new(),
            next_actions: Vec::new(),
            requires_human_action: false,
            severity: Severity::None,
        }
    }

    #[test]
    fn writes_verdict_bit_exact_field_shape() {
        let dir = tempfile::tempdir().unwrap();
        write_verdict(dir.path(), "abc123", true, Severity::None, Utc::now()).unwrap();
        let contents =
            std::fs::read_to_string(dir.path().join(".reflection/verdict_abc123.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["sessionId"], "abc123");
        assert_eq!(value["complete"], true);
        assert_eq!(value["severity"], "NONE");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn writes_analysis_record_with_truncated_assessment() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let analysis = analysis();
        let long_assessment = "x".repeat(10_000);
        write_analysis_record(
            dir.path(),
            "abc123",
            1_700_000_000_000,
            &ctx,
            &long_assessment,
            &analysis,
            None,
            None,
            Utc::now(),
        )
        .unwrap();
        let path = dir.path().join(".reflection/abc123_1700000000000.json");
        let contents = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["assessment"].as_str().unwrap().len(), ANALYSIS_TEXT_LIMIT);
    }

    #[tokio::test]
    async fn debug_sink_noop_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DebugSink::new(dir.path(), false);
        sink.log("should not be written").await;
        assert!(!dir.path().join(".reflection/debug.log").exists());
    }

    #[tokio::test]
    async fn debug_sink_appends_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DebugSink::new(dir.path(), true);
        sink.log("first").await;
        sink.log("second").await;
        let contents = std::fs::read_to_string(dir.path().join(".reflection/debug.log")).unwrap();
        assert!(contents.contains("first"));
        assert!(contents.contains("second"));
        assert!(contents.contains("[Reflection3]"));
    }
}
