//! The per-session state machine that consumes session-idle events,
//! sequences the self-assessment/evaluation/feedback components, writes
//! the verdict signal, pushes the follow-up prompt, and enforces the
//! abort/race/cooldown rules. Structured as a per-event async task so
//! independent sessions never block on each other.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::artifact::{self, DebugSink};
use crate::config::Config;
use crate::cross_review;
use crate::evaluator::{self, ReflectionAnalysis, Severity};
use crate::feedback;
use crate::host_client::{HostClient, Message, Role, Toast, ToastVariant};
use crate::loop_detectors;
use crate::registries::{Registries, RunningGuard};
use crate::routing;
use crate::self_assessment;
use crate::signal_extractor::{self, AgentMode, WorkspaceProbe};

/// Explicit, non-exception control-flow result of one reflection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectionOutcome {
    /// Too few messages, judge session, plan mode, or already reflected.
    NoTarget,
    /// Max attempts already reached for this human message.
    MaxAttempts,
    /// Self-assessment protocol failed on every candidate.
    TransportFailure,
    /// An abort or new user message was observed mid-reflection.
    Aborted,
    /// Verdict was complete.
    Complete,
    /// Verdict required human action with nothing left for the agent to do.
    RequiresHumanAction,
    /// Feedback was pushed back into the session.
    Pushed,
}

/// Shortens a session id to the form used in artifact filenames and toasts.
fn short_id(session_id: &str) -> String {
    session_id.chars().take(8).collect()
}

/// The last non-reflection-injected user message, if any.
fn last_human_message<'a>(messages: &'a [Message]) -> Option<&'a Message> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User && !m.is_reflection_injected())
}

/// Whether any message in the log carries a judge-signature marker.
fn contains_judge_signature(messages: &[Message]) -> bool {
    messages.iter().any(|m| m.is_judge_signature())
}

/// Everything the orchestrator needs to run reflections for one workspace.
pub struct Orchestrator {
    pub client: Arc<dyn HostClient>,
    pub registries: Arc<Registries>,
    pub config: Config,
    pub workspace_dir: String,
    pub debug_sink: Arc<DebugSink>,
    pub probe: Arc<dyn WorkspaceProbe>,
}

impl Orchestrator {
    /// Handle one `session.idle` event end-to-end, applying the race-delay
    /// and RUNNING guard before running the per-reflection algorithm.
    pub async fn handle_idle(&self, session_id: &str) -> ReflectionOutcome {
        if self.registries.is_judge(session_id) {
            return ReflectionOutcome::NoTarget;
        }
        if self
            .registries
            .in_abort_cooldown(session_id, Duration::from_secs(self.config.abort_cooldown_secs))
        {
            return ReflectionOutcome::NoTarget;
        }

        tokio::time::sleep(Duration::from_millis(self.config.abort_race_delay_ms)).await;

        let reflection_start = Instant::now();
        if self.registries.aborted_after(session_id, reflection_start) {
            return ReflectionOutcome::NoTarget;
        }

        let Some(_guard) = RunningGuard::try_acquire(&self.registries, session_id) else {
            return ReflectionOutcome::NoTarget;
        };

        self.run_reflection(session_id, reflection_start).await
    }

    /// Record an abort event for `session_id`.
    pub fn record_abort(&self, session_id: &str) {
        self.registries.record_abort(session_id);
    }

    async fn toast(&self, title: &str, message: &str, variant: ToastVariant) {
        if let Err(e) = self
            .client
            .toast(&self.workspace_dir, Toast::new(title, message, variant))
            .await
        {
            warn!(error = %e, "toast publish failed");
        }
    }

    fn aborted_since(&self, session_id: &str, since: Instant) -> bool {
        self.registries.aborted_after(session_id, since)
    }

    /// The per-reflection algorithm.
    async fn run_reflection(&self, session_id: &str, reflection_start: Instant) -> ReflectionOutcome {
        let short = short_id(session_id);
        self.debug_sink.log(&format!("reflection start session={short}")).await;

        let messages = match self.client.messages(session_id).await {
            Ok(m) => m,
            Err(e) => {
                warn!(session_id, error = %e, "failed to load messages");
                return ReflectionOutcome::TransportFailure;
            }
        };
        if messages.len() < 2 {
            return ReflectionOutcome::NoTarget;
        }
        if contains_judge_signature(&messages) {
            return ReflectionOutcome::NoTarget;
        }

        let ctx = signal_extractor::extract(&messages, self.probe.as_ref());
        if ctx.agent_mode == AgentMode::Plan {
            return ReflectionOutcome::NoTarget;
        }

        let Some(human_msg) = last_human_message(&messages) else {
            return ReflectionOutcome::NoTarget;
        };
        let human_msg_id = human_msg.id.clone();

        if self.registries.last_reflected(session_id).as_deref() == Some(human_msg_id.as_str()) {
            return ReflectionOutcome::NoTarget;
        }

        if self.registries.attempt_count(session_id, &human_msg_id) >= self.config.max_attempts {
            self.registries.set_last_reflected(session_id, &human_msg_id);
            self.toast(
                "Max attempts",
                &format!("Max attempts ({}) reached", self.config.max_attempts),
                ToastVariant::Warning,
            )
            .await;
            return ReflectionOutcome::MaxAttempts;
        }

        let last_assistant_text = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.text())
            .unwrap_or_default();

        let attempt_index = self.registries.attempt_count(session_id, &human_msg_id);
        let prompt = self_assessment::build_prompt(
            &ctx,
            &last_assistant_text,
            self.config.project_instructions.as_deref(),
            attempt_index,
            self.config.max_attempts,
            self.config.custom_prompt.as_deref(),
        );

        let Some(outcome) = self_assessment::run_self_assessment(
            &self.client,
            &self.registries,
            &self.config,
            &self.workspace_dir,
            &prompt,
        )
        .await
        else {
            self.registries.set_last_reflected(session_id, &human_msg_id);
            self.toast(
                "Reflection analysis failed",
                "Reflection analysis failed",
                ToastVariant::Warning,
            )
            .await;
            return ReflectionOutcome::TransportFailure;
        };

        // Re-check invariants before touching the session again. An abort
        // observed here must NOT mark humanMsgId as reflected, so a later
        // message from the user can trigger a fresh reflection attempt.
        if self.race_violated(session_id, &messages, reflection_start).await {
            return ReflectionOutcome::Aborted;
        }

        let analysis = match serde_json::from_str::<evaluator::SelfAssessment>(
            extract_json_object(&outcome.text),
        ) {
            Ok(parsed) => evaluator::evaluate(&parsed, &ctx),
            Err(_) => self.run_judge_fallback(&ctx, &outcome.text).await,
        };

        if analysis.complete {
            let cross_review_text = if self.paired_model_available(&outcome.model_used) {
                cross_review::run_cross_review(
                    &self.client,
                    &self.registries,
                    &self.config,
                    &self.workspace_dir,
                    &outcome.model_used,
                    &ctx,
                    &last_assistant_text,
                    &outcome.text,
                    &analysis,
                )
                .await
            } else {
                None
            };

            let routing_result = routing::classify_and_resolve_model(
                &self.client,
                &self.registries,
                &self.config,
                &self.workspace_dir,
                &ctx,
            )
            .await;

            self.write_artifacts(
                session_id,
                &short,
                &ctx,
                &outcome.text,
                &analysis,
                cross_review_text.as_deref(),
                routing_result.as_ref().map(|(c, m)| (c.as_str(), m)),
            );

            self.registries.clear_attempts(session_id, &human_msg_id);
            self.registries.set_last_reflected(session_id, &human_msg_id);
            self.toast("Task complete ✓", "Task complete ✓", ToastVariant::Success)
                .await;
            return ReflectionOutcome::Complete;
        }

        if analysis.requires_human_action && !analysis.should_continue {
            self.write_artifacts(session_id, &short, &ctx, &outcome.text, &analysis, None, None);
            self.registries.clear_attempts(session_id, &human_msg_id);
            self.registries.set_last_reflected(session_id, &human_msg_id);
            let hint = analysis
                .missing
                .first()
                .or_else(|| analysis.next_actions.first())
                .cloned()
                .unwrap_or_else(|| "user action required".to_string());
            self.toast(
                "Action needed",
                &format!("Action needed: {hint}"),
                ToastVariant::Warning,
            )
            .await;
            return ReflectionOutcome::RequiresHumanAction;
        }

        if self.race_violated(session_id, &messages, reflection_start).await {
            return ReflectionOutcome::Aborted;
        }

        let new_attempt_count = self.registries.increment_attempt(session_id, &human_msg_id);
        if new_attempt_count >= self.config.max_attempts {
            self.write_artifacts(session_id, &short, &ctx, &outcome.text, &analysis, None, None);
            self.registries.set_last_reflected(session_id, &human_msg_id);
            self.toast(
                "Max attempts",
                &format!("Max attempts ({}) reached", self.config.max_attempts),
                ToastVariant::Warning,
            )
            .await;
            return ReflectionOutcome::MaxAttempts;
        }

        self.write_artifacts(session_id, &short, &ctx, &outcome.text, &analysis, None, None);

        let planning = loop_detectors::planning_loop(&messages, ctx.task_type);
        let action = loop_detectors::action_loop(&messages);
        let feedback_text =
            feedback::compose(new_attempt_count, self.config.max_attempts, &analysis, planning, action);

        let routing_for_followup = routing::classify_and_resolve_model(
            &self.client,
            &self.registries,
            &self.config,
            &self.workspace_dir,
            &ctx,
        )
        .await;

        let request = crate::host_client::PromptRequest {
            parts: vec![crate::host_client::Part::text(feedback_text)],
            model: routing_for_followup.as_ref().map(|(_, m)| m.clone()),
        };

        if let Err(e) = self.client.prompt_async(session_id, request).await {
            warn!(session_id, error = %e, "feedback prompt post failed");
            self.registries.set_last_reflected(session_id, &human_msg_id);
            return ReflectionOutcome::TransportFailure;
        }

        self.registries.set_last_reflected(session_id, &human_msg_id);
        let routing_tag = routing_for_followup
            .as_ref()
            .map(|(c, _)| format!(" ({c})"))
            .unwrap_or_default();
        self.toast(
            "Pushed agent to continue",
            &format!("Pushed agent to continue{routing_tag}"),
            ToastVariant::Info,
        )
        .await;

        ReflectionOutcome::Pushed
    }

    /// Abort observed after `reflection_start`, or the last non-reflection
    /// user message changed, or the session vanished.
    async fn race_violated(&self, session_id: &str, prior_messages: &[Message], reflection_start: Instant) -> bool {
        if self.aborted_since(session_id, reflection_start) {
            return true;
        }
        match self.client.messages(session_id).await {
            Ok(current) => {
                let prior_human = last_human_message(prior_messages).map(|m| m.id.clone());
                let current_human = last_human_message(&current).map(|m| m.id.clone());
                prior_human != current_human
            }
            Err(_) => true,
        }
    }

    async fn run_judge_fallback(
        &self,
        ctx: &signal_extractor::TaskContext,
        raw_text: &str,
    ) -> ReflectionAnalysis {
        let prompt = build_judge_fallback_prompt(ctx, raw_text);
        match self_assessment::run_self_assessment(
            &self.client,
            &self.registries,
            &self.config,
            &self.workspace_dir,
            &prompt,
        )
        .await
        {
            Some(outcome) => {
                match serde_json::from_str::<evaluator::JudgeVerdict>(extract_json_object(&outcome.text)) {
                    Ok(verdict) => evaluator::adapt_judge_verdict(verdict),
                    Err(_) => fallback_unparseable_analysis(),
                }
            }
            None => fallback_unparseable_analysis(),
        }
    }

    fn paired_model_available(&self, model_used: &crate::host_client::ModelSpec) -> bool {
        let lower = model_used.model.to_lowercase();
        lower.contains("opus") || lower.contains("gpt-5.2-codex")
    }

    #[allow(clippy::too_many_arguments)]
    fn write_artifacts(
        &self,
        session_id: &str,
        short: &str,
        ctx: &signal_extractor::TaskContext,
        raw_assessment: &str,
        analysis: &ReflectionAnalysis,
        cross_review_text: Option<&str>,
        routing_info: Option<(&str, &crate::host_client::ModelSpec)>,
    ) {
        let workspace_dir = Path::new(&self.workspace_dir);
        let now = Utc::now();

        if let Err(e) = artifact::write_verdict(workspace_dir, short, analysis.complete, analysis.severity, now) {
            warn!(session_id, error = %e, "failed to write verdict signal");
        }

        if let Err(e) = artifact::write_analysis_record(
            workspace_dir,
            short,
            now.timestamp_millis(),
            ctx,
            raw_assessment,
            analysis,
            cross_review_text,
            routing_info,
            now,
        ) {
            warn!(session_id, error = %e, "failed to write analysis record");
        }

        debug!(session_id, complete = analysis.complete, severity = analysis.severity.as_str(), "wrote reflection artifacts");
    }
}

fn fallback_unparseable_analysis() -> ReflectionAnalysis {
    ReflectionAnalysis {
        complete: false,
        should_continue: true,
        reason: "Self-assessment could not be parsed and the fallback judge also failed.".to_string(),
        missing: vec!["Provide a parseable self-assessment".to_string()],
        next_actions: Vec::new(),
        requires_human_action: false,
        severity: Severity::Medium,
    }
}

fn build_judge_fallback_prompt(ctx: &signal_extractor::TaskContext, raw_text: &str) -> String {
    format!(
        "ANALYZE REFLECTION-3\n\n\
         The self-assessment below could not be parsed as JSON. Read it and the task \
         context and produce your own verdict.\n\n\
         ## Task Context\nTask: {}\nTask type: {}\nrequires_tests={} requires_build={} \
         requires_pr={} requires_ci={}\n\n## Raw Self-Assessment\n{}\n\n\
         Respond with ONLY JSON: {{\"complete\": bool, \"severity\": \"NONE\"|\"LOW\"|\"MEDIUM\"|\"HIGH\"|\"BLOCKER\", \
         \"feedback\": string, \"missing\": [string], \"next_actions\": [string], \"requires_human_action\": bool}}",
        ctx.task_summary,
        ctx.task_type.as_str(),
        ctx.requires_tests,
        ctx.requires_build,
        ctx.requires_pr,
        ctx.requires_ci,
        raw_text,
    )
}

/// Best-effort extraction of a JSON object from a reply that may wrap it in
/// prose or a fenced code block.
fn extract_json_object(text: &str) -> &str {
    let trimmed = text.trim();
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            return &trimmed[start..=end];
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_client::{InMemoryHostClient, Part, ScriptedReply};
    use crate::signal_extractor::WorkspaceProbe;
    use chrono::Utc;

    struct AllowAllProbe;
    impl WorkspaceProbe for AllowAllProbe {
        fn has_test_script(&self) -> bool {
            true
        }
        fn has_build_script(&self) -> bool {
            false
        }
        fn has_tests_dir(&self) -> bool {
            true
        }
    }

    fn user_msg(id: &str, text: &str) -> Message {
        Message {
            id: id.to_string(),
            role: Role::User,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            abort_error: false,
            parts: vec![Part::text(text)],
        }
    }

    fn assistant_msg(text: &str) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            abort_error: false,
            parts: vec![Part::text(text)],
        }
    }

    fn make_orchestrator(mem: Arc<InMemoryHostClient>, workspace: &Path) -> Orchestrator {
        let client: Arc<dyn HostClient> = mem;
        let mut config = Config::default();
        config.poll_interval_ms = 1;
        config.abort_race_delay_ms = 1;
        config.judge_response_timeout_secs = 5;
        Orchestrator {
            client,
            registries: Arc::new(Registries::new()),
            config,
            workspace_dir: workspace.to_string_lossy().to_string(),
            debug_sink: Arc::new(DebugSink::new(workspace, false)),
            probe: Arc::new(AllowAllProbe),
        }
    }

    #[tokio::test]
    async fn complete_verdict_writes_verdict_and_posts_no_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let mem = Arc::new(InMemoryHostClient::new());
        mem.seed_session("s1", dir.path().to_string_lossy());
        mem.seed_history(
            "s1",
            vec![
                user_msg("u1", "fix the bug"),
                assistant_msg("done, tests pass, PR created"),
            ],
        );
        mem.queue_reply(
            "aux-1",
            ScriptedReply {
                message: assistant_msg(
                    r#"{"status":"complete","confidence":0.95,"evidence":{"tests":{"ran":true,"results":"pass","ran_after_changes":true,"commands":["cargo test"]},"pr":{"created":true,"url":"https://x/pr/1","ci_status":"pass","checked":true}}}"#,
                ),
                delay_polls: 0,
            },
        );

        let orch = make_orchestrator(mem.clone(), dir.path());
        let outcome = orch.handle_idle("s1").await;
        assert_eq!(outcome, ReflectionOutcome::Complete);
        assert_eq!(mem.prompts_sent("s1"), 0);
        let verdict_path = dir.path().join(".reflection");
        assert!(verdict_path.join(format!("verdict_{}.json", short_id("s1"))).exists());
    }

    #[tokio::test]
    async fn incomplete_verdict_pushes_feedback_and_increments_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let mem = Arc::new(InMemoryHostClient::new());
        mem.seed_session("s1", dir.path().to_string_lossy());
        mem.seed_history(
            "s1",
            vec![user_msg("u1", "fix the bug"), assistant_msg("done")],
        );
        mem.queue_reply(
            "aux-1",
            ScriptedReply {
                message: assistant_msg(
                    r#"{"status":"complete","confidence":0.95,"evidence":{"tests":{"ran":false}}}"#,
                ),
                delay_polls: 0,
            },
        );

        let orch = make_orchestrator(mem.clone(), dir.path());
        let outcome = orch.handle_idle("s1").await;
        assert_eq!(outcome, ReflectionOutcome::Pushed);
        assert_eq!(mem.prompts_sent("s1"), 1);
        assert_eq!(orch.registries.attempt_count("s1", "u1"), 1);
    }

    #[tokio::test]
    async fn too_few_messages_yields_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let mem = Arc::new(InMemoryHostClient::new());
        mem.seed_session("s1", dir.path().to_string_lossy());
        mem.seed_history("s1", vec![user_msg("u1", "fix the bug")]);

        let orch = make_orchestrator(mem.clone(), dir.path());
        let outcome = orch.handle_idle("s1").await;
        assert_eq!(outcome, ReflectionOutcome::NoTarget);
    }

    #[tokio::test]
    async fn judge_signature_session_never_reflected() {
        let dir = tempfile::tempdir().unwrap();
        let mem = Arc::new(InMemoryHostClient::new());
        mem.seed_session("s1", dir.path().to_string_lossy());
        mem.seed_history(
            "s1",
            vec![
                user_msg("u1", "SELF-ASSESS REFLECTION-3 please respond"),
                assistant_msg("{}"),
            ],
        );

        let orch = make_orchestrator(mem.clone(), dir.path());
        let outcome = orch.handle_idle("s1").await;
        assert_eq!(outcome, ReflectionOutcome::NoTarget);
    }

    #[tokio::test]
    async fn judge_session_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mem = Arc::new(InMemoryHostClient::new());
        mem.seed_session("aux-1", dir.path().to_string_lossy());
        mem.seed_history("aux-1", vec![user_msg("u1", "x"), assistant_msg("y")]);

        let orch = make_orchestrator(mem.clone(), dir.path());
        orch.registries.judge_register("aux-1".to_string());
        let outcome = orch.handle_idle("aux-1").await;
        assert_eq!(outcome, ReflectionOutcome::NoTarget);
    }

    #[tokio::test]
    async fn plan_mode_session_yields_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let mem = Arc::new(InMemoryHostClient::new());
        mem.seed_session("s1", dir.path().to_string_lossy());
        mem.seed_history(
            "s1",
            vec![
                user_msg("u1", "draft a plan for the migration"),
                assistant_msg("plan mode ACTIVE, drafting steps"),
            ],
        );

        let orch = make_orchestrator(mem.clone(), dir.path());
        let outcome = orch.handle_idle("s1").await;
        assert_eq!(outcome, ReflectionOutcome::NoTarget);
    }

    #[tokio::test]
    async fn same_human_message_not_reflected_twice() {
        let dir = tempfile::tempdir().unwrap();
        let mem = Arc::new(InMemoryHostClient::new());
        mem.seed_session("s1", dir.path().to_string_lossy());
        mem.seed_history("s1", vec![user_msg("u1", "fix the bug"), assistant_msg("done")]);

        let orch = make_orchestrator(mem.clone(), dir.path());
        orch.registries.set_last_reflected("s1", "u1");
        let outcome = orch.handle_idle("s1").await;
        assert_eq!(outcome, ReflectionOutcome::NoTarget);
    }

    #[tokio::test]
    async fn max_attempts_reached_stops_without_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let mem = Arc::new(InMemoryHostClient::new());
        mem.seed_session("s1", dir.path().to_string_lossy());
        mem.seed_history("s1", vec![user_msg("u1", "fix the bug"), assistant_msg("done")]);

        let orch = make_orchestrator(mem.clone(), dir.path());
        orch.registries.increment_attempt("s1", "u1");
        orch.registries.increment_attempt("s1", "u1");
        orch.registries.increment_attempt("s1", "u1");
        let outcome = orch.handle_idle("s1").await;
        assert_eq!(outcome, ReflectionOutcome::MaxAttempts);
        assert_eq!(mem.prompts_sent("s1"), 0);
    }

    #[tokio::test]
    async fn abort_after_start_suppresses_followup() {
        let dir = tempfile::tempdir().unwrap();
        let mem = Arc::new(InMemoryHostClient::new());
        mem.seed_session("s1", dir.path().to_string_lossy());
        mem.seed_history("s1", vec![user_msg("u1", "fix the bug"), assistant_msg("done")]);
        mem.queue_reply(
            "aux-1",
            ScriptedReply {
                message: assistant_msg(r#"{"status":"in_progress","confidence":0.5}"#),
                delay_polls: 50,
            },
        );

        let orch = make_orchestrator(mem.clone(), dir.path());
        // simulate an abort landing while the self-assessment poll loop is still running
        let registries = orch.registries.clone();
        let abort_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            registries.record_abort("s1");
        });
        let outcome = orch.handle_idle("s1").await;
        abort_task.await.unwrap();
        assert_eq!(outcome, ReflectionOutcome::Aborted);
        assert_eq!(mem.prompts_sent("s1"), 0);
    }

    #[test]
    fn extract_json_object_strips_fenced_code_block() {
        let text = "```json\n{\"status\": \"complete\"}\n```";
        assert_eq!(extract_json_object(text), "{\"status\": \"complete\"}");
    }
}
