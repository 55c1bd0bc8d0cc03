//! Creates an ephemeral auxiliary session, prompts it for a JSON
//! self-assessment, polls for completion, and tears it down on every exit
//! path.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{is_blocked_judge_model, Config};
use crate::host_client::{HostClient, ModelSpec, Part, PromptRequest};
use crate::registries::Registries;
use crate::signal_extractor::TaskContext;

pub const SELF_ASSESS_HEADER: &str = "SELF-ASSESS REFLECTION-3";

const LAST_REPLY_TRUNCATE: usize = 4_000;
const TASK_SUMMARY_TRUNCATE: usize = 2_000;
const RECENT_COMMANDS_SHOWN: usize = 6;

/// Outcome of a single candidate model attempt.
enum CandidateOutcome {
    Success(String),
    Failure,
}

/// Resolve the ordered list of candidate model specs to try, in order.
pub fn candidate_models(config: &Config) -> Vec<ModelSpec> {
    if !config.models.is_empty() {
        return config
            .models
            .iter()
            .filter(|m| !is_blocked_judge_model(m))
            .cloned()
            .collect();
    }
    if let Some(preferred) = &config.preferred_model {
        if !is_blocked_judge_model(preferred) {
            return vec![preferred.clone()];
        }
    }
    vec![ModelSpec::host_default()]
}

/// Build the self-assessment prompt text.
pub fn build_prompt(
    ctx: &TaskContext,
    last_assistant_text: &str,
    agents_guide_text: Option<&str>,
    attempt_index: usize,
    max_attempts: usize,
    custom_prompt: Option<&str>,
) -> String {
    if let Some(custom) = custom_prompt {
        return custom.to_string();
    }

    let mut out = String::new();
    out.push_str(SELF_ASSESS_HEADER);
    out.push_str("\n\n## Task Context\n");
    let truncated_summary: String = ctx.task_summary.chars().take(TASK_SUMMARY_TRUNCATE).collect();
    out.push_str(&format!("Task: {truncated_summary}\n"));
    out.push_str(&format!("Task type: {}\n", ctx.task_type.as_str()));
    out.push_str(&format!("Agent mode: {:?}\n", ctx.agent_mode));
    out.push_str("Required checks:\n");
    out.push_str(&format!("- requires_tests: {}\n", ctx.requires_tests));
    out.push_str(&format!("- requires_build: {}\n", ctx.requires_build));
    out.push_str(&format!("- requires_pr: {}\n", ctx.requires_pr));
    out.push_str(&format!("- requires_ci: {}\n", ctx.requires_ci));
    out.push_str(&format!(
        "- requires_local_tests: {}\n",
        ctx.requires_local_tests
    ));
    if !ctx.detected_signals.is_empty() {
        let signals: Vec<&str> = ctx.detected_signals.iter().map(|s| s.as_str()).collect();
        out.push_str(&format!("Detected signals: {}\n", signals.join(", ")));
    }

    out.push_str("\n## Tool Commands Run\n");
    let start = ctx.recent_commands.len().saturating_sub(RECENT_COMMANDS_SHOWN);
    for cmd in &ctx.recent_commands[start..] {
        out.push_str(&format!("- {cmd}\n"));
    }

    if !last_assistant_text.is_empty() {
        let truncated: String = last_assistant_text.chars().take(LAST_REPLY_TRUNCATE).collect();
        out.push_str("\n## Last Response\n");
        out.push_str(&truncated);
        out.push('\n');
    }

    if attempt_index > 0 {
        out.push_str("\n## Reflection History\n");
        out.push_str(&format!(
            "This is attempt {} of {max_attempts}. If you are repeating the same \
             actions without making progress, set `stuck: true`.\n",
            attempt_index + 1
        ));
    }

    if let Some(instructions) = agents_guide_text {
        out.push_str("\n## Project Instructions\n");
        out.push_str(instructions);
        out.push('\n');
    }

    out.push_str(
        "\n## Required JSON Schema\nRespond with ONLY a JSON object matching:\n\
         {\n  \"status\": \"complete\" | \"in_progress\" | \"blocked\" | \"stuck\" | \"waiting_for_user\",\n  \
         \"confidence\": 0.0-1.0,\n  \"evidence\": {\n    \"tests\": {\"ran\": bool, \"results\": \"pass\"|\"fail\"|\"unknown\", \
         \"ran_after_changes\": bool, \"commands\": [string], \"skipped\": bool, \"skip_reason\": string},\n    \
         \"build\": {\"ran\": bool, \"results\": \"pass\"|\"fail\"|\"unknown\", \"ran_after_changes\": bool, \
         \"commands\": [string]},\n    \"pr\": {\"created\": bool, \"url\": string, \"ci_status\": \"pass\"|\"fail\"|\"unknown\", \
         \"checked\": bool}\n  },\n  \"remaining_work\": [string],\n  \"next_steps\": [string],\n  \
         \"needs_user_action\": [string],\n  \"stuck\": bool,\n  \"alternate_approach\": string\n}\n\n\
         Rules: tests must have run AFTER the latest changes, not just at some earlier point; \
         local test commands are required when applicable; a PR and passing CI are required when \
         applicable; never report a skipped or flaky test as a pass; never report a direct push to \
         the default branch as acceptable; if stuck, propose an alternate approach; populate \
         needs_user_action only with steps a human must perform (auth, credentials, approvals); set \
         status=in_progress and stuck=true if the task required code changes but no write-like tool \
         was invoked.\n",
    );

    out
}

/// Result of running the self-assessment protocol.
pub struct SelfAssessmentOutcome {
    pub text: String,
    pub model_used: ModelSpec,
}

/// Run the self-assessment protocol against each candidate model in turn,
/// returning the first successful reply.
pub async fn run_self_assessment(
    client: &Arc<dyn HostClient>,
    registries: &Registries,
    config: &Config,
    workspace_dir: &str,
    prompt: &str,
) -> Option<SelfAssessmentOutcome> {
    for candidate in candidate_models(config) {
        let session = match client.create_session(workspace_dir).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to create auxiliary session");
                continue;
            }
        };
        registries.judge_register(session.id.clone());

        let outcome = run_one_candidate(
            client,
            config,
            &session.id,
            workspace_dir,
            prompt,
            candidate.clone(),
        )
        .await;

        let _ = client.delete_session(&session.id, workspace_dir).await;
        registries.judge_unregister(&session.id);

        match outcome {
            CandidateOutcome::Success(text) => {
                return Some(SelfAssessmentOutcome {
                    text,
                    model_used: candidate,
                });
            }
            CandidateOutcome::Failure => continue,
        }
    }
    None
}

async fn run_one_candidate(
    client: &Arc<dyn HostClient>,
    config: &Config,
    session_id: &str,
    workspace_dir: &str,
    prompt: &str,
    candidate: ModelSpec,
) -> CandidateOutcome {
    let request = PromptRequest {
        parts: vec![Part::text(prompt)],
        model: if candidate.is_host_default() {
            None
        } else {
            Some(candidate)
        },
    };
    if let Err(e) = client.prompt_async(session_id, request).await {
        warn!(session_id, error = %e, "self-assessment prompt post failed");
        return CandidateOutcome::Failure;
    }

    let deadline = Duration::from_secs(config.judge_response_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut waited = Duration::ZERO;

    loop {
        match client.messages(session_id).await {
            Ok(messages) => {
                if let Some(text) = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == crate::host_client::Role::Assistant && m.completed_at.is_some())
                    .map(|m| m.text())
                    .filter(|t| !t.is_empty())
                {
                    debug!(session_id, "self-assessment candidate responded");
                    return CandidateOutcome::Success(text);
                }
            }
            Err(e) => {
                warn!(session_id, error = %e, "self-assessment poll failed");
                return CandidateOutcome::Failure;
            }
        }

        if waited >= deadline {
            warn!(session_id, "self-assessment candidate timed out");
            return CandidateOutcome::Failure;
        }
        tokio::time::sleep(poll_interval).await;
        waited += poll_interval;
    }
}
