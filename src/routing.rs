//! Optional routing classifier: classifies a task into a routing category
//! and resolves the associated model spec override for the follow-up
//! prompt only. A short auxiliary-session prompt whose JSON reply drives a
//! deterministic model pick.

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::config::Config;
use crate::host_client::{HostClient, ModelSpec, Part, PromptRequest, Role};
use crate::registries::Registries;
use crate::signal_extractor::TaskContext;

pub const CLASSIFY_HEADER: &str = "CLASSIFY TASK ROUTING";
const RECENT_USER_MESSAGES_SHOWN: usize = 4;

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    category: String,
}

/// Maps provider-specific gpt-4/4o/4.1 variants to the canonical
/// `github-copilot/gpt-4.1` escape hatch when used for the classifier call
/// itself.
fn canonicalize_classifier_model(spec: &ModelSpec) -> ModelSpec {
    let model_lower = spec.model.to_lowercase();
    let is_gpt4_variant = spec.provider == "github-copilot"
        && (model_lower == "gpt-4"
            || model_lower == "gpt-4o"
            || model_lower == "gpt-4.1"
            || model_lower.starts_with("gpt-4-")
            || model_lower.starts_with("gpt-4o-"));
    if is_gpt4_variant {
        ModelSpec {
            provider: "github-copilot".to_string(),
            model: "gpt-4.1".to_string(),
        }
    } else {
        spec.clone()
    }
}

/// Build the short classification prompt.
fn build_classify_prompt(ctx: &TaskContext) -> String {
    let mut out = format!("{CLASSIFY_HEADER}\n\n");
    out.push_str(&format!("Task: {}\n", ctx.task_summary));
    out.push_str(&format!("Task type: {}\n", ctx.task_type.as_str()));
    out.push_str("Recent user messages:\n");
    let start = ctx.human_messages.len().saturating_sub(RECENT_USER_MESSAGES_SHOWN);
    for msg in &ctx.human_messages[start..] {
        out.push_str(&format!("- {}\n", msg.text()));
    }
    out.push_str(
        "\nRespond with ONLY JSON: {\"category\": \"backend\"|\"architecture\"|\"frontend\"|\"default\"}",
    );
    out
}

/// Classify the task and resolve a routing model, if routing is enabled.
/// Returns `None` when routing is disabled, the classifier call fails, or no
/// model is configured for the resolved category.
pub async fn classify_and_resolve_model(
    client: &Arc<dyn HostClient>,
    registries: &Registries,
    config: &Config,
    workspace_dir: &str,
    ctx: &TaskContext,
) -> Option<(String, ModelSpec)> {
    if !config.routing.enabled {
        return None;
    }

    let category = classify_category(client, registries, config, workspace_dir, ctx).await?;
    let model = config.routing.model_for(&category)?;
    let model = canonicalize_classifier_model(&model);
    Some((category, model))
}

async fn classify_category(
    client: &Arc<dyn HostClient>,
    registries: &Registries,
    config: &Config,
    workspace_dir: &str,
    ctx: &TaskContext,
) -> Option<String> {
    let session = client.create_session(workspace_dir).await.ok()?;
    registries.judge_register(session.id.clone());

    let prompt = build_classify_prompt(ctx);
    let request = PromptRequest {
        parts: vec![Part::text(prompt)],
        model: None,
    };
    let result = async {
        client.prompt_async(&session.id, request).await.ok()?;
        let deadline = std::time::Duration::from_secs(config.judge_response_timeout_secs.min(30));
        let poll = std::time::Duration::from_millis(config.poll_interval_ms);
        let mut waited = std::time::Duration::ZERO;
        loop {
            let messages = client.messages(&session.id).await.ok()?;
            if let Some(text) = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant && m.completed_at.is_some())
                .map(|m| m.text())
            {
                if let Ok(parsed) = serde_json::from_str::<ClassifyResponse>(text.trim()) {
                    return Some(parsed.category);
                }
                return None;
            }
            if waited >= deadline {
                return None;
            }
            tokio::time::sleep(poll).await;
            waited += poll;
        }
    }
    .await;

    let _ = client.delete_session(&session.id, workspace_dir).await;
    registries.judge_unregister(&session.id);
    if result.is_none() {
        warn!(session_id = %session.id, "routing classification failed or timed out");
    }
    result
}
