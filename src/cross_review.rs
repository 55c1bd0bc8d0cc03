//! Optional cross-review: when the verdict is "complete", runs a second
//! auxiliary session with a paired model to produce a critique artifact.
//! Never changes the verdict — purely informational, stored alongside the
//! analysis record. Uses the same auxiliary-session machinery as the
//! self-assessment protocol.

use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::evaluator::ReflectionAnalysis;
use crate::host_client::{HostClient, ModelSpec, Part, PromptRequest, Role};
use crate::registries::Registries;
use crate::signal_extractor::TaskContext;

pub const REVIEW_HEADER: &str = "REVIEW REFLECTION-3 COMPLETION";

/// The fixed model pairing: `opus <-> gpt-5.2-codex`.
fn paired_model(model_used: &ModelSpec) -> Option<ModelSpec> {
    let model_lower = model_used.model.to_lowercase();
    if model_lower.contains("opus") {
        Some(ModelSpec {
            provider: "openai".to_string(),
            model: "gpt-5.2-codex".to_string(),
        })
    } else if model_lower.contains("gpt-5.2-codex") {
        Some(ModelSpec {
            provider: "anthropic".to_string(),
            model: "claude-opus".to_string(),
        })
    } else {
        None
    }
}

fn build_review_prompt(
    ctx: &TaskContext,
    last_assistant_text: &str,
    raw_assessment: &str,
    analysis: &ReflectionAnalysis,
) -> String {
    let mut out = format!("{REVIEW_HEADER}\n\n");
    out.push_str(&format!("Task: {}\n", ctx.task_summary));
    out.push_str(&format!("Task type: {}\n\n", ctx.task_type.as_str()));
    out.push_str("## Last Response\n");
    out.push_str(last_assistant_text);
    out.push_str("\n\n## Raw Self-Assessment\n");
    out.push_str(raw_assessment);
    out.push_str(&format!(
        "\n\n## Verdict\ncomplete={} severity={}\n\n\
         Give a short critique (a few sentences) of whether this verdict is \
         actually justified. This will not change the verdict; it is recorded \
         for later review.",
        analysis.complete,
        analysis.severity.as_str()
    ));
    out
}

/// Run the optional cross-review, returning the critique text on success.
/// Any failure is swallowed (logged) — cross-review is never allowed to
/// affect the verdict.
pub async fn run_cross_review(
    client: &Arc<dyn HostClient>,
    registries: &Registries,
    config: &Config,
    workspace_dir: &str,
    model_used: &ModelSpec,
    ctx: &TaskContext,
    last_assistant_text: &str,
    raw_assessment: &str,
    analysis: &ReflectionAnalysis,
) -> Option<String> {
    let partner = paired_model(model_used)?;

    let session = match client.create_session(workspace_dir).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cross-review session creation failed");
            return None;
        }
    };
    registries.judge_register(session.id.clone());

    let prompt = build_review_prompt(ctx, last_assistant_text, raw_assessment, analysis);
    let request = PromptRequest {
        parts: vec![Part::text(prompt)],
        model: Some(partner),
    };

    let critique = async {
        client.prompt_async(&session.id, request).await.ok()?;
        let deadline = std::time::Duration::from_secs(config.judge_response_timeout_secs);
        let poll = std::time::Duration::from_millis(config.poll_interval_ms);
        let mut waited = std::time::Duration::ZERO;
        loop {
            let messages = client.messages(&session.id).await.ok()?;
            if let Some(text) = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant && m.completed_at.is_some())
                .map(|m| m.text())
                .filter(|t| !t.is_empty())
            {
                return Some(text);
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
    critique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opus_pairs_with_codex() {
        let model = ModelSpec {
            provider: "anthropic".into(),
            model: "claude-opus".into(),
        };
        let partner = paired_model(&model).unwrap();
        assert_eq!(partner.model, "gpt-5.2-codex");
    }

    #[test]
    fn codex_pairs_with_opus() {
        let model = ModelSpec {
            provider: "openai".into(),
            model: "gpt-5.2-codex".into(),
        };
        let partner = paired_model(&model).unwrap();
        assert_eq!(partner.model, "claude-opus");
    }

    #[test]
    fn unpaired_model_yields_none() {
        let model = ModelSpec {
            provider: "anthropic".into(),
            model: "claude-sonnet".into(),
        };
        assert!(paired_model(&model).is_none());
    }
}
