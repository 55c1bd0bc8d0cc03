//! Host-runtime client — the sole seam through which the orchestrator
//! touches the outside world.
//!
//! The host runtime owns session state and exposes an HTTP/RPC surface for
//! listing/creating/deleting sessions, posting prompts, reading messages,
//! and publishing toast notifications, plus an event stream of
//! `session.idle`/`session.error`/`session.status` notifications. This
//! module defines that surface as an `async_trait` so the orchestrator can
//! be exercised against an in-memory fake in tests.

mod memory_client;
mod reqwest_client;

pub use memory_client::{InMemoryHostClient, ScriptedReply};
pub use reqwest_client::ReqwestHostClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Status of a tool invocation part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Success,
    Error,
}

/// One piece of a message's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text {
        content: String,
    },
    Tool {
        name: String,
        input: serde_json::Value,
        status: ToolStatus,
    },
}

impl Part {
    pub fn text(content: impl Into<String>) -> Self {
        Part::Text {
            content: content.into(),
        }
    }

    pub fn tool(
        name: impl Into<String>,
        input: serde_json::Value,
        status: ToolStatus,
    ) -> Self {
        Part::Tool {
            name: name.into(),
            input,
            status,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { content } => Some(content.as_str()),
            _ => None,
        }
    }

    pub fn as_tool(&self) -> Option<(&str, &serde_json::Value, ToolStatus)> {
        match self {
            Part::Tool {
                name,
                input,
                status,
            } => Some((name.as_str(), input, *status)),
            _ => None,
        }
    }
}

/// A single message in a session's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when this message was aborted mid-generation.
    pub abort_error: bool,
    pub parts: Vec<Part>,
}

impl Message {
    /// Concatenated text of all `text` parts, in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether this message carries the fixed marker text the reflection
    /// engine uses to recognize its own injected follow-ups.
    pub fn is_reflection_injected(&self) -> bool {
        const MARKERS: &[&str] = &[
            "STOP: Planning Loop Detected",
            "STOP: Action Loop Detected",
            "### Missing",
            "Final Attempt",
            ": Incomplete",
        ];
        let text = self.text();
        MARKERS.iter().any(|m| text.contains(m))
    }

    /// Whether this message identifies a judge/auxiliary session.
    pub fn is_judge_signature(&self) -> bool {
        const SIGNATURES: &[&str] = &[
            "ANALYZE REFLECTION-3",
            "SELF-ASSESS REFLECTION-3",
            "REVIEW REFLECTION-3 COMPLETION",
            "TASK VERIFICATION",
        ];
        let text = self.text();
        SIGNATURES.iter().any(|s| text.contains(s))
    }
}

/// Metadata the host returns about a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub directory: String,
    pub parent_id: Option<String>,
}

/// A model specification, `provider/model`, or empty meaning "host default".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

impl ModelSpec {
    pub fn host_default() -> Self {
        Self::default()
    }

    pub fn is_host_default(&self) -> bool {
        self.provider.is_empty() && self.model.is_empty()
    }

    /// Parse `"provider/model"`. Returns `None` if either segment is empty,
    /// including the `"host default"` empty string.
    pub fn parse(spec: &str) -> Option<Self> {
        let (provider, model) = spec.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }

    pub fn as_spec_string(&self) -> String {
        if self.is_host_default() {
            String::new()
        } else {
            format!("{}/{}", self.provider, self.model)
        }
    }
}

/// Toast variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastVariant {
    Info,
    Success,
    Warning,
    Error,
}

/// A toast notification request.
#[derive(Debug, Clone)]
pub struct Toast {
    pub title: String,
    pub message: String,
    pub variant: ToastVariant,
    pub duration_ms: u64,
}

impl Toast {
    pub fn new(title: impl Into<String>, message: impl Into<String>, variant: ToastVariant) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            variant,
            duration_ms: 5_000,
        }
    }
}

/// Parameters for a non-blocking prompt post.
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    pub parts: Vec<Part>,
    pub model: Option<ModelSpec>,
}

/// The host-runtime capability surface the core consumes.
///
/// Implementations must be `Send + Sync` so they can be shared via `Arc`
/// across the per-session tasks the orchestrator spawns.
#[async_trait]
pub trait HostClient: Send + Sync {
    async fn list_sessions(&self, directory: &str) -> ReflectionResult<Vec<SessionInfo>>;
    async fn get_session(&self, id: &str) -> ReflectionResult<SessionInfo>;
    async fn create_session(&self, directory: &str) -> ReflectionResult<SessionInfo>;
    /// Deletion is tolerant of failure at the call site; implementations
    /// still report errors so callers can log them.
    async fn delete_session(&self, id: &str, directory: &str) -> ReflectionResult<()>;
    async fn messages(&self, id: &str) -> ReflectionResult<Vec<Message>>;
    /// Non-blocking: returns once the prompt is accepted, not once answered.
    async fn prompt_async(&self, id: &str, request: PromptRequest) -> ReflectionResult<()>;
    async fn toast(&self, directory: &str, toast: Toast) -> ReflectionResult<()>;
}

use crate::error::ReflectionResult;
