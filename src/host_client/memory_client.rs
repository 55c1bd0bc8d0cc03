//! In-memory `HostClient` test double.
//!
//! Lets tests script session creation, scripted assistant replies, and
//! induced transport failures/timeouts without touching a real host
//! runtime.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{ReflectionError, ReflectionResult};

use super::{HostClient, Message, PromptRequest, Role, SessionInfo, Toast};

/// A scripted reply: the message a session should "receive" the next time
/// `messages()` is polled after a `prompt_async` call, optionally delayed by
/// a number of polls to simulate a judge that takes a few polls to answer.
#[derive(Clone)]
pub struct ScriptedReply {
    pub message: Message,
    /// Number of `messages()` calls to return the prior history unchanged
    /// before appending `message`. Zero means "answer on first poll".
    pub delay_polls: u32,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionInfo>,
    history: HashMap<String, Vec<Message>>,
    /// Pending scripted replies keyed by session id, consumed in order.
    scripted: HashMap<String, Vec<ScriptedReply>>,
    poll_counts: HashMap<String, u32>,
    toasts: Vec<Toast>,
    deleted: Vec<String>,
    next_id: u64,
    /// Count of `prompt_async` calls per session, independent of any
    /// history seeded directly via `seed_history`. Lets tests distinguish
    /// "the orchestrator pushed a follow-up" from "the session already had
    /// a human turn".
    prompts_sent: HashMap<String, usize>,
    /// Session ids whose every call should fail with a transport error.
    failing_sessions: Vec<String>,
    /// Directories for which `create_session` itself should fail.
    failing_create_directories: Vec<String>,
}

/// In-memory fake implementing [`HostClient`] for unit and integration tests.
#[derive(Default)]
pub struct InMemoryHostClient {
    inner: Mutex<Inner>,
}

impl InMemoryHostClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register a session as if the host already created it.
    pub fn seed_session(&self, id: impl Into<String>, directory: impl Into<String>) {
        let id = id.into();
        let info = SessionInfo {
            id: id.clone(),
            directory: directory.into(),
            parent_id: None,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.insert(id.clone(), info);
        inner.history.entry(id).or_default();
    }

    /// Seed the message history a session already has (e.g. the host
    /// session under reflection, with its user turn and assistant reply).
    pub fn seed_history(&self, session_id: impl Into<String>, messages: Vec<Message>) {
        let mut inner = self.inner.lock().unwrap();
        inner.history.insert(session_id.into(), messages);
    }

    /// Queue a reply to be appended to a session's history after its next
    /// `prompt_async` plus `delay_polls` subsequent `messages()` calls.
    pub fn queue_reply(&self, session_id: impl Into<String>, reply: ScriptedReply) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .scripted
            .entry(session_id.into())
            .or_default()
            .push(reply);
    }

    /// Make every call against this session id fail with a transport error,
    /// simulating an unreachable host runtime mid-poll.
    pub fn fail_session(&self, session_id: impl Into<String>) {
        self.inner.lock().unwrap().failing_sessions.push(session_id.into());
    }

    /// Make `create_session` fail for this directory (candidate exhaustion).
    pub fn fail_create_in(&self, directory: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .failing_create_directories
            .push(directory.into());
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.inner.lock().unwrap().toasts.clone()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted.clone()
    }

    /// Number of `prompt_async` calls made against `session_id`. Does not
    /// count messages a test seeded directly via `seed_history`.
    pub fn prompts_sent(&self, session_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .prompts_sent
            .get(session_id)
            .copied()
            .unwrap_or(0)
    }

    fn check_failing(inner: &Inner, session_id: &str) -> ReflectionResult<()> {
        if inner.failing_sessions.iter().any(|s| s == session_id) {
            return Err(ReflectionError::Transport(format!(
                "simulated transport failure for session {session_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl HostClient for InMemoryHostClient {
    async fn list_sessions(&self, directory: &str) -> ReflectionResult<Vec<SessionInfo>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.directory == directory)
            .cloned()
            .collect())
    }

    async fn get_session(&self, id: &str) -> ReflectionResult<SessionInfo> {
        let inner = self.inner.lock().unwrap();
        Self::check_failing(&inner, id)?;
        inner
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| ReflectionError::Transport(format!("no such session {id}")))
    }

    async fn create_session(&self, directory: &str) -> ReflectionResult<SessionInfo> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .failing_create_directories
            .iter()
            .any(|d| d == directory)
        {
            return Err(ReflectionError::Transport(format!(
                "simulated create failure in {directory}"
            )));
        }
        inner.next_id += 1;
        let id = format!("aux-{}", inner.next_id);
        let info = SessionInfo {
            id: id.clone(),
            directory: directory.to_string(),
            parent_id: None,
        };
        inner.sessions.insert(id.clone(), info.clone());
        inner.history.insert(id, Vec::new());
        Ok(info)
    }

    async fn delete_session(&self, id: &str, _directory: &str) -> ReflectionResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.remove(id);
        inner.deleted.push(id.to_string());
        Ok(())
    }

    async fn messages(&self, id: &str) -> ReflectionResult<Vec<Message>> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failing(&inner, id)?;

        let ready = {
            let scripted = inner.scripted.get_mut(id);
            match scripted {
                Some(queue) if !queue.is_empty() => {
                    let count = inner.poll_counts.entry(id.to_string()).or_insert(0);
                    if *count >= queue[0].delay_polls {
                        Some(queue.remove(0).message)
                    } else {
                        *count += 1;
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(message) = ready {
            inner
                .history
                .entry(id.to_string())
                .or_default()
                .push(message);
            inner.poll_counts.remove(id);
        }

        Ok(inner.history.get(id).cloned().unwrap_or_default())
    }

    async fn prompt_async(&self, id: &str, request: PromptRequest) -> ReflectionResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failing(&inner, id)?;
        let text = request
            .parts
            .iter()
            .filter_map(|p| p.as_text())
            .collect::<Vec<_>>()
            .join("\n");
        *inner.prompts_sent.entry(id.to_string()).or_insert(0) += 1;
        inner
            .history
            .entry(id.to_string())
            .or_default()
            .push(Message {
                id: format!("msg-{}", uuid::Uuid::new_v4()),
                role: Role::User,
                created_at: Utc::now(),
                completed_at: Some(Utc::now()),
                abort_error: false,
                parts: vec![super::Part::text(text)],
            });
        Ok(())
    }

    async fn toast(&self, _directory: &str, toast: Toast) -> ReflectionResult<()> {
        self.inner.lock().unwrap().toasts.push(toast);
        Ok(())
    }
}
