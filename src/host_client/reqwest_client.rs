//! Production `HostClient` backed by the host runtime's local HTTP/RPC
//! endpoint, built on `reqwest`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ReflectionError, ReflectionResult};

use super::{HostClient, Message, PromptRequest, SessionInfo, Toast, ToastVariant};

/// Client talking to the host runtime's local RPC surface over HTTP.
pub struct ReqwestHostClient {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestHostClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> ReflectionResult<T> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ReflectionError::Transport(format!("GET {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(ReflectionError::Transport(format!(
                "GET {url}: status {}",
                resp.status()
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ReflectionError::Transport(format!("GET {url} body: {e}")))
    }

    async fn post_json<B: serde::Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> ReflectionResult<T> {
        let url = self.url(path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ReflectionError::Transport(format!("POST {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(ReflectionError::Transport(format!(
                "POST {url}: status {}",
                resp.status()
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ReflectionError::Transport(format!("POST {url} body: {e}")))
    }

    async fn post_empty<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ReflectionResult<()> {
        let url = self.url(path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ReflectionError::Transport(format!("POST {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(ReflectionError::Transport(format!(
                "POST {url}: status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl HostClient for ReqwestHostClient {
    async fn list_sessions(&self, directory: &str) -> ReflectionResult<Vec<SessionInfo>> {
        self.get_json(&format!(
            "/sessions?directory={}",
            urlencoding_lite(directory)
        ))
        .await
    }

    async fn get_session(&self, id: &str) -> ReflectionResult<SessionInfo> {
        self.get_json(&format!("/sessions/{id}")).await
    }

    async fn create_session(&self, directory: &str) -> ReflectionResult<SessionInfo> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            directory: &'a str,
        }
        debug!(directory, "creating auxiliary session");
        self.post_json("/sessions", &Body { directory }).await
    }

    async fn delete_session(&self, id: &str, directory: &str) -> ReflectionResult<()> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            directory: &'a str,
        }
        let url = self.url(&format!("/sessions/{id}"));
        let result = self
            .client
            .delete(&url)
            .json(&Body { directory })
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                warn!(session_id = id, status = %resp.status(), "session delete returned non-success");
                Ok(())
            }
            Err(e) => {
                warn!(session_id = id, error = %e, "session delete failed");
                Ok(())
            }
        }
    }

    async fn messages(&self, id: &str) -> ReflectionResult<Vec<Message>> {
        self.get_json(&format!("/sessions/{id}/messages")).await
    }

    async fn prompt_async(&self, id: &str, request: PromptRequest) -> ReflectionResult<()> {
        #[derive(serde::Serialize)]
        struct Body {
            parts: Vec<super::Part>,
            model: Option<String>,
        }
        let body = Body {
            parts: request.parts,
            model: request
                .model
                .filter(|m| !m.is_host_default())
                .map(|m| m.as_spec_string()),
        };
        self.post_empty(&format!("/sessions/{id}/prompt"), &body)
            .await
    }

    async fn toast(&self, directory: &str, toast: Toast) -> ReflectionResult<()> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            directory: &'a str,
            title: &'a str,
            message: &'a str,
            variant: &'a str,
            duration_ms: u64,
        }
        let variant = match toast.variant {
            ToastVariant::Info => "info",
            ToastVariant::Success => "success",
            ToastVariant::Warning => "warning",
            ToastVariant::Error => "error",
        };
        self.post_empty(
            "/toast",
            &Body {
                directory,
                title: &toast.title,
                message: &toast.message,
                variant,
                duration_ms: toast.duration_ms,
            },
        )
        .await
    }
}

/// Minimal percent-encoding for directory paths in query strings; avoids a
/// dependency on the `url`/`urlencoding` crates for a single call site.
fn urlencoding_lite(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' | '/' => c.to_string(),
            other => format!("%{:02X}", other as u32),
        })
        .collect()
}
