//! End-to-end scenarios exercised against the orchestrator with an
//! [`InMemoryHostClient`] double instead of a live host runtime.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use reflection_core::host_client::{InMemoryHostClient, Message, Part, Role, ScriptedReply};
use reflection_core::signal_extractor::WorkspaceProbe;
use reflection_core::{Config, DebugSink, HostClient, Orchestrator, ReflectionOutcome, Registries};

struct CodingProbe;
impl WorkspaceProbe for CodingProbe {
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

fn assistant_reads(count: usize) -> Vec<Part> {
    (0..count)
        .map(|_| {
            Part::tool(
                "read",
                serde_json::json!({"path": "src/lib.rs"}),
                reflection_core::host_client::ToolStatus::Success,
            )
        })
        .collect()
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
        probe: Arc::new(CodingProbe),
    }
}

#[tokio::test]
async fn tests_not_run_marks_incomplete_and_pushes_missing_section() {
    let dir = tempfile::tempdir().unwrap();
    let mem = Arc::new(InMemoryHostClient::new());
    mem.seed_session("s1", dir.path().to_string_lossy());
    mem.seed_history(
        "s1",
        vec![user_msg("u1", "fix the login bug"), assistant_msg("fixed it")],
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
    assert_eq!(orch.registries.attempt_count("s1", "u1"), 1);

    let verdict_contents = std::fs::read_to_string(
        dir.path().join(".reflection").join(format!("verdict_{}.json", "s1".chars().take(8).collect::<String>())),
    )
    .unwrap();
    let verdict: serde_json::Value = serde_json::from_str(&verdict_contents).unwrap();
    assert_eq!(verdict["complete"], false);
    assert_eq!(verdict["severity"], "HIGH");

    assert_eq!(mem.prompts_sent("s1"), 1);
    let history = futures_test_messages(&mem, "s1").await;
    let feedback = history.last().unwrap().text();
    assert!(feedback.contains("### Missing"));
    assert!(feedback.contains("Run tests"));
}

#[tokio::test]
async fn complete_verdict_no_prompt_success_toast() {
    use reflection_core::host_client::ToolStatus;

    let dir = tempfile::tempdir().unwrap();
    let mem = Arc::new(InMemoryHostClient::new());
    mem.seed_session("s1", dir.path().to_string_lossy());
    let mut assistant = assistant_msg("fixed, tests pass, PR up, CI green");
    assistant.parts.push(Part::tool(
        "bash",
        serde_json::json!({"command": "cargo test"}),
        ToolStatus::Success,
    ));
    assistant.parts.push(Part::tool(
        "bash",
        serde_json::json!({"command": "gh pr create --fill"}),
        ToolStatus::Success,
    ));
    assistant.parts.push(Part::tool(
        "bash",
        serde_json::json!({"command": "gh pr checks"}),
        ToolStatus::Success,
    ));
    mem.seed_history("s1", vec![user_msg("u1", "fix the login bug"), assistant]);
    mem.queue_reply(
        "aux-1",
        ScriptedReply {
            message: assistant_msg(
                r#"{"status":"complete","confidence":0.95,"evidence":{
                    "tests":{"ran":true,"results":"pass","ran_after_changes":true,"commands":["cargo test"]},
                    "pr":{"created":true,"url":"https://example.com/pr/9","ci_status":"pass","checked":true}
                }}"#,
            ),
            delay_polls: 0,
        },
    );

    let orch = make_orchestrator(mem.clone(), dir.path());
    let outcome = orch.handle_idle("s1").await;

    assert_eq!(outcome, ReflectionOutcome::Complete);
    assert_eq!(mem.prompts_sent("s1"), 0);
    let toasts = mem.toasts();
    assert!(toasts.iter().any(|t| t.title.contains("complete")));
}

#[tokio::test]
async fn stuck_flag_forces_planning_loop_message_regardless_of_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let mem = Arc::new(InMemoryHostClient::new());
    mem.seed_session("s1", dir.path().to_string_lossy());
    let mut assistant = assistant_msg("still looking into it");
    assistant.parts.extend(assistant_reads(12));
    mem.seed_history("s1", vec![user_msg("u1", "investigate and fix the bug"), assistant]);
    mem.queue_reply(
        "aux-1",
        ScriptedReply {
            message: assistant_msg(r#"{"status":"in_progress","confidence":0.3,"stuck":true}"#),
            delay_polls: 0,
        },
    );

    let orch = make_orchestrator(mem.clone(), dir.path());
    let outcome = orch.handle_idle("s1").await;

    assert_eq!(outcome, ReflectionOutcome::Pushed);
    assert_eq!(orch.registries.attempt_count("s1", "u1"), 1);
    let history = futures_test_messages(&mem, "s1").await;
    let feedback = history.last().unwrap().text();
    assert!(feedback.starts_with("STOP: Planning Loop Detected"));
}

#[tokio::test]
async fn fourth_attempt_emits_final_attempt_text_then_stops() {
    let dir = tempfile::tempdir().unwrap();
    let mem = Arc::new(InMemoryHostClient::new());
    mem.seed_session("s1", dir.path().to_string_lossy());
    mem.seed_history("s1", vec![user_msg("u1", "fix the bug"), assistant_msg("working on it")]);

    let orch = make_orchestrator(mem.clone(), dir.path());
    orch.registries.increment_attempt("s1", "u1");
    orch.registries.increment_attempt("s1", "u1");

    mem.queue_reply(
        "aux-1",
        ScriptedReply {
            message: assistant_msg(r#"{"status":"in_progress","confidence":0.4}"#),
            delay_polls: 0,
        },
    );

    let outcome = orch.handle_idle("s1").await;
    assert_eq!(outcome, ReflectionOutcome::MaxAttempts);
    assert_eq!(orch.registries.attempt_count("s1", "u1"), 3);
    assert_eq!(
        orch.registries.last_reflected("s1").as_deref(),
        Some("u1")
    );
}

#[tokio::test]
async fn abort_mid_self_assessment_suppresses_prompt_and_leaves_message_unreflected() {
    let dir = tempfile::tempdir().unwrap();
    let mem = Arc::new(InMemoryHostClient::new());
    mem.seed_session("s1", dir.path().to_string_lossy());
    mem.seed_history("s1", vec![user_msg("u1", "fix the bug"), assistant_msg("working on it")]);
    mem.queue_reply(
        "aux-1",
        ScriptedReply {
            message: assistant_msg(r#"{"status":"in_progress","confidence":0.4}"#),
            delay_polls: 50,
        },
    );

    let orch = make_orchestrator(mem.clone(), dir.path());
    let registries = orch.registries.clone();
    let aborter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        registries.record_abort("s1");
    });

    let outcome = orch.handle_idle("s1").await;
    aborter.await.unwrap();

    assert_eq!(outcome, ReflectionOutcome::Aborted);
    assert_eq!(mem.prompts_sent("s1"), 0);
    assert_eq!(orch.registries.last_reflected("s1"), None);
    assert!(mem.deleted_sessions().contains(&"aux-1".to_string()));
}

#[tokio::test]
async fn free_text_assessment_falls_back_to_judge() {
    let dir = tempfile::tempdir().unwrap();
    let mem = Arc::new(InMemoryHostClient::new());
    mem.seed_session("s1", dir.path().to_string_lossy());
    mem.seed_history("s1", vec![user_msg("u1", "fix the bug"), assistant_msg("I think it's done")]);

    mem.queue_reply(
        "aux-1",
        ScriptedReply {
            message: assistant_msg("Yeah I believe this is basically finished, looks fine to me."),
            delay_polls: 0,
        },
    );
    mem.queue_reply(
        "aux-2",
        ScriptedReply {
            message: assistant_msg(
                r#"{"complete": false, "severity": "MEDIUM", "feedback": "Needs a test run.", "missing": ["Run tests"], "next_actions": [], "requires_human_action": false}"#,
            ),
            delay_polls: 0,
        },
    );

    let orch = make_orchestrator(mem.clone(), dir.path());
    let outcome = orch.handle_idle("s1").await;

    assert_eq!(outcome, ReflectionOutcome::Pushed);
    let history = futures_test_messages(&mem, "s1").await;
    let feedback = history.last().unwrap().text();
    assert!(feedback.contains("Run tests"));
}

/// Small helper: read back a session's full message history through the
/// public `HostClient` surface instead of reaching into the fake directly.
async fn futures_test_messages(mem: &Arc<InMemoryHostClient>, session_id: &str) -> Vec<Message> {
    let client: Arc<dyn HostClient> = mem.clone();
    client.messages(session_id).await.unwrap()
}
