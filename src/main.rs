//! `reflection-sidecar`: thin binary wiring a [`ReqwestHostClient`] into the
//! reflection core and running the supervisor loop against one workspace.
//! Parses CLI args with `clap`, builds a `tracing-subscriber` filter from
//! `RUST_LOG`, assembles the long-lived collaborators once, then hands off
//! to an event loop that runs until a `CancellationToken` fires.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use reflection_core::config::Config;
use reflection_core::host_client::{HostClient, ReqwestHostClient, Role};
use reflection_core::orchestrator::Orchestrator;
use reflection_core::registries::Registries;
use reflection_core::signal_extractor::FsWorkspaceProbe;
use reflection_core::DebugSink;

/// Session-idle supervisor for an interactive coding agent host.
#[derive(Parser, Debug)]
#[command(name = "reflection-sidecar", about, version)]
struct Args {
    /// Workspace directory this sidecar watches.
    #[arg(long)]
    workspace: PathBuf,

    /// Base URL of the host runtime's local RPC surface.
    #[arg(long, default_value = "http://127.0.0.1:4096")]
    host_url: String,

    /// How often to poll the host runtime for newly idle sessions, in
    /// milliseconds.
    #[arg(long, default_value_t = 2_000)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::load(&args.workspace) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration, using defaults");
            Config::default()
        }
    };

    let client: Arc<dyn HostClient> = Arc::new(ReqwestHostClient::new(args.host_url.clone()));
    let registries = Arc::new(Registries::new());
    let debug_sink = Arc::new(DebugSink::new(&args.workspace, config.debug));
    let probe = Arc::new(FsWorkspaceProbe::new(&args.workspace));
    let workspace_dir = args.workspace.to_string_lossy().to_string();

    let orchestrator = Arc::new(Orchestrator {
        client,
        registries: registries.clone(),
        config,
        workspace_dir,
        debug_sink,
        probe,
    });

    let cancellation = CancellationToken::new();
    let shutdown_signal = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_signal.cancel();
        }
    });

    info!(workspace = %orchestrator.workspace_dir, host_url = %args.host_url, "reflection sidecar starting");
    run_poll_loop(orchestrator.clone(), Duration::from_millis(args.poll_interval_ms), cancellation.clone()).await;

    teardown(&orchestrator, &registries).await;
    info!("reflection sidecar stopped");
    Ok(())
}

/// Poll the host runtime for sessions whose last assistant message just
/// completed, dispatching one reflection attempt per newly observed
/// completion. Substitutes for a push-based `session.idle` subscription,
/// which the host runtime's RPC surface does not expose.
async fn run_poll_loop(orchestrator: Arc<Orchestrator>, interval: Duration, cancellation: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    let mut last_completed_message: HashMap<String, String> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            _ = ticker.tick() => {
                let sessions = match orchestrator.client.list_sessions(&orchestrator.workspace_dir).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to list sessions");
                        continue;
                    }
                };

                for session in sessions {
                    if orchestrator.registries.is_judge(&session.id) {
                        continue;
                    }
                    let messages = match orchestrator.client.messages(&session.id).await {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(session_id = %session.id, error = %e, "failed to poll messages");
                            continue;
                        }
                    };

                    // Synthesize `session.error` abort notifications from the polled
                    // log rather than a push event, same as the idle detection below.
                    if messages.last().is_some_and(|m| m.abort_error) {
                        orchestrator.record_abort(&session.id);
                    }

                    let Some(last_assistant) = messages
                        .iter()
                        .rev()
                        .find(|m| m.role == Role::Assistant && m.completed_at.is_some())
                    else {
                        continue;
                    };
                    let became_idle = last_completed_message.get(&session.id) != Some(&last_assistant.id);
                    if !became_idle {
                        continue;
                    }
                    last_completed_message.insert(session.id.clone(), last_assistant.id.clone());

                    let orchestrator = orchestrator.clone();
                    let session_id = session.id.clone();
                    tokio::spawn(async move {
                        let outcome = orchestrator.handle_idle(&session_id).await;
                        info!(session_id = %session_id, outcome = ?outcome, "reflection attempt finished");
                    });
                }
            }
        }
    }
}

/// Best-effort teardown: nothing further is in flight by the time this
/// runs, so delete any auxiliary sessions the core still owns.
async fn teardown(orchestrator: &Orchestrator, registries: &Registries) {
    let leftover = registries.judge_ids();
    if leftover.is_empty() {
        return;
    }
    warn!(count = leftover.len(), "deleting leftover auxiliary sessions on shutdown");
    let deletions = leftover.into_iter().map(|id| {
        let client = orchestrator.client.clone();
        let workspace_dir = orchestrator.workspace_dir.clone();
        async move {
            if let Err(e) = client.delete_session(&id, &workspace_dir).await {
                warn!(session_id = %id, error = %e, "failed to delete leftover auxiliary session");
            }
        }
    });
    join_all(deletions).await;
}
