//! `reflection_core`: a session-idle supervisor for an interactive coding
//! agent host. Watches a workspace's sessions, judges whether the last turn
//! actually finished the user's task, and pushes a corrective follow-up when
//! it didn't.
//!
//! A fat crate root with curated re-exports: callers (the
//! `reflection-sidecar` binary, integration tests) reach every public type
//! through `reflection_core::...` rather than drilling into module paths.

pub mod artifact;
pub mod config;
pub mod cross_review;
pub mod error;
pub mod evaluator;
pub mod feedback;
pub mod host_client;
pub mod loop_detectors;
pub mod orchestrator;
pub mod registries;
pub mod routing;
pub mod self_assessment;
pub mod signal_extractor;

pub use artifact::{DebugSink, VerdictSignal};
pub use config::Config;
pub use error::{ReflectionError, ReflectionResult};
pub use evaluator::{Evidence, PrEvidence, ReflectionAnalysis, RunEvidence, SelfAssessment, SelfStatus, Severity};
pub use host_client::{HostClient, Message, ModelSpec, Part, ReqwestHostClient, Role, SessionInfo, Toast, ToastVariant};
pub use orchestrator::{Orchestrator, ReflectionOutcome};
pub use registries::Registries;
pub use signal_extractor::{AgentMode, TaskContext, TaskType};
