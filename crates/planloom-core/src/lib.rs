//! Core types and error definitions for the Planloom engine.
//!
//! This crate provides the foundational types shared across all Planloom
//! crates: the unified error enum, the persistent entity structs, the status
//! and enum alphabets, the event journal tags, and the configuration model.
//!
//! # Main types
//!
//! - [`PlanloomError`] — Unified error enum for all Planloom subsystems.
//! - [`PlanloomResult`] — Convenience alias for `Result<T, PlanloomError>`.
//! - [`model`] — Persistent entities (plans, task nodes, edges, evidence…).
//! - [`status`] — Status, node/edge type, and error-code alphabets.
//! - [`events`] — Append-only task event tags and payload constructors.
//! - [`config`] — The single-JSON-file engine configuration.

/// The single-JSON-file engine configuration.
pub mod config;
/// Append-only task event tags and payload constructors.
pub mod events;
/// Persistent entity structs.
pub mod model;
/// Status, node/edge type, and error-code alphabets.
pub mod status;

pub use config::{Config, Guardrails, LlmConfig, ModelConfig, Provider, WorkflowMode};
pub use events::EventType;
pub use model::{
    Artifact, Evidence, InputRequirement, LlmCall, LlmCallMeta, Plan, Review, ScoreBreakdown,
    SkillRun, Suggestion, TaskEdge, TaskEvent, TaskNode,
};
pub use status::{
    ActionRequired, AgentKind, AndOr, ArtifactFormat, BlockedReason, CallScope, EdgeType,
    ErrorCode, NodeType, RequirementKind, RequirementSource, SkillRunStatus, SuggestionPriority,
    TaskStatus,
};

/// Top-level error type for the Planloom engine.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum PlanloomError {
    /// An error from the durable store (migrations, CRUD, transactions).
    #[error("Store error: {0}")]
    Store(String),

    /// A contract normalization or validation error.
    #[error("Contract error: {0}")]
    Contract(String),

    /// An error from an LM backend call (transport, timeout, refusal).
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error from the plan-execution engine itself.
    #[error("Engine error: {0}")]
    Engine(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error raised by a skill during invocation.
    #[error("Skill error: {0}")]
    Skill(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`PlanloomError`].
pub type PlanloomResult<T> = Result<T, PlanloomError>;
