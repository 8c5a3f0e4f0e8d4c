//! The single source of truth for what the two agents are allowed to say.
//!
//! Every LM response passes through this crate exactly once: first
//! [`normalize`]-family functions convert whatever shape the model produced
//! into the canonical contract shape (alias keys, container aliases, wrapper
//! peeling, chain rewrites), then the strict validators reject anything that
//! still does not match. Downstream code only ever sees the validated typed
//! shapes.
//!
//! Normalization may fix shapes; it must never change semantic content —
//! scores, enum decisions, and suggestion text pass through untouched.
//!
//! Three contracts exist, pinned by `schema_version`:
//!
//! - [`PLAN_SCHEMA_VERSION`] (`plan_json_v1`) — generated plans.
//! - [`ACTION_SCHEMA_VERSION`] (`xiaobo_action_v1`) — executor task output.
//! - [`REVIEW_SCHEMA_VERSION`] (`xiaojing_review_v1`) — reviewer verdicts.

mod action;
mod error;
mod fields;
mod normalize;
mod plan;
mod review;

pub use action::{
    normalize_action, validate_action, ActionArtifact, ActionError, ActionResponse, RequiredDoc,
    ResultType,
};
pub use error::ValidatorError;
pub use normalize::Rewrite;
pub use plan::{
    normalize_plan, validate_plan, EdgeSpec, NodeSpec, PlanHeader, PlanJson, RequirementSpec,
};
pub use review::{normalize_review, validate_review, ReviewResponse};

/// `schema_version` of the plan contract.
pub const PLAN_SCHEMA_VERSION: &str = "plan_json_v1";
/// `schema_version` of the executor action contract.
pub const ACTION_SCHEMA_VERSION: &str = "xiaobo_action_v1";
/// `schema_version` of the reviewer contract.
pub const REVIEW_SCHEMA_VERSION: &str = "xiaojing_review_v1";
