//! The Planloom plan-execution engine.
//!
//! Everything between the two LM agents and the durable store lives here:
//! plan import, the inputs matcher, the readiness sweep, the scheduler, the
//! executor and reviewer phases, the create-plan sub-workflow, the doctor,
//! the single-writer run loop with its fuses, and deliverable export.
//!
//! The engine is a cooperative loop on one task: no two LM calls and no two
//! status writes ever happen in parallel, which collapses all ordering
//! decisions into the scheduler's total order. State is threaded through an
//! [`EngineContext`] value; there are no singletons.

mod context;
mod create_plan;
mod doctor;
mod export;
mod import;
mod matcher;
mod readiness;
mod run;
mod scheduler;
mod skills;
mod workspace;

pub mod executor;
pub mod prompts;
pub mod reviewer;

pub use context::EngineContext;
pub use create_plan::create_plan;
pub use doctor::{run_doctor, DoctorCheck, DoctorReport};
pub use export::{export_deliverables, ExportSummary};
pub use import::{import_plan_value, materialize_plan, ImportedPlan};
pub use matcher::{choose_context_file, Matcher};
pub use readiness::recompute_readiness;
pub use run::{run_plan, RunReport};
pub use scheduler::pick_next;
pub use skills::{skill_idempotency_key, PlainTextExtractor, TextExtractor};
pub use workspace::Workspace;
