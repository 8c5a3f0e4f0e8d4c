//! The `planloom` binary.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use planloom_agent::{ClaudeBackend, LmBackend, OpenAiBackend};
use planloom_contracts::{
    normalize_action, normalize_plan, normalize_review, validate_action, validate_plan,
    validate_review,
};
use planloom_core::{CallScope, Config, ModelConfig, Plan, Provider};
use planloom_engine::{
    create_plan, export_deliverables, import_plan_value, run_doctor, run_plan, EngineContext,
    Workspace,
};
use planloom_store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "planloom", about = "Planloom — two-agent plan execution engine")]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "planloom.json")]
    config: PathBuf,

    /// Workspace root (inputs/, artifacts/, reviews/, the database)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a plan from a top-level task and gate it through review
    CreatePlan {
        /// The top-level task statement
        top_task: Option<String>,
        /// Import an existing plan_json_v1 file instead of generating one
        #[arg(long)]
        plan_file: Option<PathBuf>,
    },
    /// Drive the approved plan until done, stalled, or a fuse trips
    Run,
    /// Show the plan and per-task status
    Status,
    /// List error and timeout events with their hints
    Errors,
    /// Run the preflight and structural checks (read-only)
    Doctor,
    /// Apply missing migrations, prune guardrail overruns, fix pointers
    RepairDb,
    /// Export approved deliverables into a bundle with a manifest
    Export {
        /// Also export tasks whose latest version never passed review
        #[arg(long)]
        include_unapproved: bool,
    },
    /// Recreate an empty database (destructive)
    ResetDb {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Return FAILED tasks to PENDING with fresh attempt counters
    ResetFailed {
        /// Also unfreeze tasks blocked on WAITING_EXTERNAL
        #[arg(long)]
        include_external: bool,
    },
    /// List recent LM call telemetry rows
    LlmCalls {
        /// How many rows to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Re-normalize every persisted response and report drift
    ContractAudit,
}

fn backend(config: &ModelConfig) -> Arc<dyn LmBackend> {
    match config.provider {
        Provider::Claude => Arc::new(ClaudeBackend::new(config.clone())),
        Provider::OpenAi => Arc::new(OpenAiBackend::new(config.clone())),
    }
}

fn build_context(config: Config, workspace: Workspace, store: Store) -> EngineContext {
    let executor = backend(&config.llm.executor);
    let reviewer = backend(&config.llm.reviewer);
    EngineContext::new(store, config, workspace, executor, reviewer)
}

/// The newest approved plan, or a clear error telling the user what to run.
fn current_plan(store: &Store) -> anyhow::Result<Plan> {
    let plan = store
        .latest_plan()?
        .context("no plan in the database; run `planloom create-plan` first")?;
    anyhow::ensure!(
        plan.approved_at.is_some(),
        "plan {} was never approved; run `planloom create-plan` again",
        plan.plan_id
    );
    Ok(plan)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let workspace = Workspace::new(&cli.workspace);
    workspace.ensure_layout()?;
    let store = Store::open(workspace.db_path())?;

    match cli.command {
        Commands::CreatePlan {
            top_task,
            plan_file,
        } => {
            if let Some(path) = plan_file {
                let raw: serde_json::Value =
                    serde_json::from_str(&std::fs::read_to_string(&path)?)
                        .with_context(|| format!("cannot parse {}", path.display()))?;
                let imported = import_plan_value(&store, &raw)?;
                store.approve_plan(imported.plan.plan_id)?;
                println!(
                    "imported plan {} ({} nodes) from {}",
                    imported.plan.plan_id,
                    imported.nodes.len(),
                    path.display()
                );
                return Ok(());
            }
            let top_task =
                top_task.context("give a top-level task, or --plan-file to import one")?;
            let config = Config::load(&cli.config)?;
            let ctx = build_context(config, workspace, store);
            match create_plan(&ctx, &top_task).await {
                Ok(plan) => {
                    println!("plan approved: {} — {}", plan.plan_id, plan.title);
                }
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Run => {
            let config = Config::load(&cli.config)?;
            let plan = current_plan(&store)?;
            let ctx = build_context(config, workspace, store);
            let report = run_plan(&ctx, &plan).await?;
            println!(
                "run finished: {} iterations, {} LM calls, plan done: {}",
                report.iterations, report.llm_calls, report.plan_done
            );
            if let Some(fuse) = report.tripped_fuse {
                eprintln!("fuse tripped: {fuse}");
                std::process::exit(1);
            }
        }

        Commands::Status => {
            let plan = current_plan(&store)?;
            println!("plan {} — {}", plan.plan_id, plan.title);
            println!(
                "approved: {}",
                plan.approved_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "no".to_string())
            );
            println!();
            println!(
                "{:<10} {:<7} {:<15} {:<17} {:>8}  {}",
                "task", "type", "status", "blocked", "attempts", "title"
            );
            for node in store.list_nodes(plan.plan_id)? {
                println!(
                    "{:<10} {:<7} {:<15} {:<17} {:>8}  {}",
                    &node.task_id.to_string()[..8],
                    node.node_type.as_str(),
                    node.status.as_str(),
                    node.blocked_reason.map(|r| r.as_str()).unwrap_or("-"),
                    node.attempt_count,
                    node.title
                );
            }
        }

        Commands::Errors => {
            let plan = current_plan(&store)?;
            let mut events = store.list_events_of_type(plan.plan_id, "ERROR")?;
            events.extend(store.list_events_of_type(plan.plan_id, "TIMEOUT")?);
            events.sort_by_key(|e| e.created_at);
            if events.is_empty() {
                println!("no errors recorded");
            }
            for event in events {
                let code = event.payload["code"]
                    .as_str()
                    .or_else(|| event.payload["scope"].as_str())
                    .unwrap_or("?");
                let message = event.payload["message"]
                    .as_str()
                    .or_else(|| event.payload["detail"].as_str())
                    .unwrap_or("");
                println!("{} [{}] {}", event.created_at.to_rfc3339(), code, message);
                if let Some(hint) = event.payload["hint"].as_str() {
                    println!("    hint: {hint}");
                }
            }
        }

        Commands::Doctor => {
            let config = Config::load(&cli.config)?;
            let plan = store.latest_plan()?;
            let report = run_doctor(&store, &config, plan.as_ref())?;
            print!("{report}");
            if !report.passed() {
                std::process::exit(1);
            }
        }

        Commands::RepairDb => {
            let config = Config::load(&cli.config)?;
            // Opening the store already applied any missing migrations.
            let pruned_calls = store.prune_llm_calls(config.guardrails.max_llm_calls_rows)?;
            let pruned_events = store.prune_task_events(config.guardrails.max_task_events_rows)?;
            let cleared = store.clear_dangling_artifact_pointers()?;
            println!(
                "repair-db: migrations current, pruned {pruned_calls} llm_calls row(s), \
                 {pruned_events} task_events row(s), cleared {cleared} dangling pointer(s)"
            );
        }

        Commands::Export { include_unapproved } => {
            let config = Config::load(&cli.config)?;
            let plan = current_plan(&store)?;
            let ctx = build_context(config, workspace, store);
            let summary = export_deliverables(&ctx, &plan, include_unapproved)?;
            println!(
                "exported {} task(s) ({} skipped) into {}",
                summary.exported_tasks, summary.skipped_tasks, summary.bundle_dir
            );
        }

        Commands::ResetDb { yes } => {
            if !yes {
                eprintln!("reset-db is destructive; pass --yes to confirm");
                std::process::exit(1);
            }
            let path = workspace.db_path();
            drop(store);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            Store::open(&path)?;
            println!("database recreated at {}", path.display());
        }

        Commands::ResetFailed { include_external } => {
            let plan = current_plan(&store)?;
            let n = store.reset_failed(plan.plan_id, include_external)?;
            println!("reset {n} task(s) to PENDING");
        }

        Commands::LlmCalls { limit } => {
            for call in store.list_llm_calls(limit)? {
                println!(
                    "{} {:<9} {:<12} plan={} task={} code={} trunc={}{}",
                    call.created_at.to_rfc3339(),
                    call.agent.as_str(),
                    call.scope.as_str(),
                    call.plan_id
                        .map(|p| p.to_string()[..8].to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    call.task_id
                        .map(|t| t.to_string()[..8].to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    call.error_code.map(|c| c.as_str()).unwrap_or("-"),
                    if call.meta.prompt_truncated { "P" } else { "" },
                    if call.meta.response_truncated { "R" } else { "" },
                );
                if let Some(err) = &call.validator_error {
                    println!("    validator: {err}");
                }
            }
        }

        Commands::ContractAudit => {
            let mut audited = 0usize;
            let mut drifted = 0usize;
            let mut invalid = 0usize;
            for call in store.list_all_llm_calls()? {
                let Some(normalized) = call.normalized_json else {
                    continue;
                };
                audited += 1;
                let (renormalized, still_valid) = match call.scope {
                    CallScope::PlanGen => {
                        let (v, _) = normalize_plan(&normalized);
                        let ok = validate_plan(&v).is_ok();
                        (v, ok)
                    }
                    CallScope::TaskAction => {
                        let v = normalize_action(&normalized);
                        let ok = validate_action(&v).is_ok();
                        (v, ok)
                    }
                    CallScope::PlanReview | CallScope::TaskCheck => {
                        let v = normalize_review(&normalized);
                        let ok = validate_review(&v).is_ok();
                        (v, ok)
                    }
                };
                if renormalized != normalized {
                    drifted += 1;
                    println!("DRIFT {}: re-normalization changed the value", call.llm_call_id);
                }
                if !still_valid && call.validator_error.is_none() {
                    invalid += 1;
                    println!(
                        "INVALID {}: persisted value no longer validates",
                        call.llm_call_id
                    );
                }
            }
            println!("contract-audit: {audited} row(s) audited, {drifted} drift(s), {invalid} invalid");
            info!(audited, drifted, invalid, "contract audit complete");
        }
    }

    Ok(())
}
