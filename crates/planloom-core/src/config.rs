use crate::{PlanloomError, PlanloomResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which workflow mode a plan is validated and driven under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    /// Lightweight mode: ACTION nodes are reviewed directly.
    V1,
    /// Strong mode: 1:1 ACTION↔CHECK pairing, deliverable specs mandatory.
    V2,
}

/// LM provider selector for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Anthropic messages API.
    Claude,
    /// OpenAI chat completions API.
    OpenAi,
}

/// Connection settings for one LM backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Which provider API shape to speak.
    pub provider: Provider,
    /// Provider model identifier.
    pub model_id: String,
    /// API key; read from the config file, never from the environment.
    pub api_key: String,
    /// Override for the provider base URL (testing, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Response token budget.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl ModelConfig {
    /// The effective base URL for the provider.
    pub fn base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider {
            Provider::Claude => "https://api.anthropic.com".to_string(),
            Provider::OpenAi => "https://api.openai.com".to_string(),
        }
    }
}

/// LM transport settings shared by both agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Hard per-call timeout in seconds.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    /// Backend for the executor agent.
    pub executor: ModelConfig,
    /// Backend for the reviewer agent.
    pub reviewer: ModelConfig,
}

/// Hard caps that keep a run bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guardrails {
    /// Fuse: maximum main-loop ticks per run.
    #[serde(default = "default_max_run_iterations")]
    pub max_run_iterations: u32,
    /// Fuse: maximum LM calls per run.
    #[serde(default = "default_max_llm_calls_per_run")]
    pub max_llm_calls_per_run: u32,
    /// Maximum LM calls charged to a single task.
    #[serde(default = "default_max_llm_calls_per_task")]
    pub max_llm_calls_per_task: u32,
    /// Prompt char cap; beyond it the prompt is cut and flagged.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    /// Response char cap; beyond it the response is cut and flagged.
    #[serde(default = "default_max_response_chars")]
    pub max_response_chars: usize,
    /// Soft cap on journal rows per task; repair-db prunes beyond it.
    #[serde(default = "default_max_task_events_per_task")]
    pub max_task_events_per_task: u32,
    /// Total telemetry row cap; repair-db prunes beyond it.
    #[serde(default = "default_max_llm_calls_rows")]
    pub max_llm_calls_rows: u32,
    /// Total journal row cap; repair-db prunes beyond it.
    #[serde(default = "default_max_task_events_rows")]
    pub max_task_events_rows: u32,
    /// Artifact versions kept per task.
    #[serde(default = "default_max_artifact_versions")]
    pub max_artifact_versions_per_task: u32,
    /// Review versions kept per check.
    #[serde(default = "default_max_review_versions")]
    pub max_review_versions_per_check: u32,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            max_run_iterations: default_max_run_iterations(),
            max_llm_calls_per_run: default_max_llm_calls_per_run(),
            max_llm_calls_per_task: default_max_llm_calls_per_task(),
            max_prompt_chars: default_max_prompt_chars(),
            max_response_chars: default_max_response_chars(),
            max_task_events_per_task: default_max_task_events_per_task(),
            max_llm_calls_rows: default_max_llm_calls_rows(),
            max_task_events_rows: default_max_task_events_rows(),
            max_artifact_versions_per_task: default_max_artifact_versions(),
            max_review_versions_per_check: default_max_review_versions(),
        }
    }
}

/// The engine configuration, loaded from a single JSON file.
///
/// Environment variables are never consulted; everything the engine needs is
/// in the file, which keeps runs reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How deep the generator may decompose the top task.
    #[serde(default = "default_max_decomposition_depth")]
    pub max_decomposition_depth: u32,
    /// Leaf ACTIONs above this estimate fail the v2 doctor check.
    #[serde(default = "default_one_shot_threshold")]
    pub one_shot_threshold_person_days: f64,
    /// Reviewer score at or above which a verdict can pass.
    #[serde(default = "default_pass_score")]
    pub plan_review_pass_score: u32,
    /// v1 or v2 workflow semantics.
    #[serde(default = "default_workflow_mode")]
    pub workflow_mode: WorkflowMode,
    /// Executor attempts per plan-generation run.
    #[serde(default = "default_max_plan_attempts")]
    pub max_plan_attempts: u32,
    /// Reviewer retries within one plan-generation attempt.
    #[serde(default = "default_max_review_attempts")]
    pub max_review_attempts: u32,
    /// Executor/review attempts per task before WAITING_EXTERNAL.
    #[serde(default = "default_max_task_attempts")]
    pub max_task_attempts: u32,
    /// Fuse: total wall clock for one `run` invocation, in seconds.
    #[serde(default = "default_max_plan_runtime_seconds")]
    pub max_plan_runtime_seconds: u64,
    /// Sleep between ticks when nothing is runnable, in seconds.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Skill invocation budget, in seconds.
    #[serde(default = "default_skill_timeout_seconds")]
    pub skill_timeout_seconds: u64,
    /// When true, the readiness sweep lifts FAILED tasks back to READY.
    #[serde(default)]
    pub failed_auto_reset_ready: bool,
    /// LM transport settings.
    pub llm: LlmConfig,
    /// Hard caps.
    #[serde(default)]
    pub guardrails: Guardrails,
}

impl Config {
    /// Load the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> PlanloomResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PlanloomError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| {
            PlanloomError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> PlanloomResult<()> {
        if self.plan_review_pass_score > 100 {
            return Err(PlanloomError::Config(
                "plan_review_pass_score must be in [0, 100]".to_string(),
            ));
        }
        if self.max_task_attempts == 0 {
            return Err(PlanloomError::Config(
                "max_task_attempts must be at least 1".to_string(),
            ));
        }
        if self.one_shot_threshold_person_days <= 0.0 {
            return Err(PlanloomError::Config(
                "one_shot_threshold_person_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_tokens() -> u32 {
    8192
}
fn default_timeout_s() -> u64 {
    120
}
fn default_max_decomposition_depth() -> u32 {
    3
}
fn default_one_shot_threshold() -> f64 {
    5.0
}
fn default_pass_score() -> u32 {
    90
}
fn default_workflow_mode() -> WorkflowMode {
    WorkflowMode::V1
}
fn default_max_plan_attempts() -> u32 {
    3
}
fn default_max_review_attempts() -> u32 {
    3
}
fn default_max_task_attempts() -> u32 {
    3
}
fn default_max_plan_runtime_seconds() -> u64 {
    3600
}
fn default_poll_interval_seconds() -> u64 {
    5
}
fn default_skill_timeout_seconds() -> u64 {
    120
}
fn default_max_run_iterations() -> u32 {
    500
}
fn default_max_llm_calls_per_run() -> u32 {
    200
}
fn default_max_llm_calls_per_task() -> u32 {
    25
}
fn default_max_prompt_chars() -> usize {
    120_000
}
fn default_max_response_chars() -> usize {
    200_000
}
fn default_max_task_events_per_task() -> u32 {
    500
}
fn default_max_llm_calls_rows() -> u32 {
    5_000
}
fn default_max_task_events_rows() -> u32 {
    20_000
}
fn default_max_artifact_versions() -> u32 {
    20
}
fn default_max_review_versions() -> u32 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "llm": {
                "executor": {"provider": "claude", "model_id": "claude-sonnet", "api_key": "k1"},
                "reviewer": {"provider": "openai", "model_id": "gpt-x", "api_key": "k2"}
            }
        }"#
    }

    #[test]
    fn test_defaults_fill_in() {
        let config: Config = serde_json::from_str(minimal_json()).unwrap();
        assert_eq!(config.plan_review_pass_score, 90);
        assert_eq!(config.workflow_mode, WorkflowMode::V1);
        assert_eq!(config.max_task_attempts, 3);
        assert_eq!(config.guardrails.max_run_iterations, 500);
        assert!(!config.failed_auto_reset_ready);
    }

    #[test]
    fn test_base_url_defaults_per_provider() {
        let config: Config = serde_json::from_str(minimal_json()).unwrap();
        assert_eq!(config.llm.executor.base_url(), "https://api.anthropic.com");
        assert_eq!(config.llm.reviewer.base_url(), "https://api.openai.com");
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let mut config: Config = serde_json::from_str(minimal_json()).unwrap();
        config.llm.executor.base_url = Some("http://localhost:8080/".to_string());
        assert_eq!(config.llm.executor.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_validate_rejects_bad_pass_score() {
        let mut config: Config = serde_json::from_str(minimal_json()).unwrap();
        config.plan_review_pass_score = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config: Config = serde_json::from_str(minimal_json()).unwrap();
        config.max_task_attempts = 0;
        assert!(config.validate().is_err());
    }
}
