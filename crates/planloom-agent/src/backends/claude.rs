use super::{Completion, LmBackend};
use async_trait::async_trait;
use planloom_core::{ModelConfig, PlanloomError, PlanloomResult};
use serde_json::json;

/// Backend speaking the Anthropic messages API.
pub struct ClaudeBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl ClaudeBackend {
    /// Create a backend from its model configuration.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LmBackend for ClaudeBackend {
    async fn complete(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
    ) -> PlanloomResult<Completion> {
        let url = format!("{}/v1/messages", self.config.base_url());

        let mut body = json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(sys) = system_prompt {
            body["system"] = json!(sys);
        }

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PlanloomError::Agent(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PlanloomError::Agent(e.to_string()))?;

        if !status.is_success() {
            return Err(PlanloomError::Agent(format!(
                "Claude API error {}: {}",
                status, resp_body
            )));
        }

        let content = resp_body["content"]
            .as_array()
            .ok_or_else(|| PlanloomError::Agent("Missing content in Claude response".into()))?;
        let text: Vec<&str> = content
            .iter()
            .filter(|block| block["type"].as_str() == Some("text"))
            .filter_map(|block| block["text"].as_str())
            .collect();

        let refused = resp_body["stop_reason"].as_str() == Some("refusal");
        Ok(Completion {
            text: text.join("\n"),
            refused,
        })
    }
}
