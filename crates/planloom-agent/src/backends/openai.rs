use super::{Completion, LmBackend};
use async_trait::async_trait;
use planloom_core::{ModelConfig, PlanloomError, PlanloomResult};
use serde_json::json;

/// Backend speaking the OpenAI chat completions API.
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Create a backend from its model configuration.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LmBackend for OpenAiBackend {
    async fn complete(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
    ) -> PlanloomResult<Completion> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());

        let mut messages: Vec<serde_json::Value> = Vec::new();
        if let Some(sys) = system_prompt {
            messages.push(json!({"role": "system", "content": sys}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let body = json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "messages": messages,
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
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
                "OpenAI API error {}: {}",
                status, resp_body
            )));
        }

        let choice = &resp_body["choices"][0];
        let text = choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let refused = choice["finish_reason"].as_str() == Some("content_filter");
        Ok(Completion { text, refused })
    }
}
