//! OpenAI-style `/chat/completions` backend.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    BackendAdapter, GenerateError, GenerationRequest, authorized_post, http_client, non_empty,
    require_api_key, resolve_model, send_json, system_text,
};
use crate::config::{BackendConfig, BackendShape};

pub struct ChatCompletionsBackend {
    client: Client,
    config: BackendConfig,
}

impl ChatCompletionsBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            config: config.clone(),
        })
    }

    fn build_body(&self, request: &GenerationRequest, model: &str) -> Value {
        let mut body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system_text(&self.config, request) },
                { "role": "user", "content": request.prompt }
            ]
        });

        if let Some(temperature) = self.config.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.config.max_output_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        body
    }

    fn extract(response: &Value) -> Result<String, GenerateError> {
        // Some gateways report failures inside a 200 body
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            return Err(GenerateError::Extraction(format!(
                "Backend returned an error payload: {}",
                error
            )));
        }

        let choice = response["choices"]
            .get(0)
            .ok_or_else(|| GenerateError::Extraction("No choices in response".to_string()))?;

        let content = choice["message"]["content"].as_str().ok_or_else(|| {
            let reason = choice["finish_reason"].as_str().unwrap_or("unknown");
            GenerateError::Extraction(format!(
                "Choice has no message content (finish reason: {})",
                reason
            ))
        })?;

        non_empty(content, "message content")
    }
}

#[async_trait]
impl BackendAdapter for ChatCompletionsBackend {
    fn shape(&self) -> BackendShape {
        BackendShape::ChatCompletions
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerateError> {
        request.validate()?;
        let api_key = require_api_key(&self.config)?;

        let model = resolve_model(&self.config, request.model.as_deref());
        let body = self.build_body(request, model);
        let url = format!("{}/chat/completions", self.config.endpoint());

        debug!("Chat completions request: {}", body);

        let builder = authorized_post(&self.client, self.config.auth_style(), &url, &api_key)?;
        let response = send_json(builder, &body).await?;

        Self::extract(&response)
    }
}
