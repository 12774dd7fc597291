//! Conversational `generateContent` backend.
//!
//! Serves both the plain native shape and the structured-JSON variant. The
//! outbound envelope only ever carries `contents`, `systemInstruction` and
//! `generationConfig`; anything else would fail upstream schema validation.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    BackendAdapter, GenerateError, GenerationRequest, authorized_post, http_client, non_empty,
    require_api_key, resolve_model, send_json, system_text,
};
use crate::config::{BackendConfig, BackendShape};

/// Field the structured variant asks the model to fill.
const CODE_FIELD: &str = "code";

pub struct NativeBackend {
    client: Client,
    config: BackendConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

impl NativeBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            config: config.clone(),
        })
    }

    fn structured(&self) -> bool {
        self.config.shape == BackendShape::Structured
    }

    fn build_body<'a>(&'a self, request: &'a GenerationRequest) -> GenerateContentRequest<'a> {
        let mut generation_config = GenerationConfig {
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
            ..GenerationConfig::default()
        };

        if self.structured() {
            generation_config.response_mime_type = Some("application/json");
            generation_config.response_schema = Some(json!({
                "type": "OBJECT",
                "properties": {
                    CODE_FIELD: { "type": "STRING" }
                },
                "required": [CODE_FIELD]
            }));
        }

        let has_generation_config = generation_config.temperature.is_some()
            || generation_config.max_output_tokens.is_some()
            || generation_config.response_schema.is_some();

        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system_text(&self.config, request),
                }],
            },
            generation_config: has_generation_config.then_some(generation_config),
        }
    }

    /// Pull the answer out of a `generateContent` success body.
    fn extract(&self, response: &Value) -> Result<String, GenerateError> {
        let candidate = response["candidates"].get(0).ok_or_else(|| {
            let reason = response["promptFeedback"]["blockReason"]
                .as_str()
                .map(|r| format!(" (prompt blocked: {})", r))
                .unwrap_or_default();
            GenerateError::Extraction(format!("No candidates in response{}", reason))
        })?;

        let parts = candidate["content"]["parts"].as_array().ok_or_else(|| {
            let reason = candidate["finishReason"].as_str().unwrap_or("unknown");
            GenerateError::Extraction(format!(
                "Candidate has no content parts (finish reason: {})",
                reason
            ))
        })?;

        let text = parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        if !self.structured() {
            return non_empty(&text, "candidate text");
        }

        let inner: Value = serde_json::from_str(text.trim()).map_err(|e| {
            GenerateError::Extraction(format!("Structured response was not valid JSON: {}", e))
        })?;

        let code = inner[CODE_FIELD].as_str().ok_or_else(|| {
            GenerateError::Extraction(format!(
                "Structured response is missing the '{}' field",
                CODE_FIELD
            ))
        })?;

        non_empty(code, "structured code field")
    }
}

#[async_trait]
impl BackendAdapter for NativeBackend {
    fn shape(&self) -> BackendShape {
        self.config.shape
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerateError> {
        request.validate()?;
        let api_key = require_api_key(&self.config)?;

        let model = resolve_model(&self.config, request.model.as_deref());
        let url = format!("{}/models/{}:generateContent", self.config.endpoint(), model);
        let body = self.build_body(request);

        debug!(
            "generateContent request ({}): {}",
            model,
            serde_json::to_string(&body).unwrap_or_default()
        );

        let builder = authorized_post(&self.client, self.config.auth_style(), &url, &api_key)?;
        let response = send_json(builder, &body).await?;

        self.extract(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::super::ErrorKind;
    use super::super::test_support::spawn_upstream;
    use super::*;

    fn backend(shape: BackendShape, endpoint: &str) -> NativeBackend {
        NativeBackend::new(&BackendConfig {
            shape,
            endpoint: Some(endpoint.to_string()),
            model: Some("gemini-2.0-flash".to_string()),
            api_key: Some("test-key".to_string()),
            ..BackendConfig::default()
        })
        .unwrap()
    }

    fn text_response(text: &str) -> String {
        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": "STOP"
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn native_returns_candidate_text_verbatim() {
        let code = "broadcast(\"hi\");\nspawn(\"zombie\", 3);";
        let upstream = spawn_upstream(200, text_response(&format!("\n  {}  \n", code))).await;
        let backend = backend(BackendShape::Native, &upstream.base_url);

        let result = backend
            .generate(&GenerationRequest::new("spawn three zombies"))
            .await
            .unwrap();
        assert_eq!(result, code);

        let requests = upstream.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/models/gemini-2.0-flash:generateContent");
        assert_eq!(requests[0].query.as_deref(), Some("key=test-key"));
        assert!(requests[0].authorization.is_none());
    }

    #[tokio::test]
    async fn native_envelope_carries_only_known_keys() {
        let upstream = spawn_upstream(200, text_response("ok();")).await;
        let backend = backend(BackendShape::Native, &upstream.base_url);

        let request = GenerationRequest {
            prompt: "make it rain".to_string(),
            system_instruction: Some("only weather commands".to_string()),
            model: None,
        };
        backend.generate(&request).await.unwrap();

        let body = &upstream.requests()[0].body;
        let keys: Vec<&String> = body.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["contents", "systemInstruction"]);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "make it rain");
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "only weather commands"
        );
    }

    #[tokio::test]
    async fn unknown_model_hint_uses_default_model() {
        let upstream = spawn_upstream(200, text_response("ok();")).await;
        let backend = backend(BackendShape::Native, &upstream.base_url);

        let request = GenerationRequest {
            model: Some("gpt-4o".to_string()),
            ..GenerationRequest::new("hello")
        };
        backend.generate(&request).await.unwrap();

        assert_eq!(
            upstream.requests()[0].path,
            "/models/gemini-2.0-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn structured_requests_schema_and_unwraps_inner_json() {
        let inner = json!({ "code": "give(\"diamond\", 1);" }).to_string();
        let upstream = spawn_upstream(200, text_response(&inner)).await;
        let backend = backend(BackendShape::Structured, &upstream.base_url);

        let result = backend
            .generate(&GenerationRequest::new("give everyone a diamond"))
            .await
            .unwrap();
        assert_eq!(result, "give(\"diamond\", 1);");

        let body = &upstream.requests()[0].body;
        let config = &body["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(config["responseSchema"]["properties"]["code"]["type"], "STRING");
        assert_eq!(config["responseSchema"]["required"][0], "code");
    }

    #[tokio::test]
    async fn structured_rejects_unparseable_inner_json() {
        let upstream = spawn_upstream(200, text_response("give(\"diamond\");")).await;
        let backend = backend(BackendShape::Structured, &upstream.base_url);

        let err = backend
            .generate(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtractionError);
    }

    #[tokio::test]
    async fn structured_rejects_missing_or_empty_code_field() {
        for inner in [json!({ "script": "x" }), json!({ "code": "   " })] {
            let upstream = spawn_upstream(200, text_response(&inner.to_string())).await;
            let backend = backend(BackendShape::Structured, &upstream.base_url);

            let err = backend
                .generate(&GenerationRequest::new("x"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ExtractionError);
        }
    }

    #[tokio::test]
    async fn empty_candidates_is_an_extraction_error() {
        let upstream = spawn_upstream(200, r#"{"candidates":[]}"#).await;
        let backend = backend(BackendShape::Native, &upstream.base_url);

        let err = backend
            .generate(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtractionError);
        assert!(err.to_string().contains("No candidates"));
    }

    #[tokio::test]
    async fn blocked_prompt_reason_is_reported() {
        let upstream = spawn_upstream(200, r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).await;
        let backend = backend(BackendShape::Native, &upstream.base_url);

        let err = backend
            .generate(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtractionError);
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn rate_limit_maps_to_upstream_error() {
        let upstream = spawn_upstream(429, r#"{"error":{"message":"rate limited"}}"#).await;
        let backend = backend(BackendShape::Native, &upstream.base_url);

        let err = backend
            .generate(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamError);
        assert_eq!(err.upstream_status(), Some(429));
        assert_eq!(err.to_string(), "rate limited");
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_network_call() {
        let upstream = spawn_upstream(200, text_response("ok();")).await;
        let backend = NativeBackend::new(&BackendConfig {
            endpoint: Some(upstream.base_url.clone()),
            api_key_env: Some("SCRIPTRELAY_TEST_UNSET_KEY_4F1C".to_string()),
            ..BackendConfig::default()
        })
        .unwrap();

        let err = backend
            .generate(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert!(upstream.requests().is_empty());
    }

    #[tokio::test]
    async fn empty_prompt_fails_before_network_call() {
        let upstream = spawn_upstream(200, text_response("ok();")).await;
        let backend = backend(BackendShape::Native, &upstream.base_url);

        let err = backend
            .generate(&GenerationRequest::new("  "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientError);
        assert!(upstream.requests().is_empty());
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        let backend = backend(BackendShape::Native, "http://127.0.0.1:1");

        let err = backend
            .generate(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert_eq!(err.http_status().as_u16(), 500);
    }

    #[tokio::test]
    async fn transport_error_does_not_leak_query_key() {
        let backend = NativeBackend::new(&BackendConfig {
            endpoint: Some("http://127.0.0.1:1".to_string()),
            api_key: Some("SUPERSECRETKEY".to_string()),
            ..BackendConfig::default()
        })
        .unwrap();
        assert_eq!(backend.config.auth_style(), crate::config::AuthStyle::Query);

        let err = backend
            .generate(&GenerationRequest::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert!(!err.to_string().contains("SUPERSECRETKEY"), "{}", err);
    }
}
