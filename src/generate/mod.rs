//! Provider-agnostic generation adapter.
//!
//! One [`BackendAdapter`] is built at startup from [`BackendConfig`] and turns a
//! [`GenerationRequest`] into exactly one outbound call. Every backend shape
//! reports the same normalized result: the generated code, or a [`GenerateError`].

mod chat_completions;
mod ground_rules;
mod native;

pub use chat_completions::ChatCompletionsBackend;
pub use ground_rules::GROUND_RULES;
pub use native::NativeBackend;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{AuthStyle, BackendConfig, BackendShape};

/// Normalized generation request accepted by every backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(default)]
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    /// Caller-side model name; resolved against `backend.model_map`
    #[serde(default, alias = "modelHint", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Reject requests that must never reach a backend.
    pub fn validate(&self) -> Result<(), GenerateError> {
        if self.prompt.trim().is_empty() {
            return Err(GenerateError::Client("Prompt is required".to_string()));
        }
        Ok(())
    }
}

/// Error category, serialized into HTTP error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ClientError,
    ConfigurationError,
    UpstreamError,
    ExtractionError,
    TransportError,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    /// Malformed or missing input; no backend call was made
    #[error("{0}")]
    Client(String),

    /// Server-side misconfiguration such as a missing API key
    #[error("{0}")]
    Configuration(String),

    /// Backend answered with a non-success status
    #[error("{message}")]
    Upstream { status: u16, message: String },

    /// Backend succeeded but no usable text could be found
    #[error("{0}")]
    Extraction(String),

    /// The backend could not be reached
    #[error("{0}")]
    Transport(String),
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ClientError => "client_error",
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::ExtractionError => "extraction_error",
            ErrorKind::TransportError => "transport_error",
        }
    }
}

impl GenerateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerateError::Client(_) => ErrorKind::ClientError,
            GenerateError::Configuration(_) => ErrorKind::ConfigurationError,
            GenerateError::Upstream { .. } => ErrorKind::UpstreamError,
            GenerateError::Extraction(_) => ErrorKind::ExtractionError,
            GenerateError::Transport(_) => ErrorKind::TransportError,
        }
    }

    /// Status reported by the backend, for upstream errors only.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            GenerateError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// HTTP status to answer the caller with.
    pub fn http_status(&self) -> StatusCode {
        match self {
            GenerateError::Client(_) => StatusCode::BAD_REQUEST,
            GenerateError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GenerateError::Configuration(_)
            | GenerateError::Extraction(_)
            | GenerateError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Schema this adapter speaks.
    fn shape(&self) -> BackendShape;

    /// Generate code for `request`. Never returns an empty string.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerateError>;
}

/// Build the one backend this process talks to.
pub fn create_backend(config: &BackendConfig) -> anyhow::Result<Arc<dyn BackendAdapter>> {
    let backend: Arc<dyn BackendAdapter> = match config.shape {
        BackendShape::Native | BackendShape::Structured => Arc::new(NativeBackend::new(config)?),
        BackendShape::ChatCompletions => Arc::new(ChatCompletionsBackend::new(config)?),
    };

    debug!(
        "Generation backend: {} at {} (default model {})",
        config.shape,
        config.endpoint(),
        config.default_model()
    );

    Ok(backend)
}

fn http_client(config: &BackendConfig) -> anyhow::Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Map a caller hint to a backend model.
///
/// Hints are caller-controlled and may name another provider's models, so an
/// unknown hint falls back to the default model instead of failing.
pub fn resolve_model<'a>(config: &'a BackendConfig, hint: Option<&str>) -> &'a str {
    let default = config.default_model();
    let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) else {
        return default;
    };

    if let Some(mapped) = config.model_map.get(hint) {
        return mapped;
    }
    if hint == default {
        return default;
    }
    if let Some(known) = config.model_map.values().find(|m| m.as_str() == hint) {
        return known;
    }

    debug!("Unknown model hint '{}', using {}", hint, default);
    default
}

/// System text precedence: request, then config override, then built-in rules.
fn system_text<'a>(config: &'a BackendConfig, request: &'a GenerationRequest) -> &'a str {
    request
        .system_instruction
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or(config.system_prompt.as_deref())
        .unwrap_or(GROUND_RULES)
}

fn require_api_key(config: &BackendConfig) -> Result<String, GenerateError> {
    config.resolve_api_key().ok_or_else(|| {
        warn!("API key missing: {} is not set", config.api_key_env());
        GenerateError::Configuration(format!(
            "Server configuration error: {} is not set",
            config.api_key_env()
        ))
    })
}

/// Start a POST to `url` carrying the key in the configured place.
fn authorized_post(
    client: &Client,
    auth: AuthStyle,
    url: &str,
    api_key: &str,
) -> Result<RequestBuilder, GenerateError> {
    let mut url = Url::parse(url).map_err(|e| {
        GenerateError::Configuration(format!("Invalid backend endpoint {}: {}", url, e))
    })?;

    let builder = match auth {
        AuthStyle::Query => {
            url.query_pairs_mut().append_pair("key", api_key);
            client.post(url)
        }
        AuthStyle::Bearer => client.post(url).bearer_auth(api_key),
    };

    Ok(builder.header("Content-Type", "application/json"))
}

/// Send the request and return the parsed success body.
async fn send_json<T>(builder: RequestBuilder, body: &T) -> Result<Value, GenerateError>
where
    T: Serialize + ?Sized,
{
    // The request URL may carry `?key=...`, so it never reaches logs or callers
    let response = builder.json(body).send().await.map_err(|e| {
        let e = e.without_url();
        warn!("Backend request failed: {}", e);
        GenerateError::Transport(format!("Failed to reach backend: {}", e))
    })?;

    let status = response.status();
    let text = response.text().await.map_err(|e| {
        let e = e.without_url();
        warn!("Failed to read backend response: {}", e);
        GenerateError::Transport(format!("Failed to read backend response: {}", e))
    })?;

    if !status.is_success() {
        warn!("Backend returned {}: {}", status, text);
        return Err(upstream_error(status.as_u16(), &text));
    }

    debug!("Backend response: {}", text);

    serde_json::from_str(&text).map_err(|e| {
        warn!("Backend returned non-JSON success body: {}", e);
        GenerateError::Extraction(format!("Backend response was not valid JSON: {}", e))
    })
}

/// Prefer the backend's `error.message`, else its raw body.
fn upstream_error(status: u16, body: &str) -> GenerateError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| match &v["error"] {
            Value::String(s) => Some(s.clone()),
            error => error["message"].as_str().map(str::to_string),
        })
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| body.to_string());

    GenerateError::Upstream { status, message }
}

/// Trim edge whitespace; an empty extraction is an error, never a result.
fn non_empty(text: &str, what: &str) -> Result<String, GenerateError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(GenerateError::Extraction(format!(
            "Backend returned no usable text ({})",
            what
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Throwaway HTTP server standing in for an LLM API.

    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode, Uri, header};
    use axum::response::{IntoResponse, Response};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    pub struct Captured {
        pub path: String,
        pub query: Option<String>,
        pub authorization: Option<String>,
        pub body: Value,
    }

    struct UpstreamState {
        status: StatusCode,
        body: String,
        captured: Mutex<Vec<Captured>>,
    }

    pub struct Upstream {
        pub base_url: String,
        state: Arc<UpstreamState>,
    }

    impl Upstream {
        pub fn requests(&self) -> Vec<Captured> {
            self.state.captured.lock().unwrap().clone()
        }
    }

    pub async fn spawn_upstream(status: u16, body: impl Into<String>) -> Upstream {
        let state = Arc::new(UpstreamState {
            status: StatusCode::from_u16(status).unwrap(),
            body: body.into(),
            captured: Mutex::new(Vec::new()),
        });

        let app = Router::new().fallback(record).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Upstream {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    async fn record(
        State(state): State<Arc<UpstreamState>>,
        uri: Uri,
        headers: HeaderMap,
        body: String,
    ) -> Response {
        state.captured.lock().unwrap().push(Captured {
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            authorization: headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: serde_json::from_str(&body).unwrap_or(Value::Null),
        });

        (
            state.status,
            [(header::CONTENT_TYPE, "application/json")],
            state.body.clone(),
        )
            .into_response()
    }
}
