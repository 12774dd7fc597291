//! HTTP surface for the generation adapter and the command relay.
//!
//! The two services share nothing but the listener; either can be switched
//! off with `server.services`. Every response allows any origin because the
//! producer is a browser page served from elsewhere.

use anyhow::Result;
use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::generate::{BackendAdapter, GenerateError, GenerationRequest, create_backend};
use crate::relay::{CommandRelay, RelayError};

pub struct Server {
    config: Config,
    backend: Option<Arc<dyn BackendAdapter>>,
    relay: Option<Arc<CommandRelay>>,
}

impl Server {
    /// Build the backend and the relay once, for the services enabled in config.
    pub fn new(config: &Config) -> Result<Self> {
        let services = config.server.services;

        let backend = if services.generate() {
            Some(create_backend(&config.backend)?)
        } else {
            None
        };

        let relay = if services.relay() {
            Some(Arc::new(CommandRelay::from_config(config)?))
        } else {
            None
        };

        Ok(Self {
            config: config.clone(),
            backend,
            relay,
        })
    }

    pub fn router(&self) -> Router {
        build_router(self.backend.clone(), self.relay.clone())
    }

    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr =
            format!("{}:{}", self.config.server.bind, self.config.server.port).parse()?;

        info!(
            "Starting HTTP server on http://{} (services: {})",
            addr, self.config.server.services
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Assemble the router for whichever services are present.
pub fn build_router(
    backend: Option<Arc<dyn BackendAdapter>>,
    relay: Option<Arc<CommandRelay>>,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new().route("/health", get(health_check));

    if let Some(backend) = backend {
        app = app.merge(
            Router::new()
                .route("/generate", post(generate))
                .with_state(backend),
        );
    }

    if let Some(relay) = relay {
        app = app.merge(
            Router::new()
                .route("/queue", post(enqueue).get(dequeue))
                .with_state(relay),
        );
    }

    app.layer(TraceLayer::new_for_http()).layer(cors)
}

// Error response type
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    upstream_status: Option<u16>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
}

impl AppError {
    fn client(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "client_error",
            message: message.into(),
            upstream_status: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal_error",
            message: message.into(),
            upstream_status: None,
        }
    }
}

impl From<GenerateError> for AppError {
    fn from(e: GenerateError) -> Self {
        Self {
            status: e.http_status(),
            kind: e.kind().as_str(),
            upstream_status: e.upstream_status(),
            message: e.to_string(),
        }
    }
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::TooShort { .. } => AppError::client(e.to_string()),
            RelayError::Storage(_) => Self {
                kind: "storage_error",
                ..AppError::internal(e.to_string())
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.kind,
                message: self.message,
                upstream_status: self.upstream_status,
            }),
        )
            .into_response()
    }
}

// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateResponse {
    code: String,
}

async fn generate(
    State(backend): State<Arc<dyn BackendAdapter>>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected generate body: {}", rejection.body_text());
        AppError::client(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    request.validate()?;

    match backend.generate(&request).await {
        Ok(code) => {
            info!("Generated {} bytes of code", code.len());
            Ok(Json(GenerateResponse { code }))
        }
        Err(e) => {
            match e.upstream_status() {
                Some(status) => warn!("Generation failed (upstream {}): {}", status, e),
                None => warn!("Generation failed ({:?}): {}", e.kind(), e),
            }
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueueRequest {
    #[serde(default)]
    code: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueAck {
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueResponse {
    pending: bool,
    code: Option<String>,
    enqueued_at: Option<DateTime<Utc>>,
    message: String,
}

async fn enqueue(
    State(relay): State<Arc<CommandRelay>>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Result<Json<QueueAck>, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected queue body: {}", rejection.body_text());
        AppError::client(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    tokio::task::spawn_blocking(move || relay.write(&request.code))
        .await
        .map_err(|e| AppError::internal(format!("Relay task error: {}", e)))?
        .inspect_err(|e| warn!("Relay write rejected: {}", e))?;

    Ok(Json(QueueAck {
        message: "Command queued".to_string(),
    }))
}

async fn dequeue(State(relay): State<Arc<CommandRelay>>) -> Result<Json<QueueResponse>, AppError> {
    let pending = tokio::task::spawn_blocking(move || relay.read())
        .await
        .map_err(|e| AppError::internal(format!("Relay task error: {}", e)))?
        .inspect_err(|e| error!("Relay read failed: {}", e))?;

    let response = match pending {
        Some(command) => QueueResponse {
            pending: true,
            code: Some(command.code),
            enqueued_at: Some(command.enqueued_at),
            message: "Command dequeued".to_string(),
        },
        None => QueueResponse {
            pending: false,
            code: None,
            enqueued_at: None,
            message: "No pending command".to_string(),
        },
    };

    Ok(Json(response))
}
