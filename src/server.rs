//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Index readiness and provider names |
//! | `POST` | `/ingest` | Reload the docs directory and reindex |
//! | `POST` | `/chat` | Answer one fraud-support message |
//! | `GET`  | `/documents` | List indexed documents |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "user_message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `index_unready` (503), `internal` (500).
//!
//! A `/chat` request that reaches the composer always gets a
//! `ChatResponse`; retrieval and generation failures are reported inside
//! the answer (`technical_issue` flag), not as HTTP errors.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use fraud_assist_core::error::CoreError;
use fraud_assist_core::models::{
    AgentResponse, ConversationMessage, QueryContext, TransactionContext,
};

use crate::assistant::{Assistant, AssistantHealth, DocumentSummary, IngestReport};

/// Max accepted length of `user_message`, in chars.
const MAX_MESSAGE_CHARS: usize = 2000;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    assistant: Arc<Assistant>,
}

/// Build the router. Split from [`run_server`] so tests can serve it on
/// an ephemeral port.
pub fn build_router(assistant: Arc<Assistant>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest", post(handle_ingest))
        .route("/chat", post(handle_chat))
        .route("/documents", get(handle_documents))
        .layer(cors)
        .with_state(AppState { assistant })
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(assistant: Arc<Assistant>) -> anyhow::Result<()> {
    let bind_addr = assistant.config().server.bind.clone();
    let app = build_router(assistant);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "server listening");
    println!("Fraud assist server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::IndexUnready => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "index_unready".to_string(),
                message: err.to_string(),
            },
            other => internal(other.to_string()),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `"ok"` once the index is built, `"starting"` before.
    status: String,
    version: String,
    #[serde(flatten)]
    health: AssistantHealth,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = state.assistant.health();
    Json(HealthResponse {
        status: if health.index_ready { "ok" } else { "starting" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        health,
    })
}

// ============ POST /ingest ============

#[derive(Deserialize, Default)]
struct IngestRequest {
    #[serde(default)]
    force_reindex: bool,
}

#[derive(Serialize)]
struct IngestResponse {
    success: bool,
    #[serde(flatten)]
    report: IngestReport,
}

async fn handle_ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, AppError> {
    let request: IngestRequest = if body.iter().all(u8::is_ascii_whitespace) {
        IngestRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(e.to_string()))?
    };
    let report = state
        .assistant
        .reindex(request.force_reindex)
        .await
        .map_err(|e| {
            error!(error = %e, "reindex failed");
            internal(format!("{:#}", e))
        })?;
    Ok(Json(IngestResponse {
        success: true,
        report,
    }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    user_message: String,
    #[serde(default)]
    transaction_context: Option<TransactionContext>,
    #[serde(default)]
    fraud_confirmed: Option<bool>,
    #[serde(default)]
    conversation_history: Vec<ConversationMessage>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    success: bool,
    agent_response: Option<AgentResponse>,
    error: Option<String>,
    session_id: String,
    processing_time_ms: u64,
}

impl ChatRequest {
    fn into_query(self) -> Result<QueryContext, AppError> {
        let message = self.user_message.trim().to_string();
        if message.is_empty() {
            return Err(bad_request("user_message must not be empty"));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(bad_request(format!(
                "user_message must be at most {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
        if let Some(ref tx) = self.transaction_context {
            tx.validate()
                .map_err(|e| bad_request(format!("transaction_context: {}", e)))?;
        }
        Ok(QueryContext {
            message,
            transaction: self.transaction_context,
            fraud_confirmed: self.fraud_confirmed,
            history: self.conversation_history,
            session_id: Some(
                self.session_id
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            ),
        })
    }
}

async fn handle_chat(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ChatResponse>, AppError> {
    let started = Instant::now();
    let request: ChatRequest =
        serde_json::from_slice(&body).map_err(|e| bad_request(e.to_string()))?;
    let ctx = request.into_query()?;
    let response = state.assistant.answer(&ctx).await?;

    Ok(Json(ChatResponse {
        success: true,
        agent_response: Some(response),
        error: None,
        session_id: ctx.session_id.unwrap_or_default(),
        processing_time_ms: started.elapsed().as_millis() as u64,
    }))
}

// ============ GET /documents ============

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentSummary>,
}

async fn handle_documents(
    State(state): State<AppState>,
) -> Result<Json<DocumentsResponse>, AppError> {
    Ok(Json(DocumentsResponse {
        documents: state.assistant.documents()?,
    }))
}
