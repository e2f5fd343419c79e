use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{DefaultBodyLimit, State, rejection::JsonRejection},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    herald_broadcast::BroadcastRequest,
    herald_control::StatusReport,
    serde::Deserialize,
    tokio_util::sync::CancellationToken,
    tower_http::{
        cors::{Any, CorsLayer},
        limit::RequestBodyLimitLayer,
        trace::TraceLayer,
    },
    tracing::{debug, info, warn},
};

use crate::state::GatewayState;

/// Body of `POST /send-to-all`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendToAllRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "imageUrl", alias = "image_url")]
    pub image_url: Option<String>,
}

impl From<SendToAllRequest> for BroadcastRequest {
    fn from(req: SendToAllRequest) -> Self {
        Self {
            message: req.message,
            image_url: req.image_url,
            media: None,
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

struct ApiError {
    status: StatusCode,
    error: &'static str,
    details: Option<String>,
}

impl ApiError {
    fn bad_request(error: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error,
            details: None,
        }
    }

    /// A body axum could not read as JSON. A request without a JSON
    /// content type is read as an empty request instead.
    fn rejected(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            error: "Invalid request body.",
            details: Some(rejection.body_text()),
        }
    }

    fn internal(details: impl ToString) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "Internal server error.",
            details: Some(details.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "success": false,
            "error": self.error,
        });
        if let Some(details) = self.details {
            body["details"] = serde_json::Value::String(details);
        }
        (self.status, Json(body)).into_response()
    }
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the HTTP router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/send-to-all", post(send_to_all_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn start_gateway(
    bind: &str,
    port: u16,
    state: Arc<GatewayState>,
    body_limit: usize,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_gateway_app(Arc::clone(&state), body_limit);

    let lines = [
        format!("herald v{}", state.version),
        format!("listening on {addr}"),
        "POST /send-to-all".to_string(),
        "GET  /status".to_string(),
        "GET  /health".to_string(),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP API stopped");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn send_to_all_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<SendToAllRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let body = match body {
        Ok(Json(body)) => body,
        Err(JsonRejection::MissingJsonContentType(_)) => SendToAllRequest::default(),
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "unreadable broadcast request");
            return Err(ApiError::rejected(rejection));
        },
    };
    let request = BroadcastRequest::from(body);
    if request.is_empty() {
        return Err(ApiError::bad_request(
            "A message or image URL is required.",
        ));
    }

    let coordinator = Arc::clone(&state.coordinator);
    let summary = tokio::spawn(async move { coordinator.broadcast_to_all(request).await })
        .await
        .map_err(|e| {
            warn!(error = %e, "broadcast task aborted");
            ApiError::internal(e)
        })?;

    info!(summary = %summary.summary, "API broadcast finished");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Broadcast sent.",
        "resultado": summary,
    })))
}

async fn status_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<StatusReport>, ApiError> {
    let coordinator = &state.coordinator;
    let report =
        StatusReport::collect(coordinator.backends(), coordinator.registry(), state.started)
            .await
            .map_err(ApiError::internal)?;
    Ok(Json(report))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
