//! HTTP transport for the research agent.
//!
//! Routes:
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET`  | `/health` | service status |
//! | `POST` | `/api/research` | [`ResearchResponse`] JSON |
//! | `POST` | `/api/research/stream` | SSE of [`StreamEvent`](crate::agent::StreamEvent) frames |
//!
//! Each request gets its own session. A client that disconnects from the
//! stream cancels its session.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::agent::research::{ResearchRequest, Researcher};
use crate::agent::stream::ResearchResponse;

/// Body of both research endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchBody {
    /// The research question.
    pub query: String,
    /// Extra instructions appended to the question.
    #[serde(default, alias = "customInstructions")]
    pub custom_instructions: Option<String>,
    /// Session id to use instead of a generated one.
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
}

impl ResearchBody {
    fn into_request(self) -> Result<ResearchRequest, Response> {
        if self.query.trim().is_empty() {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "query must not be empty"})),
            )
                .into_response());
        }
        let mut request = ResearchRequest::new(self.query);
        request.instructions = self.custom_instructions;
        request.session_id = self.session_id;
        Ok(request)
    }
}

/// Builds the router over a shared researcher.
pub fn router(researcher: Researcher) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/research", post(research))
        .route("/api/research/stream", post(research_stream))
        .with_state(researcher)
}

async fn health(State(researcher): State<Researcher>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "model": researcher.config().model,
        "tools": researcher.registry().names(),
    }))
}

async fn research(State(researcher): State<Researcher>, Json(body): Json<ResearchBody>) -> Response {
    let request = match body.into_request() {
        Ok(request) => request,
        Err(response) => return response,
    };
    let result = researcher.start_research(request).await;
    Json(ResearchResponse::from(&result)).into_response()
}

async fn research_stream(
    State(researcher): State<Researcher>,
    Json(body): Json<ResearchBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, Response> {
    let request = body.into_request()?;
    let events = researcher
        .stream_research(request)
        .map(|event| Event::default().json_data(&event));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Serves the research API until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(researcher: Researcher, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "research server listening");

    axum::serve(listener, router(researcher))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
