//! HTTP route handlers for the stub exchange server.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::state::{AppState, FAIL_MARKER};

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/sessions/{session_id}/exchange", post(exchange))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "converse-stub-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Exchange request.
#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    /// The user's message.
    pub content: String,
}

/// Event written to the response stream.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEvent {
    /// Slice of reply text.
    Chunk {
        /// Reply text.
        content: String,
    },
    /// End of the reply.
    Done,
    /// Failure of the reply.
    Error {
        /// Reason.
        message: String,
    },
}

impl OutboundEvent {
    /// Render the event as one `data:` frame.
    #[must_use]
    pub fn to_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {json}\n\n")
    }
}

/// Build the scripted reply for a user message.
///
/// The reply echoes the message in word-sized chunks. A message containing
/// [`FAIL_MARKER`] gets one chunk and then an error.
#[must_use]
pub fn scripted_reply(session_id: &str, content: &str) -> Vec<OutboundEvent> {
    let reply = format!("[{session_id}] You said: {}", content.trim());
    let mut events: Vec<OutboundEvent> = reply
        .split_inclusive(' ')
        .map(|word| OutboundEvent::Chunk {
            content: word.to_string(),
        })
        .collect();

    if content.contains(FAIL_MARKER) {
        events.truncate(1);
        events.push(OutboundEvent::Error {
            message: "scripted failure".to_string(),
        });
    } else {
        events.push(OutboundEvent::Done);
    }
    events
}

/// Stream a scripted reply as `data:` frames.
async fn exchange(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<ExchangeRequest>,
) -> Result<Response, (StatusCode, String)> {
    if request.content.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "content must not be empty".to_string(),
        ));
    }

    let events = scripted_reply(&session_id, &request.content);
    tracing::debug!(%session_id, frames = events.len(), "streaming scripted reply");

    let delay = state.chunk_delay;
    let frames = futures::stream::iter(events).then(move |event| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok::<_, Infallible>(event.to_frame())
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(frames))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Response error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_reply_ends_with_done() {
        let events = scripted_reply("s1", "hello world");
        assert!(matches!(events.last(), Some(OutboundEvent::Done)));
        let text: String = events
            .iter()
            .filter_map(|event| match event {
                OutboundEvent::Chunk { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "[s1] You said: hello world");
    }

    #[test]
    fn test_fail_marker_produces_error() {
        let events = scripted_reply("s1", "please !fail now");
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], OutboundEvent::Chunk { .. }));
        assert!(matches!(events[1], OutboundEvent::Error { .. }));
    }

    #[test]
    fn test_frames_match_wire_format() {
        let frame = OutboundEvent::Chunk {
            content: "Hi".to_string(),
        }
        .to_frame();
        assert_eq!(frame, "data: {\"type\":\"chunk\",\"content\":\"Hi\"}\n\n");
        assert_eq!(OutboundEvent::Done.to_frame(), "data: {\"type\":\"done\"}\n\n");
    }
}
