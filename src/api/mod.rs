//! HTTP surface using Axum.
//!
//! The REST request layer proper lives in an external collaborator; this
//! module exposes only what the core owes the outside world:
//! - `GET /ws/pumps` — the live telemetry WebSocket
//! - `GET /healthz` — liveness
//! - `GET /api/v1/status` — kernel status snapshot

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::control::ControlHandle;
use crate::fanout::WsHub;

/// Shared state of the HTTP surface.
#[derive(Clone)]
pub struct ApiState {
    pub hub: WsHub,
    pub control: ControlHandle,
}

/// Build the application router.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/status", get(status))
        .route("/ws/pumps", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    match state.control.status().await {
        Some(status) => Json(serde_json::json!({ "status": status })).into_response(),
        None => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "simulation kernel is not running" })),
        )
            .into_response(),
    }
}

async fn ws_upgrade(State(state): State<ApiState>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Pump hub messages to the socket until either side hangs up. Inbound
/// frames are ignored; the channel is server-push only.
async fn handle_socket(socket: WebSocket, state: ApiState) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = state.hub.register(tx).await;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(other)) => debug!(?other, "Ignoring inbound WebSocket frame"),
            },
        }
    }

    state.hub.unregister(id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> ApiState {
        let (control, _rx) = ControlHandle::channel();
        ApiState { hub: WsHub::new(), control }
    }

    #[tokio::test]
    async fn healthz_returns_200() {
        let app = create_app(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_without_kernel_is_503() {
        // The mailbox receiver is dropped, so the status query fails over
        // to the unavailable branch.
        let app = create_app(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
