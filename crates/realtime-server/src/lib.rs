//! Axum entry points wiring the core engine to a real socket.

pub mod transport;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use realtime_auth::JwtTokenService;
use realtime_broker::InProcessBroker;
use realtime_core::{CoreError, InboundFrame, Server, ServerContext};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use transport::AxumWsTransport;

pub type AppServer = Server<InProcessBroker, JwtTokenService>;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<AppServer>,
}

pub fn build_router(state: AppState) -> Router {
    let path = state.server.config().path.clone();
    Router::new()
        .route("/health", get(health))
        .route(&path, get(ws_handler))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let path = state.server.config().path.clone();

    // Checked before the upgrade completes: once `on_upgrade` runs the
    // HTTP 101 response is already sent, so a rejection afterward could
    // never surface as a real 403/401 status.
    if let Err(err) = state.server.check_connection_allowed(origin.as_deref(), &path).await {
        let status = match err {
            CoreError::InvalidOrigin => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };
        debug!(error = %err, "connection rejected before upgrade");
        return (status, err.to_string()).into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state)).into_response()
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let transport = AxumWsTransport::new(sender);

    let session = state.server.create_session(transport);

    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!(session_id = %session.id(), error = %err, "socket read error");
                break;
            }
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(frame) => session.handle_inbound(frame).await,
                Err(err) => debug!(session_id = %session.id(), error = %err, "dropping malformed frame"),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    session.disconnect().await;
}
