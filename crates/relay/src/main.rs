use std::{net::SocketAddr, path::Path, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use shared::{
    domain::{ConnectionId, SOURCE_HEADER},
    error::{ApiError, ErrorCode},
    protocol::ConnectionAck,
};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod hub;

use config::{load_settings, DEFAULT_SETTINGS_FILE};
use hub::{ForwardOutcome, Hub};

struct AppState {
    hub: Hub,
    max_message_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    source: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings(Path::new(DEFAULT_SETTINGS_FILE))?;
    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;

    let state = Arc::new(AppState {
        hub: Hub::new(),
        max_message_bytes: settings.max_message_bytes,
    });
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "relay listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    info!("relay stopped");
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Endpoint name from the `x-source` header, else the `source` query parameter.
fn resolve_source(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let non_empty = |name: &str| {
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_owned())
    };
    headers
        .get(SOURCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(non_empty)
        .or_else(|| query.and_then(non_empty))
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Option<Query<WsQuery>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let query_source = query.and_then(|Query(q)| q.source);
    let Some(source) = resolve_source(&headers, query_source.as_deref()) else {
        warn!("rejecting connection without a source name");
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                ErrorCode::Validation,
                "missing source name: send an x-source header or a source query parameter",
            )),
        )
            .into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| ws_connection(state, socket, source))
}

/// Queues the connection ack, then registers `source`, so the ack is always the first frame
/// the endpoint receives.
async fn join_hub(
    state: &AppState,
    source: &str,
) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    match serde_json::to_string(&ConnectionAck::established()) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text));
        }
        Err(err) => warn!(%err, "failed to encode connection ack"),
    }

    // The registry holds the only sender; replacing or closing the registration drops it.
    let (id, replaced) = state.hub.register(source, tx).await;
    let endpoints = state.hub.len().await;
    info!(
        source = %source,
        connection_id = id.0,
        replaced,
        endpoints,
        "endpoint connected"
    );
    (id, rx)
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, source: String) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut rx) = join_hub(&state, &source).await;

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        let message = match frame {
            Ok(Message::Close(_)) => break,
            Ok(message) => message,
            Err(err) => {
                debug!(source = %source, connection_id = id.0, %err, "connection error");
                break;
            }
        };
        match state.hub.forward(message).await {
            ForwardOutcome::Delivered(to) => debug!(source = %source, to = %to, "frame forwarded"),
            ForwardOutcome::Control => {}
            outcome => debug!(source = %source, ?outcome, "frame dropped"),
        }
    }

    send_task.abort();
    let removed = state.hub.deregister(&source, id).await;
    info!(source = %source, connection_id = id.0, removed, "endpoint disconnected");
}

async fn shutdown_signal(state: Arc<AppState>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            error!(%err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await
        }
    }
    state.hub.close_all().await;
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
