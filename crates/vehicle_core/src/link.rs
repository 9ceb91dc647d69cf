use std::future::Future;

use futures::{Sink, SinkExt, Stream, StreamExt};
use shared::{
    domain::{SOURCE_HEADER, SOURCE_QUERY},
    protocol::StatusPush,
};
use thiserror::Error;
use tokio::{net::TcpStream, time::Instant};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::Settings,
    dispatch::{DispatchOutcome, Dispatcher},
};

pub type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid relay url '{url}': {message}")]
    InvalidUrl { url: String, message: String },
    #[error("failed to connect to relay at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("failed to encode status push: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to send to relay: {0}")]
    Send(#[source] tungstenite::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Closed,
    Shutdown,
    Failed(String),
}

/// Where status pushes go and what they advertise.
#[derive(Debug, Clone)]
pub struct StatusTarget {
    pub driver_endpoint: String,
    pub camera_url: Option<String>,
}

impl StatusTarget {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            driver_endpoint: settings.driver_endpoint.clone(),
            camera_url: settings.camera_url.clone(),
        }
    }
}

/// Relay URL with the endpoint name in the query. `http(s)` bases are mapped to `ws(s)`.
pub fn relay_url(base: &str, source: &str) -> Result<Url, LinkError> {
    let invalid = |message: String| LinkError::InvalidUrl {
        url: base.to_string(),
        message,
    };
    let mut url = Url::parse(base).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot switch to '{scheme}'")))?;
    url.query_pairs_mut().append_pair(SOURCE_QUERY, source);
    Ok(url)
}

pub async fn connect(settings: &Settings) -> Result<RelayStream, LinkError> {
    let url = relay_url(&settings.relay_url, &settings.source_name)?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|source| LinkError::Connect {
            url: url.to_string(),
            source,
        })?;
    let source = HeaderValue::from_str(&settings.source_name).map_err(|err| {
        LinkError::InvalidUrl {
            url: url.to_string(),
            message: format!("source name is not a valid header value: {err}"),
        }
    })?;
    request.headers_mut().insert(SOURCE_HEADER, source);

    let (stream, _) = connect_async(request)
        .await
        .map_err(|source| LinkError::Connect {
            url: url.to_string(),
            source,
        })?;
    info!(%url, "connected to relay");
    Ok(stream)
}

/// Serves one relay connection until it closes, fails, or `shutdown` resolves.
///
/// Whatever ends the session, the car is stopped, the streaming process is interrupted, and
/// the stop sequence runs to completion before this returns.
pub async fn run_session<S, F>(
    ws: S,
    dispatcher: &mut Dispatcher,
    status: &StatusTarget,
    shutdown: &mut F,
) -> SessionEnd
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
    F: Future<Output = ()> + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    let started = StatusPush::started(&status.driver_endpoint, status.camera_url.clone());
    if let Err(err) = push_status(&mut sink, &started).await {
        warn!(%err, "failed to push started status");
    }

    let end = loop {
        let deadline = dispatcher.next_deadline();
        tokio::select! {
            _ = &mut *shutdown => break SessionEnd::Shutdown,
            _ = sleep_until(deadline) => dispatcher.on_deadline(),
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => trace_outcome(dispatcher.handle_frame(text.as_bytes())),
                Some(Ok(Message::Binary(bytes))) => trace_outcome(dispatcher.handle_frame(&bytes)),
                Some(Ok(Message::Close(_))) | None => break SessionEnd::Closed,
                Some(Ok(_)) => {}
                Some(Err(err)) => break SessionEnd::Failed(err.to_string()),
            },
        }
    };
    info!(?end, "relay session ended");

    dispatcher.shutdown();
    if let Err(err) = push_status(&mut sink, &StatusPush::stopped(&status.driver_endpoint)).await {
        debug!(%err, "could not push stopped status");
    }
    if let Err(err) = sink.close().await {
        debug!(%err, "relay socket close failed");
    }
    dispatcher.settle().await;

    end
}

/// Keeps a relay session alive, reconnecting after `reconnect_delay` until `shutdown` resolves.
pub async fn run_link<F>(
    settings: &Settings,
    dispatcher: &mut Dispatcher,
    shutdown: &mut F,
) -> Result<(), LinkError>
where
    F: Future<Output = ()> + Unpin,
{
    relay_url(&settings.relay_url, &settings.source_name)?;
    let status = StatusTarget::from_settings(settings);

    loop {
        let connected = tokio::select! {
            _ = &mut *shutdown => return Ok(()),
            result = connect(settings) => result,
        };
        match connected {
            Ok(ws) => {
                if run_session(ws, dispatcher, &status, shutdown).await == SessionEnd::Shutdown {
                    return Ok(());
                }
            }
            Err(err) => warn!(%err, "relay connection failed"),
        }

        let delay = settings.reconnect_delay();
        info!(delay_ms = delay.as_millis() as u64, "reconnecting to relay");
        tokio::select! {
            _ = &mut *shutdown => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn push_status<S>(sink: &mut S, status: &StatusPush) -> Result<(), LinkError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(status)?;
    sink.send(Message::Text(text)).await.map_err(LinkError::Send)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn trace_outcome(outcome: DispatchOutcome) {
    match outcome {
        DispatchOutcome::Applied(action) => debug!(action = action.name(), "action applied"),
        DispatchOutcome::UnknownAction(_) | DispatchOutcome::Malformed => {}
        DispatchOutcome::MissingAction => debug!("frame without action ignored"),
    }
}

#[cfg(test)]
#[path = "tests/link_tests.rs"]
mod tests;
