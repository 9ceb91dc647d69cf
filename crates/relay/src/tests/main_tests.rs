use super::*;
use axum::{body, body::Body, http::Request};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const QUIET: Duration = Duration::from_millis(200);

fn test_state() -> Arc<AppState> {
    Arc::new(AppState {
        hub: Hub::new(),
        max_message_bytes: 64 * 1024,
    })
}

async fn serve() -> (SocketAddr, Arc<AppState>) {
    let state = test_state();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = build_router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, state)
}

async fn next_frame(client: &mut Client) -> Option<WsMessage> {
    match timeout(QUIET, client.next()).await {
        Ok(Some(Ok(message))) => Some(message),
        _ => None,
    }
}

fn json_of(message: WsMessage) -> Value {
    match message {
        WsMessage::Text(text) => serde_json::from_str(&text).expect("json"),
        other => panic!("unexpected frame {other:?}"),
    }
}

async fn expect_ack(client: &mut Client) {
    let ack = next_frame(client).await.expect("ack");
    assert_eq!(json_of(ack), json!({ "message": "Connection Established" }));
}

async fn join(addr: SocketAddr, source: &str) -> Client {
    let (mut client, _) = connect_async(format!("ws://{addr}/?source={source}"))
        .await
        .expect("connect");
    expect_ack(&mut client).await;
    client
}

#[tokio::test]
async fn healthz_reports_ok() {
    let app = build_router(test_state());
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn connect_without_source_is_rejected() {
    let app = build_router(test_state());
    for uri in ["/ws", "/", "/?source=%20%20"] {
        let request = Request::get(uri).body(Body::empty()).expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri {uri}");

        let body = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let error: ApiError = serde_json::from_slice(&body).expect("json");
        assert_eq!(error.code, ErrorCode::Validation);
    }
}

#[test]
fn header_source_wins_over_query() {
    let mut headers = HeaderMap::new();
    headers.insert(SOURCE_HEADER, HeaderValue::from_static(" rc-car-server "));
    assert_eq!(
        resolve_source(&headers, Some("rc-car-client")).as_deref(),
        Some("rc-car-server")
    );

    headers.insert(SOURCE_HEADER, HeaderValue::from_static(""));
    assert_eq!(
        resolve_source(&headers, Some("rc-car-client")).as_deref(),
        Some("rc-car-client")
    );
    assert_eq!(resolve_source(&HeaderMap::new(), None), None);
}

#[tokio::test]
async fn newest_connection_for_a_name_receives_frames() {
    let (addr, _state) = serve().await;
    let mut first = join(addr, "A").await;
    let mut second = join(addr, "A").await;
    let mut sender = join(addr, "B").await;

    let raw = r#"{"to":"A","data":{"action":"turn-to","degrees":45}}"#;
    sender
        .send(WsMessage::Text(raw.into()))
        .await
        .expect("send");

    match next_frame(&mut second).await {
        Some(WsMessage::Text(text)) => assert_eq!(text, raw),
        other => panic!("expected forwarded text, got {other:?}"),
    }
    assert!(next_frame(&mut first).await.is_none());
}

#[tokio::test]
async fn frames_for_unknown_destinations_vanish() {
    let (addr, state) = serve().await;
    let mut a = join(addr, "A").await;
    let mut b = join(addr, "B").await;

    for raw in [r#"{"to":"ghost","data":{}}"#, r#"{"data":{"action":"init"}}"#, "garbage"] {
        b.send(WsMessage::Text(raw.into())).await.expect("send");
    }
    b.send(WsMessage::Text(r#"{"to":"B","data":{"action":"echo"}}"#.into()))
        .await
        .expect("send");

    let echoed = json_of(next_frame(&mut b).await.expect("echo"));
    assert_eq!(echoed["data"]["action"], json!("echo"));
    assert!(next_frame(&mut a).await.is_none());
    assert_eq!(state.hub.len().await, 2);
}

#[tokio::test]
async fn binary_frames_are_forwarded_as_binary() {
    let (addr, _state) = serve().await;
    let mut driver = join(addr, "rc-car-client").await;
    let mut vehicle = join(addr, "rc-car-server").await;

    let raw = br#"{"to":"rc-car-client","carStarted":true}"#.to_vec();
    vehicle
        .send(WsMessage::Binary(raw.clone()))
        .await
        .expect("send");

    match next_frame(&mut driver).await {
        Some(WsMessage::Binary(bytes)) => assert_eq!(bytes, raw),
        other => panic!("expected binary frame, got {other:?}"),
    }
}

#[tokio::test]
async fn header_names_the_connection() {
    let (addr, state) = serve().await;
    let mut request = format!("ws://{addr}/ws?source=query-name")
        .into_client_request()
        .expect("request");
    request
        .headers_mut()
        .insert(SOURCE_HEADER, HeaderValue::from_static("header-name"));
    let (mut client, _) = connect_async(request).await.expect("connect");
    expect_ack(&mut client).await;

    assert!(state.hub.connection_id("header-name").await.is_some());
    assert!(state.hub.connection_id("query-name").await.is_none());
}

#[tokio::test]
async fn disconnect_deregisters_the_name() {
    let (addr, state) = serve().await;
    let mut client = join(addr, "A").await;
    assert!(state.hub.connection_id("A").await.is_some());

    client.close(None).await.expect("close");
    drop(client);

    let mut gone = false;
    for _ in 0..50 {
        if state.hub.connection_id("A").await.is_none() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone);
}

fn assert_send<T: Send>(value: T) -> T {
    value
}

#[tokio::test]
async fn ack_is_queued_before_forwarded_frames() {
    let state = test_state();
    let (id, mut rx) = assert_send(join_hub(&state, "A")).await;
    assert_eq!(state.hub.connection_id("A").await, Some(id));

    let raw = r#"{"to":"A","data":{"action":"init"}}"#;
    let outcome = state.hub.forward(Message::Text(raw.into())).await;
    assert_eq!(outcome, ForwardOutcome::Delivered("A".into()));

    match rx.try_recv() {
        Ok(Message::Text(text)) => {
            let ack: Value = serde_json::from_str(&text).expect("json");
            assert_eq!(ack, json!({ "message": "Connection Established" }));
        }
        other => panic!("expected ack first, got {other:?}"),
    }
    assert!(matches!(rx.try_recv(), Ok(Message::Text(text)) if text == raw));
}

#[tokio::test]
async fn duplicated_source_query_without_header_gets_validation_body() {
    let app = build_router(test_state());
    let request = Request::get("/ws?source=a&source=b")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let error: ApiError = serde_json::from_slice(&body).expect("json");
    assert_eq!(error.code, ErrorCode::Validation);
}

#[tokio::test]
async fn header_source_connects_despite_unreadable_query() {
    let (addr, state) = serve().await;
    let mut request = format!("ws://{addr}/ws?source=a&source=b")
        .into_client_request()
        .expect("request");
    request
        .headers_mut()
        .insert(SOURCE_HEADER, HeaderValue::from_static("rc-car-server"));
    let (mut client, _) = connect_async(request).await.expect("connect");
    expect_ack(&mut client).await;

    assert!(state.hub.connection_id("rc-car-server").await.is_some());
}
