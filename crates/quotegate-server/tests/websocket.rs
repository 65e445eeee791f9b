//! WebSocket admission over a real listener.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use quotegate_cache::MemoryStore;
use quotegate_core::FixedClock;
use quotegate_server::{AppConfig, AppState, Operations, UpstreamClient, build_app};
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};

async fn spawn_server(configure: impl FnOnce(&mut AppConfig)) -> SocketAddr {
    let mut config = AppConfig::default();
    configure(&mut config);
    let upstream = UpstreamClient::new(&config.upstream).expect("upstream client");
    let operations = Operations::upstream(&config.operations, &upstream);
    let state = AppState::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(FixedClock::new(false)),
        upstream,
        operations,
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = build_app(state).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

#[tokio::test]
async fn test_admitted_client_receives_quota_context() {
    let addr = spawn_server(|cfg| cfg.rate_limit.daily_limit = 5).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws/quotes"))
        .await
        .expect("connect");

    let Some(Ok(Message::Text(body))) = socket.next().await else {
        panic!("expected connected message");
    };
    let msg: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(msg["type"], "connected");
    assert_eq!(msg["channel"], "quotes");
    assert_eq!(msg["rate_limit"]["limit"], 5);
    assert_eq!(msg["rate_limit"]["remaining"], 4);

    socket.send(Message::Text("ping".into())).await.unwrap();
    let Some(Ok(Message::Text(body))) = socket.next().await else {
        panic!("expected pong");
    };
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["type"], "pong");

    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn test_refused_client_is_closed_with_policy_violation() {
    let addr = spawn_server(|cfg| cfg.rate_limit.daily_limit = 1).await;
    let url = format!("ws://{addr}/ws/quotes?api_key=client-a");

    let (mut first, _) = connect_async(url.as_str()).await.expect("connect");
    assert!(matches!(first.next().await, Some(Ok(Message::Text(_)))));

    let (mut second, _) = connect_async(url.as_str()).await.expect("connect");
    match second.next().await {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(u16::from(frame.code), 1008);
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    // A different key is admitted
    let (mut other, _) = connect_async(format!("ws://{addr}/ws/quotes?api_key=client-b"))
        .await
        .expect("connect");
    assert!(matches!(other.next().await, Some(Ok(Message::Text(_)))));
}
