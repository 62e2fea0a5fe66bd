use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{InMemoryStore, SeedData};
use config::{AuthConfig, RealtimeConfig};
use domain::UserId;
use futures_util::StreamExt;
use infrastructure::JwtAuthenticator;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, Repositories};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<InMemoryStore>,
    authenticator: Arc<JwtAuthenticator>,
    _shutdown: oneshot::Sender<()>,
}

/// 内存存储：u1(alice) u2(bob) u3(carol)，会话 conv123 只有 bob
pub async fn spawn_server() -> TestServer {
    let store = Arc::new(InMemoryStore::default());
    let seed: SeedData = serde_json::from_value(json!({
        "users": [
            { "userId": "u1", "username": "alice" },
            { "userId": "u2", "username": "bob" },
            { "userId": "u3", "username": "carol" }
        ],
        "conversations": [
            { "id": "conv123", "participantIds": ["u2"] }
        ]
    }))
    .expect("seed json");
    store.load_seed(seed).await.expect("load seed");

    let auth_config = AuthConfig {
        jwt_secret: "integration-test-secret".into(),
        allow_user_id_handshake: true,
        development_mode: true,
        ..AuthConfig::default()
    };
    let authenticator = Arc::new(JwtAuthenticator::new(&auth_config, store.clone()));

    let state = AppState::new(
        &RealtimeConfig::default(),
        Repositories {
            users: store.clone(),
            conversations: store.clone(),
            messages: store.clone(),
        },
        authenticator.clone(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, router(state).into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        addr,
        store,
        authenticator,
        _shutdown: shutdown_tx,
    }
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, query: &str) -> String {
        format!("ws://{}/ws?{}", self.addr, query)
    }

    pub fn token_for(&self, user_id: &str) -> String {
        self.authenticator
            .jwt()
            .generate_token(&UserId::parse(user_id).expect("user id"))
            .expect("token")
    }

    /// 连接并消费 `connected` 帧
    pub async fn connect(&self, query: &str) -> WsStream {
        let (mut socket, _) = connect_async(self.ws(query)).await.expect("ws connect");
        let first = next_event(&mut socket).await;
        assert_eq!(first["event"], "connected", "unexpected first frame: {first}");
        socket
    }
}

/// 读取下一个文本帧并解析为 JSON
pub async fn next_event(socket: &mut WsStream) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("ws error");
        match message {
            TungsteniteMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("frame json")
            }
            TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_) => continue,
            other => panic!("unexpected ws message: {other:?}"),
        }
    }
}

/// 读取若干帧，直到出现指定事件
pub async fn wait_for_event(socket: &mut WsStream, name: &str) -> Value {
    loop {
        let event = next_event(socket).await;
        if event["event"] == name {
            return event;
        }
    }
}
