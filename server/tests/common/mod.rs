//! Shared helpers for integration tests: boot the real router on a random
//! port, seed shops/users straight into the store, mint tokens, and drive
//! WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use ordermesh_server::db::DbPool;

pub type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;
pub type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub db: DbPool,
    pub jwt_secret: Vec<u8>,
}

/// Start the server on a random port with a temp data dir.
pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = ordermesh_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = ordermesh_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = ordermesh_server::state::AppState {
        db: db.clone(),
        jwt_secret: jwt_secret.clone(),
        sessions: Arc::new(ordermesh_server::ws::SessionRegistry::new()),
        rooms: Arc::new(ordermesh_server::ws::rooms::RoomTable::new()),
    };

    let app = ordermesh_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        db,
        jwt_secret,
    }
}

pub fn seed_shop(db: &DbPool, id: &str, active: bool) {
    let conn = db.lock().unwrap();
    conn.execute(
        "INSERT INTO shops (id, name, active, created_at) VALUES (?1, ?1, ?2, ?3)",
        rusqlite::params![id, active, Utc::now().to_rfc3339()],
    )
    .expect("seed shop");
}

pub fn assign_warehouse(db: &DbPool, shop_id: &str, warehouse_shop_id: &str) {
    let conn = db.lock().unwrap();
    conn.execute(
        "INSERT INTO shop_warehouses (shop_id, warehouse_shop_id) VALUES (?1, ?2)",
        rusqlite::params![shop_id, warehouse_shop_id],
    )
    .expect("seed assignment");
}

pub fn seed_user(db: &DbPool, id: &str, shop_id: &str, role: &str, active: bool) {
    let now = Utc::now().to_rfc3339();
    let conn = db.lock().unwrap();
    conn.execute(
        "INSERT INTO users (id, shop_id, display_name, role, active, created_at, updated_at)
         VALUES (?1, ?2, ?1, ?3, ?4, ?5, ?5)",
        rusqlite::params![id, shop_id, role, active, now],
    )
    .expect("seed user");
}

pub fn token_for(server: &TestServer, user_id: &str, shop_id: &str, role: &str) -> String {
    ordermesh_server::auth::jwt::issue_access_token(&server.jwt_secret, user_id, shop_id, role)
        .expect("issue token")
}

/// Open a WebSocket connection with the given token.
pub async fn connect_ws(addr: SocketAddr, token: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

/// Read frames until an event with the given name arrives (skipping others,
/// e.g. interleaved presence broadcasts). Returns the event's `data`.
pub async fn wait_for_event(read: &mut WsRead, event: &str) -> serde_json::Value {
    wait_for_event_matching(read, event, |_| true).await
}

/// Like `wait_for_event`, but also requires the event data to satisfy a
/// predicate — useful when several events of the same name are in flight.
pub async fn wait_for_event_matching<F>(
    read: &mut WsRead,
    event: &str,
    mut pred: F,
) -> serde_json::Value
where
    F: FnMut(&serde_json::Value) -> bool,
{
    let deadline = Duration::from_secs(3);
    loop {
        let msg = tokio::time::timeout(deadline, read.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for event '{}'", event));

        match msg {
            Some(Ok(Message::Text(text))) => {
                let frame: serde_json::Value =
                    serde_json::from_str(text.as_str()).expect("valid JSON frame");
                if frame["event"] == event && pred(&frame["data"]) {
                    return frame["data"].clone();
                }
            }
            Some(Ok(_)) => continue,
            other => panic!("Connection ended while waiting for '{}': {:?}", event, other),
        }
    }
}

/// Wait for the server to close the connection; return the close code if any.
pub async fn expect_close(read: &mut WsRead) -> Option<u16> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), read.next())
            .await
            .expect("Expected close within timeout");
        match msg {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code.into()),
            Some(Ok(_)) => continue,
            _ => return None,
        }
    }
}
