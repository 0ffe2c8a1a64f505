//! Integration tests for WebSocket admission, presence scoping and cleanup.

mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use common::*;

#[tokio::test]
async fn admitted_connection_receives_presence_snapshot() {
    let server = start_test_server().await;
    seed_shop(&server.db, "shop-a", true);
    seed_user(&server.db, "u1", "shop-a", "employee", true);

    let token = token_for(&server, "u1", "shop-a", "employee");
    let (_write, mut read) = connect_ws(server.addr, &token).await;

    let online = wait_for_event(&mut read, "getOnlineUsers").await;
    assert_eq!(online, serde_json::json!(["u1"]));
}

#[tokio::test]
async fn invalid_token_is_closed_with_4002() {
    let server = start_test_server().await;

    let ws_url = format!("ws://{}/ws?token=not_a_jwt", server.addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("WebSocket should upgrade even with invalid token");
    let (_write, mut read) = ws_stream.split();

    assert_eq!(expect_close(&mut read).await, Some(4002));
}

#[tokio::test]
async fn unknown_user_is_not_admitted() {
    let server = start_test_server().await;

    // Structurally valid token, but the user was never seeded
    let token = token_for(&server, "ghost", "shop-a", "employee");
    let (_write, mut read) = connect_ws(server.addr, &token).await;

    assert_eq!(expect_close(&mut read).await, Some(4003));
}

#[tokio::test]
async fn inactive_shop_is_not_admitted() {
    let server = start_test_server().await;
    seed_shop(&server.db, "shop-a", false);
    seed_user(&server.db, "u1", "shop-a", "employee", true);

    let token = token_for(&server, "u1", "shop-a", "employee");
    let (_write, mut read) = connect_ws(server.addr, &token).await;

    assert_eq!(expect_close(&mut read).await, Some(4003));
}

#[tokio::test]
async fn presence_is_not_leaked_across_shops() {
    let server = start_test_server().await;
    seed_shop(&server.db, "shop-a", true);
    seed_shop(&server.db, "shop-b", true);
    seed_user(&server.db, "alice", "shop-a", "employee", true);
    seed_user(&server.db, "bob", "shop-b", "employee", true);

    let (_wa, mut ra) = connect_ws(
        server.addr,
        &token_for(&server, "alice", "shop-a", "employee"),
    )
    .await;
    wait_for_event(&mut ra, "getOnlineUsers").await;

    // Bob joining shop-b must not produce any presence event in shop-a's room
    let (_wb, mut rb) = connect_ws(
        server.addr,
        &token_for(&server, "bob", "shop-b", "employee"),
    )
    .await;
    let online_b = wait_for_event(&mut rb, "getOnlineUsers").await;
    assert_eq!(online_b, serde_json::json!(["bob"]));

    let leaked = tokio::time::timeout(Duration::from_millis(500), ra.next()).await;
    assert!(leaked.is_err(), "shop-a saw shop-b's presence: {:?}", leaked);
}

#[tokio::test]
async fn second_session_keeps_user_online_until_last_disconnect() {
    let server = start_test_server().await;
    seed_shop(&server.db, "shop-a", true);
    seed_user(&server.db, "u1", "shop-a", "employee", true);
    seed_user(&server.db, "watcher", "shop-a", "manager", true);

    let (_ww, mut rw) = connect_ws(
        server.addr,
        &token_for(&server, "watcher", "shop-a", "manager"),
    )
    .await;
    wait_for_event(&mut rw, "getOnlineUsers").await;

    // Wait for each session's own presence snapshot so both are fully
    // registered before any of them closes.
    let token = token_for(&server, "u1", "shop-a", "employee");
    let (mut w1, mut r1) = connect_ws(server.addr, &token).await;
    wait_for_event(&mut r1, "getOnlineUsers").await;
    let (mut w2, mut r2) = connect_ws(server.addr, &token).await;
    wait_for_event(&mut r2, "getOnlineUsers").await;

    // Watcher sees u1 come online
    wait_for_event_matching(&mut rw, "getOnlineUsers", |data| {
        data.as_array().is_some_and(|a| a.contains(&serde_json::json!("u1")))
    })
    .await;

    // First session closes — u1 must stay online
    w1.send(Message::Close(None)).await.unwrap();
    let still_online = wait_for_event(&mut rw, "getOnlineUsers").await;
    assert!(
        still_online
            .as_array()
            .is_some_and(|a| a.contains(&serde_json::json!("u1"))),
        "u1 dropped from presence while a session remained: {:?}",
        still_online
    );

    // Second session closes — u1 must disappear
    w2.send(Message::Close(None)).await.unwrap();
    wait_for_event_matching(&mut rw, "getOnlineUsers", |data| {
        data.as_array().is_some_and(|a| !a.contains(&serde_json::json!("u1")))
    })
    .await;
}

#[tokio::test]
async fn oversight_monitors_foreign_shop_presence_without_joining_it() {
    let server = start_test_server().await;
    seed_shop(&server.db, "shop-a", true);
    seed_shop(&server.db, "shop-b", true);
    seed_user(&server.db, "root", "shop-a", "super_admin", true);
    seed_user(&server.db, "bob", "shop-b", "employee", true);

    let (_wr, mut rr) = connect_ws(
        server.addr,
        &token_for(&server, "root", "shop-a", "super_admin"),
    )
    .await;
    wait_for_event(&mut rr, "getOnlineUsers").await;

    // Bob comes online in shop-b: his own snapshot must not list the
    // monitoring super_admin...
    let (_wb, mut rb) = connect_ws(
        server.addr,
        &token_for(&server, "bob", "shop-b", "employee"),
    )
    .await;
    let online_b = wait_for_event(&mut rb, "getOnlineUsers").await;
    assert_eq!(online_b, serde_json::json!(["bob"]));

    // ...but the super_admin, sitting in shop-b's room, sees the broadcast
    let observed = wait_for_event_matching(&mut rr, "getOnlineUsers", |data| {
        data.as_array().is_some_and(|a| a.contains(&serde_json::json!("bob")))
    })
    .await;
    assert!(
        !observed
            .as_array()
            .is_some_and(|a| a.contains(&serde_json::json!("root"))),
        "monitoring session leaked into foreign shop presence: {:?}",
        observed
    );
}

#[tokio::test]
async fn admission_failure_closes_with_internal_error_code() {
    let server = start_test_server().await;
    seed_shop(&server.db, "shop-a", true);
    seed_user(&server.db, "u1", "shop-a", "employee", true);

    // Poison the store lock so the admission lookup cannot run
    let db = server.db.clone();
    let _ = std::thread::spawn(move || {
        let _guard = db.lock().unwrap();
        panic!("poisoning store lock");
    })
    .join();

    let token = token_for(&server, "u1", "shop-a", "employee");
    let (_write, mut read) = connect_ws(server.addr, &token).await;

    // Internal failure is 1011, not the 4003 refusal code
    assert_eq!(expect_close(&mut read).await, Some(1011));
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let server = start_test_server().await;
    seed_shop(&server.db, "shop-a", true);
    seed_user(&server.db, "u1", "shop-a", "employee", true);

    let token = token_for(&server, "u1", "shop-a", "employee");
    let (mut write, mut read) = connect_ws(server.addr, &token).await;
    wait_for_event(&mut read, "getOnlineUsers").await;

    write
        .send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Expected pong within timeout");
        match msg {
            Some(Ok(Message::Pong(data))) => {
                assert_eq!(data.as_ref(), &[42, 43, 44]);
                break;
            }
            Some(Ok(_)) => continue,
            other => panic!("Expected Pong, got: {:?}", other),
        }
    }
}

#[tokio::test]
async fn malformed_client_event_gets_error_frame() {
    let server = start_test_server().await;
    seed_shop(&server.db, "shop-a", true);
    seed_user(&server.db, "u1", "shop-a", "employee", true);

    let token = token_for(&server, "u1", "shop-a", "employee");
    let (mut write, mut read) = connect_ws(server.addr, &token).await;
    wait_for_event(&mut read, "getOnlineUsers").await;

    write
        .send(Message::Text("{\"event\":\"bogus\"}".into()))
        .await
        .unwrap();

    let err = wait_for_event(&mut read, "error").await;
    assert_eq!(err["code"], 400);
}
