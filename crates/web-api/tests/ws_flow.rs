mod support;

use std::time::Duration;

use domain::ServerEvent;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite};

use support::TestServer;

#[tokio::test]
async fn health_reports_ok() {
    let server = TestServer::start().await;

    let response = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .expect("health request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: serde_json::Value = response.json().await.expect("health json");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn upgrade_without_identity_is_rejected() {
    let server = TestServer::start().await;

    for url in [server.ws_url(None), server.ws_url(Some("not-a-jwt"))] {
        match connect_async(url).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status().as_u16(), 401);
            }
            other => panic!("expected 401, got {:?}", other.map(|(_, response)| response)),
        }
    }
}

#[tokio::test]
async fn direct_conversation_round_trip() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.user("Alice").await;
    let (bob, bob_token) = server.user("Bob").await;
    let conversation_id = server.conversation(&[alice, bob]).await;

    let mut a = server.connect(&alice_token).await;
    let mut b = server.connect(&bob_token).await;

    for client in [&mut a, &mut b] {
        client
            .send(json!({
                "event": "join_conversation",
                "data": { "conversationId": conversation_id }
            }))
            .await;
        assert_eq!(
            client.next_conversation_event().await,
            ServerEvent::JoinedConversation { conversation_id }
        );
    }

    // 载荷中的 senderId 被忽略，身份只来自 token
    a.send(json!({
        "event": "send_message",
        "data": {
            "conversationId": conversation_id,
            "content": "hello bob",
            "senderId": bob,
        }
    }))
    .await;

    for client in [&mut b, &mut a] {
        match client.next_conversation_event().await {
            ServerEvent::NewMessage { message, .. } => {
                assert_eq!(message.sender_id, alice);
                assert_eq!(message.content.as_str(), "hello bob");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    b.send(json!({
        "event": "typing_start",
        "data": { "conversationId": conversation_id }
    }))
    .await;
    assert_eq!(
        a.next_conversation_event().await,
        ServerEvent::UserTyping {
            user_id: bob,
            conversation_id,
            is_typing: true,
        }
    );
    b.assert_no_conversation_event(Duration::from_millis(200)).await;

    b.send(json!({
        "event": "mark_as_read",
        "data": { "conversationId": conversation_id }
    }))
    .await;
    assert!(matches!(
        a.next_conversation_event().await,
        ServerEvent::MessagesRead { user_id, .. } if user_id == bob
    ));
}

#[tokio::test]
async fn bad_frames_and_denied_joins_keep_the_connection_open() {
    let server = TestServer::start().await;
    let (alice, _) = server.user("Alice").await;
    let (bob, _) = server.user("Bob").await;
    let (_, carol_token) = server.user("Carol").await;
    let conversation_id = server.conversation(&[alice, bob]).await;

    let mut c = server.connect(&carol_token).await;

    c.send_raw("{not json").await;
    assert!(matches!(
        c.next_conversation_event().await,
        ServerEvent::Error { code, retryable: false, .. } if code == "MALFORMED_REQUEST"
    ));

    c.send(json!({
        "event": "join_conversation",
        "data": { "conversationId": conversation_id }
    }))
    .await;
    assert!(matches!(
        c.next_conversation_event().await,
        ServerEvent::Error { code, conversation_id: Some(id), .. }
            if code == "AUTHORIZATION_DENIED" && id == conversation_id
    ));

    c.send(json!({ "event": "ping" })).await;
    assert_eq!(c.next_conversation_event().await, ServerEvent::Pong);
}

#[tokio::test]
async fn presence_is_broadcast_globally() {
    let server = TestServer::start().await;
    let (_, alice_token) = server.user("Alice").await;
    let (bob, bob_token) = server.user("Bob").await;

    let mut a = server.connect(&alice_token).await;
    let b = server.connect(&bob_token).await;
    // 跳过 Alice 自己的上线事件
    loop {
        match a.next_event().await {
            ServerEvent::UserOnline { user_id, .. } if user_id == bob => break,
            ServerEvent::UserOnline { .. } => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    drop(b);
    assert!(matches!(
        a.next_event().await,
        ServerEvent::UserOffline { user_id, .. } if user_id == bob
    ));
}
