use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    ChatSettings, MemoryConversationStore, RealtimeService, RealtimeServiceDependencies,
    SystemClock,
};
use config::AuthConfig;
use domain::{Conversation, ConversationId, ConversationType, ServerEvent, User, UserId};
use futures_util::{SinkExt, StreamExt};
use infrastructure::LoggingNotificationHook;
use tokio::{
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtService};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// 在随机端口上运行的真实服务（内存存储）
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryConversationStore>,
    pub jwt: JwtService,
}

impl TestServer {
    pub async fn start() -> Self {
        let store = Arc::new(MemoryConversationStore::new(Arc::new(SystemClock)));
        let realtime = Arc::new(RealtimeService::new(RealtimeServiceDependencies {
            store: store.clone(),
            clock: Arc::new(SystemClock),
            notification_hook: Arc::new(LoggingNotificationHook),
            settings: ChatSettings::default(),
        }));
        let jwt = JwtService::new(&AuthConfig {
            jwt_secret: "integration-test-secret-key-32-characters".into(),
            token_ttl_hours: 1,
        });
        let state = AppState::new(realtime, Arc::new(jwt.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = router(state, &["*".to_string()]);
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { addr, store, jwt }
    }

    /// 创建用户并签发 token
    pub async fn user(&self, name: &str) -> (UserId, String) {
        let id = UserId::random();
        self.store.insert_user(User::new(id, name)).await;
        let token = self.jwt.generate_token(id, Some(name)).expect("token");
        (id, token)
    }

    pub async fn conversation(&self, members: &[UserId]) -> ConversationId {
        let kind = if members.len() == 2 {
            ConversationType::Direct
        } else {
            ConversationType::Group
        };
        let conversation =
            Conversation::new(ConversationId::random(), kind, None, chrono::Utc::now());
        let id = conversation.id;
        self.store
            .insert_conversation(conversation, members.iter().copied())
            .await;
        id
    }

    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/ws?token={}", self.addr, token),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    /// 建立连接并消费 `connected` 问候帧
    pub async fn connect(&self, token: &str) -> WsClient {
        let (stream, _) = connect_async(self.ws_url(Some(token)))
            .await
            .expect("websocket connect");
        let mut client = WsClient { stream };
        let greeting = client.next_event().await;
        assert!(
            matches!(greeting, ServerEvent::Connected { .. }),
            "unexpected greeting: {greeting:?}"
        );
        client
    }
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, frame: serde_json::Value) {
        self.send_raw(&frame.to_string()).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(TungsteniteMessage::Text(text.to_string().into()))
            .await
            .expect("send frame");
    }

    pub async fn next_event(&mut self) -> ServerEvent {
        loop {
            let frame = timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .expect("websocket error");
            if let TungsteniteMessage::Text(text) = frame {
                return serde_json::from_str(text.as_str()).expect("server event");
            }
        }
    }

    /// 跳过全局在线状态事件，返回下一个会话相关事件
    pub async fn next_conversation_event(&mut self) -> ServerEvent {
        loop {
            let event = self.next_event().await;
            if !matches!(
                event,
                ServerEvent::UserOnline { .. }
                    | ServerEvent::UserOffline { .. }
                    | ServerEvent::PresenceUpdated { .. }
            ) {
                return event;
            }
        }
    }

    /// 在给定时间内没有收到会话相关事件
    pub async fn assert_no_conversation_event(&mut self, wait: Duration) {
        let result = timeout(wait, self.next_conversation_event()).await;
        assert!(result.is_err(), "unexpected event: {:?}", result.ok());
    }
}
