//! Web API 层。
//!
//! 提供 Axum 路由：`/health` 健康检查与 `/ws` WebSocket 入口，
//! 连接上的每个请求都委托给应用层的 `RealtimeService`。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
