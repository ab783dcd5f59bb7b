//! 主应用程序入口
//!
//! 加载配置、选择存储、启动 Axum Web 服务，Ctrl-C 时优雅退出。

use std::sync::Arc;

use application::{Clock, RealtimeService, RealtimeServiceDependencies, SystemClock};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // 初始化日志，RUST_LOG 优先于配置
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(config = %config.sanitize(), "配置加载完成");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let infrastructure = Infrastructure::from_config(&config.database, clock.clone()).await?;

    let realtime = Arc::new(RealtimeService::new(RealtimeServiceDependencies {
        store: infrastructure.store,
        clock,
        notification_hook: infrastructure.notification_hook,
        settings: (&config.chat).into(),
    }));
    let jwt_service = Arc::new(JwtService::new(&config.auth));
    let state = AppState::new(realtime, jwt_service);

    let app = router(state, &config.server.cors_origins);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("实时会话服务启动在 {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始关闭");
}
