//! 统一配置中心
//!
//! 加载顺序：内置默认值 -> 可选配置文件（`APP_CONFIG_FILE`）-> `APP_*` 环境变量，
//! 嵌套字段用双下划线分隔，例如 `APP_CHAT__MAX_CONTENT_LENGTH=2000`。

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub chat: ChatConfig,
    #[validate(nested)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// 数据库配置。未配置 `url` 时使用内存存储。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[validate(url)]
    pub url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// 实时会话相关配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChatConfig {
    /// 消息正文最大字符数
    #[validate(range(min = 1, max = 100000))]
    pub max_content_length: usize,
    /// 全局在线状态通道的缓冲容量
    #[validate(range(min = 16))]
    pub presence_channel_capacity: usize,
    /// 离线通知中消息预览的字符数
    #[validate(range(min = 1))]
    pub preview_length: usize,
    /// 建议客户端清除“正在输入”提示的超时秒数，服务端不强制
    #[validate(range(min = 1, max = 60))]
    pub typing_timeout_seconds: u64,
}

/// 身份认证配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuthConfig {
    #[validate(length(min = 32, message = "JWT secret must be at least 32 characters long"))]
    pub jwt_secret: String,
    #[validate(range(min = 1))]
    pub token_ttl_hours: i64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` 指令，`RUST_LOG` 优先
    pub level: String,
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
                cors_origins: vec!["*".into()],
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                run_migrations: true,
            },
            chat: ChatConfig {
                max_content_length: 4000,
                presence_channel_capacity: 1024,
                preview_length: 100,
                typing_timeout_seconds: 8,
            },
            auth: AuthConfig {
                jwt_secret: "dev-secret-key-not-for-production-use-minimum-32-chars".into(),
                token_ttl_hours: 24,
            },
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 构建 figment，便于测试时替换数据源
    pub fn figment() -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed("APP_").split("__"))
    }

    /// 加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// 用于日志输出的脱敏表示
    pub fn sanitize(&self) -> String {
        let mut redacted = self.clone();
        redacted.auth.jwt_secret = "[REDACTED]".into();
        if let Some(url) = redacted.database.url.as_mut() {
            if let Some(at) = url.rfind('@') {
                let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
                url.replace_range(scheme_end..at, "[REDACTED]");
            }
        }
        format!("{:?}", redacted)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.database.url.is_none());
        assert_eq!(config.chat.max_content_length, 4000);
    }

    #[test]
    fn env_overrides_nested_fields() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_CHAT__MAX_CONTENT_LENGTH", "2000");
            jail.set_env("APP_SERVER__PORT", "9090");
            let config = AppConfig::from_figment(AppConfig::figment()).expect("config");
            assert_eq!(config.chat.max_content_length, 2000);
            assert_eq!(config.server.port, 9090);
            Ok(())
        });
    }

    #[test]
    fn toml_file_is_merged() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "app.toml",
                r#"
                [database]
                url = "postgres://chat:secret@db:5432/chat"
                max_connections = 4
                "#,
            )?;
            jail.set_env("APP_CONFIG_FILE", "app.toml");
            let config = AppConfig::from_figment(AppConfig::figment()).expect("config");
            assert_eq!(
                config.database.url.as_deref(),
                Some("postgres://chat:secret@db:5432/chat")
            );
            assert_eq!(config.database.max_connections, 4);
            assert!(config.database.run_migrations);
            Ok(())
        });
    }

    #[test]
    fn short_secret_fails_validation() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_AUTH__JWT_SECRET", "short");
            let result = AppConfig::from_figment(AppConfig::figment());
            assert!(matches!(result, Err(ConfigError::Invalid(_))));
            Ok(())
        });
    }

    #[test]
    fn sanitize_hides_credentials() {
        let mut config = AppConfig::default();
        config.database.url = Some("postgres://chat:secret@db:5432/chat".into());
        let text = config.sanitize();
        assert!(!text.contains("secret@"));
        assert!(!text.contains("dev-secret-key"));
        assert!(text.contains("db:5432"));
    }
}
