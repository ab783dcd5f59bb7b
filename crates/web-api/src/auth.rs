//! JWT 身份上下文
//!
//! 负责签发与校验 token，并从 WebSocket 升级请求中解析出已认证的用户。

use axum::http::HeaderMap;
use config::AuthConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// 用户 ID
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    token_ttl_hours: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            token_ttl_hours: config.token_ttl_hours,
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: UserId, name: Option<&str>) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.token_ttl_hours);
        let claims = Claims {
            sub: user_id.into(),
            name: name.map(str::to_owned),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|err| {
            ApiError::internal_server_error(format!("Token generation failed: {}", err))
        })
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {}", err)))
    }

    /// 从 headers 中提取和验证 token
    pub fn extract_user_from_headers(&self, headers: &HeaderMap) -> Result<UserId, ApiError> {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        let claims = self.verify_token(token)?;
        Ok(UserId::from(claims.sub))
    }

    /// 解析连接身份：优先查询参数中的 token，其次 `Authorization` 头。
    ///
    /// 无法解析时返回 `None`，由调用方拒绝整条连接。
    pub fn resolve_identity(
        &self,
        query_token: Option<&str>,
        headers: &HeaderMap,
    ) -> Option<UserId> {
        let resolved = match query_token.filter(|token| !token.is_empty()) {
            Some(token) => self.verify_token(token).map(|claims| UserId::from(claims.sub)),
            None => self.extract_user_from_headers(headers),
        };
        match resolved {
            Ok(user_id) => Some(user_id),
            Err(err) => {
                tracing::warn!(error = %err, "连接身份解析失败");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn service() -> JwtService {
        JwtService::new(&AuthConfig {
            jwt_secret: "test-secret-key-that-is-at-least-32-chars".into(),
            token_ttl_hours: 1,
        })
    }

    #[test]
    fn token_round_trip_resolves_identity() {
        let jwt = service();
        let user = UserId::random();
        let token = jwt.generate_token(user, Some("Ann")).unwrap();

        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.name.as_deref(), Some("Ann"));
        assert_eq!(jwt.resolve_identity(Some(&token), &HeaderMap::new()), Some(user));

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        assert_eq!(jwt.resolve_identity(None, &headers), Some(user));
    }

    #[test]
    fn missing_or_foreign_token_resolves_nothing() {
        let jwt = service();
        assert_eq!(jwt.resolve_identity(None, &HeaderMap::new()), None);

        let other = JwtService::new(&AuthConfig {
            jwt_secret: "another-secret-key-that-is-32-chars-long".into(),
            token_ttl_hours: 1,
        });
        let token = other.generate_token(UserId::random(), None).unwrap();
        assert_eq!(jwt.resolve_identity(Some(&token), &HeaderMap::new()), None);
    }
}
