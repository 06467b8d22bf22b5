//! Google OAuth 客户端
//!
//! 授权码在 token 端点换取 access_token + id_token；ID 令牌由交换本身背书
//! （HTTPS 直连 Google，签名校验属于外部协作方职责），这里只解码 payload
//! 取声明；资料以 OIDC userinfo 端点为准。声明用强类型可选字段结构承载，
//! 缺失的声明不算错误。

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AuthError, Result};

const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// ID 令牌声明（全部可选，缺失不算错误）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleIdClaims {
    pub sub: Option<String>,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// userinfo 端点返回的资料
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUserInfo {
    pub sub: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// 交换结果：令牌 + 解码出的 ID 声明
#[derive(Debug, Clone)]
pub struct GoogleExchange {
    pub access_token: String,
    pub id_claims: GoogleIdClaims,
}

/// Google OAuth 客户端
pub struct GoogleClient {
    client: Client,
    token_endpoint: String,
    userinfo_endpoint: String,
}

impl GoogleClient {
    pub fn new() -> Self {
        Self::with_endpoints(
            DEFAULT_TOKEN_ENDPOINT.to_string(),
            DEFAULT_USERINFO_ENDPOINT.to_string(),
        )
    }

    pub fn with_endpoints(token_endpoint: String, userinfo_endpoint: String) -> Self {
        Self { client: Client::new(), token_endpoint, userinfo_endpoint }
    }

    /// 授权码换令牌
    pub async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code: &str,
    ) -> Result<GoogleExchange> {
        let resp = self
            .client
            .post(&self.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| AuthError::ProviderApi {
                code: -1,
                message: format!("请求 Google token 端点失败: {}", e),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let parsed: GoogleErrorBody =
                serde_json::from_str(&body).unwrap_or(GoogleErrorBody {
                    error: None,
                    error_description: None,
                });
            let message = format!(
                "{}: {}",
                parsed.error.unwrap_or_else(|| "unknown_error".to_string()),
                parsed.error_description.unwrap_or(body),
            );
            // invalid_grant = 授权码无效或已使用
            if message.starts_with("invalid_grant") {
                return Err(AuthError::InvalidProviderCode(message));
            }
            return Err(AuthError::ProviderApi { code: status.as_u16() as i64, message });
        }

        let token: TokenResponse = resp.json().await.map_err(|e| AuthError::ProviderApi {
            code: -1,
            message: format!("解析 Google token 响应失败: {}", e),
        })?;

        let id_claims = token
            .id_token
            .as_deref()
            .map(decode_id_claims)
            .transpose()?
            .unwrap_or_default();

        Ok(GoogleExchange { access_token: token.access_token, id_claims })
    }

    /// 拉取 OIDC userinfo
    pub async fn userinfo(&self, access_token: &str) -> Result<GoogleUserInfo> {
        let resp = self
            .client
            .get(&self.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::ProviderApi {
                code: -1,
                message: format!("请求 Google userinfo 失败: {}", e),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::ProviderApi {
                code: status.as_u16() as i64,
                message: body,
            });
        }

        resp.json().await.map_err(|e| AuthError::ProviderApi {
            code: -1,
            message: format!("解析 Google userinfo 失败: {}", e),
        })
    }
}

impl Default for GoogleClient {
    fn default() -> Self {
        Self::new()
    }
}

/// 解码 ID 令牌的 payload 段（不验签，见模块注释）
fn decode_id_claims(id_token: &str) -> Result<GoogleIdClaims> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or(AuthError::MalformedToken)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::MalformedToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_id_token(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.sig", header, body)
    }

    #[test]
    fn test_decode_id_claims() {
        let token = encode_id_token(serde_json::json!({
            "sub": "1057483",
            "email": "alice@example.com",
            "email_verified": true,
            "name": "Alice",
            "picture": "https://lh3.googleusercontent.com/a"
        }));
        let claims = decode_id_claims(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("1057483"));
        assert_eq!(claims.email_verified, Some(true));
    }

    #[test]
    fn test_absent_claims_are_not_errors() {
        // 只有 sub，其余声明缺失
        let token = encode_id_token(serde_json::json!({"sub": "42"}));
        let claims = decode_id_claims(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("42"));
        assert!(claims.email.is_none());
        assert!(claims.name.is_none());
    }

    #[test]
    fn test_garbage_id_token_is_malformed() {
        assert!(matches!(
            decode_id_claims("nodots"),
            Err(AuthError::MalformedToken)
        ));
        assert!(matches!(
            decode_id_claims("a.!!!!.c"),
            Err(AuthError::MalformedToken)
        ));
    }
}
