use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::error::{AuthError, Result};
use crate::gateway::{AuthGateway, LoginRequest, LoginResult, UserInfo};
use crate::model::DeviceType;
use crate::resolver::LoginCredential;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<AuthGateway>,
}

/// 构建路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/auth/login/{provider}", post(login))
        .route("/v1/auth/refresh", post(refresh))
        .route("/v1/auth/logout", post(logout))
        .route("/v1/auth/me", get(me))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// 登录请求体（各提供方字段按 provider 路径参数取用）
#[derive(Debug, Deserialize)]
struct LoginBody {
    application: String,
    device_type: String,
    device_id: String,
    organization_id: Option<String>,
    referral_channel: Option<String>,
    code: Option<String>,
    js_code: Option<String>,
    phone_code: Option<String>,
    username: Option<String>,
    password: Option<String>,
    phone: Option<String>,
    email: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(body): Json<LoginBody>,
) -> Result<Json<LoginResult>> {
    let credential = build_credential(&provider, &body)?;
    let request = LoginRequest {
        application: body.application,
        device_type: DeviceType::from_str(&body.device_type),
        device_id: body.device_id,
        organization_id: body.organization_id,
        referral_channel: body.referral_channel,
        credential,
    };
    let result = state.gateway.login(request).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct RefreshBody {
    user_id: String,
    refresh_token: String,
    device_type: String,
    device_id: String,
}

async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<LoginResult>> {
    let result = state
        .gateway
        .refresh_access_token(
            &body.user_id,
            &body.refresh_token,
            DeviceType::from_str(&body.device_type),
            &body.device_id,
        )
        .await?;
    Ok(Json(result))
}

async fn logout(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<serde_json::Value>> {
    state
        .gateway
        .logout(
            &body.user_id,
            &body.refresh_token,
            DeviceType::from_str(&body.device_type),
            &body.device_id,
        )
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<UserInfo>> {
    let token = bearer_token(&headers)?;
    let info = state.gateway.verify_access_token(token).await?;
    Ok(Json(info))
}

/// 从 Authorization 头提取 Bearer 令牌
fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Forbidden)
}

fn build_credential(provider: &str, body: &LoginBody) -> Result<LoginCredential> {
    let missing = |field: &str| AuthError::Validation(format!("缺少字段: {}", field));
    match provider {
        "wechat_web" => Ok(LoginCredential::WechatWeb {
            code: body.code.clone().ok_or_else(|| missing("code"))?,
        }),
        "wechat_miniprogram" => Ok(LoginCredential::WechatMiniProgram {
            js_code: body.js_code.clone().ok_or_else(|| missing("js_code"))?,
            phone_code: body.phone_code.clone(),
        }),
        "qy_wechat" => Ok(LoginCredential::QyWechat {
            code: body.code.clone().ok_or_else(|| missing("code"))?,
        }),
        "google" => Ok(LoginCredential::Google {
            code: body.code.clone().ok_or_else(|| missing("code"))?,
        }),
        "password" => Ok(LoginCredential::Password {
            username: body.username.clone().ok_or_else(|| missing("username"))?,
            password: body.password.clone().ok_or_else(|| missing("password"))?,
        }),
        "phone_code" => Ok(LoginCredential::PhoneCode {
            phone: body.phone.clone().ok_or_else(|| missing("phone"))?,
            code: body.code.clone().ok_or_else(|| missing("code"))?,
        }),
        "email_code" => Ok(LoginCredential::EmailCode {
            email: body.email.clone().ok_or_else(|| missing("email"))?,
            code: body.code.clone().ok_or_else(|| missing("code"))?,
        }),
        other => Err(AuthError::Validation(format!("未知的登录方式: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> LoginBody {
        LoginBody {
            application: "app1".into(),
            device_type: "ios".into(),
            device_id: "d1".into(),
            organization_id: None,
            referral_channel: None,
            code: Some("CODE".into()),
            js_code: None,
            phone_code: None,
            username: None,
            password: None,
            phone: None,
            email: None,
        }
    }

    #[test]
    fn test_build_credential_dispatch() {
        assert!(matches!(
            build_credential("wechat_web", &body()),
            Ok(LoginCredential::WechatWeb { .. })
        ));
        assert!(matches!(
            build_credential("password", &body()),
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            build_credential("telegram", &body()),
            Err(AuthError::Validation(_))
        ));
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");

        let mut bad = HeaderMap::new();
        bad.insert("Authorization", "Basic dXNlcg==".parse().unwrap());
        assert!(bearer_token(&bad).is_err());
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }
}
