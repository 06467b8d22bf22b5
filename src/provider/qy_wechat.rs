//! 企业微信客户端
//!
//! 流程：corpid+secret 换应用 access_token → 授权码换成员 userid →
//! 按 userid 拉成员详情（姓名、手机号、部门、头像）。
//! 错误信号同样走 errcode/errmsg。

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AuthError, Result};

const DEFAULT_API_BASE: &str = "https://qyapi.weixin.qq.com";

#[derive(Debug, Deserialize)]
struct GetTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GetUserInfoResponse {
    #[serde(rename = "UserId")]
    user_id: Option<String>,
    #[serde(rename = "OpenId")]
    open_id: Option<String>,
}

/// 企业微信成员详情
#[derive(Debug, Clone, Deserialize)]
pub struct QyWechatUser {
    pub userid: String,
    #[serde(default)]
    pub name: String,
    pub mobile: Option<String>,
    pub avatar: Option<String>,
    /// 部门ID列表（取第一个作为主部门）
    #[serde(default)]
    pub department: Vec<i64>,
}

/// 企业微信客户端
pub struct QyWechatClient {
    client: Client,
    api_base: String,
}

impl QyWechatClient {
    pub fn new() -> Self {
        Self::with_api_base(DEFAULT_API_BASE.to_string())
    }

    pub fn with_api_base(api_base: String) -> Self {
        Self { client: Client::new(), api_base }
    }

    /// 获取应用 access_token
    pub async fn gettoken(&self, corp_id: &str, secret: &str) -> Result<String> {
        let url = format!(
            "{}/cgi-bin/gettoken?corpid={}&corpsecret={}",
            self.api_base, corp_id, secret
        );
        let body = self.get_json(&url).await?;
        check_errcode(&body)?;

        let parsed: GetTokenResponse = serde_json::from_value(body)
            .map_err(|e| AuthError::Internal(format!("解析企业微信令牌响应失败: {}", e)))?;
        Ok(parsed.access_token)
    }

    /// 授权码换成员 userid（非企业成员只有 OpenId，按授权码无效处理）
    pub async fn userid_from_code(&self, access_token: &str, code: &str) -> Result<String> {
        let url = format!(
            "{}/cgi-bin/auth/getuserinfo?access_token={}&code={}",
            self.api_base, access_token, code
        );
        let body = self.get_json(&url).await?;
        check_errcode(&body)?;

        let parsed: GetUserInfoResponse = serde_json::from_value(body)
            .map_err(|e| AuthError::Internal(format!("解析企业微信身份响应失败: {}", e)))?;

        match parsed.user_id {
            Some(user_id) if !user_id.is_empty() => Ok(user_id),
            _ => Err(AuthError::InvalidProviderCode(format!(
                "授权主体不是企业成员 (open_id={:?})",
                parsed.open_id
            ))),
        }
    }

    /// 拉取成员详情
    pub async fn user_get(&self, access_token: &str, userid: &str) -> Result<QyWechatUser> {
        let url = format!(
            "{}/cgi-bin/user/get?access_token={}&userid={}",
            self.api_base, access_token, userid
        );
        let body = self.get_json(&url).await?;
        check_errcode(&body)?;

        serde_json::from_value(body)
            .map_err(|e| AuthError::Internal(format!("解析企业微信成员详情失败: {}", e)))
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        debug!("企业微信接口调用: {}", url.split('?').next().unwrap_or(url));
        let resp = self.client.get(url).send().await.map_err(|e| {
            AuthError::ProviderApi { code: -1, message: format!("请求企业微信接口失败: {}", e) }
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
            message: format!("响应解析失败: {}", e),
        })
    }
}

impl Default for QyWechatClient {
    fn default() -> Self {
        Self::new()
    }
}

fn check_errcode(body: &serde_json::Value) -> Result<()> {
    let errcode = body.get("errcode").and_then(|v| v.as_i64()).unwrap_or(0);
    if errcode == 0 {
        return Ok(());
    }
    let errmsg = body
        .get("errmsg")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    match errcode {
        // 40029: 不合法的 code
        40029 => Err(AuthError::InvalidProviderCode(errmsg)),
        _ => Err(AuthError::ProviderApi { code: errcode, message: errmsg }),
    }
}
