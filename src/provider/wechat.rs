//! 微信开放平台 / 小程序客户端
//!
//! 微信接口的错误信号走响应体里的 errcode/errmsg（HTTP 状态码通常是 200），
//! 所以每个响应都先过一遍 `check_errcode` 再反序列化。
//! errcode 40029/40163（授权码无效/已使用）映射为 `InvalidProviderCode`。

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AuthError, Result};

const DEFAULT_API_BASE: &str = "https://api.weixin.qq.com";

/// 网页授权 access_token 响应
#[derive(Debug, Clone, Deserialize)]
pub struct WechatOauthToken {
    pub access_token: String,
    pub openid: String,
    pub unionid: Option<String>,
    #[serde(default)]
    pub scope: String,
}

/// 用户资料响应
#[derive(Debug, Clone, Deserialize)]
pub struct WechatUserInfo {
    pub openid: String,
    pub unionid: Option<String>,
    #[serde(default)]
    pub nickname: String,
    pub headimgurl: Option<String>,
}

/// 小程序 jscode2session 响应
#[derive(Debug, Clone, Deserialize)]
pub struct JsCodeSession {
    pub openid: String,
    pub unionid: Option<String>,
    #[serde(default)]
    pub session_key: String,
}

#[derive(Debug, Deserialize)]
struct AppAccessToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct PhoneNumberResponse {
    phone_info: PhoneInfo,
}

#[derive(Debug, Deserialize)]
struct PhoneInfo {
    #[serde(rename = "purePhoneNumber")]
    pure_phone_number: String,
}

/// 微信客户端
pub struct WechatClient {
    client: Client,
    api_base: String,
}

impl WechatClient {
    pub fn new() -> Self {
        Self::with_api_base(DEFAULT_API_BASE.to_string())
    }

    /// 指定 API 地址创建（自建网关或测试桩）
    pub fn with_api_base(api_base: String) -> Self {
        Self { client: Client::new(), api_base }
    }

    /// 网页授权：code 换 access_token + openid/unionid
    pub async fn oauth_access_token(
        &self,
        appid: &str,
        secret: &str,
        code: &str,
    ) -> Result<WechatOauthToken> {
        let url = format!(
            "{}/sns/oauth2/access_token?appid={}&secret={}&code={}&grant_type=authorization_code",
            self.api_base, appid, secret, code
        );
        let body = self.get_json(&url).await?;
        check_errcode(&body)?;

        let token: WechatOauthToken = serde_json::from_value(body)
            .map_err(|e| AuthError::Internal(format!("解析微信授权响应失败: {}", e)))?;

        // 拉取资料需要 snsapi_userinfo 授权范围
        if !token.scope.split(',').any(|s| s.trim() == "snsapi_userinfo") {
            return Err(AuthError::InvalidProviderScope(format!(
                "缺少 snsapi_userinfo（实际: {}）",
                token.scope
            )));
        }

        Ok(token)
    }

    /// 拉取网页授权用户资料
    pub async fn userinfo(&self, access_token: &str, openid: &str) -> Result<WechatUserInfo> {
        let url = format!(
            "{}/sns/userinfo?access_token={}&openid={}&lang=zh_CN",
            self.api_base, access_token, openid
        );
        let body = self.get_json(&url).await?;
        check_errcode(&body)?;

        serde_json::from_value(body)
            .map_err(|e| AuthError::Internal(format!("解析微信用户资料失败: {}", e)))
    }

    /// 小程序：js_code 换会话（openid/unionid）
    pub async fn jscode2session(
        &self,
        appid: &str,
        secret: &str,
        js_code: &str,
    ) -> Result<JsCodeSession> {
        let url = format!(
            "{}/sns/jscode2session?appid={}&secret={}&js_code={}&grant_type=authorization_code",
            self.api_base, appid, secret, js_code
        );
        let body = self.get_json(&url).await?;
        check_errcode(&body)?;

        serde_json::from_value(body)
            .map_err(|e| AuthError::Internal(format!("解析小程序会话响应失败: {}", e)))
    }

    /// 获取应用级 access_token（手机号接口需要）
    pub async fn app_access_token(&self, appid: &str, secret: &str) -> Result<String> {
        let url = format!(
            "{}/cgi-bin/token?grant_type=client_credential&appid={}&secret={}",
            self.api_base, appid, secret
        );
        let body = self.get_json(&url).await?;
        check_errcode(&body)?;

        let token: AppAccessToken = serde_json::from_value(body)
            .map_err(|e| AuthError::Internal(format!("解析应用令牌响应失败: {}", e)))?;
        Ok(token.access_token)
    }

    /// 小程序手机号快速验证：phone_code 换手机号
    pub async fn user_phone_number(
        &self,
        app_access_token: &str,
        phone_code: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/wxa/business/getuserphonenumber?access_token={}",
            self.api_base, app_access_token
        );
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "code": phone_code }))
            .send()
            .await
            .map_err(|e| AuthError::ProviderApi {
                code: -1,
                message: format!("请求微信手机号接口失败: {}", e),
            })?;
        let body = read_json(resp).await?;
        check_errcode(&body)?;

        let parsed: PhoneNumberResponse = serde_json::from_value(body)
            .map_err(|e| AuthError::Internal(format!("解析手机号响应失败: {}", e)))?;
        Ok(parsed.phone_info.pure_phone_number)
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        debug!("微信接口调用: {}", redact_query(url));
        let resp = self.client.get(url).send().await.map_err(|e| {
            AuthError::ProviderApi { code: -1, message: format!("请求微信接口失败: {}", e) }
        })?;
        read_json(resp).await
    }
}

impl Default for WechatClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AuthError::ProviderApi {
            code: status.as_u16() as i64,
            message: body,
        });
    }
    resp.json()
        .await
        .map_err(|e| AuthError::ProviderApi { code: -1, message: format!("响应解析失败: {}", e) })
}

/// 检查微信响应体里的 errcode
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
        // 40029: 授权码无效；40163: 授权码已被使用
        40029 | 40163 => Err(AuthError::InvalidProviderCode(errmsg)),
        _ => Err(AuthError::ProviderApi { code: errcode, message: errmsg }),
    }
}

/// 日志里隐去 query 参数（secret/code 都在里面）
fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errcode_mapping() {
        let ok = serde_json::json!({"access_token": "t", "openid": "o"});
        assert!(check_errcode(&ok).is_ok());

        let invalid_code = serde_json::json!({"errcode": 40029, "errmsg": "invalid code"});
        assert!(matches!(
            check_errcode(&invalid_code),
            Err(AuthError::InvalidProviderCode(_))
        ));

        let used_code = serde_json::json!({"errcode": 40163, "errmsg": "code been used"});
        assert!(matches!(
            check_errcode(&used_code),
            Err(AuthError::InvalidProviderCode(_))
        ));

        let other = serde_json::json!({"errcode": 40013, "errmsg": "invalid appid"});
        assert!(matches!(
            check_errcode(&other),
            Err(AuthError::ProviderApi { code: 40013, .. })
        ));
    }

    #[test]
    fn test_oauth_token_parsing() {
        let body = serde_json::json!({
            "access_token": "ACCESS",
            "expires_in": 7200,
            "refresh_token": "REFRESH",
            "openid": "OPENID1",
            "scope": "snsapi_userinfo",
            "unionid": "UNION1"
        });
        let token: WechatOauthToken = serde_json::from_value(body).unwrap();
        assert_eq!(token.openid, "OPENID1");
        assert_eq!(token.unionid.as_deref(), Some("UNION1"));
    }

    #[test]
    fn test_jscode_session_without_unionid() {
        // 未关联开放平台账号时没有 unionid 字段
        let body = serde_json::json!({"openid": "O1", "session_key": "K1"});
        let session: JsCodeSession = serde_json::from_value(body).unwrap();
        assert_eq!(session.openid, "O1");
        assert!(session.unionid.is_none());
    }

    #[test]
    fn test_redact_query() {
        assert_eq!(
            redact_query("https://api.weixin.qq.com/sns/userinfo?access_token=SECRET"),
            "https://api.weixin.qq.com/sns/userinfo"
        );
    }
}
