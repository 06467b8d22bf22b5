use serde::{Deserialize, Serialize};

/// 应用 - 平台上的一个接入方
///
/// 每个应用有独立的用户池和独立的身份提供方凭证，
/// 同一外部身份在不同应用下解析出不同的用户。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    /// 应用ID
    pub id: String,
    /// 应用名称（作为访问令牌的 issuer）
    pub name: String,
    /// 微信开放平台/公众号凭证
    pub wechat: Option<WechatCredential>,
    /// 微信小程序凭证
    pub wechat_miniprogram: Option<WechatCredential>,
    /// 企业微信凭证
    pub qy_wechat: Option<QyWechatCredential>,
    /// Google OAuth 凭证
    pub google: Option<GoogleCredential>,
    /// 创建时间
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// 更新时间
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// 微信应用凭证（appid + secret）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WechatCredential {
    pub app_id: String,
    pub secret: String,
}

/// 企业微信凭证（corpid + 应用 secret + agentid）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QyWechatCredential {
    pub corp_id: String,
    pub secret: String,
    pub agent_id: String,
}

/// Google OAuth 凭证
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleCredential {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl Application {
    /// 取微信凭证，不存在则报配置缺失
    pub fn wechat_credential(&self) -> crate::error::Result<&WechatCredential> {
        self.wechat.as_ref().ok_or_else(|| {
            crate::error::AuthError::Configuration(format!(
                "应用 {} 未配置微信凭证",
                self.id
            ))
        })
    }

    /// 取小程序凭证
    pub fn miniprogram_credential(&self) -> crate::error::Result<&WechatCredential> {
        self.wechat_miniprogram.as_ref().ok_or_else(|| {
            crate::error::AuthError::Configuration(format!(
                "应用 {} 未配置小程序凭证",
                self.id
            ))
        })
    }

    /// 取企业微信凭证
    pub fn qy_wechat_credential(&self) -> crate::error::Result<&QyWechatCredential> {
        self.qy_wechat.as_ref().ok_or_else(|| {
            crate::error::AuthError::Configuration(format!(
                "应用 {} 未配置企业微信凭证",
                self.id
            ))
        })
    }

    /// 取 Google 凭证
    pub fn google_credential(&self) -> crate::error::Result<&GoogleCredential> {
        self.google.as_ref().ok_or_else(|| {
            crate::error::AuthError::Configuration(format!(
                "应用 {} 未配置 Google 凭证",
                self.id
            ))
        })
    }
}
