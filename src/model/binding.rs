use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 绑定类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    /// 微信（unionid 为主键身份）
    Wechat,
    /// 企业微信（成员 userid）
    QyWechat,
    /// 微信号
    Wxid,
    /// 手机号
    Phone,
    /// 用户名密码
    Password,
    /// 邮箱
    Email,
    /// Google（OIDC sub）
    Google,
}

impl BindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wechat => "wechat",
            Self::QyWechat => "qy_wechat",
            Self::Wxid => "wxid",
            Self::Phone => "phone",
            Self::Password => "password",
            Self::Email => "email",
            Self::Google => "google",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "wechat" => Some(Self::Wechat),
            "qy_wechat" => Some(Self::QyWechat),
            "wxid" => Some(Self::Wxid),
            "phone" => Some(Self::Phone),
            "password" => Some(Self::Password),
            "email" => Some(Self::Email),
            "google" => Some(Self::Google),
            _ => None,
        }
    }
}

/// 绑定 - 用户对一个外部身份的控制权证明
///
/// 不变式：同一应用下，一个已验证的 (类型, 身份) 至多属于一个用户。
/// 由数据库部分唯一索引 + 解析器的先查后建协议共同保证。
/// 绑定只会创建和更新（密码轮换），从不在用户之间转移。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    /// 绑定ID
    pub id: String,
    /// 所属应用ID
    pub app_id: String,
    /// 所属用户ID
    pub user_id: String,
    /// 绑定类型
    pub kind: BindingKind,
    /// 外部身份（unionid / userid / 手机号 / 用户名 / sub ...）
    pub identity: String,
    /// 是否已验证
    pub verified: bool,
    /// 凭证（密码类绑定存 bcrypt 哈希，盐内嵌；其他类型为空）
    pub credential: Option<String>,
    /// 关联邮箱（部分提供方回传）
    pub email: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

impl Binding {
    /// 创建一条已验证的绑定
    pub fn verified(
        app_id: &str,
        user_id: &str,
        kind: BindingKind,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: crate::model::id::next_user_id(),
            app_id: app_id.to_string(),
            user_id: user_id.to_string(),
            kind,
            identity: identity.to_string(),
            verified: true,
            credential: None,
            email: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 平台附属ID类型
///
/// 微信系登录里，主身份（unionid / 企业微信 userid）之外还有平台内
/// 专属标识（小程序 openid 等），首次观察到时懒创建，每用户每平台至多一条。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// 微信小程序 openid
    WechatMiniProgram,
    /// 企业微信 userid
    QyWechat,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WechatMiniProgram => "wechat_miniprogram",
            Self::QyWechat => "qy_wechat",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "wechat_miniprogram" => Some(Self::WechatMiniProgram),
            "qy_wechat" => Some(Self::QyWechat),
            _ => None,
        }
    }
}

/// 平台附属ID记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformId {
    /// 所属用户ID
    pub user_id: String,
    /// 平台
    pub platform: Platform,
    /// 平台内标识值
    pub value: String,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_kind_roundtrip() {
        for kind in [
            BindingKind::Wechat,
            BindingKind::QyWechat,
            BindingKind::Wxid,
            BindingKind::Phone,
            BindingKind::Password,
            BindingKind::Email,
            BindingKind::Google,
        ] {
            assert_eq!(BindingKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(BindingKind::from_str("sms"), None);
    }
}
