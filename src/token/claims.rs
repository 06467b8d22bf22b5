use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::DeviceType;

/// 访问令牌类型标识
pub const TOKEN_TYPE_ACCESS: &str = "access";

/// 访问令牌声明
///
/// 签名后不可变；每次签发（登录、刷新）都铸造一份新声明。
/// 从不落库，验证时从令牌本身解码还原。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// 用户ID
    pub sub: String,
    /// 签发方（应用名称）
    pub iss: String,
    /// 个人角色名（未分配时为空串）
    pub role: String,
    /// 权限范围名列表
    pub scopes: Vec<String>,
    /// 设备类型
    pub device_type: DeviceType,
    /// 设备ID
    pub device_id: String,
    /// 组织上下文
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// 签发时间（unix 秒）
    pub iat: i64,
    /// 过期时间（unix 秒）
    pub exp: i64,
    /// 令牌类型标识
    pub typ: String,
}

impl AccessClaims {
    /// 在指定时刻是否已过期（有效条件是 exp 严格大于当下）
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp: i64) -> AccessClaims {
        AccessClaims {
            sub: "u1".into(),
            iss: "demo-app".into(),
            role: "member".into(),
            scopes: vec!["profile:read".into()],
            device_type: DeviceType::Ios,
            device_id: "d1".into(),
            org_id: None,
            iat: 0,
            exp,
            typ: TOKEN_TYPE_ACCESS.into(),
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        // exp = now - 1 → 过期
        assert!(claims(now.timestamp() - 1).is_expired(now));
        // exp = now → 过期（有效要求严格大于）
        assert!(claims(now.timestamp()).is_expired(now));
        // exp = now + 1 → 有效
        assert!(!claims(now.timestamp() + 1).is_expired(now));
    }

    #[test]
    fn test_org_id_omitted_when_absent() {
        let json = serde_json::to_value(claims(100)).unwrap();
        assert!(json.get("org_id").is_none());
    }
}
