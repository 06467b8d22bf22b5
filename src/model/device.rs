use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 设备类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Ios,
    Android,
    Web,
    MacOS,
    Windows,
    Linux,
    /// 微信小程序
    MiniProgram,
    Unknown,
}

impl DeviceType {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ios" => Self::Ios,
            "android" => Self::Android,
            "web" => Self::Web,
            "macos" => Self::MacOS,
            "windows" => Self::Windows,
            "linux" => Self::Linux,
            "miniprogram" | "mini_program" => Self::MiniProgram,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::Web => "web",
            Self::MacOS => "macos",
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::MiniProgram => "miniprogram",
            Self::Unknown => "unknown",
        }
    }
}

/// 设备 - 每个 (用户, 设备类型, 设备ID) 一条，承载当前刷新令牌
///
/// 不变式：(user_id, device_type, device_id) 唯一；refresh_token 全局唯一。
/// 每次登录无条件轮换刷新令牌（最新会话生效）；登出把过期时间置为当下
/// （软失效，保留设备历史）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// 所属用户ID
    pub user_id: String,
    /// 设备类型
    pub device_type: DeviceType,
    /// 设备ID（客户端生成并保持稳定）
    pub device_id: String,
    /// 当前刷新令牌
    pub refresh_token: String,
    /// 刷新令牌过期时间
    pub refresh_expires_at: DateTime<Utc>,
    /// 当前组织上下文（可空；刷新时需复核成员关系）
    pub organization_id: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// 刷新令牌是否在指定时刻有效
    pub fn refresh_token_valid(&self, supplied: &str, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at > now && self.refresh_token == supplied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_roundtrip() {
        assert_eq!(DeviceType::from_str("iOS"), DeviceType::Ios);
        assert_eq!(DeviceType::from_str("mini_program"), DeviceType::MiniProgram);
        assert_eq!(DeviceType::from_str("tv"), DeviceType::Unknown);
        assert_eq!(DeviceType::from_str(DeviceType::Web.as_str()), DeviceType::Web);
    }

    #[test]
    fn test_refresh_token_validity_boundary() {
        let now = Utc::now();
        let device = Device {
            user_id: "u1".into(),
            device_type: DeviceType::Ios,
            device_id: "d1".into(),
            refresh_token: "tok".into(),
            refresh_expires_at: now,
            organization_id: None,
            created_at: now,
            updated_at: now,
        };
        // 过期时间等于当下 → 无效（软登出正是把过期置为当下）
        assert!(!device.refresh_token_valid("tok", now));
        // 未来一秒 → 有效
        let device = Device { refresh_expires_at: now + chrono::Duration::seconds(1), ..device };
        assert!(device.refresh_token_valid("tok", now));
        assert!(!device.refresh_token_valid("other", now));
    }
}
