//! 会话管理
//!
//! 每个 (用户, 设备类型, 设备ID) 一条设备记录，承载当前刷新令牌。
//! 每次登录成功都无条件轮换刷新令牌——旧令牌随即作废，"最新会话生效"。
//! 同设备并发登录时设备行是唯一热点，单条 upsert 后写者胜，两个分支
//! 都产出自洽的设备行，只有一个刷新令牌存活，这正是预期语义。
//! 登出是软失效：过期时间置为当下，行保留，设备历史可查。

use std::sync::Arc;

use chrono::Duration;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{AuthError, Result};
use crate::model::{Device, DeviceType};
use crate::repository::IdentityStore;

/// 会话管理器
pub struct SessionManager {
    store: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
    /// 刷新令牌有效期（秒）
    refresh_ttl: i64,
}

impl SessionManager {
    pub fn new(store: Arc<dyn IdentityStore>, clock: Arc<dyn Clock>, refresh_ttl: i64) -> Self {
        Self { store, clock, refresh_ttl }
    }

    /// 登录路径的设备写入：不存在则创建，存在则轮换令牌并覆盖组织上下文
    pub async fn upsert_device(
        &self,
        user_id: &str,
        device_type: DeviceType,
        device_id: &str,
        organization_id: Option<String>,
    ) -> Result<Device> {
        let now = self.clock.now();
        let device = Device {
            user_id: user_id.to_string(),
            device_type,
            device_id: device_id.to_string(),
            refresh_token: generate_refresh_token(user_id, device_type, device_id),
            refresh_expires_at: now + Duration::seconds(self.refresh_ttl),
            organization_id,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_device(&device).await?;

        debug!(
            "设备已写入并轮换刷新令牌: user_id={}, device={}:{}",
            user_id,
            device_type.as_str(),
            device_id
        );
        Ok(device)
    }

    /// 校验刷新令牌，返回设备记录
    ///
    /// 过期、与存储值不符、设备不存在，一律归并为 InvalidRefreshToken，
    /// 不向调用方区分原因。
    pub async fn validate_refresh(
        &self,
        user_id: &str,
        device_type: DeviceType,
        device_id: &str,
        refresh_token: &str,
    ) -> Result<Device> {
        let device = self
            .store
            .find_device(user_id, device_type, device_id)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        if !device.refresh_token_valid(refresh_token, self.clock.now()) {
            return Err(AuthError::InvalidRefreshToken);
        }
        Ok(device)
    }

    /// 登出：过期时间置为当下（软失效），行保留
    pub async fn logout(&self, mut device: Device) -> Result<()> {
        let now = self.clock.now();
        device.refresh_expires_at = now;
        device.updated_at = now;
        self.store.update_device(&device).await?;

        info!(
            "设备已登出: user_id={}, device={}:{}",
            device.user_id,
            device.device_type.as_str(),
            device.device_id
        );
        Ok(())
    }

    /// 组织上下文复核：设备携带组织ID时，成员关系丢失即失效
    pub async fn ensure_org_membership(&self, device: &Device) -> Result<()> {
        if let Some(org_id) = &device.organization_id {
            if !self.store.is_org_member(org_id, &device.user_id).await? {
                return Err(AuthError::OrganizationMembershipNotFound(format!(
                    "user={}, org={}",
                    device.user_id, org_id
                )));
            }
        }
        Ok(())
    }
}

/// 生成刷新令牌值
///
/// SHA-256(用户ID ‖ 设备类型 ‖ 设备ID ‖ 16字节随机盐) 的十六进制，
/// 只当随机令牌生成器用，不承担密钥派生职责。
fn generate_refresh_token(user_id: &str, device_type: DeviceType, device_id: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(device_type.as_str().as_bytes());
    hasher.update(device_id.as_bytes());
    hasher.update(salt);
    hex::encode(hasher.finalize())
}
