use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::binding::{Binding, PlatformId};
use crate::model::role::Role;

/// 用户 - 平台内部身份
///
/// 任意提供方首次登录成功时由账号解析器创建，此后各提供方的绑定
/// 都归并到同一条用户记录上。不做物理删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// 用户ID（snowflake，全局唯一、时间有序）
    pub id: String,
    /// 所属应用ID
    pub app_id: String,
    /// 用户名/昵称（提供方未给出时自动生成 user_xxxxx）
    pub username: String,
    /// 头像 URL
    pub avatar: Option<String>,
    /// 部门（企业微信登录时回填）
    pub department: Option<String>,
    /// 推荐渠道
    pub referral_channel: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// 创建新用户
    pub fn new(
        app_id: &str,
        username: String,
        avatar: Option<String>,
        referral_channel: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: crate::model::id::next_user_id(),
            app_id: app_id.to_string(),
            username,
            avatar,
            department: None,
            referral_channel,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 用户聚合 - 账号解析器的返回单元
///
/// 用户本体 + 其名下全部绑定、平台附属ID、个人角色。
#[derive(Debug, Clone)]
pub struct UserAggregate {
    pub user: User,
    pub bindings: Vec<Binding>,
    pub platform_ids: Vec<PlatformId>,
    pub role: Option<Role>,
}

impl UserAggregate {
    /// 是否已有指定类型的绑定
    pub fn has_binding(&self, kind: crate::model::binding::BindingKind) -> bool {
        self.bindings.iter().any(|b| b.kind == kind && b.verified)
    }
}
