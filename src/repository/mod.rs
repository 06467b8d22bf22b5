//! 存储契约
//!
//! 业务层只依赖这里的两个 trait：
//! - [`IdentityStore`]：连接池级读写（用户/设备/角色/组织成员），以及开启
//!   一次解析事务。设备的轮换写入是单条原子 upsert，后写者胜。
//! - [`ResolveTx`]：解析事务句柄。账号解析的查-建协议整体运行在一个事务里，
//!   身份租约随事务一起存在；句柄未提交即被丢弃等价于回滚（取消安全）。
//!
//! 两个后端：`pg`（生产，sqlx/PostgreSQL）与 `memory`（单机部署与测试）。

pub mod lease;
pub mod memory;
pub mod pg;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    Application, Binding, BindingKind, Device, DeviceType, Platform, PlatformId, Role, User,
};
use lease::LeaseKey;

/// 身份存储
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// 按ID查应用
    async fn find_application(&self, app_id: &str) -> Result<Option<Application>>;

    /// 按ID查用户
    async fn find_user(&self, user_id: &str) -> Result<Option<User>>;

    /// 按 (应用, 用户名) 查用户（密码登录入口；用户名不保证唯一，取第一条）
    async fn find_user_by_username(&self, app_id: &str, username: &str) -> Result<Option<User>>;

    /// 用户名下全部绑定
    async fn list_bindings(&self, user_id: &str) -> Result<Vec<Binding>>;

    /// 用户名下指定类型的绑定
    async fn find_binding_for_user(
        &self,
        user_id: &str,
        kind: BindingKind,
    ) -> Result<Option<Binding>>;

    /// 用户名下全部平台附属ID
    async fn list_platform_ids(&self, user_id: &str) -> Result<Vec<PlatformId>>;

    /// 用户的个人角色（含权限范围）
    async fn personal_role(&self, user_id: &str) -> Result<Option<Role>>;

    /// 用户是否为组织成员
    async fn is_org_member(&self, org_id: &str, user_id: &str) -> Result<bool>;

    /// 按唯一三元组查设备
    async fn find_device(
        &self,
        user_id: &str,
        device_type: DeviceType,
        device_id: &str,
    ) -> Result<Option<Device>>;

    /// 原子写入设备：不存在则创建，存在则无条件轮换刷新令牌并覆盖组织上下文
    async fn upsert_device(&self, device: &Device) -> Result<()>;

    /// 按唯一三元组更新设备（登出与刷新令牌消费路径）
    async fn update_device(&self, device: &Device) -> Result<()>;

    /// 开启一次解析事务
    async fn begin(&self) -> Result<Box<dyn ResolveTx>>;
}

/// 解析事务
///
/// 丢弃未提交的句柄等价于回滚，租约随之释放。
#[async_trait]
pub trait ResolveTx: Send {
    /// 获取身份租约（事务结束自动释放；绝不能跨外部网络调用持有）
    async fn lease_identity(&mut self, key: &LeaseKey) -> Result<()>;

    /// 经由已验证绑定查用户
    async fn find_user_by_binding(&mut self, key: &LeaseKey) -> Result<Option<User>>;

    /// 创建用户
    async fn create_user(&mut self, user: &User) -> Result<()>;

    /// 更新用户（资料刷新）
    async fn update_user(&mut self, user: &User) -> Result<()>;

    /// 创建绑定
    async fn create_binding(&mut self, binding: &Binding) -> Result<()>;

    /// 查平台附属ID
    async fn find_platform_id(
        &mut self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<PlatformId>>;

    /// 创建平台附属ID
    async fn create_platform_id(&mut self, record: &PlatformId) -> Result<()>;

    /// 应用内用户名是否已占用（生成用户名的查重循环用）
    async fn username_taken(&mut self, app_id: &str, username: &str) -> Result<bool>;

    /// 提交
    async fn commit(self: Box<Self>) -> Result<()>;
}
