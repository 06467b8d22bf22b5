//! 内存后端
//!
//! 与 PostgreSQL 后端同契约的进程内实现，用于单机部署和并发正确性测试。
//! 身份租约 = 按键哈希分槽的 tokio 互斥锁（OwnedMutexGuard 存在事务句柄里，
//! 句柄销毁即释放，对应 advisory lock 的"随事务结束释放"语义）。
//! 事务写入先缓冲，提交时在状态锁内一次性校验唯一约束并应用；
//! 未提交就丢弃句柄时缓冲直接作废，等价于回滚。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{AuthError, Result};
use crate::model::{
    Application, Binding, BindingKind, Device, DeviceType, Platform, PlatformId, Role, User,
};
use crate::repository::lease::LeaseKey;
use crate::repository::{IdentityStore, ResolveTx};

#[derive(Default)]
struct MemState {
    applications: HashMap<String, Application>,
    users: HashMap<String, User>,
    bindings: Vec<Binding>,
    platform_ids: Vec<PlatformId>,
    /// key: (user_id, device_type, device_id)
    devices: HashMap<(String, &'static str, String), Device>,
    /// user_id -> 个人角色
    roles: HashMap<String, Role>,
    /// (org_id, user_id)
    org_members: HashSet<(String, String)>,
}

/// 内存身份存储
#[derive(Clone, Default)]
pub struct MemoryIdentityStore {
    state: Arc<Mutex<MemState>>,
    leases: Arc<DashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── 装配辅助（部署引导和测试种子数据） ──

    pub fn insert_application(&self, app: Application) {
        self.state.lock().applications.insert(app.id.clone(), app);
    }

    pub fn insert_user(&self, user: User) {
        self.state.lock().users.insert(user.id.clone(), user);
    }

    pub fn insert_binding(&self, binding: Binding) {
        self.state.lock().bindings.push(binding);
    }

    pub fn set_personal_role(&self, user_id: &str, role: Role) {
        self.state.lock().roles.insert(user_id.to_string(), role);
    }

    pub fn add_org_member(&self, org_id: &str, user_id: &str) {
        self.state
            .lock()
            .org_members
            .insert((org_id.to_string(), user_id.to_string()));
    }

    pub fn remove_org_member(&self, org_id: &str, user_id: &str) {
        self.state
            .lock()
            .org_members
            .remove(&(org_id.to_string(), user_id.to_string()));
    }

    /// 用户总数（不变式断言用）
    pub fn user_count(&self) -> usize {
        self.state.lock().users.len()
    }

    /// 绑定总数（不变式断言用）
    pub fn binding_count(&self) -> usize {
        self.state.lock().bindings.len()
    }

    fn lease_slot(&self, key: &LeaseKey) -> Arc<AsyncMutex<()>> {
        self.leases
            .entry(key.hash_i64())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_application(&self, app_id: &str) -> Result<Option<Application>> {
        Ok(self.state.lock().applications.get(app_id).cloned())
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.state.lock().users.get(user_id).cloned())
    }

    async fn find_user_by_username(&self, app_id: &str, username: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .lock()
            .users
            .values()
            .find(|u| u.app_id == app_id && u.username == username)
            .cloned())
    }

    async fn list_bindings(&self, user_id: &str) -> Result<Vec<Binding>> {
        Ok(self
            .state
            .lock()
            .bindings
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_binding_for_user(
        &self,
        user_id: &str,
        kind: BindingKind,
    ) -> Result<Option<Binding>> {
        Ok(self
            .state
            .lock()
            .bindings
            .iter()
            .find(|b| b.user_id == user_id && b.kind == kind)
            .cloned())
    }

    async fn list_platform_ids(&self, user_id: &str) -> Result<Vec<PlatformId>> {
        Ok(self
            .state
            .lock()
            .platform_ids
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn personal_role(&self, user_id: &str) -> Result<Option<Role>> {
        Ok(self.state.lock().roles.get(user_id).cloned())
    }

    async fn is_org_member(&self, org_id: &str, user_id: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .org_members
            .contains(&(org_id.to_string(), user_id.to_string())))
    }

    async fn find_device(
        &self,
        user_id: &str,
        device_type: DeviceType,
        device_id: &str,
    ) -> Result<Option<Device>> {
        let key = (user_id.to_string(), device_type.as_str(), device_id.to_string());
        Ok(self.state.lock().devices.get(&key).cloned())
    }

    async fn upsert_device(&self, device: &Device) -> Result<()> {
        let key = (
            device.user_id.clone(),
            device.device_type.as_str(),
            device.device_id.clone(),
        );
        let mut state = self.state.lock();
        match state.devices.get_mut(&key) {
            Some(existing) => {
                // 无条件轮换：新令牌、新过期、新组织上下文，保留创建时间
                existing.refresh_token = device.refresh_token.clone();
                existing.refresh_expires_at = device.refresh_expires_at;
                existing.organization_id = device.organization_id.clone();
                existing.updated_at = device.updated_at;
            }
            None => {
                state.devices.insert(key, device.clone());
            }
        }
        Ok(())
    }

    async fn update_device(&self, device: &Device) -> Result<()> {
        let key = (
            device.user_id.clone(),
            device.device_type.as_str(),
            device.device_id.clone(),
        );
        let mut state = self.state.lock();
        match state.devices.get_mut(&key) {
            Some(existing) => {
                *existing = device.clone();
                Ok(())
            }
            None => Err(AuthError::DeviceNotFound(device.device_id.clone())),
        }
    }

    async fn begin(&self) -> Result<Box<dyn ResolveTx>> {
        Ok(Box::new(MemResolveTx {
            store: self.clone(),
            guards: Vec::new(),
            pending: Vec::new(),
        }))
    }
}

enum PendingWrite {
    CreateUser(User),
    UpdateUser(User),
    CreateBinding(Binding),
    CreatePlatformId(PlatformId),
}

/// 内存解析事务
pub struct MemResolveTx {
    store: MemoryIdentityStore,
    guards: Vec<OwnedMutexGuard<()>>,
    pending: Vec<PendingWrite>,
}

impl MemResolveTx {
    /// 事务内读：已提交状态 + 本事务缓冲的写
    fn pending_user_by_binding(&self, key: &LeaseKey) -> Option<User> {
        let user_id = self.pending.iter().find_map(|w| match w {
            PendingWrite::CreateBinding(b)
                if b.app_id == key.app_id
                    && b.kind == key.kind
                    && b.identity == key.identity
                    && b.verified =>
            {
                Some(b.user_id.clone())
            }
            _ => None,
        })?;
        self.pending.iter().find_map(|w| match w {
            PendingWrite::CreateUser(u) if u.id == user_id => Some(u.clone()),
            _ => None,
        })
    }
}

#[async_trait]
impl ResolveTx for MemResolveTx {
    async fn lease_identity(&mut self, key: &LeaseKey) -> Result<()> {
        let slot = self.store.lease_slot(key);
        let guard = slot.lock_owned().await;
        self.guards.push(guard);
        Ok(())
    }

    async fn find_user_by_binding(&mut self, key: &LeaseKey) -> Result<Option<User>> {
        {
            let state = self.store.state.lock();
            let bound = state.bindings.iter().find(|b| {
                b.app_id == key.app_id
                    && b.kind == key.kind
                    && b.identity == key.identity
                    && b.verified
            });
            if let Some(binding) = bound {
                return Ok(state.users.get(&binding.user_id).cloned());
            }
        }
        Ok(self.pending_user_by_binding(key))
    }

    async fn create_user(&mut self, user: &User) -> Result<()> {
        self.pending.push(PendingWrite::CreateUser(user.clone()));
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> Result<()> {
        self.pending.push(PendingWrite::UpdateUser(user.clone()));
        Ok(())
    }

    async fn create_binding(&mut self, binding: &Binding) -> Result<()> {
        self.pending.push(PendingWrite::CreateBinding(binding.clone()));
        Ok(())
    }

    async fn find_platform_id(
        &mut self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<PlatformId>> {
        {
            let state = self.store.state.lock();
            if let Some(found) = state
                .platform_ids
                .iter()
                .find(|p| p.user_id == user_id && p.platform == platform)
            {
                return Ok(Some(found.clone()));
            }
        }
        Ok(self.pending.iter().find_map(|w| match w {
            PendingWrite::CreatePlatformId(p)
                if p.user_id == user_id && p.platform == platform =>
            {
                Some(p.clone())
            }
            _ => None,
        }))
    }

    async fn create_platform_id(&mut self, record: &PlatformId) -> Result<()> {
        self.pending
            .push(PendingWrite::CreatePlatformId(record.clone()));
        Ok(())
    }

    async fn username_taken(&mut self, app_id: &str, username: &str) -> Result<bool> {
        let committed = self
            .store
            .state
            .lock()
            .users
            .values()
            .any(|u| u.app_id == app_id && u.username == username);
        let buffered = self.pending.iter().any(|w| match w {
            PendingWrite::CreateUser(u) => u.app_id == app_id && u.username == username,
            _ => false,
        });
        Ok(committed || buffered)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.store.state.lock();

        // 先整体校验唯一约束，再应用，保证提交的原子性
        for write in &self.pending {
            match write {
                PendingWrite::CreateUser(user) => {
                    if state.users.contains_key(&user.id) {
                        return Err(AuthError::Internal(format!("用户ID重复: {}", user.id)));
                    }
                }
                PendingWrite::CreateBinding(binding) => {
                    if binding.verified
                        && state.bindings.iter().any(|b| {
                            b.app_id == binding.app_id
                                && b.kind == binding.kind
                                && b.identity == binding.identity
                                && b.verified
                        })
                    {
                        return Err(AuthError::DuplicateBinding(format!(
                            "{}/{}",
                            binding.kind.as_str(),
                            binding.identity
                        )));
                    }
                }
                PendingWrite::CreatePlatformId(record) => {
                    if state
                        .platform_ids
                        .iter()
                        .any(|p| p.user_id == record.user_id && p.platform == record.platform)
                    {
                        return Err(AuthError::DuplicateBinding(format!(
                            "platform {}/{}",
                            record.user_id,
                            record.platform.as_str()
                        )));
                    }
                }
                PendingWrite::UpdateUser(_) => {}
            }
        }

        for write in self.pending.iter() {
            match write {
                PendingWrite::CreateUser(user) | PendingWrite::UpdateUser(user) => {
                    state.users.insert(user.id.clone(), user.clone());
                }
                PendingWrite::CreateBinding(binding) => {
                    state.bindings.push(binding.clone());
                }
                PendingWrite::CreatePlatformId(record) => {
                    state.platform_ids.push(record.clone());
                }
            }
        }

        // 状态锁先于租约释放：等待同一身份的下一个事务必然看到这里的提交
        drop(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: &str, app: &str, name: &str) -> User {
        User {
            id: id.into(),
            app_id: app.into(),
            username: name.into(),
            avatar: None,
            department: None,
            referral_channel: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_tx_buffered_until_commit() {
        let store = MemoryIdentityStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.create_user(&user("u1", "app1", "alice")).await.unwrap();

        // 提交前外部不可见
        assert_eq!(store.user_count(), 0);
        tx.commit().await.unwrap();
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_tx_rolls_back() {
        let store = MemoryIdentityStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.create_user(&user("u1", "app1", "alice")).await.unwrap();
            // 不提交直接丢弃
        }
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_verified_binding_rejected_at_commit() {
        let store = MemoryIdentityStore::new();
        let now = Utc::now();
        store.insert_user(user("u1", "app1", "alice"));
        store.insert_binding(Binding::verified("app1", "u1", BindingKind::Wechat, "U1", now));

        let mut tx = store.begin().await.unwrap();
        tx.create_user(&user("u2", "app1", "bob")).await.unwrap();
        tx.create_binding(&Binding::verified("app1", "u2", BindingKind::Wechat, "U1", now))
            .await
            .unwrap();
        let result = tx.commit().await;
        assert!(matches!(result, Err(AuthError::DuplicateBinding(_))));
        // 整个事务被拒绝，用户也没有落下
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_device_rotates_in_place() {
        let store = MemoryIdentityStore::new();
        let now = Utc::now();
        let first = Device {
            user_id: "u1".into(),
            device_type: DeviceType::Ios,
            device_id: "d1".into(),
            refresh_token: "tok1".into(),
            refresh_expires_at: now + chrono::Duration::days(30),
            organization_id: None,
            created_at: now,
            updated_at: now,
        };
        store.upsert_device(&first).await.unwrap();

        let later = now + chrono::Duration::seconds(5);
        let second = Device {
            refresh_token: "tok2".into(),
            organization_id: Some("org1".into()),
            updated_at: later,
            created_at: later,
            ..first.clone()
        };
        store.upsert_device(&second).await.unwrap();

        let stored = store
            .find_device("u1", DeviceType::Ios, "d1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.refresh_token, "tok2");
        assert_eq!(stored.organization_id.as_deref(), Some("org1"));
        // 创建时间保留首登值
        assert_eq!(stored.created_at, now);
    }
}
