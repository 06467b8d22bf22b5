//! 身份租约键
//!
//! "同一外部身份并发首登只产生一个用户"靠事务级互斥租约保证：
//! PostgreSQL 后端用 pg_advisory_xact_lock（随事务提交/回滚自动释放），
//! 内存后端用按键哈希分槽的异步互斥锁。两个后端共用这里的键表示。
//!
//! 双身份合并路径要同时持有两把租约，获取顺序必须全局一致，否则两个
//! 相反顺序的并发请求会互相等待。约定：按规范串的字典序升序获取，
//! 与哪个身份发起登录无关。

use rustc_hash::FxHasher;
use std::hash::Hasher;

use crate::model::BindingKind;

/// 身份租约键：(应用, 绑定类型, 外部身份) 三元组
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseKey {
    pub app_id: String,
    pub kind: BindingKind,
    pub identity: String,
}

impl LeaseKey {
    pub fn new(app_id: &str, kind: BindingKind, identity: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            kind,
            identity: identity.to_string(),
        }
    }

    /// 规范串，也是租约获取顺序的比较依据
    pub fn canonical(&self) -> String {
        format!("{}/{}/{}", self.app_id, self.kind.as_str(), self.identity)
    }

    /// 64 位键哈希（advisory lock 的锁号 / 内存锁槽号）
    pub fn hash_i64(&self) -> i64 {
        let mut hasher = FxHasher::default();
        hasher.write(self.canonical().as_bytes());
        hasher.finish() as i64
    }
}

/// 把两把键按全局约定排序（规范串字典序升序）
pub fn ordered_pair<'a>(a: &'a LeaseKey, b: &'a LeaseKey) -> [&'a LeaseKey; 2] {
    if a.canonical() <= b.canonical() {
        [a, b]
    } else {
        [b, a]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stable_and_distinct() {
        let a = LeaseKey::new("app1", BindingKind::Wechat, "U1");
        let a2 = LeaseKey::new("app1", BindingKind::Wechat, "U1");
        let b = LeaseKey::new("app1", BindingKind::Phone, "U1");
        assert_eq!(a.hash_i64(), a2.hash_i64());
        assert_ne!(a.hash_i64(), b.hash_i64());
    }

    #[test]
    fn test_ordered_pair_is_order_independent() {
        let wechat = LeaseKey::new("app1", BindingKind::Wechat, "U1");
        let phone = LeaseKey::new("app1", BindingKind::Phone, "+15550001111");

        let forward = ordered_pair(&wechat, &phone);
        let backward = ordered_pair(&phone, &wechat);
        assert_eq!(forward[0], backward[0]);
        assert_eq!(forward[1], backward[1]);
    }
}
