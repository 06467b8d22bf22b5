//! 可注入的时间源
//!
//! 令牌签发、会话过期判断都依赖"当前时间"。通过 trait 注入而不是直接读
//! `Utc::now()`，过期边界行为才能在测试里用固定时钟逐秒推进验证。

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// 时间源
pub trait Clock: Send + Sync {
    /// 当前 UTC 时间
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟（生产环境默认实现）
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟（测试用，可任意设置和推进）
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// 以指定时间创建
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// 以当前系统时间创建
    pub fn at_system_time() -> Self {
        Self::new(Utc::now())
    }

    /// 设置当前时间
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// 前进指定秒数
    pub fn advance_secs(&self, secs: i64) {
        let mut guard = self.now.lock();
        *guard += Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
