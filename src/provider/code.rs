//! 验证码存储
//!
//! 手机号/邮箱验证码登录的短时状态：签发 6 位数字码进 TTL 缓存，
//! 验证成功即消费（单次有效）。码的下发（短信/邮件网关）是外部协作方，
//! 这里只负责生成与核对。无效或过期统一按凭证错误处理，不区分原因。

use std::time::Duration;

use moka::future::Cache;

/// 验证码存储
pub struct VerificationCodes {
    cache: Cache<String, String>,
}

impl VerificationCodes {
    /// 按 TTL 创建（默认建议 300 秒）
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    fn key(app_id: &str, target: &str) -> String {
        format!("{}/{}", app_id, target)
    }

    /// 签发验证码（同一目标重发会覆盖旧码）
    pub async fn issue(&self, app_id: &str, target: &str) -> String {
        let code = format!("{:06}", fastrand::u32(0..1_000_000));
        self.cache.insert(Self::key(app_id, target), code.clone()).await;
        code
    }

    /// 核对并消费验证码
    pub async fn verify(&self, app_id: &str, target: &str, supplied: &str) -> bool {
        let key = Self::key(app_id, target);
        match self.cache.get(&key).await {
            Some(stored) if stored == supplied => {
                self.cache.invalidate(&key).await;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_code_is_single_use() {
        let codes = VerificationCodes::new(Duration::from_secs(300));
        let code = codes.issue("app1", "+8613800000000").await;
        assert_eq!(code.len(), 6);

        assert!(codes.verify("app1", "+8613800000000", &code).await);
        // 第二次核对同一码必须失败
        assert!(!codes.verify("app1", "+8613800000000", &code).await);
    }

    #[tokio::test]
    async fn test_wrong_code_rejected_and_not_consumed() {
        let codes = VerificationCodes::new(Duration::from_secs(300));
        let code = codes.issue("app1", "alice@example.com").await;
        let wrong = if code == "000000" { "000001" } else { "000000" };

        assert!(!codes.verify("app1", "alice@example.com", wrong).await);
        // 错误尝试不消费正确的码
        assert!(codes.verify("app1", "alice@example.com", &code).await);
    }

    #[tokio::test]
    async fn test_codes_scoped_by_application() {
        let codes = VerificationCodes::new(Duration::from_secs(300));
        let code = codes.issue("app1", "+8613800000000").await;
        // 同一目标在另一个应用下不可用
        assert!(!codes.verify("app2", "+8613800000000", &code).await);
    }
}
