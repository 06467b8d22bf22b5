//! 双身份合并决策表
//!
//! 小程序手机号联登和企业微信登录会同时携带两个候选身份（微信主身份 +
//! 手机号）。两个身份各自查一次用户，组合成五种互斥结果，动作由解析器
//! 按结果执行。用枚举而不是嵌套条件写，五行决策表可以被穷举测试。

use crate::model::User;

/// 双身份查询的归类结果
#[derive(Debug)]
pub enum MergeOutcome {
    /// 两个身份都命中且是同一个用户
    BothSame(User),
    /// 两个身份命中不同用户：微信发起的登录以微信侧为准，
    /// 这是一条数据不一致记录（警告级），不是错误
    BothDifferent {
        primary: User,
        secondary_user_id: String,
    },
    /// 只有主身份（微信/企业微信）命中
    OnlyPrimary(User),
    /// 只有手机号命中
    OnlySecondary(User),
    /// 两个身份都没有命中
    Neither,
}

impl MergeOutcome {
    /// 归类两次独立查询的结果
    pub fn classify(primary: Option<User>, secondary: Option<User>) -> Self {
        match (primary, secondary) {
            (Some(a), Some(b)) if a.id == b.id => Self::BothSame(a),
            (Some(a), Some(b)) => Self::BothDifferent {
                primary: a,
                secondary_user_id: b.id,
            },
            (Some(a), None) => Self::OnlyPrimary(a),
            (None, Some(b)) => Self::OnlySecondary(b),
            (None, None) => Self::Neither,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: &str) -> User {
        User {
            id: id.into(),
            app_id: "app1".into(),
            username: format!("user-{id}"),
            avatar: None,
            department: None,
            referral_channel: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_both_same() {
        match MergeOutcome::classify(Some(user("u1")), Some(user("u1"))) {
            MergeOutcome::BothSame(u) => assert_eq!(u.id, "u1"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_both_different_prefers_primary() {
        match MergeOutcome::classify(Some(user("u1")), Some(user("u2"))) {
            MergeOutcome::BothDifferent { primary, secondary_user_id } => {
                assert_eq!(primary.id, "u1");
                assert_eq!(secondary_user_id, "u2");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_only_primary() {
        assert!(matches!(
            MergeOutcome::classify(Some(user("u1")), None),
            MergeOutcome::OnlyPrimary(_)
        ));
    }

    #[test]
    fn test_only_secondary() {
        assert!(matches!(
            MergeOutcome::classify(None, Some(user("u2"))),
            MergeOutcome::OnlySecondary(_)
        ));
    }

    #[test]
    fn test_neither() {
        assert!(matches!(
            MergeOutcome::classify(None, None),
            MergeOutcome::Neither
        ));
    }
}
