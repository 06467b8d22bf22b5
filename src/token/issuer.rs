//! 访问令牌签发器

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::Result;
use crate::model::DeviceType;
use crate::token::claims::{AccessClaims, TOKEN_TYPE_ACCESS};
use crate::token::codec::RsaTokenCodec;

/// 访问令牌签发器
///
/// 在编解码器之上构造/解析访问令牌声明。TTL 来自配置（默认 600 秒）。
pub struct TokenIssuer {
    codec: Arc<RsaTokenCodec>,
    access_ttl: i64,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(codec: Arc<RsaTokenCodec>, access_ttl: i64, clock: Arc<dyn Clock>) -> Self {
        Self { codec, access_ttl, clock }
    }

    /// 铸造一份新的访问令牌声明（iat = 当下，exp = 当下 + TTL）
    #[allow(clippy::too_many_arguments)]
    pub fn new_access_claims(
        &self,
        user_id: &str,
        application: &str,
        role: &str,
        scopes: Vec<String>,
        device_type: DeviceType,
        device_id: &str,
        org_id: Option<String>,
    ) -> AccessClaims {
        let now = self.clock.now().timestamp();
        AccessClaims {
            sub: user_id.to_string(),
            iss: application.to_string(),
            role: role.to_string(),
            scopes,
            device_type,
            device_id: device_id.to_string(),
            org_id,
            iat: now,
            exp: now + self.access_ttl,
            typ: TOKEN_TYPE_ACCESS.to_string(),
        }
    }

    /// 序列化并签名
    pub fn generate(&self, claims: &AccessClaims) -> Result<String> {
        self.codec.sign(claims)
    }

    /// 验签并解析（过期检查由调用方负责）
    pub fn verify(&self, token: &str) -> Result<AccessClaims> {
        self.codec.verify(token)
    }

    /// 配置的访问令牌 TTL（秒）
    pub fn access_ttl(&self) -> i64 {
        self.access_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const PRIVATE_PEM: &str = include_str!("../../tests/fixtures/test_rsa.pem");
    const PUBLIC_PEM: &str = include_str!("../../tests/fixtures/test_rsa_pub.pem");

    fn issuer(clock: Arc<ManualClock>) -> TokenIssuer {
        let codec =
            RsaTokenCodec::from_pem(PRIVATE_PEM.as_bytes(), PUBLIC_PEM.as_bytes()).unwrap();
        TokenIssuer::new(Arc::new(codec), 600, clock)
    }

    #[test]
    fn test_claims_roundtrip() {
        let clock = Arc::new(ManualClock::at_system_time());
        let issuer = issuer(clock.clone());

        let claims = issuer.new_access_claims(
            "u1",
            "demo-app",
            "member",
            vec!["profile:read".into()],
            DeviceType::Android,
            "d1",
            Some("org1".into()),
        );
        assert_eq!(claims.exp - claims.iat, 600);

        let token = issuer.generate(&claims).unwrap();
        let decoded = issuer.verify(&token).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn test_expired_token_verifies_but_is_expired() {
        let clock = Arc::new(ManualClock::at_system_time());
        let issuer = issuer(clock.clone());

        let claims = issuer.new_access_claims(
            "u1", "demo-app", "", vec![], DeviceType::Web, "d1", None,
        );
        let token = issuer.generate(&claims).unwrap();

        // 时间推进到 TTL 之后：验签仍通过，过期检查不通过
        clock.advance_secs(601);
        let decoded = issuer.verify(&token).unwrap();
        assert!(decoded.is_expired(clock.now()));
    }
}
