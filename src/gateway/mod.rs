//! 认证网关
//!
//! 编排账号解析器、会话管理器和令牌签发器：
//! 登录 = 解析 → 设备写入（轮换刷新令牌）→ 查个人角色 → 铸造访问令牌。
//! verify / refresh / logout 供请求中间件消费。
//!
//! verify 路径把"令牌无效 / 已过期 / 用户不存在"折叠为同一个 Forbidden，
//! 不让调用方分辨是哪一步失败。refresh 路径只重铸访问令牌，不轮换刷新
//! 令牌——只有完整登录才轮换。

use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{AuthError, Result};
use crate::model::{DeviceType, UserAggregate};
use crate::repository::IdentityStore;
use crate::resolver::{AccountResolver, LoginCredential};
use crate::session::SessionManager;
use crate::token::TokenIssuer;

/// 登录请求
#[derive(Debug, Clone)]
pub struct LoginRequest {
    /// 应用ID
    pub application: String,
    /// 设备类型
    pub device_type: DeviceType,
    /// 设备ID（客户端生成并保持稳定）
    pub device_id: String,
    /// 登录后进入的组织上下文
    pub organization_id: Option<String>,
    /// 推荐渠道（只在首次创建用户时落库）
    pub referral_channel: Option<String>,
    /// 提供方凭证
    pub credential: LoginCredential,
}

/// 登录结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResult {
    pub access_token: String,
    /// 访问令牌过期时间（unix 秒）
    pub access_token_expires_at: i64,
    pub refresh_token: String,
    /// 刷新令牌过期时间（unix 秒）
    pub refresh_token_expires_at: i64,
    pub user_id: String,
    pub device_type: DeviceType,
    pub device_id: String,
}

/// 访问令牌验证通过后还原出的身份
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    pub username: String,
    pub avatar: Option<String>,
    /// 签发应用名
    pub application: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub device_type: DeviceType,
    pub device_id: String,
    pub organization_id: Option<String>,
}

/// 认证网关
pub struct AuthGateway {
    store: Arc<dyn IdentityStore>,
    resolver: AccountResolver,
    sessions: SessionManager,
    issuer: TokenIssuer,
    clock: Arc<dyn Clock>,
}

impl AuthGateway {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        resolver: AccountResolver,
        sessions: SessionManager,
        issuer: TokenIssuer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, resolver, sessions, issuer, clock }
    }

    /// 登录
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResult> {
        let provider = request.credential.provider_name();

        if request.device_id.is_empty() {
            return Err(AuthError::Validation("device_id 不能为空".to_string()));
        }

        let result = self.login_inner(&request).await;
        match &result {
            Ok(login) => {
                counter!("passport_logins_total", "provider" => provider).increment(1);
                info!(
                    "✅ 登录成功: provider={}, user_id={}, device={}:{}",
                    provider,
                    login.user_id,
                    request.device_type.as_str(),
                    request.device_id
                );
            }
            Err(e) => {
                counter!("passport_login_failures_total", "provider" => provider).increment(1);
                warn!("❌ 登录失败: provider={}, error={}", provider, e);
            }
        }
        result
    }

    async fn login_inner(&self, request: &LoginRequest) -> Result<LoginResult> {
        let app = self
            .store
            .find_application(&request.application)
            .await?
            .ok_or_else(|| AuthError::ApplicationNotFound(request.application.clone()))?;

        let aggregate: UserAggregate = self
            .resolver
            .resolve(&app, &request.credential, request.referral_channel.as_deref())
            .await?;

        // 携带组织上下文的登录先验成员关系，避免落一个死上下文
        if let Some(org_id) = &request.organization_id {
            if !self.store.is_org_member(org_id, &aggregate.user.id).await? {
                return Err(AuthError::OrganizationMembershipNotFound(format!(
                    "user={}, org={}",
                    aggregate.user.id, org_id
                )));
            }
        }

        let device = self
            .sessions
            .upsert_device(
                &aggregate.user.id,
                request.device_type,
                &request.device_id,
                request.organization_id.clone(),
            )
            .await?;

        let (role_name, scopes) = match &aggregate.role {
            Some(role) => (role.name.clone(), role.scopes.clone()),
            None => (String::new(), Vec::new()),
        };

        let claims = self.issuer.new_access_claims(
            &aggregate.user.id,
            &app.name,
            &role_name,
            scopes,
            request.device_type,
            &request.device_id,
            request.organization_id.clone(),
        );
        let access_token = self.issuer.generate(&claims)?;

        Ok(LoginResult {
            access_token,
            access_token_expires_at: claims.exp,
            refresh_token: device.refresh_token.clone(),
            refresh_token_expires_at: device.refresh_expires_at.timestamp(),
            user_id: aggregate.user.id,
            device_type: request.device_type,
            device_id: request.device_id.clone(),
        })
    }

    /// 验证访问令牌，还原调用方身份
    ///
    /// 签名无效、已过期、用户不存在三种情况统一折叠为 Forbidden。
    pub async fn verify_access_token(&self, token: &str) -> Result<UserInfo> {
        counter!("passport_verifications_total").increment(1);

        let claims = self
            .issuer
            .verify(token)
            .map_err(|_| AuthError::Forbidden)?;
        if claims.typ != crate::token::TOKEN_TYPE_ACCESS || claims.is_expired(self.clock.now()) {
            return Err(AuthError::Forbidden);
        }

        let user = self
            .store
            .find_user(&claims.sub)
            .await?
            .ok_or(AuthError::Forbidden)?;

        Ok(UserInfo {
            user_id: user.id,
            username: user.username,
            avatar: user.avatar,
            application: claims.iss,
            role: claims.role,
            scopes: claims.scopes,
            device_type: claims.device_type,
            device_id: claims.device_id,
            organization_id: claims.org_id,
        })
    }

    /// 刷新访问令牌（刷新令牌本身不轮换）
    pub async fn refresh_access_token(
        &self,
        user_id: &str,
        refresh_token: &str,
        device_type: DeviceType,
        device_id: &str,
    ) -> Result<LoginResult> {
        counter!("passport_refreshes_total").increment(1);

        let device = self
            .sessions
            .validate_refresh(user_id, device_type, device_id, refresh_token)
            .await?;

        // 组织上下文复核：成员关系丢失即失效
        self.sessions.ensure_org_membership(&device).await?;

        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))?;
        let app = self
            .store
            .find_application(&user.app_id)
            .await?
            .ok_or_else(|| AuthError::ApplicationNotFound(user.app_id.clone()))?;

        let (role_name, scopes) = match self.store.personal_role(user_id).await? {
            Some(role) => (role.name, role.scopes),
            None => (String::new(), Vec::new()),
        };

        let claims = self.issuer.new_access_claims(
            user_id,
            &app.name,
            &role_name,
            scopes,
            device_type,
            device_id,
            device.organization_id.clone(),
        );
        let access_token = self.issuer.generate(&claims)?;

        Ok(LoginResult {
            access_token,
            access_token_expires_at: claims.exp,
            refresh_token: device.refresh_token.clone(),
            refresh_token_expires_at: device.refresh_expires_at.timestamp(),
            user_id: user_id.to_string(),
            device_type,
            device_id: device_id.to_string(),
        })
    }

    /// 登出（软失效刷新令牌）
    pub async fn logout(
        &self,
        user_id: &str,
        refresh_token: &str,
        device_type: DeviceType,
        device_id: &str,
    ) -> Result<()> {
        let device = self
            .sessions
            .validate_refresh(user_id, device_type, device_id, refresh_token)
            .await?;
        self.sessions.logout(device).await?;

        counter!("passport_logouts_total").increment(1);
        Ok(())
    }
}

impl LoginCredential {
    /// 指标和日志里用的提供方标签
    pub fn provider_name(&self) -> &'static str {
        match self {
            LoginCredential::WechatWeb { .. } => "wechat_web",
            LoginCredential::WechatMiniProgram { .. } => "wechat_miniprogram",
            LoginCredential::QyWechat { .. } => "qy_wechat",
            LoginCredential::Google { .. } => "google",
            LoginCredential::Password { .. } => "password",
            LoginCredential::PhoneCode { .. } => "phone_code",
            LoginCredential::EmailCode { .. } => "email_code",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{Application, Binding, BindingKind, Role, User};
    use crate::provider::{GoogleClient, QyWechatClient, VerificationCodes, WechatClient};
    use crate::repository::memory::MemoryIdentityStore;
    use crate::resolver::password::hash_password;
    use crate::token::RsaTokenCodec;
    use chrono::Utc;
    use std::time::Duration;

    const PRIVATE_PEM: &str = include_str!("../../tests/fixtures/test_rsa.pem");
    const PUBLIC_PEM: &str = include_str!("../../tests/fixtures/test_rsa_pub.pem");

    struct Fixture {
        gateway: AuthGateway,
        clock: Arc<ManualClock>,
        store: MemoryIdentityStore,
        user_id: String,
    }

    fn fixture() -> Fixture {
        let store = MemoryIdentityStore::new();
        let store_handle = store.clone();
        let now = Utc::now();

        store.insert_application(Application {
            id: "app1".into(),
            name: "demo-app".into(),
            wechat: None,
            wechat_miniprogram: None,
            qy_wechat: None,
            google: None,
            created_at: now,
            updated_at: now,
        });

        let user = User::new("app1", "alice".into(), None, None, now);
        let user_id = user.id.clone();
        store.insert_user(user);
        let mut binding = Binding::verified("app1", &user_id, BindingKind::Password, "alice", now);
        binding.credential = Some(hash_password("secret123").unwrap());
        store.insert_binding(binding);
        store.set_personal_role(
            &user_id,
            Role { name: "member".into(), scopes: vec!["profile:read".into()] },
        );

        let clock = Arc::new(ManualClock::at_system_time());
        let store: Arc<MemoryIdentityStore> = Arc::new(store);

        let resolver = AccountResolver::new(
            store.clone(),
            Arc::new(WechatClient::new()),
            Arc::new(QyWechatClient::new()),
            Arc::new(GoogleClient::new()),
            Arc::new(VerificationCodes::new(Duration::from_secs(300))),
            clock.clone(),
        );
        let sessions = SessionManager::new(store.clone(), clock.clone(), 3600 * 24 * 30);
        let codec =
            RsaTokenCodec::from_pem(PRIVATE_PEM.as_bytes(), PUBLIC_PEM.as_bytes()).unwrap();
        let issuer = TokenIssuer::new(Arc::new(codec), 600, clock.clone());

        let gateway = AuthGateway::new(store, resolver, sessions, issuer, clock.clone());
        Fixture { gateway, clock, store: store_handle, user_id }
    }

    fn password_login(device_id: &str) -> LoginRequest {
        LoginRequest {
            application: "app1".into(),
            device_type: DeviceType::Ios,
            device_id: device_id.into(),
            organization_id: None,
            referral_channel: None,
            credential: LoginCredential::Password {
                username: "alice".into(),
                password: "secret123".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_login_then_verify_roundtrip() {
        let f = fixture();
        let result = f.gateway.login(password_login("d1")).await.unwrap();
        assert_eq!(result.user_id, f.user_id);
        assert_eq!(result.access_token_expires_at - f.clock.now().timestamp(), 600);

        let info = f.gateway.verify_access_token(&result.access_token).await.unwrap();
        assert_eq!(info.user_id, f.user_id);
        assert_eq!(info.application, "demo-app");
        assert_eq!(info.role, "member");
        assert_eq!(info.scopes, vec!["profile:read".to_string()]);
        assert_eq!(info.device_id, "d1");
    }

    #[tokio::test]
    async fn test_expired_access_token_is_forbidden() {
        let f = fixture();
        let result = f.gateway.login(password_login("d1")).await.unwrap();

        f.clock.advance_secs(601);
        assert!(matches!(
            f.gateway.verify_access_token(&result.access_token).await,
            Err(AuthError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_garbage_token_is_forbidden() {
        let f = fixture();
        assert!(matches!(
            f.gateway.verify_access_token("not.a.token").await,
            Err(AuthError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_refresh_does_not_rotate_refresh_token() {
        let f = fixture();
        let login = f.gateway.login(password_login("d1")).await.unwrap();

        f.clock.advance_secs(30);
        let refreshed = f
            .gateway
            .refresh_access_token(&login.user_id, &login.refresh_token, DeviceType::Ios, "d1")
            .await
            .unwrap();

        // 访问令牌是新的，刷新令牌原样保留
        assert_ne!(refreshed.access_token, login.access_token);
        assert_eq!(refreshed.refresh_token, login.refresh_token);

        // 旧刷新令牌依然可用（只有登录才轮换）
        assert!(f
            .gateway
            .refresh_access_token(&login.user_id, &login.refresh_token, DeviceType::Ios, "d1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_second_login_invalidates_first_refresh_token() {
        let f = fixture();
        let first = f.gateway.login(password_login("d1")).await.unwrap();
        let second = f.gateway.login(password_login("d1")).await.unwrap();
        assert_ne!(first.refresh_token, second.refresh_token);

        assert!(matches!(
            f.gateway
                .refresh_access_token(&first.user_id, &first.refresh_token, DeviceType::Ios, "d1")
                .await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_logout_twice_rejected_second_time() {
        let f = fixture();
        let login = f.gateway.login(password_login("d1")).await.unwrap();

        f.gateway
            .logout(&login.user_id, &login.refresh_token, DeviceType::Ios, "d1")
            .await
            .unwrap();
        assert!(matches!(
            f.gateway
                .logout(&login.user_id, &login.refresh_token, DeviceType::Ios, "d1")
                .await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_refresh_fails_after_membership_loss() {
        let f = fixture();
        f.store.add_org_member("org1", &f.user_id);

        let mut request = password_login("d1");
        request.organization_id = Some("org1".into());
        let login = f.gateway.login(request).await.unwrap();

        // 组织成员关系丢失后，携带组织上下文的刷新必须失效
        f.store.remove_org_member("org1", &f.user_id);
        assert!(matches!(
            f.gateway
                .refresh_access_token(&login.user_id, &login.refresh_token, DeviceType::Ios, "d1")
                .await,
            Err(AuthError::OrganizationMembershipNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_login_rejects_foreign_organization() {
        let f = fixture();
        let mut request = password_login("d1");
        request.organization_id = Some("org-x".into());

        assert!(matches!(
            f.gateway.login(request).await,
            Err(AuthError::OrganizationMembershipNotFound(_))
        ));
    }
}
