//! 账号解析器
//!
//! 把一个已验证的外部身份映射到恰好一个内部用户：存在则返回（顺带刷新
//! 可变资料），不存在则创建。并发首登的正确性由查-建协议保证：整个协议
//! 运行在一个数据库事务里，先获取身份租约再查再建。
//!
//! 提供方交换（code 换身份）发生在事务开启之前——租约绝不能跨外部网络
//! 调用持有。交换失败立即上抛，这一层没有重试。

pub mod merge;
pub mod password;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{AuthError, Result};
use crate::model::{
    Application, Binding, BindingKind, Platform, PlatformId, User, UserAggregate,
};
use crate::provider::{GoogleClient, QyWechatClient, VerificationCodes, WechatClient};
use crate::repository::lease::{ordered_pair, LeaseKey};
use crate::repository::{IdentityStore, ResolveTx};
use merge::MergeOutcome;
use password::verify_password;

/// 登录凭证（按提供方区分）
#[derive(Debug, Clone)]
pub enum LoginCredential {
    /// 微信网页授权
    WechatWeb { code: String },
    /// 微信小程序（可携带手机号授权码做联登）
    WechatMiniProgram {
        js_code: String,
        phone_code: Option<String>,
    },
    /// 企业微信
    QyWechat { code: String },
    /// Google OAuth
    Google { code: String },
    /// 用户名密码
    Password { username: String, password: String },
    /// 手机验证码
    PhoneCode { phone: String, code: String },
    /// 邮箱验证码
    EmailCode { email: String, code: String },
}

/// 提供方交换得到的外部资料
#[derive(Debug, Clone)]
pub struct ExternalProfile {
    pub kind: BindingKind,
    pub identity: String,
    /// 提供方给出的昵称（缺省时自动生成 user_xxxxx）
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
}

impl ExternalProfile {
    /// 只有身份、没有资料的最小形态（手机号/邮箱验证码登录）
    pub fn bare(kind: BindingKind, identity: &str) -> Self {
        Self {
            kind,
            identity: identity.to_string(),
            username: None,
            avatar: None,
            email: None,
            department: None,
        }
    }
}

/// 账号解析器
pub struct AccountResolver {
    store: Arc<dyn IdentityStore>,
    wechat: Arc<WechatClient>,
    qy_wechat: Arc<QyWechatClient>,
    google: Arc<GoogleClient>,
    codes: Arc<VerificationCodes>,
    clock: Arc<dyn Clock>,
}

impl AccountResolver {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        wechat: Arc<WechatClient>,
        qy_wechat: Arc<QyWechatClient>,
        google: Arc<GoogleClient>,
        codes: Arc<VerificationCodes>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, wechat, qy_wechat, google, codes, clock }
    }

    /// 按凭证类型分派解析
    pub async fn resolve(
        &self,
        app: &Application,
        credential: &LoginCredential,
        referral: Option<&str>,
    ) -> Result<UserAggregate> {
        match credential {
            LoginCredential::WechatWeb { code } => self.resolve_wechat_web(app, code, referral).await,
            LoginCredential::WechatMiniProgram { js_code, phone_code } => {
                self.resolve_miniprogram(app, js_code, phone_code.as_deref(), referral)
                    .await
            }
            LoginCredential::QyWechat { code } => self.resolve_qy_wechat(app, code, referral).await,
            LoginCredential::Google { code } => self.resolve_google(app, code, referral).await,
            LoginCredential::Password { username, password } => {
                self.resolve_password(app, username, password).await
            }
            LoginCredential::PhoneCode { phone, code } => {
                self.resolve_phone_code(app, phone, code, referral).await
            }
            LoginCredential::EmailCode { email, code } => {
                self.resolve_email_code(app, email, code, referral).await
            }
        }
    }

    // ── 各提供方流程：先交换（无事务、无租约），再进锁定协议 ──

    async fn resolve_wechat_web(
        &self,
        app: &Application,
        code: &str,
        referral: Option<&str>,
    ) -> Result<UserAggregate> {
        let cred = app.wechat_credential()?;
        let token = self
            .wechat
            .oauth_access_token(&cred.app_id, &cred.secret, code)
            .await?;
        let info = self.wechat.userinfo(&token.access_token, &token.openid).await?;

        // unionid 是跨应用稳定身份，缺失时退回 openid
        let identity = info
            .unionid
            .clone()
            .or(token.unionid)
            .unwrap_or_else(|| info.openid.clone());

        let profile = ExternalProfile {
            kind: BindingKind::Wechat,
            identity,
            username: (!info.nickname.is_empty()).then(|| info.nickname.clone()),
            avatar: info.headimgurl.clone(),
            email: None,
            department: None,
        };
        self.resolve_external(app, profile, referral).await
    }

    async fn resolve_miniprogram(
        &self,
        app: &Application,
        js_code: &str,
        phone_code: Option<&str>,
        referral: Option<&str>,
    ) -> Result<UserAggregate> {
        let cred = app.miniprogram_credential()?;
        let session = self
            .wechat
            .jscode2session(&cred.app_id, &cred.secret, js_code)
            .await?;

        // 手机号授权码在进事务之前换好
        let phone = match phone_code {
            Some(pc) => {
                let app_token = self
                    .wechat
                    .app_access_token(&cred.app_id, &cred.secret)
                    .await?;
                Some(self.wechat.user_phone_number(&app_token, pc).await?)
            }
            None => None,
        };

        let identity = session
            .unionid
            .clone()
            .unwrap_or_else(|| session.openid.clone());
        let profile = ExternalProfile::bare(BindingKind::Wechat, &identity);
        let platform = Some((Platform::WechatMiniProgram, session.openid.clone()));

        self.resolve_linked(app, profile, phone, platform, referral).await
    }

    async fn resolve_qy_wechat(
        &self,
        app: &Application,
        code: &str,
        referral: Option<&str>,
    ) -> Result<UserAggregate> {
        let cred = app.qy_wechat_credential()?;
        let token = self.qy_wechat.gettoken(&cred.corp_id, &cred.secret).await?;
        let userid = self.qy_wechat.userid_from_code(&token, code).await?;
        let detail = self.qy_wechat.user_get(&token, &userid).await?;

        let profile = ExternalProfile {
            kind: BindingKind::QyWechat,
            identity: userid.clone(),
            username: (!detail.name.is_empty()).then(|| detail.name.clone()),
            avatar: detail.avatar.clone(),
            email: None,
            department: detail.department.first().map(|d| d.to_string()),
        };
        let platform = Some((Platform::QyWechat, userid));

        self.resolve_linked(app, profile, detail.mobile.clone(), platform, referral)
            .await
    }

    async fn resolve_google(
        &self,
        app: &Application,
        code: &str,
        referral: Option<&str>,
    ) -> Result<UserAggregate> {
        let cred = app.google_credential()?;
        let exchange = self
            .google
            .exchange_code(&cred.client_id, &cred.client_secret, &cred.redirect_uri, code)
            .await?;
        let info = self.google.userinfo(&exchange.access_token).await?;

        let profile = ExternalProfile {
            kind: BindingKind::Google,
            identity: info.sub.clone(),
            username: info.name.clone().or(exchange.id_claims.name),
            avatar: info.picture.clone().or(exchange.id_claims.picture),
            email: info.email.clone().or(exchange.id_claims.email),
            department: None,
        };
        self.resolve_external(app, profile, referral).await
    }

    /// 密码登录：纯查找校验，永不创建
    pub async fn resolve_password(
        &self,
        app: &Application,
        username: &str,
        password: &str,
    ) -> Result<UserAggregate> {
        let user = self
            .store
            .find_user_by_username(&app.id, username)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;

        // 密码绑定缺失或未验证同样按用户不存在处理
        let binding = self
            .store
            .find_binding_for_user(&user.id, BindingKind::Password)
            .await?
            .filter(|b| b.verified)
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;
        let stored_hash = binding
            .credential
            .as_deref()
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;

        if !verify_password(password, stored_hash)? {
            return Err(AuthError::InvalidCredential);
        }

        self.load_aggregate(user).await
    }

    async fn resolve_phone_code(
        &self,
        app: &Application,
        phone: &str,
        code: &str,
        referral: Option<&str>,
    ) -> Result<UserAggregate> {
        if !self.codes.verify(&app.id, phone, code).await {
            return Err(AuthError::InvalidCredential);
        }
        self.resolve_external(app, ExternalProfile::bare(BindingKind::Phone, phone), referral)
            .await
    }

    async fn resolve_email_code(
        &self,
        app: &Application,
        email: &str,
        code: &str,
        referral: Option<&str>,
    ) -> Result<UserAggregate> {
        if !self.codes.verify(&app.id, email, code).await {
            return Err(AuthError::InvalidCredential);
        }
        let mut profile = ExternalProfile::bare(BindingKind::Email, email);
        profile.email = Some(email.to_string());
        self.resolve_external(app, profile, referral).await
    }

    // ── 核心协议 ──

    /// 单身份查-建协议（一个事务：租约 → 查绑定 → 返回或创建）
    pub async fn resolve_external(
        &self,
        app: &Application,
        profile: ExternalProfile,
        referral: Option<&str>,
    ) -> Result<UserAggregate> {
        let mut tx = self.store.begin().await?;
        let key = LeaseKey::new(&app.id, profile.kind, &profile.identity);
        tx.lease_identity(&key).await?;

        let now = self.clock.now();
        let user = match tx.find_user_by_binding(&key).await? {
            Some(mut user) => {
                if refresh_profile(&mut user, &profile, now) {
                    tx.update_user(&user).await?;
                }
                user
            }
            None => {
                let user = self
                    .create_user_with_bindings(
                        tx.as_mut(),
                        app,
                        &profile,
                        None,
                        None,
                        referral,
                    )
                    .await?;
                info!(
                    "创建新用户: user_id={}, kind={}, app={}",
                    user.id,
                    profile.kind.as_str(),
                    app.id
                );
                user
            }
        };

        tx.commit().await?;
        self.load_aggregate(user).await
    }

    /// 双身份合并协议（租约按全局约定顺序获取，见 repository::lease）
    pub async fn resolve_linked(
        &self,
        app: &Application,
        primary: ExternalProfile,
        phone: Option<String>,
        platform: Option<(Platform, String)>,
        referral: Option<&str>,
    ) -> Result<UserAggregate> {
        let mut tx = self.store.begin().await?;

        let primary_key = LeaseKey::new(&app.id, primary.kind, &primary.identity);
        let phone_key = phone
            .as_deref()
            .map(|p| LeaseKey::new(&app.id, BindingKind::Phone, p));

        match &phone_key {
            Some(secondary) => {
                for key in ordered_pair(&primary_key, secondary) {
                    tx.lease_identity(key).await?;
                }
            }
            None => tx.lease_identity(&primary_key).await?,
        }

        let now = self.clock.now();
        let primary_user = tx.find_user_by_binding(&primary_key).await?;
        let phone_user = match &phone_key {
            Some(key) => tx.find_user_by_binding(key).await?,
            None => None,
        };

        let user = match MergeOutcome::classify(primary_user, phone_user) {
            MergeOutcome::BothSame(mut user) => {
                self.ensure_platform_id(tx.as_mut(), &user.id, &platform, now).await?;
                if refresh_profile(&mut user, &primary, now) {
                    tx.update_user(&user).await?;
                }
                user
            }
            MergeOutcome::BothDifferent { primary: user, secondary_user_id } => {
                // 数据不一致：微信发起的登录以微信侧为准，只记录，不纠正
                warn!(
                    "双身份分属不同用户: app={}, {}={}, phone_user={}, 采用 {}",
                    app.id,
                    primary.kind.as_str(),
                    user.id,
                    secondary_user_id,
                    user.id
                );
                user
            }
            MergeOutcome::OnlyPrimary(mut user) => {
                if let Some(key) = &phone_key {
                    let binding =
                        Binding::verified(&app.id, &user.id, BindingKind::Phone, &key.identity, now);
                    tx.create_binding(&binding).await?;
                    info!("补挂手机号绑定: user_id={}", user.id);
                }
                self.ensure_platform_id(tx.as_mut(), &user.id, &platform, now).await?;
                if refresh_profile(&mut user, &primary, now) {
                    tx.update_user(&user).await?;
                }
                user
            }
            MergeOutcome::OnlySecondary(user) => {
                let binding =
                    Binding::verified(&app.id, &user.id, primary.kind, &primary.identity, now);
                tx.create_binding(&binding).await?;
                self.ensure_platform_id(tx.as_mut(), &user.id, &platform, now).await?;
                info!(
                    "向手机号用户补挂 {} 绑定: user_id={}",
                    primary.kind.as_str(),
                    user.id
                );
                user
            }
            MergeOutcome::Neither => {
                let user = self
                    .create_user_with_bindings(
                        tx.as_mut(),
                        app,
                        &primary,
                        phone.as_deref(),
                        platform.as_ref(),
                        referral,
                    )
                    .await?;
                info!(
                    "创建新用户（双身份）: user_id={}, kind={}, app={}",
                    user.id,
                    primary.kind.as_str(),
                    app.id
                );
                user
            }
        };

        tx.commit().await?;
        self.load_aggregate(user).await
    }

    /// 一次写入创建用户及其全部绑定/平台附属ID
    async fn create_user_with_bindings(
        &self,
        tx: &mut dyn ResolveTx,
        app: &Application,
        profile: &ExternalProfile,
        phone: Option<&str>,
        platform: Option<&(Platform, String)>,
        referral: Option<&str>,
    ) -> Result<User> {
        let now = self.clock.now();
        let username = match &profile.username {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.generate_username(tx, &app.id).await?,
        };

        let mut user = User::new(
            &app.id,
            username,
            profile.avatar.clone(),
            referral.map(str::to_string),
            now,
        );
        user.department = profile.department.clone();
        tx.create_user(&user).await?;

        let mut binding = Binding::verified(&app.id, &user.id, profile.kind, &profile.identity, now);
        binding.email = profile.email.clone();
        tx.create_binding(&binding).await?;

        if let Some(phone) = phone {
            let phone_binding =
                Binding::verified(&app.id, &user.id, BindingKind::Phone, phone, now);
            tx.create_binding(&phone_binding).await?;
        }

        if let Some((platform, value)) = platform {
            tx.create_platform_id(&PlatformId {
                user_id: user.id.clone(),
                platform: *platform,
                value: value.clone(),
                created_at: now,
            })
            .await?;
        }

        Ok(user)
    }

    /// 平台附属ID懒创建（每用户每平台至多一条）
    async fn ensure_platform_id(
        &self,
        tx: &mut dyn ResolveTx,
        user_id: &str,
        platform: &Option<(Platform, String)>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let Some((platform, value)) = platform else {
            return Ok(());
        };
        if tx.find_platform_id(user_id, *platform).await?.is_none() {
            tx.create_platform_id(&PlatformId {
                user_id: user_id.to_string(),
                platform: *platform,
                value: value.clone(),
                created_at: now,
            })
            .await?;
            debug!("补挂平台附属ID: user_id={}, platform={}", user_id, platform.as_str());
        }
        Ok(())
    }

    /// 生成 user_<5位随机> 形式的用户名，应用内查重，冲突则重新生成
    async fn generate_username(&self, tx: &mut dyn ResolveTx, app_id: &str) -> Result<String> {
        for _ in 0..32 {
            let candidate = format!("user_{}", random_suffix(5));
            if !tx.username_taken(app_id, &candidate).await? {
                return Ok(candidate);
            }
            debug!("用户名冲突，重新生成: {}", candidate);
        }
        Err(AuthError::Internal("用户名生成连续冲突".to_string()))
    }

    /// 重载用户聚合（绑定、平台附属ID、个人角色）
    async fn load_aggregate(&self, user: User) -> Result<UserAggregate> {
        let bindings = self.store.list_bindings(&user.id).await?;
        let platform_ids = self.store.list_platform_ids(&user.id).await?;
        let role = self.store.personal_role(&user.id).await?;
        Ok(UserAggregate { user, bindings, platform_ids, role })
    }
}

/// 用提供方资料刷新可变字段，返回是否有变化
fn refresh_profile(
    user: &mut User,
    profile: &ExternalProfile,
    now: chrono::DateTime<chrono::Utc>,
) -> bool {
    let mut changed = false;
    if let Some(name) = &profile.username {
        if !name.is_empty() && user.username != *name {
            user.username = name.clone();
            changed = true;
        }
    }
    if let Some(avatar) = &profile.avatar {
        if user.avatar.as_deref() != Some(avatar) {
            user.avatar = Some(avatar.clone());
            changed = true;
        }
    }
    if let Some(department) = &profile.department {
        if user.department.as_deref() != Some(department) {
            user.department = Some(department.clone());
            changed = true;
        }
    }
    if changed {
        user.updated_at = now;
    }
    changed
}

/// 小写字母+数字的随机后缀
fn random_suffix(len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    (0..len)
        .map(|_| CHARSET[fastrand::usize(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::memory::MemoryIdentityStore;
    use chrono::Utc;
    use std::time::Duration;

    fn test_app() -> Application {
        Application {
            id: "app1".into(),
            name: "demo-app".into(),
            wechat: None,
            wechat_miniprogram: None,
            qy_wechat: None,
            google: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn resolver(store: MemoryIdentityStore) -> AccountResolver {
        AccountResolver::new(
            Arc::new(store),
            Arc::new(WechatClient::new()),
            Arc::new(QyWechatClient::new()),
            Arc::new(GoogleClient::new()),
            Arc::new(VerificationCodes::new(Duration::from_secs(300))),
            Arc::new(ManualClock::at_system_time()),
        )
    }

    #[test]
    fn test_random_suffix_shape() {
        let s = random_suffix(5);
        assert_eq!(s.len(), 5);
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_first_login_creates_user_with_generated_username() {
        let store = MemoryIdentityStore::new();
        let resolver = resolver(store.clone());
        let app = test_app();

        let aggregate = resolver
            .resolve_external(&app, ExternalProfile::bare(BindingKind::Phone, "+8613800000000"), None)
            .await
            .unwrap();

        assert!(aggregate.user.username.starts_with("user_"));
        assert_eq!(aggregate.user.username.len(), "user_".len() + 5);
        assert!(aggregate.has_binding(BindingKind::Phone));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_repeat_login_returns_same_user_and_refreshes_profile() {
        let store = MemoryIdentityStore::new();
        let resolver = resolver(store.clone());
        let app = test_app();

        let first = resolver
            .resolve_external(
                &app,
                ExternalProfile {
                    kind: BindingKind::Wechat,
                    identity: "U1".into(),
                    username: Some("阿黄".into()),
                    avatar: Some("https://a/1.png".into()),
                    email: None,
                    department: None,
                },
                Some("ads-q3"),
            )
            .await
            .unwrap();
        assert_eq!(first.user.referral_channel.as_deref(), Some("ads-q3"));

        // 昵称换了，再登录
        let second = resolver
            .resolve_external(
                &app,
                ExternalProfile {
                    kind: BindingKind::Wechat,
                    identity: "U1".into(),
                    username: Some("老黄".into()),
                    avatar: Some("https://a/1.png".into()),
                    email: None,
                    department: None,
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(second.user.id, first.user.id);
        assert_eq!(second.user.username, "老黄");
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_password_login_boundaries() {
        let store = MemoryIdentityStore::new();
        let now = Utc::now();
        let user = User::new("app1", "alice".into(), None, None, now);
        let user_id = user.id.clone();
        store.insert_user(user);
        let mut binding = Binding::verified("app1", &user_id, BindingKind::Password, "alice", now);
        binding.credential = Some(password::hash_password("secret123").unwrap());
        store.insert_binding(binding);

        let resolver = resolver(store);
        let app = test_app();

        // 正确密码
        let ok = resolver.resolve_password(&app, "alice", "secret123").await.unwrap();
        assert_eq!(ok.user.id, user_id);

        // 密码不匹配 → InvalidCredential（不是 NotFound）
        assert!(matches!(
            resolver.resolve_password(&app, "alice", "wrong").await,
            Err(AuthError::InvalidCredential)
        ));

        // 用户不存在 → UserNotFound
        assert!(matches!(
            resolver.resolve_password(&app, "nobody", "secret123").await,
            Err(AuthError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_password_login_never_creates_users() {
        let store = MemoryIdentityStore::new();
        let resolver = resolver(store.clone());
        let app = test_app();

        let _ = resolver.resolve_password(&app, "ghost", "pw").await;
        assert_eq!(store.user_count(), 0);
    }
}
