use std::error::Error as StdError;
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

/// 认证服务错误类型
///
/// 对外（HTTP）展示时按安全策略折叠：凭证类错误一律返回同一条不透明消息，
/// 避免探测出"用户不存在"和"密码错误"的区别。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthError {
    /// 应用不存在
    ApplicationNotFound(String),
    /// 用户不存在
    UserNotFound(String),
    /// 设备不存在
    DeviceNotFound(String),
    /// 角色不存在
    RoleNotFound(String),
    /// 绑定冲突（同一应用下同类型身份已被其他用户验证绑定）
    DuplicateBinding(String),
    /// 组织成员关系不存在（设备携带的组织上下文已失效）
    OrganizationMembershipNotFound(String),
    /// 凭证错误（密码不匹配、验证码无效或过期）
    InvalidCredential,
    /// 提供方授权码无效或已过期（如微信 errcode 40029）
    InvalidProviderCode(String),
    /// 提供方授权范围不足（如缺少 snsapi_userinfo）
    InvalidProviderScope(String),
    /// 提供方接口调用失败（携带上游错误码和消息）
    ProviderApi { code: i64, message: String },
    /// 令牌格式错误（段数不对或 base64 解码失败）
    MalformedToken,
    /// 令牌签名无效
    InvalidSignature,
    /// 令牌已过期（签名验证之外的独立检查）
    TokenExpired,
    /// 刷新令牌无效（过期或与存储值不符，二者不区分）
    InvalidRefreshToken,
    /// 禁止访问（verify 路径的统一失败，不区分具体原因）
    Forbidden,
    /// 参数校验错误
    Validation(String),
    /// 配置错误（如 RSA 密钥加载失败，进程级不可恢复）
    Configuration(String),
    /// 数据库错误
    Database(String),
    /// 内部错误
    Internal(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::ApplicationNotFound(id) => write!(f, "Application not found: {}", id),
            AuthError::UserNotFound(id) => write!(f, "User not found: {}", id),
            AuthError::DeviceNotFound(id) => write!(f, "Device not found: {}", id),
            AuthError::RoleNotFound(id) => write!(f, "Role not found: {}", id),
            AuthError::DuplicateBinding(msg) => write!(f, "Duplicate binding: {}", msg),
            AuthError::OrganizationMembershipNotFound(msg) => {
                write!(f, "Organization membership not found: {}", msg)
            }
            AuthError::InvalidCredential => write!(f, "Invalid credential"),
            AuthError::InvalidProviderCode(msg) => write!(f, "Invalid provider code: {}", msg),
            AuthError::InvalidProviderScope(msg) => write!(f, "Invalid provider scope: {}", msg),
            AuthError::ProviderApi { code, message } => {
                write!(f, "Provider API error {}: {}", code, message)
            }
            AuthError::MalformedToken => write!(f, "Malformed token"),
            AuthError::InvalidSignature => write!(f, "Invalid token signature"),
            AuthError::TokenExpired => write!(f, "Token expired"),
            AuthError::InvalidRefreshToken => write!(f, "Invalid refresh token"),
            AuthError::Forbidden => write!(f, "Forbidden"),
            AuthError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AuthError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AuthError::Database(msg) => write!(f, "Database error: {}", msg),
            AuthError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AuthError {}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Internal(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AuthError>;

/// 错误代码（对外响应中携带，便于客户端分类处理）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 成功
    Success = 0,
    /// 未授权（凭证/令牌类失败统一归入此码）
    Unauthorized = 1001,
    /// 禁止访问
    Forbidden = 1002,
    /// 资源未找到
    NotFound = 1004,
    /// 冲突
    Conflict = 1005,
    /// 参数校验错误
    Validation = 1006,
    /// 上游身份提供方错误
    Provider = 2001,
    /// 数据库错误
    Database = 2002,
    /// 配置错误
    Configuration = 2003,
    /// 内部错误
    Internal = 9999,
}

impl From<&AuthError> for ErrorCode {
    fn from(error: &AuthError) -> Self {
        match error {
            AuthError::InvalidCredential
            | AuthError::UserNotFound(_)
            | AuthError::MalformedToken
            | AuthError::InvalidSignature
            | AuthError::TokenExpired
            | AuthError::InvalidRefreshToken => ErrorCode::Unauthorized,
            AuthError::Forbidden => ErrorCode::Forbidden,
            AuthError::ApplicationNotFound(_)
            | AuthError::DeviceNotFound(_)
            | AuthError::RoleNotFound(_) => ErrorCode::NotFound,
            AuthError::DuplicateBinding(_) | AuthError::OrganizationMembershipNotFound(_) => {
                ErrorCode::Conflict
            }
            AuthError::Validation(_) => ErrorCode::Validation,
            AuthError::InvalidProviderCode(_)
            | AuthError::InvalidProviderScope(_)
            | AuthError::ProviderApi { .. } => ErrorCode::Provider,
            AuthError::Database(_) => ErrorCode::Database,
            AuthError::Configuration(_) => ErrorCode::Configuration,
            AuthError::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: ErrorCode,
    /// 错误消息
    pub message: String,
    /// 时间戳
    pub timestamp: u64,
}

impl ErrorResponse {
    /// 创建错误响应（应用对外折叠策略）
    pub fn new(error: &AuthError) -> Self {
        Self {
            code: ErrorCode::from(error),
            message: public_message(error),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}

/// 对外错误消息
///
/// 凭证类错误（用户不存在 / 密码错误 / 验证码无效 / 令牌无效）返回同一条消息；
/// 提供方错误返回通用描述；内部错误和数据库错误不泄露细节。
fn public_message(error: &AuthError) -> String {
    match error {
        AuthError::InvalidCredential
        | AuthError::UserNotFound(_)
        | AuthError::MalformedToken
        | AuthError::InvalidSignature
        | AuthError::TokenExpired
        | AuthError::InvalidRefreshToken => "账号或凭证不正确".to_string(),
        AuthError::Forbidden => "禁止访问".to_string(),
        AuthError::InvalidProviderCode(_)
        | AuthError::InvalidProviderScope(_)
        | AuthError::ProviderApi { .. } => "第三方登录服务暂时不可用，请稍后重试".to_string(),
        AuthError::Database(_) | AuthError::Internal(_) | AuthError::Configuration(_) => {
            "服务内部错误".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status_code = match &self {
            AuthError::InvalidCredential
            | AuthError::UserNotFound(_)
            | AuthError::MalformedToken
            | AuthError::InvalidSignature
            | AuthError::TokenExpired
            | AuthError::InvalidRefreshToken => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::ApplicationNotFound(_)
            | AuthError::DeviceNotFound(_)
            | AuthError::RoleNotFound(_) => StatusCode::NOT_FOUND,
            AuthError::DuplicateBinding(_) | AuthError::OrganizationMembershipNotFound(_) => {
                StatusCode::CONFLICT
            }
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidProviderCode(_)
            | AuthError::InvalidProviderScope(_)
            | AuthError::ProviderApi { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error_response = ErrorResponse::new(&self);
        (status_code, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_errors_share_public_message() {
        // 密码错误和用户不存在对外必须不可区分
        let a = public_message(&AuthError::InvalidCredential);
        let b = public_message(&AuthError::UserNotFound("u123".to_string()));
        assert_eq!(a, b);

        // 但内部错误类型保持可区分
        assert_ne!(
            ErrorCode::from(&AuthError::ApplicationNotFound("x".into())),
            ErrorCode::from(&AuthError::InvalidCredential),
        );
    }

    #[test]
    fn test_internal_detail_not_leaked() {
        let err = AuthError::Database("connection refused at 10.0.0.3:5432".to_string());
        let msg = public_message(&err);
        assert!(!msg.contains("10.0.0.3"));
    }
}
