/// 密码哈希与验证
///
/// 使用 bcrypt，盐内嵌在哈希输出里，存进密码绑定的 credential 列。
/// 修改密码 = 整串哈希替换。
use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::{AuthError, Result};

/// 密码哈希成本（bcrypt 默认 12）
pub const PASSWORD_COST: u32 = DEFAULT_COST;

/// 哈希明文密码
pub fn hash_password(password: &str) -> Result<String> {
    hash(password, PASSWORD_COST).map_err(|e| AuthError::Internal(format!("密码哈希失败: {}", e)))
}

/// 核对明文密码与存储哈希
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    verify(password, stored_hash)
        .map_err(|e| AuthError::Internal(format!("密码验证失败: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("secret123").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("secret123", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_same_password_different_hash() {
        // 盐不同，同一密码两次哈希结果不同
        let h1 = hash_password("secret123").unwrap();
        let h2 = hash_password("secret123").unwrap();
        assert_ne!(h1, h2);
        assert!(verify_password("secret123", &h1).unwrap());
        assert!(verify_password("secret123", &h2).unwrap());
    }
}
