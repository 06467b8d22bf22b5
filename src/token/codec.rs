//! RS256 令牌编解码器
//!
//! 持有一对启动时从 PEM 文件加载的 RSA 密钥，之后只读，可被任意并发的
//! 签名/验签调用共享。令牌即三段式 JWT：base64url(header).base64url(payload).base64url(signature)。
//!
//! 注意：验签和过期检查是两个独立步骤。这里的 `verify` 只验证签名，
//! 过期由调用方（网关）按注入时钟单独判断，格式正确但过期的令牌在
//! 这一层是验签通过的。

use std::collections::HashSet;
use std::path::Path;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AuthError, Result};

/// RSA 密钥对编解码器
pub struct RsaTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    header: Header,
    validation: Validation,
}

impl RsaTokenCodec {
    /// 从 PEM 字节创建
    pub fn from_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self> {
        let encoding = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| AuthError::Configuration(format!("加载 RSA 私钥失败: {}", e)))?;
        let decoding = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| AuthError::Configuration(format!("加载 RSA 公钥失败: {}", e)))?;

        // 过期不在这一层校验（validate_exp 关闭，exp 也不是必填声明）
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        validation.leeway = 0;

        Ok(Self {
            encoding,
            decoding,
            header: Header::new(Algorithm::RS256),
            validation,
        })
    }

    /// 从 PEM 文件加载（两份文件任一读不到都是配置级失败，进程不应继续）
    pub fn from_pem_files<P: AsRef<Path>>(private_path: P, public_path: P) -> Result<Self> {
        let private_pem = std::fs::read(&private_path).map_err(|e| {
            AuthError::Configuration(format!(
                "读取 RSA 私钥文件 {} 失败: {}",
                private_path.as_ref().display(),
                e
            ))
        })?;
        let public_pem = std::fs::read(&public_path).map_err(|e| {
            AuthError::Configuration(format!(
                "读取 RSA 公钥文件 {} 失败: {}",
                public_path.as_ref().display(),
                e
            ))
        })?;
        Self::from_pem(&private_pem, &public_pem)
    }

    /// 序列化并签名
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        encode(&self.header, claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("令牌签名失败: {}", e)))
    }

    /// 验签并反序列化（不做过期检查）
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let data = decode::<T>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName => AuthError::InvalidSignature,
                // 段数不对、base64/JSON 解码失败等一律视为格式错误
                _ => AuthError::MalformedToken,
            }
        })?;
        Ok(data.claims)
    }
}
