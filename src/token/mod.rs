// 令牌模块 - RS256 编解码与访问令牌签发

pub mod claims;
pub mod codec;
pub mod issuer;

pub use claims::{AccessClaims, TOKEN_TYPE_ACCESS};
pub use codec::RsaTokenCodec;
pub use issuer::TokenIssuer;
