// 身份提供方客户端
//
// 每个客户端只做"换取外部身份"这一步：拿授权码调提供方的 token/userinfo
// 接口，换回稳定的外部身份标识和资料。传输或提供方错误一律立即上抛为
// 解析失败，这一层没有任何自动重试。

pub mod code;
pub mod google;
pub mod qy_wechat;
pub mod wechat;

pub use code::VerificationCodes;
pub use google::{GoogleClient, GoogleIdClaims, GoogleUserInfo};
pub use qy_wechat::{QyWechatClient, QyWechatUser};
pub use wechat::{JsCodeSession, WechatClient, WechatOauthToken, WechatUserInfo};
