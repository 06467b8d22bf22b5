// HTTP 服务 - 薄封送层
//
// 只做请求/响应映射，业务全部在网关里。错误到状态码的折叠规则见 error.rs。

pub mod routes;

pub use routes::{router, AppState};
