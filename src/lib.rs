pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod logging;
pub mod model;
pub mod provider;
pub mod repository;
pub mod resolver;
pub mod session;
pub mod token;

pub use config::ServerConfig;
pub use error::{AuthError, Result};
pub use gateway::{AuthGateway, LoginRequest, LoginResult, UserInfo};
pub use model::*;
pub use resolver::{AccountResolver, LoginCredential};
pub use session::SessionManager;
pub use token::{AccessClaims, RsaTokenCodec, TokenIssuer};
