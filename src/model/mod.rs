// 数据模型 - 身份域核心实体

pub mod application;
pub mod binding;
pub mod device;
pub mod id;
pub mod role;
pub mod user;

pub use application::{Application, GoogleCredential, QyWechatCredential, WechatCredential};
pub use binding::{Binding, BindingKind, Platform, PlatformId};
pub use device::{Device, DeviceType};
pub use role::Role;
pub use user::{User, UserAggregate};
