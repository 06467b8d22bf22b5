use serde::{Deserialize, Serialize};

/// 角色 - 用户的个人角色与其权限范围
///
/// 角色/权限的增删改由独立的 RBAC 模块负责，这里只读：
/// 登录和刷新时查出个人角色写进访问令牌。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// 角色名
    pub name: String,
    /// 权限范围名列表
    pub scopes: Vec<String>,
}
