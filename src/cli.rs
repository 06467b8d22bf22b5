use clap::{Parser, Subcommand};

impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// Passport Server - 多应用平台统一身份与会话服务
#[derive(Parser, Debug)]
#[command(name = "passport-server")]
#[command(version)]
#[command(about = "多应用平台统一身份与会话服务", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// 服务监听地址
    #[arg(long, value_name = "ADDRESS", help = "HTTP 监听地址")]
    pub host: Option<String>,

    /// HTTP 端口
    #[arg(long, value_name = "PORT", help = "HTTP 监听端口")]
    pub port: Option<u16>,

    /// 日志级别
    #[arg(long, value_name = "LEVEL", help = "日志级别: trace, debug, info, warn, error")]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: compact, pretty, json")]
    pub log_format: Option<String>,

    /// 日志文件
    #[arg(long, value_name = "FILE", help = "日志输出文件路径")]
    pub log_file: Option<String>,

    /// 静默模式
    #[arg(long, help = "静默模式，只输出错误日志")]
    pub quiet: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 执行数据库迁移后退出
    Migrate,
    /// 生成默认配置文件
    GenerateConfig {
        #[arg(long, value_name = "FILE", default_value = "config.toml")]
        path: String,
    },
    /// 校验配置文件
    ValidateConfig {
        #[arg(long, value_name = "FILE", default_value = "config.toml")]
        path: String,
    },
    /// 显示生效配置
    ShowConfig,
}
