use std::fs;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use passport_server::{
    cli::{Cli, Commands},
    clock::SystemClock,
    config::{self, ServerConfig},
    http::{self, AppState},
    logging,
    provider::{GoogleClient, QyWechatClient, VerificationCodes, WechatClient},
    repository::pg::{self, PgIdentityStore},
    AccountResolver, AuthGateway, RsaTokenCodec, SessionManager, TokenIssuer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            Commands::Migrate => {
                return run_migrate(&cli).await;
            }
            Commands::GenerateConfig { path } => {
                return generate_config(path);
            }
            Commands::ValidateConfig { path } => {
                return validate_config(path);
            }
            Commands::ShowConfig => {
                return show_config(&cli);
            }
        }
    }

    // 快速读取配置文件里的日志段（不做完整校验）
    let (early_level, early_format, early_file) =
        config::load_early_logging(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > config.toml > 默认值）
    let log_level = cli.log_level.clone().unwrap_or(early_level);
    let log_format = cli.log_format.clone().or(early_format);
    let log_file = cli.log_file.clone().or(early_file);

    let _log_guard =
        logging::init_logging(&log_level, log_format.as_deref(), log_file.as_deref(), cli.quiet)?;

    tracing::info!("🚀 Passport Server starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = ServerConfig::load(&cli).context("加载配置失败")?;

    tracing::info!("📊 Server Configuration:");
    tracing::info!("  - Listen: {}:{}", config.host, config.port);
    tracing::info!("  - Access Token TTL: {}s", config.access_token_ttl);
    tracing::info!("  - Refresh Token TTL: {}s", config.refresh_token_ttl);
    tracing::info!("  - RSA Private Key: {}", config.rsa_private_key_path);
    tracing::info!("  - RSA Public Key: {}", config.rsa_public_key_path);
    tracing::info!("  - Log Level: {}", config.log_level);
    if let Some(port) = config.metrics_port {
        tracing::info!("  - Metrics Port: {}", port);
    }

    // RSA 密钥对：任一加载失败都是致命错误，直接退出
    let codec = match RsaTokenCodec::from_pem_files(
        &config.rsa_private_key_path,
        &config.rsa_public_key_path,
    ) {
        Ok(codec) => Arc::new(codec),
        Err(e) => {
            tracing::error!("❌ RSA 密钥加载失败: {}", e);
            process::exit(1);
        }
    };

    // 数据库连接 + 迁移（幂等）
    let pool = match pg::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("❌ 数据库初始化失败: {}", e);
            process::exit(1);
        }
    };
    pg::run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("数据库迁移失败: {}", e))?;

    // Prometheus 指标
    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("启动指标监听失败")?;
        tracing::info!("📈 Prometheus 指标已启动: 0.0.0.0:{}", port);
    }

    // 装配组件
    let store = Arc::new(PgIdentityStore::new(pool));
    let clock = Arc::new(SystemClock);

    let wechat = Arc::new(match &config.wechat_api_base {
        Some(base) => WechatClient::with_api_base(base.clone()),
        None => WechatClient::new(),
    });
    let qy_wechat = Arc::new(match &config.qy_wechat_api_base {
        Some(base) => QyWechatClient::with_api_base(base.clone()),
        None => QyWechatClient::new(),
    });
    let google = Arc::new(match (&config.google_token_endpoint, &config.google_userinfo_endpoint) {
        (Some(token), Some(userinfo)) => {
            GoogleClient::with_endpoints(token.clone(), userinfo.clone())
        }
        _ => GoogleClient::new(),
    });
    let codes = Arc::new(VerificationCodes::new(Duration::from_secs(
        config.verification_code_ttl,
    )));

    let resolver = AccountResolver::new(
        store.clone(),
        wechat,
        qy_wechat,
        google,
        codes,
        clock.clone(),
    );
    let sessions = SessionManager::new(store.clone(), clock.clone(), config.refresh_token_ttl);
    let issuer = TokenIssuer::new(codec, config.access_token_ttl, clock.clone());
    let gateway = AuthGateway::new(store, resolver, sessions, issuer, clock);

    // 启动 HTTP 服务
    let app = http::router(AppState { gateway: Arc::new(gateway) });
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听 {} 失败", addr))?;

    tracing::info!("✅ HTTP 服务已启动: {}", addr);
    axum::serve(listener, app).await.context("HTTP 服务异常退出")?;

    Ok(())
}

/// migrate 子命令：执行迁移后退出
async fn run_migrate(cli: &Cli) -> Result<()> {
    let config = ServerConfig::load(cli).context("加载配置失败")?;
    let pool = pg::connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    pg::run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    println!("数据库迁移完成");
    Ok(())
}

/// generate-config 子命令
fn generate_config(path: &str) -> Result<()> {
    anyhow::ensure!(
        !std::path::Path::new(path).exists(),
        "文件已存在，拒绝覆盖: {}",
        path
    );
    fs::write(path, ServerConfig::default_toml())
        .with_context(|| format!("写入 {} 失败", path))?;
    println!("已生成默认配置: {}", path);
    Ok(())
}

/// validate-config 子命令
fn validate_config(path: &str) -> Result<()> {
    let config = ServerConfig::from_file(std::path::Path::new(path))?;
    config.validate()?;
    println!("配置文件有效: {}", path);
    Ok(())
}

/// show-config 子命令
fn show_config(cli: &Cli) -> Result<()> {
    let config = ServerConfig::load(cli)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
