use filemanager_rust::{
    config::{BackendKind, LogConfig, PathValidator},
    logging, server, AppConfig, AppState,
};
use tracing::info;

const CONFIG_PATH: &str = "config/app.toml";

/// 加载日志配置
///
/// 日志需要在完整配置之前初始化，这里只读取 [log] 段，失败时返回默认配置
async fn load_log_config() -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(CONFIG_PATH).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 先初始化日志（必须保持 _log_guard 存活）
    let log_config = load_log_config().await;
    let _log_guard = logging::init_logging(&log_config);

    info!("FileManager Rust v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(CONFIG_PATH).await;

    if config.storage.backend == BackendKind::Local {
        PathValidator::validate_or_error(&config.storage.root, config.security.read_only)?;
        info!("存储根目录: {:?}", config.storage.root);
    } else {
        info!(
            "对象存储: endpoint={}, bucket={}, prefix={:?}",
            config.storage.object_store.endpoint,
            config.storage.object_store.bucket,
            config.storage.object_store.prefix
        );
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config)?;
    info!("应用状态初始化完成 (后端: {})", app_state.file_manager.backend_name());

    let app = server::build_router(app_state);

    info!("服务器启动在: http://{}", addr);
    info!("连接器: http://{}/api/filemanager", addr);
    info!("健康检查: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // 使用 select! 监听关闭信号
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("服务器错误: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，开始关闭...");
        }
    }

    info!("应用已安全退出");

    Ok(())
}
