// 配置管理模块

pub mod path_validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

pub use path_validator::{PathValidator, RootProblem};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 存储后端配置
    #[serde(default)]
    pub storage: StorageConfig,
    /// 安全策略配置
    #[serde(default)]
    pub security: SecurityConfig,
    /// 图片处理配置
    #[serde(default)]
    pub images: ImagesConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 通用选项
    #[serde(default)]
    pub options: OptionsConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_server_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// 请求体上限（字节），超过的上传请求直接拒绝
    #[serde(default = "default_max_body_size")]
    pub max_body_size: u64,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    18890
}

fn default_max_body_size() -> u64 {
    64 * 1024 * 1024 // 64MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// 存储后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// 本地磁盘
    #[default]
    Local,
    /// HTTP 对象存储
    ObjectStore,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 后端类型
    #[serde(default)]
    pub backend: BackendKind,
    /// 本地存储根目录
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// 对象存储配置（backend = "object_store" 时生效）
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("userfiles")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            root: default_storage_root(),
            object_store: ObjectStoreConfig::default(),
        }
    }
}

/// 对象存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// 服务地址，如 https://storage.example.com
    #[serde(default)]
    pub endpoint: String,
    /// 存储桶
    #[serde(default)]
    pub bucket: String,
    /// 键前缀（相当于存储根目录）
    #[serde(default)]
    pub prefix: String,
    /// Bearer 访问令牌
    #[serde(default)]
    pub access_token: Option<String>,
    /// 请求超时（秒）
    #[serde(default = "default_object_store_timeout")]
    pub timeout_secs: u64,
}

fn default_object_store_timeout() -> u64 {
    60
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            prefix: String::new(),
            access_token: None,
            timeout_secs: default_object_store_timeout(),
        }
    }
}

/// 列表策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum PolicyMode {
    AllowList,
    DisallowList,
    /// 无法识别的策略值，一律拒绝
    Invalid,
}

impl From<String> for PolicyMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ALLOW_LIST" => Self::AllowList,
            "DISALLOW_LIST" => Self::DisallowList,
            _ => Self::Invalid,
        }
    }
}

impl From<PolicyMode> for String {
    fn from(mode: PolicyMode) -> Self {
        match mode {
            PolicyMode::AllowList => "ALLOW_LIST",
            PolicyMode::DisallowList => "DISALLOW_LIST",
            PolicyMode::Invalid => "INVALID",
        }
        .to_string()
    }
}

/// 限制规则（扩展名或路径模式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictionConfig {
    pub policy: PolicyMode,
    #[serde(default = "default_true")]
    pub ignore_case: bool,
    #[serde(default)]
    pub restrictions: Vec<String>,
}

/// 安全配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// 只读模式：禁止任何写操作（包括生成缩略图）
    #[serde(default)]
    pub read_only: bool,
    /// 规范化新建文件/文件夹名
    #[serde(default = "default_true")]
    pub normalize_filename: bool,
    /// 扩展名规则
    #[serde(default = "default_extension_rules")]
    pub extensions: RestrictionConfig,
    /// 路径模式规则
    #[serde(default = "default_pattern_rules")]
    pub patterns: RestrictionConfig,
}

fn default_true() -> bool {
    true
}

fn default_extension_rules() -> RestrictionConfig {
    let restrictions = [
        "", "jpg", "jpe", "jpeg", "gif", "png", "svg", "txt", "pdf", "odp", "ods", "odt", "rtf",
        "doc", "docx", "xls", "xlsx", "ppt", "pptx", "csv", "ogv", "avi", "mkv", "mp4", "webm",
        "m4v", "ogg", "mp3", "wav", "zip", "md",
    ];
    RestrictionConfig {
        policy: PolicyMode::AllowList,
        ignore_case: true,
        restrictions: restrictions.iter().map(|s| s.to_string()).collect(),
    }
}

fn default_pattern_rules() -> RestrictionConfig {
    let restrictions = [
        // 文件
        "*/.htaccess",
        "*/web.config",
        // 文件夹
        "*/_thumbs/*",
        "*/.CDN_ACCESS_LOGS/*",
    ];
    RestrictionConfig {
        policy: PolicyMode::DisallowList,
        ignore_case: true,
        restrictions: restrictions.iter().map(|s| s.to_string()).collect(),
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            normalize_filename: true,
            extensions: default_extension_rules(),
            patterns: default_pattern_rules(),
        }
    }
}

/// 图片配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImagesConfig {
    #[serde(default)]
    pub main: MainImageConfig,
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
}

/// 上传后主图处理
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainImageConfig {
    /// 按 EXIF 自动旋转
    #[serde(default = "default_true")]
    pub auto_orient: bool,
    /// 最大宽度（None 表示不限制）
    #[serde(default = "default_main_max_width")]
    pub max_width: Option<u32>,
    /// 最大高度（None 表示不限制）
    #[serde(default = "default_main_max_height")]
    pub max_height: Option<u32>,
}

fn default_main_max_width() -> Option<u32> {
    Some(1280)
}

fn default_main_max_height() -> Option<u32> {
    Some(1024)
}

impl Default for MainImageConfig {
    fn default() -> Self {
        Self {
            auto_orient: true,
            max_width: default_main_max_width(),
            max_height: default_main_max_height(),
        }
    }
}

/// 缩略图配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 复用已生成的缩略图
    #[serde(default = "default_true")]
    pub cache: bool,
    /// 缩略图目录（相对存储根目录）
    #[serde(default = "default_thumbnail_dir")]
    pub dir: String,
    /// 裁剪为固定尺寸
    #[serde(default = "default_true")]
    pub crop: bool,
    #[serde(default = "default_thumbnail_size")]
    pub max_width: u32,
    #[serde(default = "default_thumbnail_size")]
    pub max_height: u32,
}

fn default_thumbnail_dir() -> String {
    "_thumbs/".to_string()
}

fn default_thumbnail_size() -> u32 {
    64
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache: true,
            dir: default_thumbnail_dir(),
            crop: true,
            max_width: default_thumbnail_size(),
            max_height: default_thumbnail_size(),
        }
    }
}

/// 图片尺寸限制
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DimensionLimits {
    #[serde(default)]
    pub min_width: Option<u32>,
    #[serde(default)]
    pub max_width: Option<u32>,
    #[serde(default)]
    pub min_height: Option<u32>,
    #[serde(default)]
    pub max_height: Option<u32>,
}

impl DimensionLimits {
    pub fn is_configured(&self) -> bool {
        self.min_width.is_some()
            || self.max_width.is_some()
            || self.min_height.is_some()
            || self.max_height.is_some()
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 单文件最大字节数（None 表示不限制）
    #[serde(default = "default_file_size_limit")]
    pub file_size_limit: Option<u64>,
    /// 单文件最小字节数
    #[serde(default)]
    pub min_file_size: Option<u64>,
    /// 单次请求最多文件数
    #[serde(default)]
    pub max_number_of_files: Option<usize>,
    /// 请求体上限（Content-Length）
    #[serde(default)]
    pub request_size_limit: Option<u64>,
    /// 同名文件直接覆盖
    #[serde(default)]
    pub overwrite: bool,
    /// multipart 字段名
    #[serde(default = "default_param_name")]
    pub param_name: String,
    /// 客户端分片大小（0 表示不分片），仅透传给前端
    #[serde(default)]
    pub chunk_size: u64,
    /// 仅允许图片
    #[serde(default)]
    pub images_only: bool,
    /// 图片尺寸限制
    #[serde(default)]
    pub dimensions: DimensionLimits,
}

fn default_file_size_limit() -> Option<u64> {
    Some(16_000_000)
}

fn default_param_name() -> String {
    "files".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            file_size_limit: default_file_size_limit(),
            min_file_size: None,
            max_number_of_files: None,
            request_size_limit: None,
            overwrite: false,
            param_name: default_param_name(),
            chunk_size: 0,
            images_only: false,
            dimensions: DimensionLimits::default(),
        }
    }
}

/// 通用选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsConfig {
    /// 存储根目录总容量上限（None 表示不限制）
    #[serde(default)]
    pub file_root_size_limit: Option<u64>,
    /// 文件名仅允许拉丁字符
    #[serde(default)]
    pub chars_latin_only: bool,
    /// 前端显示的日期格式
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_date_format() -> String {
    "%d %b %Y %H:%M".to_string()
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            file_root_size_limit: None,
            chars_latin_only: false,
            date_format: default_date_format(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            security: SecurityConfig::default(),
            images: ImagesConfig::default(),
            upload: UploadConfig::default(),
            options: OptionsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        if config.storage.backend == BackendKind::ObjectStore
            && (config.storage.object_store.endpoint.is_empty()
                || config.storage.object_store.bucket.is_empty())
        {
            anyhow::bail!("对象存储后端需要配置 endpoint 和 bucket");
        }

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                let default_config = Self::default();

                // 首次启动：自动创建存储根目录
                if let Err(e) = PathValidator::ensure_directory_exists(&default_config.storage.root)
                {
                    tracing::error!(
                        "无法创建默认存储目录 {:?}: {}",
                        default_config.storage.root,
                        e
                    );
                }

                // 尝试保存默认配置
                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }
}
