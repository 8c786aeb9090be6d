// FileManager Rust Library
// 文件管理连接器核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 存储后端模块（本地磁盘 / 对象存储）
pub mod storage;

// 路径解析与安全策略模块
pub mod security;

// 缩略图模块
pub mod thumbnail;

// 上传模块
pub mod uploader;

// 压缩包模块
pub mod archive;

// 连接器服务模块
pub mod filemanager;

// Web服务器模块
pub mod server;

// 导出常用类型
pub use config::AppConfig;
pub use filemanager::{Action, FileManager, Payload};
pub use security::{AccessControl, PathResolver, RequestContext, SecurityPolicyEngine};
pub use server::{build_router, AppState};
pub use storage::{ErrorKind, FmError, LocalDisk, ObjectStore, StorageBackend};
