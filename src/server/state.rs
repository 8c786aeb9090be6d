// 应用状态

use std::sync::Arc;

use crate::config::{AppConfig, BackendKind};
use crate::filemanager::FileManager;
use crate::security::{AccessControl, AllowAll};
use crate::storage::{HttpObjectClient, LocalDisk, ObjectStore, StorageBackend};

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 文件管理连接器
    pub file_manager: Arc<FileManager>,
    /// 应用配置
    pub config: Arc<AppConfig>,
    /// 外部授权判断，默认全部放行
    pub access: Arc<dyn AccessControl>,
}

impl AppState {
    /// 按配置创建存储后端并组装连接器
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let backend = build_backend(&config)?;
        Self::with_backend(backend, config)
    }

    /// 使用已有后端（测试或嵌入场景）
    pub fn with_backend(backend: Arc<dyn StorageBackend>, config: AppConfig) -> anyhow::Result<Self> {
        let file_manager = FileManager::new(backend, &config)?;
        Ok(Self {
            file_manager: Arc::new(file_manager),
            config: Arc::new(config),
            access: Arc::new(AllowAll),
        })
    }

    /// 替换外部授权判断
    pub fn with_access(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }
}

/// 创建存储后端
pub fn build_backend(config: &AppConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.storage.backend {
        BackendKind::Local => Arc::new(
            LocalDisk::new(&config.storage.root)
                .map_err(|e| anyhow::anyhow!("无法打开存储根目录 {:?}: {}", config.storage.root, e))?,
        ),
        BackendKind::ObjectStore => {
            let object_store = &config.storage.object_store;
            let client = HttpObjectClient::new(object_store)
                .map_err(|e| anyhow::anyhow!("无法创建对象存储客户端: {}", e))?;
            Arc::new(ObjectStore::new(Arc::new(client), &object_store.prefix))
        }
    };
    Ok(backend)
}
