// 对象存储客户端抽象

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

use crate::storage::error::{ErrorKind, FmError};
use crate::storage::types::{ByteRange, ByteStream, ObjectHead};

/// 对象存储错误（只在后端内部使用，向上层返回前转换为 FmError）
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ObjectStoreError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(key: &str) -> Self {
        Self::status(404, format!("no such key: {}", key))
    }

    /// HTTP 状态码映射到统一错误类别
    pub fn into_fm(self, path: &str) -> FmError {
        match self {
            Self::Status { status, message } => match status {
                404 => FmError::not_found(path),
                401 | 403 => FmError::restricted("NOT_ALLOWED_SYSTEM", path),
                409 | 412 => FmError::conflict(path),
                413 | 507 => FmError::new(ErrorKind::QuotaExceeded, "ERROR_SERVER")
                    .with_arg(message)
                    .with_path(path),
                416 => FmError::new(ErrorKind::InvalidRequest, "INVALID_RANGE").with_path(path),
                _ => FmError::new(ErrorKind::Storage, "ERROR_SERVER")
                    .with_arg(format!("HTTP {}: {}", status, message))
                    .with_path(path),
            },
            Self::Io(e) => FmError::from_io(e, path),
            other => FmError::new(ErrorKind::Storage, "ERROR_SERVER")
                .with_arg(other.to_string())
                .with_path(path),
        }
    }
}

/// 列表中的一个对象
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// 按前缀列出的结果
#[derive(Debug, Clone, Default)]
pub struct ObjectListing {
    pub objects: Vec<ObjectSummary>,
    /// 使用分隔符时折叠出的公共前缀（以 `/` 结尾）
    pub prefixes: Vec<String>,
}

/// 对象存储客户端
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// HEAD，不存在时返回 None
    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, ObjectStoreError>;

    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<ByteStream, ObjectStoreError>;

    async fn put(&self, key: &str, body: Bytes) -> Result<(), ObjectStoreError>;

    /// 上传本地文件（流式）
    async fn put_file(&self, key: &str, local: &Path) -> Result<(), ObjectStoreError>;

    /// 服务端复制
    async fn copy(&self, from: &str, to: &str) -> Result<(), ObjectStoreError>;

    /// 删除；对象不存在不视为错误
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// 按前缀列出；`delimited` 为 true 时按 `/` 折叠子目录
    async fn list(&self, prefix: &str, delimited: bool) -> Result<ObjectListing, ObjectStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (404, ErrorKind::NotFound),
            (401, ErrorKind::PolicyRestricted),
            (403, ErrorKind::PolicyRestricted),
            (409, ErrorKind::Conflict),
            (412, ErrorKind::Conflict),
            (413, ErrorKind::QuotaExceeded),
            (507, ErrorKind::QuotaExceeded),
            (416, ErrorKind::InvalidRequest),
            (500, ErrorKind::Storage),
            (503, ErrorKind::Storage),
        ];
        for (status, kind) in cases {
            let err = ObjectStoreError::status(status, "x").into_fm("/a.txt");
            assert_eq!(err.kind, kind, "status {}", status);
            assert_eq!(err.path.as_deref(), Some("/a.txt"));
        }
    }

    #[test]
    fn test_invalid_response_is_storage_error() {
        let err = ObjectStoreError::InvalidResponse("bad json".into()).into_fm("/");
        assert_eq!(err.kind, ErrorKind::Storage);
        assert!(err.args[0].contains("bad json"));
    }
}
