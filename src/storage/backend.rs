// 存储后端抽象
//
// LocalDisk 与 ObjectStore 实现同一组原语；递归复制/删除/移动只在这里基于 TreeWalker 实现一次

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use std::path::Path;
use tracing::debug;

use super::error::FmError;
use super::relpath;
use super::types::{ByteRange, ByteStream, DirEntry, EntryMeta};
use super::walker;

/// 存储后端
///
/// 所有路径参数都是已经过 PathResolver 约束的相对路径（`/` 开头）
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// 后端名称（日志用）
    fn name(&self) -> &'static str;

    /// 把相对路径映射为后端原生路径，并确认其位于存储根目录之内
    async fn confine(&self, relative: &str) -> Result<String, FmError>;

    /// 查询元数据，不存在时返回 None
    async fn stat(&self, path: &str) -> Result<Option<EntryMeta>, FmError>;

    /// 列出目录下的直接子项
    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>, FmError>;

    /// 读取文件（可选字节范围），以 8KB 分片流式返回
    async fn read(&self, path: &str, range: Option<ByteRange>) -> Result<ByteStream, FmError>;

    /// 原子写入：最终状态要么是旧内容，要么是完整的新内容
    async fn write(&self, path: &str, data: Bytes) -> Result<(), FmError>;

    /// 独占创建：目标已存在时返回 Conflict
    async fn create_new(&self, path: &str, data: Bytes) -> Result<(), FmError>;

    /// 追加写入，返回追加后的文件大小
    async fn append(&self, path: &str, data: Bytes) -> Result<u64, FmError>;

    /// 把本地临时文件原子地放入存储
    async fn put_file(&self, local: &Path, path: &str) -> Result<(), FmError>;

    /// 重命名；无法原样重命名时返回 `FmError::cross_device`
    async fn rename(&self, from: &str, to: &str) -> Result<(), FmError>;

    async fn copy_file(&self, from: &str, to: &str) -> Result<(), FmError>;

    /// 创建单层目录，已存在时返回 Conflict
    async fn mkdir(&self, path: &str) -> Result<(), FmError>;

    /// 递归创建目录
    async fn mkdir_all(&self, path: &str) -> Result<(), FmError>;

    async fn remove_file(&self, path: &str) -> Result<(), FmError>;

    /// 删除空目录
    async fn remove_dir(&self, path: &str) -> Result<(), FmError>;

    /// 文件真实大小（逐级回退，支持超过 2^31 的文件）
    async fn real_size(&self, path: &str) -> Result<u64, FmError>;

    async fn exists(&self, path: &str) -> Result<bool, FmError> {
        Ok(self.stat(path).await?.is_some())
    }

    /// 读取整个文件到内存
    async fn read_all(&self, path: &str) -> Result<Vec<u8>, FmError> {
        let stream = self.read(path, None).await?;
        let chunks: Vec<Bytes> = stream
            .try_collect()
            .await
            .map_err(|e| FmError::from_io(e, path))?;
        Ok(chunks.concat())
    }

    /// 递归复制
    async fn copy_recursive(&self, from: &str, to: &str) -> Result<(), FmError> {
        let meta = self
            .stat(from)
            .await?
            .ok_or_else(|| FmError::not_found(from))?;

        if !meta.is_dir {
            return self.copy_file(from, to).await;
        }

        self.mkdir_all(to).await?;
        let entries = walker::walk(self, from, &|_, _| true).await?;
        for entry in entries {
            let target = relpath::rebase(&entry.path, from, to)
                .ok_or_else(|| FmError::path_escape(&entry.path))?;
            if entry.meta.is_dir {
                self.mkdir_all(&target).await?;
            } else {
                self.copy_file(&entry.path, &target).await?;
            }
        }
        debug!("[{}] 递归复制完成: {} -> {}", self.name(), from, to);
        Ok(())
    }

    /// 递归删除（子项先于父目录）
    async fn delete_recursive(&self, path: &str) -> Result<(), FmError> {
        let meta = self
            .stat(path)
            .await?
            .ok_or_else(|| FmError::not_found(path))?;

        if !meta.is_dir {
            return self.remove_file(path).await;
        }

        let entries = walker::walk(self, path, &|_, _| true).await?;
        for entry in entries.iter().rev() {
            if entry.meta.is_dir {
                self.remove_dir(&entry.path).await?;
            } else {
                self.remove_file(&entry.path).await?;
            }
        }
        self.remove_dir(path).await?;
        debug!("[{}] 递归删除完成: {}", self.name(), path);
        Ok(())
    }

    /// 移动：优先重命名，跨卷时回退为复制 + 删除
    async fn move_recursive(&self, from: &str, to: &str) -> Result<(), FmError> {
        match self.rename(from, to).await {
            Err(e) if e.is_cross_device() => {
                debug!("[{}] 无法直接重命名，回退为复制+删除: {} -> {}", self.name(), from, to);
                self.copy_recursive(from, to).await?;
                self.delete_recursive(from).await
            }
            other => other,
        }
    }
}
