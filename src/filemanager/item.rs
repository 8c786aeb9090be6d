// ResourceItem 构造
//
// 条目是按需从后端元数据计算出的读模型，权限标记综合了系统权限、策略闸门和外部谓词

use std::sync::Arc;

use crate::security::{RequestContext, SecurityPolicyEngine};
use crate::storage::{relpath, DirEntry, EntryMeta, FmError, PathModel, ResourceItem, StorageBackend};
use crate::thumbnail::ThumbnailCache;

#[derive(Clone)]
pub struct ItemFactory {
    backend: Arc<dyn StorageBackend>,
    policy: Arc<SecurityPolicyEngine>,
    thumbnails: ThumbnailCache,
}

impl ItemFactory {
    pub fn new(backend: Arc<dyn StorageBackend>, policy: Arc<SecurityPolicyEngine>, thumbnails: ThumbnailCache) -> Self {
        Self {
            backend,
            policy,
            thumbnails,
        }
    }

    /// 由已存在的路径模型构造条目
    pub async fn from_model(&self, model: &PathModel, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        let meta = model
            .meta
            .as_ref()
            .ok_or_else(|| FmError::not_found(&model.path_relative))?;
        Ok(self.build(model, meta, ctx).await)
    }

    /// 重新查询后端后构造条目（写操作之后使用）
    pub async fn fresh(&self, relative: &str, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        let meta = self
            .backend
            .stat(relative)
            .await?
            .ok_or_else(|| FmError::not_found(relative))?;
        let model = PathModel {
            path_relative: if meta.is_dir {
                relpath::as_dir(relative)
            } else {
                relpath::trim_dir_marker(relative).to_string()
            },
            path_absolute: self.backend.confine(relative).await?,
            is_dir: meta.is_dir,
            is_exists: true,
            meta: Some(meta.clone()),
        };
        Ok(self.build(&model, &meta, ctx).await)
    }

    /// 目录列表中的一项
    pub async fn child(&self, dir: &str, entry: &DirEntry, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        let relative = if entry.meta.is_dir {
            relpath::join_dir(dir, &entry.name)
        } else {
            relpath::join(dir, &entry.name)
        };
        let model = PathModel {
            path_absolute: self.backend.confine(&relative).await?,
            path_relative: relative,
            is_dir: entry.meta.is_dir,
            is_exists: true,
            meta: Some(entry.meta.clone()),
        };
        Ok(self.build(&model, &entry.meta, ctx).await)
    }

    async fn build(&self, model: &PathModel, meta: &EntryMeta, ctx: &RequestContext) -> ResourceItem {
        let relative = &model.path_relative;
        let readable = self.policy.is_readable(relative, meta, ctx);
        let writable = self.policy.is_writable(relative, meta, ctx);
        let mut item = ResourceItem::from_model(model, meta, readable, writable);

        if !meta.is_dir && readable {
            if let Some((width, height)) = self.thumbnails.dimensions(&item.id, meta.size).await {
                item.attributes.width = Some(width);
                item.attributes.height = Some(height);
            }
        }
        item
    }
}
