// 文件管理连接器服务
//
// 每个动作都按 解析 → 策略检查 → 后端操作 → 缩略图联动 的顺序执行

use anyhow::Context;
use std::sync::Arc;
use tracing::{debug, info};

use super::action::{Action, Disposition, FileStream, FolderSummary, InitiateInfo, Payload};
use super::item::ItemFactory;
use crate::archive::{ArchiveExtractor, ZipBuilder};
use crate::config::AppConfig;
use crate::security::{NameMode, PathResolver, RequestContext, SecurityPolicyEngine};
use crate::storage::{
    relpath, summarize, ByteRange, EntryMeta, ErrorKind, FmError, PathModel, ResourceItem, StorageBackend,
};
use crate::thumbnail::ThumbnailCache;
use crate::uploader::{UploadFile, UploadOutcome, UploadPipeline};

fn forbidden_dir(path: &str) -> FmError {
    FmError::new(ErrorKind::InvalidRequest, "FORBIDDEN_ACTION_DIR").with_path(path)
}

/// 文件管理器
#[derive(Clone)]
pub struct FileManager {
    config: Arc<AppConfig>,
    backend: Arc<dyn StorageBackend>,
    resolver: PathResolver,
    policy: Arc<SecurityPolicyEngine>,
    thumbnails: ThumbnailCache,
    items: ItemFactory,
    uploads: UploadPipeline,
    extractor: ArchiveExtractor,
    zipper: ZipBuilder,
}

impl FileManager {
    /// 按配置组装各组件
    pub fn new(backend: Arc<dyn StorageBackend>, config: &AppConfig) -> anyhow::Result<Self> {
        let policy = Arc::new(
            SecurityPolicyEngine::new(&config.security).context("路径模式规则无法编译")?,
        );
        let resolver = PathResolver::new(backend.clone(), config);
        let thumbnails = ThumbnailCache::new(backend.clone(), &config.images, config.security.read_only);
        let items = ItemFactory::new(backend.clone(), policy.clone(), thumbnails.clone());
        let uploads = UploadPipeline::new(resolver.clone(), policy.clone(), thumbnails.clone(), items.clone(), config);
        let extractor = ArchiveExtractor::new(resolver.clone(), policy.clone(), items.clone());
        let zipper = ZipBuilder::new(backend.clone(), policy.clone());

        info!("文件管理器已初始化: backend={}", backend.name());
        Ok(Self {
            config: Arc::new(config.clone()),
            backend,
            resolver,
            policy,
            thumbnails,
            items,
            uploads,
            extractor,
            zipper,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// 执行一个连接器动作
    pub async fn handle(&self, action: Action, ctx: &RequestContext) -> Result<Payload, FmError> {
        debug!("连接器动作: {}", action.mode());
        match action {
            Action::Initiate => Ok(Payload::Initiate(self.initiate())),
            Action::GetFolder { path } => self.get_folder(&path, ctx).await.map(Payload::Items),
            Action::GetFile { path } => self.get_file(&path, ctx).await.map(Payload::Item),
            Action::AddFolder { path, name } => self.add_folder(&path, &name, ctx).await.map(Payload::Item),
            Action::Upload { path, files } => self.upload(&path, files, ctx).await.map(Payload::Uploaded),
            Action::Replace { path, file } => self.replace(&path, file, ctx).await.map(Payload::Item),
            Action::Rename { old, new } => self.rename(&old, &new, ctx).await.map(Payload::Item),
            Action::Move { old, new } => self.move_item(&old, &new, ctx).await.map(Payload::Item),
            Action::Copy { source, target } => self.copy(&source, &target, ctx).await.map(Payload::Item),
            Action::Delete { path } => self.delete(&path, ctx).await.map(Payload::Item),
            Action::EditFile { path } => self.edit_file(&path, ctx).await.map(Payload::Item),
            Action::SaveFile { path, content } => self.save_file(&path, content, ctx).await.map(Payload::Item),
            Action::ReadFile { path, range } => self.read_file(&path, range, ctx).await.map(Payload::File),
            Action::GetImage { path, thumbnail } => self.get_image(&path, thumbnail, ctx).await.map(Payload::File),
            Action::Download { path } => self.download(&path, ctx).await.map(Payload::File),
            Action::Summarize => self.summarize(ctx).await.map(Payload::Summary),
            Action::Extract { source, target } => self.extract(&source, &target, ctx).await.map(Payload::Items),
        }
    }

    pub fn initiate(&self) -> InitiateInfo {
        InitiateInfo::from_config(&self.config)
    }

    /// 解析并要求条目存在
    async fn existing(&self, raw: &str) -> Result<PathModel, FmError> {
        let model = self.resolver.resolve(raw).await?;
        if !model.is_exists {
            return Err(FmError::not_found(&model.path_relative));
        }
        Ok(model)
    }

    /// 可读的已存在条目
    async fn readable(&self, raw: &str, ctx: &RequestContext) -> Result<PathModel, FmError> {
        let model = self.existing(raw).await?;
        self.policy.check_read(&model, ctx)?;
        Ok(model)
    }

    /// 可读的已存在文件
    async fn readable_file(&self, raw: &str, ctx: &RequestContext) -> Result<PathModel, FmError> {
        let model = self.readable(raw, ctx).await?;
        if model.is_dir {
            return Err(forbidden_dir(&model.path_relative));
        }
        Ok(model)
    }

    /// 可写的已存在文件夹
    async fn writable_folder(&self, raw: &str, ctx: &RequestContext) -> Result<PathModel, FmError> {
        let model = self.resolver.resolve(raw).await?;
        if !model.is_exists || !model.is_dir {
            return Err(FmError::not_found(&relpath::as_dir(&model.path_relative)));
        }
        self.policy.check_write(&model, ctx, self.backend.as_ref()).await?;
        Ok(model)
    }

    /// 列出文件夹，受限条目与缩略图目录不出现在结果中
    pub async fn get_folder(&self, path: &str, ctx: &RequestContext) -> Result<Vec<ResourceItem>, FmError> {
        let model = self.resolver.resolve(path).await?;
        if !model.is_exists || !model.is_dir {
            return Err(FmError::not_found(&relpath::as_dir(&model.path_relative)));
        }
        self.policy.check_read(&model, ctx)?;
        info!("打开文件夹: {}", model.path_relative);

        let mut items = Vec::new();
        for entry in self.backend.list(&model.path_relative).await? {
            let relative = if entry.meta.is_dir {
                relpath::join_dir(&model.path_relative, &entry.name)
            } else {
                relpath::join(&model.path_relative, &entry.name)
            };
            if self.thumbnails.is_thumbnail_path(&relative) || !self.policy.is_unrestricted(&relative, entry.meta.is_dir) {
                continue;
            }
            items.push(self.items.child(&model.path_relative, &entry, ctx).await?);
        }
        Ok(items)
    }

    pub async fn get_file(&self, path: &str, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        let model = self.readable_file(path, ctx).await?;
        self.items.from_model(&model, ctx).await
    }

    /// 新建文件夹；已存在时返回 Conflict，原有内容不受影响
    pub async fn add_folder(&self, path: &str, name: &str, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        let parent = self.resolver.resolve(path).await?;
        if !parent.is_exists || !parent.is_dir {
            return Err(FmError::not_found(&relpath::as_dir(&parent.path_relative)));
        }
        let name = self.resolver.sanitize_name(name, NameMode::Filename)?;
        let target = self.resolver.resolve_child(&parent, &name, true).await?;
        if target.is_exists {
            return Err(FmError::conflict(&relpath::as_dir(&target.path_relative)));
        }
        self.policy.check_write(&target, ctx, self.backend.as_ref()).await?;

        self.backend.mkdir(&target.path_relative).await?;
        info!("新建文件夹: {}", target.path_relative);
        self.items.fresh(&target.path_relative, ctx).await
    }

    /// 上传到文件夹
    pub async fn upload(
        &self,
        path: &str,
        files: Vec<UploadFile>,
        ctx: &RequestContext,
    ) -> Result<Vec<UploadOutcome>, FmError> {
        let dir = self.writable_folder(path, ctx).await?;
        self.uploads.upload(&dir, files, ctx).await
    }

    /// 用上传内容替换已有文件
    pub async fn replace(&self, path: &str, file: UploadFile, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        let target = self.existing(path).await?;
        if target.is_dir {
            return Err(forbidden_dir(&target.path_relative));
        }
        self.policy.check_write(&target, ctx, self.backend.as_ref()).await?;
        self.uploads.replace(&target, file, ctx).await
    }

    /// 在原目录内重命名
    pub async fn rename(&self, old: &str, new_name: &str, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        if new_name.contains('/') {
            return Err(FmError::restricted("FORBIDDEN_CHAR_SLASH", new_name));
        }
        let source = self.existing(old).await?;
        self.policy.ensure_not_root(&source)?;
        self.policy.check_write(&source, ctx, self.backend.as_ref()).await?;

        let name = self.resolver.sanitize_name(new_name, NameMode::Filename)?;
        let parent = self.resolver.resolve(&relpath::parent(&source.path_relative)).await?;
        let target = self.resolver.resolve_child(&parent, &name, source.is_dir).await?;
        if target.is_exists {
            return Err(FmError::conflict(&target.path_relative));
        }
        self.policy.check_write(&target, ctx, self.backend.as_ref()).await?;

        self.backend.move_recursive(&source.path_relative, &target.path_relative).await?;
        info!("重命名: {} -> {}", source.path_relative, target.path_relative);
        self.thumbnails.on_move(&source.path_relative, &target.path_relative).await;
        self.items.fresh(&target.path_relative, ctx).await
    }

    /// 源条目与目标文件夹的公共检查，返回最终目标路径
    async fn transfer_target(
        &self,
        source: &PathModel,
        folder: &str,
        ctx: &RequestContext,
    ) -> Result<PathModel, FmError> {
        self.policy.ensure_not_root(source)?;
        let folder = self.writable_folder(folder, ctx).await?;
        let target = self.resolver.resolve_child(&folder, source.name(), source.is_dir).await?;

        if source.is_dir
            && (target.path_relative == source.path_relative
                || relpath::is_within(&target.path_relative, &source.path_relative))
        {
            return Err(FmError::new(ErrorKind::InvalidRequest, "NOT_ALLOWED").with_path(&target.path_relative));
        }
        if target.is_exists {
            return Err(FmError::conflict(&target.path_relative));
        }
        self.policy.check_write(&target, ctx, self.backend.as_ref()).await?;
        Ok(target)
    }

    /// 移动到另一个文件夹
    pub async fn move_item(&self, old: &str, folder: &str, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        let source = self.existing(old).await?;
        self.policy.check_write(&source, ctx, self.backend.as_ref()).await?;
        let target = self.transfer_target(&source, folder, ctx).await?;

        self.backend.move_recursive(&source.path_relative, &target.path_relative).await?;
        info!("移动: {} -> {}", source.path_relative, target.path_relative);
        self.thumbnails.on_move(&source.path_relative, &target.path_relative).await;
        self.items.fresh(&target.path_relative, ctx).await
    }

    /// 复制到另一个文件夹
    pub async fn copy(&self, source: &str, folder: &str, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        let source = self.readable(source, ctx).await?;
        let target = self.transfer_target(&source, folder, ctx).await?;

        self.backend.copy_recursive(&source.path_relative, &target.path_relative).await?;
        info!("复制: {} -> {}", source.path_relative, target.path_relative);
        self.thumbnails.on_copy(&source.path_relative, &target.path_relative).await;
        self.items.fresh(&target.path_relative, ctx).await
    }

    /// 递归删除，返回被删除条目删除前的信息
    pub async fn delete(&self, path: &str, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        let model = self.existing(path).await?;
        self.policy.ensure_not_root(&model)?;
        self.policy.check_write(&model, ctx, self.backend.as_ref()).await?;

        let item = self.items.from_model(&model, ctx).await?;
        self.backend.delete_recursive(&model.path_relative).await?;
        info!("已删除: {}", model.path_relative);
        self.thumbnails.on_delete(&model.path_relative).await;
        Ok(item)
    }

    /// 文件条目附带文本内容
    pub async fn edit_file(&self, path: &str, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        let model = self.readable_file(path, ctx).await?;
        let bytes = self.backend.read_all(&model.path_relative).await?;
        let content = String::from_utf8(bytes).map_err(|_| {
            FmError::new(ErrorKind::InvalidRequest, "ERROR_OPENING_FILE").with_path(&model.path_relative)
        })?;

        let mut item = self.items.from_model(&model, ctx).await?;
        item.attributes.content = Some(content);
        Ok(item)
    }

    /// 原子保存文本内容
    pub async fn save_file(&self, path: &str, content: String, ctx: &RequestContext) -> Result<ResourceItem, FmError> {
        let model = self.existing(path).await?;
        if model.is_dir {
            return Err(forbidden_dir(&model.path_relative));
        }
        self.policy.check_write(&model, ctx, self.backend.as_ref()).await?;

        self.backend.write(&model.path_relative, content.into()).await?;
        info!("已保存: {}", model.path_relative);
        self.thumbnails.invalidate(&model.path_relative).await;
        self.items.fresh(&model.path_relative, ctx).await
    }

    /// 内联读取，支持字节范围
    pub async fn read_file(
        &self,
        path: &str,
        range: Option<ByteRange>,
        ctx: &RequestContext,
    ) -> Result<FileStream, FmError> {
        let model = self.readable_file(path, ctx).await?;
        let total = self.backend.real_size(&model.path_relative).await?;

        let resolved = match range {
            Some(requested) => Some(requested.resolve(total).ok_or_else(|| {
                FmError::new(ErrorKind::InvalidRequest, "INVALID_RANGE")
                    .with_arg(total.to_string())
                    .with_path(&model.path_relative)
            })?),
            None => None,
        };
        let (stream, length) = match resolved {
            Some((start, end)) => {
                let stream = self
                    .backend
                    .read(&model.path_relative, Some(ByteRange { start, end: Some(end) }))
                    .await?;
                (stream, end - start + 1)
            }
            None => (self.backend.read(&model.path_relative, None).await?, total),
        };

        info!("读取文件: {} ({:?})", model.path_relative, resolved);
        Ok(FileStream {
            name: model.name().to_string(),
            length,
            total,
            range: resolved,
            disposition: Disposition::Inline,
            stream,
        })
    }

    /// 图片原图或缩略图
    pub async fn get_image(&self, path: &str, thumbnail: bool, ctx: &RequestContext) -> Result<FileStream, FmError> {
        let model = self.readable_file(path, ctx).await?;
        let served = if thumbnail {
            self.thumbnails.get_or_create(&model.path_relative).await?
        } else {
            model.path_relative.clone()
        };

        let total = self.backend.real_size(&served).await?;
        let stream = self.backend.read(&served, None).await?;
        debug!("输出图片: {} -> {}", model.path_relative, served);
        Ok(FileStream {
            name: model.name().to_string(),
            length: total,
            total,
            range: None,
            disposition: Disposition::Inline,
            stream,
        })
    }

    /// 下载文件，或把文件夹打包为 ZIP 下载；根目录不可下载
    pub async fn download(&self, path: &str, ctx: &RequestContext) -> Result<FileStream, FmError> {
        let model = self.readable(path, ctx).await?;
        self.policy.ensure_not_root(&model)?;

        if model.is_dir {
            let archive = self.zipper.build(&model, ctx).await?;
            let size = archive.size;
            let stream = archive.into_stream().await?;
            info!("下载文件夹: {} ({} 字节)", model.path_relative, size);
            return Ok(FileStream {
                name: format!("{}.zip", model.name()),
                length: size,
                total: size,
                range: None,
                disposition: Disposition::Attachment,
                stream,
            });
        }

        let total = self.backend.real_size(&model.path_relative).await?;
        let stream = self.backend.read(&model.path_relative, None).await?;
        info!("下载文件: {} ({} 字节)", model.path_relative, total);
        Ok(FileStream {
            name: model.name().to_string(),
            length: total,
            total,
            range: None,
            disposition: Disposition::Attachment,
            stream,
        })
    }

    /// 统计可读且不受限的条目
    pub async fn summarize(&self, ctx: &RequestContext) -> Result<FolderSummary, FmError> {
        let filter = |path: &str, meta: &EntryMeta| {
            !self.thumbnails.is_thumbnail_path(path) && self.policy.is_readable(path, meta, ctx)
        };
        let summary = summarize(self.backend.as_ref(), "/", &filter).await?;
        Ok(FolderSummary {
            size: summary.size,
            files: summary.files,
            folders: summary.folders,
            size_limit: self.config.options.file_root_size_limit,
        })
    }

    /// 解压到目标文件夹，返回压缩包根层级的条目
    pub async fn extract(&self, source: &str, target: &str, ctx: &RequestContext) -> Result<Vec<ResourceItem>, FmError> {
        let source = self.readable_file(source, ctx).await?;
        let target = self.writable_folder(target, ctx).await?;
        self.extractor.extract(&source, &target, ctx).await
    }
}
