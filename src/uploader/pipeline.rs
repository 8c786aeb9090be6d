// 上传流水线
//
// 校验顺序固定，第一个失败的检查决定错误：
// 请求体上限 → 扩展名 → 路径模式 → 根目录容量 → 单文件大小 → 文件数量 → 仅图片 → 图片尺寸
// 之后按覆盖策略确定文件名，整文件原子写入或按分片追加

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::content_range::ContentRange;
use super::naming::{self, MAX_NAME_ATTEMPTS};
use crate::config::{AppConfig, UploadConfig};
use crate::filemanager::ItemFactory;
use crate::security::{NameMode, PathResolver, RequestContext, SecurityPolicyEngine};
use crate::storage::{relpath, walker, ErrorKind, FmError, PathModel, ResourceItem, StorageBackend};
use crate::thumbnail::{self, ThumbnailCache};

/// 一个待保存的上传文件（或其中一个分片）
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// 客户端提供的文件名（未规范化）
    pub file_name: String,
    pub data: Bytes,
    pub content_range: Option<ContentRange>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            data,
            content_range: None,
        }
    }

    pub fn with_range(mut self, range: ContentRange) -> Self {
        self.content_range = Some(range);
        self
    }

    /// 本次写入的起始偏移
    fn offset(&self) -> u64 {
        self.content_range.map(|r| r.start).unwrap_or(0)
    }

    /// 文件声明的总大小
    fn declared_size(&self) -> u64 {
        self.content_range
            .map(|r| r.total)
            .unwrap_or(self.data.len() as u64)
    }
}

/// 分片上传进度
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// 目标相对路径
    pub target: String,
    /// 已接收字节数
    pub received: u64,
    /// 声明的总大小
    pub total: u64,
}

/// 单个文件的上传结果
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub item: ResourceItem,
    /// 分片上传时的进度
    pub session: Option<UploadSession>,
    /// 文件已完整写入
    pub complete: bool,
}

fn validation(key: &'static str, path: &str) -> FmError {
    FmError::new(ErrorKind::UploadValidation, key).with_path(path)
}

fn quota(key: &'static str, path: &str) -> FmError {
    FmError::new(ErrorKind::QuotaExceeded, key).with_path(path)
}

/// 字节数显示为 "x Mb"（十进制，保留两位小数）
fn format_mb(bytes: u64) -> String {
    let mb = (bytes as f64 / 1000.0 / 1000.0 * 100.0).round() / 100.0;
    format!("{} Mb", mb)
}

/// 上传流水线
#[derive(Clone)]
pub struct UploadPipeline {
    backend: Arc<dyn StorageBackend>,
    resolver: PathResolver,
    policy: Arc<SecurityPolicyEngine>,
    thumbnails: ThumbnailCache,
    items: ItemFactory,
    upload: UploadConfig,
    auto_orient: bool,
    root_size_limit: Option<u64>,
}

impl UploadPipeline {
    pub fn new(
        resolver: PathResolver,
        policy: Arc<SecurityPolicyEngine>,
        thumbnails: ThumbnailCache,
        items: ItemFactory,
        config: &AppConfig,
    ) -> Self {
        Self {
            backend: resolver.backend().clone(),
            resolver,
            policy,
            thumbnails,
            items,
            upload: config.upload.clone(),
            auto_orient: config.images.main.auto_orient,
            root_size_limit: config.options.file_root_size_limit.filter(|limit| *limit > 0),
        }
    }

    /// 处理一次请求中的全部文件，任一文件失败即返回错误
    ///
    /// 调用方负责确认 `dir` 是存在且可写的文件夹
    pub async fn upload(
        &self,
        dir: &PathModel,
        files: Vec<UploadFile>,
        ctx: &RequestContext,
    ) -> Result<Vec<UploadOutcome>, FmError> {
        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            let outcome = self.upload_one(dir, file, outcomes.len(), ctx).await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn upload_one(
        &self,
        dir: &PathModel,
        file: UploadFile,
        accepted: usize,
        ctx: &RequestContext,
    ) -> Result<UploadOutcome, FmError> {
        let name = self.resolver.sanitize_name(&file.file_name, NameMode::Filename)?;
        self.validate(dir, &name, &file, accepted, ctx).await?;

        let offset = file.offset();
        let target = if self.upload.overwrite {
            let target = relpath::join(&dir.path_relative, &name);
            if let Some(meta) = self.backend.stat(&target).await? {
                if meta.is_dir {
                    return Err(FmError::conflict(&relpath::as_dir(&target)));
                }
            }
            target
        } else {
            let unique = naming::unique_name(self.backend.as_ref(), &dir.path_relative, &name, offset).await?;
            relpath::join(&dir.path_relative, &unique)
        };

        let (target, size) = self.store(&target, &file).await?;
        let complete = match file.content_range {
            Some(range) => size == range.total,
            None => true,
        };
        let session = file.content_range.map(|range| UploadSession {
            target: target.clone(),
            received: size,
            total: range.total,
        });

        if complete {
            info!("上传完成: {} ({} bytes)", target, size);
            if let Err(e) = self.thumbnails.process_upload(&target).await {
                warn!("上传后图片处理失败: {} ({})", target, e);
            }
        } else {
            debug!("分片已接收: {} ({}/{})", target, size, file.declared_size());
        }

        let item = self.items.fresh(&target, ctx).await?;
        Ok(UploadOutcome {
            item,
            session,
            complete,
        })
    }

    /// 用上传的文件整体替换已存在的文件，文件名保持不变
    pub async fn replace(
        &self,
        target: &PathModel,
        file: UploadFile,
        ctx: &RequestContext,
    ) -> Result<ResourceItem, FmError> {
        if target.is_dir || !target.is_exists {
            return Err(FmError::restricted("NOT_ALLOWED", &target.path_relative));
        }
        if file.content_range.is_some_and(|r| !(r.is_first() && r.completes())) {
            return Err(FmError::new(ErrorKind::InvalidRequest, "INVALID_CONTENT_RANGE").with_path(&target.path_relative));
        }

        let dir_path = relpath::parent(&target.path_relative);
        let dir = self.resolver.resolve(&dir_path).await?;
        let name = self.resolver.sanitize_name(&file.file_name, NameMode::Filename)?;
        self.validate(&dir, &name, &file, 0, ctx).await?;

        self.backend.write(&target.path_relative, file.data).await?;
        info!("文件已替换: {}", target.path_relative);
        self.thumbnails.invalidate(&target.path_relative).await;
        if let Err(e) = self.thumbnails.process_upload(&target.path_relative).await {
            warn!("替换后图片处理失败: {} ({})", target.path_relative, e);
        }
        self.items.fresh(&target.path_relative, ctx).await
    }

    /// 按固定顺序执行全部校验
    async fn validate(
        &self,
        dir: &PathModel,
        name: &str,
        file: &UploadFile,
        accepted: usize,
        ctx: &RequestContext,
    ) -> Result<(), FmError> {
        let relative = relpath::join(&dir.path_relative, name);
        let chunk_size = file.data.len() as u64;

        // 1. 请求体上限
        if let (Some(limit), Some(length)) = (self.upload.request_size_limit, ctx.content_length) {
            if length > limit {
                return Err(quota("UPLOAD_REQUEST_TOO_LARGE", &relative).with_arg(format_mb(limit)));
            }
        }

        // 2. 扩展名
        if !self.policy.is_allowed_extension(name) {
            return Err(validation("INVALID_FILE_TYPE", &relative).with_arg(name));
        }

        // 3. 路径模式
        if !self.policy.is_allowed_pattern(&relative) {
            return Err(validation("FORBIDDEN_NAME", &relative).with_arg(&relative));
        }

        // 4. 根目录容量
        if let Some(limit) = self.root_size_limit {
            let used = walker::summarize(self.backend.as_ref(), "/", &|_, _| true).await?.size;
            if used + chunk_size > limit {
                return Err(quota("STORAGE_SIZE_EXCEED", &relative).with_arg(format_mb(limit)));
            }
        }

        // 5. 单文件大小
        if let Some(max) = self.upload.file_size_limit.filter(|m| *m > 0) {
            if chunk_size > max || file.declared_size() > max {
                return Err(quota("UPLOAD_FILES_SMALLER_THAN", &relative).with_arg(format_mb(max)));
            }
        }
        if let Some(min) = self.upload.min_file_size.filter(|m| *m > 0) {
            if file.declared_size() < min {
                return Err(validation("UPLOAD_FILES_LARGER_THAN", &relative).with_arg(format_mb(min)));
            }
        }

        // 6. 文件数量（已存在半成品的后续分片不计）
        if let Some(max) = self.upload.max_number_of_files {
            let continuation = file.offset() > 0;
            if accepted >= max && !continuation {
                return Err(validation("MAX_NUMBER_OF_FILES", &relative).with_arg(max.to_string()));
            }
        }

        // 后续分片没有文件头，内容检查只对第一个分片做
        if file.offset() > 0 {
            return Ok(());
        }

        // 7. 仅允许图片
        let info = thumbnail::read_info(&file.data);
        if self.upload.images_only && info.is_none() {
            return Err(validation("UPLOAD_IMAGES_ONLY", &relative));
        }

        // 8. 图片尺寸
        let limits = &self.upload.dimensions;
        if limits.is_configured() && thumbnail::is_raster_extension(relpath::extension(name)) {
            if let Some(info) = info {
                let (width, height) = if self.auto_orient {
                    info.oriented_dimensions()
                } else {
                    (info.width, info.height)
                };
                let checks = [
                    (limits.max_width.is_some_and(|max| width > max), "UPLOAD_IMAGES_MAX_WIDTH", limits.max_width),
                    (limits.max_height.is_some_and(|max| height > max), "UPLOAD_IMAGES_MAX_HEIGHT", limits.max_height),
                    (limits.min_width.is_some_and(|min| width < min), "UPLOAD_IMAGES_MIN_WIDTH", limits.min_width),
                    (limits.min_height.is_some_and(|min| height < min), "UPLOAD_IMAGES_MIN_HEIGHT", limits.min_height),
                ];
                if let Some((_, key, bound)) = checks.into_iter().find(|(failed, _, _)| *failed) {
                    return Err(validation(key, &relative).with_arg(bound.unwrap_or_default().to_string()));
                }
            }
        }

        Ok(())
    }

    /// 写入数据，返回实际目标路径与写入后的文件大小
    ///
    /// 新文件用独占创建；名字被并发请求抢先占用时顺延到下一个候选名
    async fn store(&self, target: &str, file: &UploadFile) -> Result<(String, u64), FmError> {
        let offset = file.offset();

        if offset > 0 {
            let current = self
                .backend
                .stat(target)
                .await?
                .filter(|meta| !meta.is_dir)
                .map(|meta| meta.size);
            if current != Some(offset) {
                return Err(validation("CHUNK_OFFSET_MISMATCH", target).with_arg(offset.to_string()));
            }
            let size = self.backend.append(target, file.data.clone()).await?;
            return Ok((target.to_string(), size));
        }

        let size = file.data.len() as u64;
        if self.upload.overwrite {
            self.backend.write(target, file.data.clone()).await?;
            return Ok((target.to_string(), size));
        }

        let dir = relpath::parent(target);
        let mut candidate = target.to_string();
        for _ in 0..MAX_NAME_ATTEMPTS {
            match self.backend.create_new(&candidate, file.data.clone()).await {
                Ok(()) => return Ok((candidate, size)),
                Err(e) if e.kind == ErrorKind::Conflict => {
                    debug!("文件名已被占用，顺延: {}", candidate);
                    let next = naming::upcount_name(relpath::file_name(&candidate));
                    let unique = naming::unique_name(self.backend.as_ref(), &dir, &next, 0).await?;
                    candidate = relpath::join(&dir, &unique);
                }
                Err(e) => return Err(e),
            }
        }
        Err(FmError::conflict(target))
    }
}
