// 缩略图缓存
//
// 缩略图目录镜像原始目录树：原图 /dir/a.jpg 的缩略图位于 /{thumbnail.dir}/dir/a.jpg

use bytes::Bytes;
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::imaging;
use crate::config::{ImagesConfig, MainImageConfig, ThumbnailConfig};
use crate::storage::{relpath, ByteRange, FmError, StorageBackend};

/// 读取尺寸时最多读取的头部字节数
const DIMENSION_HEAD_BYTES: u64 = 256 * 1024;

/// 缩略图缓存
#[derive(Clone)]
pub struct ThumbnailCache {
    backend: Arc<dyn StorageBackend>,
    config: ThumbnailConfig,
    main: MainImageConfig,
    read_only: bool,
}

impl ThumbnailCache {
    pub fn new(backend: Arc<dyn StorageBackend>, images: &ImagesConfig, read_only: bool) -> Self {
        Self {
            backend,
            config: images.thumbnail.clone(),
            main: images.main.clone(),
            read_only,
        }
    }

    fn root_dir(&self) -> String {
        format!("/{}/", self.config.dir.trim_matches('/'))
    }

    /// 原始条目对应的缩略图路径（文件夹对应文件夹）
    pub fn thumbnail_path(&self, relative: &str) -> String {
        let root = self.root_dir();
        format!("{}{}", root, relative.trim_start_matches('/'))
    }

    /// 路径是否位于缩略图目录内
    pub fn is_thumbnail_path(&self, relative: &str) -> bool {
        let root = self.root_dir();
        relative == root || relpath::is_within(relative, &root)
    }

    fn can_write(&self) -> bool {
        self.config.enabled && !self.read_only
    }

    /// 返回应当输出的路径：缩略图，或无法生成时的原图
    pub async fn get_or_create(&self, relative: &str) -> Result<String, FmError> {
        if !self.can_write() {
            return Ok(relative.to_string());
        }
        match self.ensure(relative).await {
            Ok(Some(thumb)) => Ok(thumb),
            Ok(None) => Ok(relative.to_string()),
            Err(e) => {
                warn!("生成缩略图失败，返回原图: {} ({})", relative, e);
                Ok(relative.to_string())
            }
        }
    }

    /// 生成缩略图；开启缓存且已存在时直接复用
    ///
    /// 非位图返回 None
    pub async fn ensure(&self, relative: &str) -> Result<Option<String>, FmError> {
        if !imaging::is_raster_extension(relpath::extension(relative)) {
            return Ok(None);
        }

        let thumb = self.thumbnail_path(relative);
        if self.config.cache && self.backend.exists(&thumb).await? {
            return Ok(Some(thumb));
        }

        let original = self.backend.read_all(relative).await?;
        let (width, height, crop) = (self.config.max_width, self.config.max_height, self.config.crop);
        let encoded = tokio::task::spawn_blocking(move || imaging::make_thumbnail(&original, width, height, crop))
            .await
            .map_err(|e| FmError::storage("ERROR_SERVER", relative).with_arg(e.to_string()))?;
        let data = match encoded {
            Ok(data) => data,
            Err(e) => {
                debug!("无法解码图片，跳过缩略图: {} ({})", relative, e);
                return Ok(None);
            }
        };

        self.backend.mkdir_all(&relpath::parent(&thumb)).await?;
        self.backend.write(&thumb, Bytes::from(data)).await?;
        debug!("缩略图已生成: {}", thumb);
        Ok(Some(thumb))
    }

    /// 上传完成后处理主图：自动旋转、等比缩小，然后生成缩略图
    pub async fn process_upload(&self, relative: &str) -> Result<(), FmError> {
        if !imaging::is_raster_extension(relpath::extension(relative)) {
            return Ok(());
        }

        let original = self.backend.read_all(relative).await?;
        let main = self.main.clone();
        let prepared = tokio::task::spawn_blocking(move || imaging::prepare_main(&original, &main))
            .await
            .map_err(|e| FmError::storage("ERROR_SERVER", relative).with_arg(e.to_string()))?;
        match prepared {
            Ok(Some(data)) => {
                self.backend.write(relative, Bytes::from(data)).await?;
                info!("主图已处理: {}", relative);
            }
            Ok(None) => {}
            Err(e) => warn!("主图处理失败，保留原文件: {} ({})", relative, e),
        }

        if self.can_write() {
            // 上传后强制重新生成，覆盖可能残留的旧缩略图
            self.invalidate(relative).await;
            if let Err(e) = self.ensure(relative).await {
                warn!("缩略图生成失败: {} ({})", relative, e);
            }
        }
        Ok(())
    }

    /// 读取位图尺寸（只读头部）
    pub async fn dimensions(&self, relative: &str, size: u64) -> Option<(u32, u32)> {
        if size == 0 || !imaging::is_raster_extension(relpath::extension(relative)) {
            return None;
        }
        let end = size.min(DIMENSION_HEAD_BYTES) - 1;
        let head = match self.backend.read(relative, Some(ByteRange { start: 0, end: Some(end) })).await {
            Ok(stream) => {
                let chunks: Vec<Bytes> = stream.try_collect().await.ok()?;
                chunks.concat()
            }
            Err(_) => return None,
        };
        imaging::read_info(&head).map(|info| (info.width, info.height))
    }

    /// 原条目被重命名/移动：缩略图跟随；目标缩略图父目录不存在时直接删除
    ///
    /// 只受只读模式限制：关闭缩略图生成后，已有的缩略图仍要跟随原条目
    pub async fn on_move(&self, old: &str, new: &str) {
        if self.read_only {
            return;
        }
        let old_thumb = self.thumbnail_path(old);
        let new_thumb = self.thumbnail_path(new);
        let result = async {
            if !self.backend.exists(&old_thumb).await? {
                return Ok(());
            }
            if self.backend.exists(&relpath::parent(&new_thumb)).await? {
                self.backend.move_recursive(&old_thumb, &new_thumb).await
            } else {
                self.backend.delete_recursive(&old_thumb).await
            }
        }
        .await;
        if let Err(e) = result {
            warn!("缩略图迁移失败: {} -> {} ({})", old_thumb, new_thumb, e);
        }
    }

    /// 原条目被复制：已有缩略图一并复制
    pub async fn on_copy(&self, source: &str, target: &str) {
        if self.read_only {
            return;
        }
        let source_thumb = self.thumbnail_path(source);
        let target_thumb = self.thumbnail_path(target);
        let result = async {
            if !self.backend.exists(&source_thumb).await? {
                return Ok(());
            }
            self.backend.mkdir_all(&relpath::parent(&target_thumb)).await?;
            self.backend.copy_recursive(&source_thumb, &target_thumb).await
        }
        .await;
        if let Err(e) = result {
            warn!("缩略图复制失败: {} -> {} ({})", source_thumb, target_thumb, e);
        }
    }

    /// 原条目被删除
    pub async fn on_delete(&self, relative: &str) {
        if self.read_only {
            return;
        }
        let thumb = self.thumbnail_path(relative);
        let result = async {
            if self.backend.exists(&thumb).await? {
                self.backend.delete_recursive(&thumb).await?;
            }
            Ok::<(), FmError>(())
        }
        .await;
        if let Err(e) = result {
            warn!("缩略图删除失败: {} ({})", thumb, e);
        }
    }

    /// 原文件内容变化（替换、保存），旧缩略图失效
    pub async fn invalidate(&self, relative: &str) {
        if relative.ends_with('/') {
            return;
        }
        self.on_delete(relative).await;
    }
}
