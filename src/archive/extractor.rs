// ZIP 解压
//
// 每个条目都重新走一遍路径解析 + 策略闸门 + 写权限检查；
// 不合格的条目跳过，不影响其他条目

use futures::TryStreamExt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::filemanager::ItemFactory;
use crate::security::{PathResolver, RequestContext, SecurityPolicyEngine};
use crate::storage::{relpath, ErrorKind, FmError, PathModel, ResourceItem, StorageBackend};

/// 压缩包中的一个条目
#[derive(Debug, Clone)]
struct ArchiveEntry {
    index: usize,
    name: String,
    is_dir: bool,
}

fn extract_error(path: &str, detail: impl ToString) -> FmError {
    FmError::new(ErrorKind::Archive, "ERROR_EXTRACTING_FILE")
        .with_arg(detail.to_string())
        .with_path(path)
}

fn join_error(path: &str, err: tokio::task::JoinError) -> FmError {
    FmError::storage("ERROR_SERVER", path).with_arg(err.to_string())
}

/// 解析后的条目相对目标目录的第一段，以及条目是否就位于目标目录第一层
///
/// 条目解析为目标目录本身时返回 None
fn first_segment<'a>(target: &str, path: &'a str) -> Option<(&'a str, bool)> {
    let rest = path.strip_prefix(target)?.trim_end_matches('/');
    if rest.is_empty() {
        return None;
    }
    Some(match rest.split_once('/') {
        Some((top, _)) => (top, false),
        None => (rest, true),
    })
}

/// 列出压缩包中的全部条目
fn list_entries(archive: &Path) -> zip::result::ZipResult<Vec<ArchiveEntry>> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    let mut entries = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let file = zip.by_index(index)?;
        entries.push(ArchiveEntry {
            index,
            name: file.name().to_string(),
            is_dir: file.is_dir(),
        });
    }
    Ok(entries)
}

/// 把选中的条目解压到暂存目录，文件名用条目序号
///
/// 单个条目失败只影响它自己
fn unpack_entries(archive: &Path, indexes: &[usize], staging: &Path) -> io::Result<Vec<(usize, io::Result<PathBuf>)>> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?).map_err(io::Error::from)?;
    let mut results = Vec::with_capacity(indexes.len());
    for &index in indexes {
        let local = staging.join(index.to_string());
        let result = zip
            .by_index(index)
            .map_err(io::Error::from)
            .and_then(|mut entry| {
                let mut out = File::create(&local)?;
                io::copy(&mut entry, &mut out)?;
                Ok(local)
            });
        results.push((index, result));
    }
    Ok(results)
}

/// 压缩包解压器
#[derive(Clone)]
pub struct ArchiveExtractor {
    backend: Arc<dyn StorageBackend>,
    resolver: PathResolver,
    policy: Arc<SecurityPolicyEngine>,
    items: ItemFactory,
}

impl ArchiveExtractor {
    pub fn new(resolver: PathResolver, policy: Arc<SecurityPolicyEngine>, items: ItemFactory) -> Self {
        Self {
            backend: resolver.backend().clone(),
            resolver,
            policy,
            items,
        }
    }

    /// 把 `source` 解压到文件夹 `target`，返回压缩包根层级上创建的条目
    pub async fn extract(
        &self,
        source: &PathModel,
        target: &PathModel,
        ctx: &RequestContext,
    ) -> Result<Vec<ResourceItem>, FmError> {
        let archive = self.stage(&source.path_relative).await?;
        let archive_path = archive.path().to_path_buf();

        let entries = {
            let path = archive_path.clone();
            tokio::task::spawn_blocking(move || list_entries(&path))
                .await
                .map_err(|e| join_error(&source.path_relative, e))?
                .map_err(|e| extract_error(&source.path_relative, e))?
        };
        info!("解压 {} -> {} ({} 个条目)", source.path_relative, target.path_relative, entries.len());

        let mut root_items: Vec<String> = Vec::new();

        // 第一遍：目录
        for entry in entries.iter().filter(|e| e.is_dir) {
            let Some(model) = self.accept(target, entry, ctx).await else {
                continue;
            };
            match self.backend.mkdir_all(&model.path_relative).await {
                Ok(()) => {
                    if let Some((top, _)) = first_segment(&target.path_relative, &model.path_relative) {
                        root_items.push(relpath::join_dir(&target.path_relative, top));
                    }
                }
                Err(e) => warn!("创建目录失败，跳过: {} ({})", model.path_relative, e),
            }
        }

        // 第二遍：文件
        let mut accepted: Vec<(ArchiveEntry, PathModel)> = Vec::new();
        for entry in entries.iter().filter(|e| !e.is_dir) {
            if let Some(model) = self.accept(target, entry, ctx).await {
                accepted.push((entry.clone(), model));
            }
        }

        let staging = TempDir::new().map_err(|e| extract_error(&source.path_relative, e))?;
        let unpacked = {
            let indexes: Vec<usize> = accepted.iter().map(|(entry, _)| entry.index).collect();
            let staging_path = staging.path().to_path_buf();
            tokio::task::spawn_blocking(move || unpack_entries(&archive_path, &indexes, &staging_path))
                .await
                .map_err(|e| join_error(&source.path_relative, e))?
                .map_err(|e| extract_error(&source.path_relative, e))?
        };

        for ((entry, model), (_, result)) in accepted.iter().zip(unpacked) {
            let stored = async {
                let local = result.map_err(|e| extract_error(&model.path_relative, e))?;
                self.backend.mkdir_all(&relpath::parent(&model.path_relative)).await?;
                self.backend.put_file(&local, &model.path_relative).await
            }
            .await;

            match stored {
                Ok(()) => {
                    debug!("已解压: {}", model.path_relative);
                    if let Some((_, true)) = first_segment(&target.path_relative, &model.path_relative) {
                        root_items.push(model.path_relative.clone());
                    }
                }
                Err(e) => warn!("解压条目失败，跳过: {} ({})", entry.name, e),
            }
        }

        let mut seen = std::collections::HashSet::new();
        root_items.retain(|path| seen.insert(path.clone()));

        let mut items = Vec::with_capacity(root_items.len());
        for path in root_items {
            match self.items.fresh(&path, ctx).await {
                Ok(item) => items.push(item),
                Err(e) => debug!("根层级条目不可用: {} ({})", path, e),
            }
        }
        Ok(items)
    }

    /// 把压缩包从存储复制到本地临时文件
    async fn stage(&self, relative: &str) -> Result<NamedTempFile, FmError> {
        let temp = NamedTempFile::new().map_err(|e| FmError::from_io(e, relative))?;
        let mut out = tokio::fs::File::create(temp.path())
            .await
            .map_err(|e| FmError::from_io(e, relative))?;
        let mut stream = self.backend.read(relative, None).await?;
        while let Some(chunk) = stream.try_next().await.map_err(|e| FmError::from_io(e, relative))? {
            out.write_all(&chunk).await.map_err(|e| FmError::from_io(e, relative))?;
        }
        out.flush().await.map_err(|e| FmError::from_io(e, relative))?;
        Ok(temp)
    }

    /// 条目的独立校验：解析、约束在目标文件夹内、策略闸门、写权限
    async fn accept(&self, target: &PathModel, entry: &ArchiveEntry, ctx: &RequestContext) -> Option<PathModel> {
        let raw = format!("{}{}", target.path_relative, entry.name);
        let model = match self.resolver.resolve(&raw).await {
            Ok(model) => model,
            Err(e) => {
                warn!("压缩包条目路径无效，跳过: {} ({})", entry.name, e);
                return None;
            }
        };
        if !relpath::is_within(&model.path_relative, &target.path_relative) {
            warn!("压缩包条目越出目标目录，跳过: {}", entry.name);
            return None;
        }
        if model.is_exists && model.is_dir != entry.is_dir {
            warn!("压缩包条目与已有条目类型冲突，跳过: {}", entry.name);
            return None;
        }
        if !self.policy.is_unrestricted(&model.path_relative, entry.is_dir) {
            warn!("压缩包条目被策略拒绝，跳过: {}", entry.name);
            return None;
        }
        if let Err(e) = self.policy.check_write(&model, ctx, self.backend.as_ref()).await {
            warn!("压缩包条目不可写，跳过: {} ({})", entry.name, e);
            return None;
        }
        Some(model)
    }
}
