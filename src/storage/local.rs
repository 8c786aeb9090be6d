// 本地磁盘存储后端

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::backend::StorageBackend;
use super::error::FmError;
use super::relpath;
use super::types::{ByteRange, ByteStream, DirEntry, EntryMeta, READ_CHUNK_SIZE};

/// 本地磁盘后端
#[derive(Debug, Clone)]
pub struct LocalDisk {
    /// 规范化后的存储根目录
    root: PathBuf,
}

impl LocalDisk {
    /// 创建后端，根目录必须已存在
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FmError> {
        let root = root.as_ref();
        let canonical = dunce::canonicalize(root)
            .map_err(|e| FmError::from_io(e, &root.to_string_lossy()))?;
        if !canonical.is_dir() {
            return Err(FmError::not_found(&format!("{}/", root.to_string_lossy())));
        }
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 相对路径拼接到根目录，拒绝任何非普通路径段
    fn abs(&self, relative: &str) -> Result<PathBuf, FmError> {
        let mut path = self.root.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => path.push(segment),
                _ => return Err(FmError::path_escape(relative)),
            }
        }
        Ok(path)
    }

    /// 同目录下的临时文件路径
    fn temp_sibling(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp_name = format!(".{}.{}.part", name, uuid::Uuid::new_v4().simple());
        target.with_file_name(temp_name)
    }

    async fn write_temp(target: &Path, data: &[u8]) -> io::Result<PathBuf> {
        let temp = Self::temp_sibling(target);
        let result = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = result {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(temp)
    }

    /// 符号链接的实际目标是否仍在根目录内
    async fn is_confined_link(&self, path: &Path) -> bool {
        match fs::canonicalize(path).await {
            Ok(target) => dunce::simplified(&target).starts_with(&self.root),
            Err(_) => false,
        }
    }
}

fn is_missing(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    // ENOTDIR：路径中间某段是文件
    #[cfg(unix)]
    {
        if err.raw_os_error() == Some(20) {
            return true;
        }
    }
    false
}

fn to_entry_meta(md: &Metadata) -> EntryMeta {
    let modified = md.modified().ok().map(DateTime::<Utc>::from);
    let created = md.created().ok().map(DateTime::<Utc>::from).or(modified);
    let (readable, writable) = permission_bits(md);
    EntryMeta {
        is_dir: md.is_dir(),
        size: if md.is_dir() { 0 } else { md.len() },
        created,
        modified,
        readable,
        writable,
    }
}

#[cfg(unix)]
fn permission_bits(md: &Metadata) -> (bool, bool) {
    use std::os::unix::fs::PermissionsExt;
    let mode = md.permissions().mode();
    let readable = mode & 0o400 != 0;
    let writable = mode & 0o200 != 0;
    if md.is_dir() {
        // 目录需要可执行位才能进入
        let exec = mode & 0o100 != 0;
        (readable && exec, writable && exec)
    } else {
        (readable, writable)
    }
}

#[cfg(not(unix))]
fn permission_bits(md: &Metadata) -> (bool, bool) {
    (true, !md.permissions().readonly())
}

#[async_trait]
impl StorageBackend for LocalDisk {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn confine(&self, relative: &str) -> Result<String, FmError> {
        let candidate = self.abs(relative)?;

        // 找到最深的已存在祖先，对其做 realpath
        let mut existing = candidate.as_path();
        while fs::symlink_metadata(existing).await.is_err() {
            existing = existing
                .parent()
                .ok_or_else(|| FmError::path_escape(relative))?;
        }

        let canonical = fs::canonicalize(existing)
            .await
            .map(|p| dunce::simplified(&p).to_path_buf())
            .map_err(|_| FmError::path_escape(relative))?;

        if !canonical.starts_with(&self.root) {
            warn!("路径越出存储根目录: {} -> {:?}", relative, canonical);
            return Err(FmError::path_escape(relative));
        }

        let rest = candidate
            .strip_prefix(existing)
            .map_err(|_| FmError::path_escape(relative))?;
        let resolved = if rest.as_os_str().is_empty() {
            canonical
        } else {
            canonical.join(rest)
        };
        Ok(resolved.to_string_lossy().to_string())
    }

    async fn stat(&self, path: &str) -> Result<Option<EntryMeta>, FmError> {
        let abs = self.abs(path)?;
        match fs::metadata(&abs).await {
            Ok(md) => Ok(Some(to_entry_meta(&md))),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(FmError::from_io(e, path)),
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>, FmError> {
        let abs = self.abs(dir)?;
        let mut read_dir = fs::read_dir(&abs)
            .await
            .map_err(|e| FmError::from_io(e, &relpath::as_dir(dir)))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| FmError::from_io(e, dir))?
        {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!("跳过非 UTF-8 文件名: {:?}", raw);
                    continue;
                }
            };
            let entry_path = entry.path();

            let is_link = entry
                .file_type()
                .await
                .map(|t| t.is_symlink())
                .unwrap_or(false);
            if is_link && !self.is_confined_link(&entry_path).await {
                debug!("跳过指向根目录外的符号链接: {:?}", entry_path);
                continue;
            }

            // 悬空链接等无法读取元数据的条目直接跳过
            let md = match fs::metadata(&entry_path).await {
                Ok(md) => md,
                Err(e) => {
                    debug!("读取元数据失败，跳过: {:?}, 错误: {}", entry_path, e);
                    continue;
                }
            };
            entries.push(DirEntry {
                name,
                meta: to_entry_meta(&md),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &str, range: Option<ByteRange>) -> Result<ByteStream, FmError> {
        let abs = self.abs(path)?;
        let mut file = fs::File::open(&abs)
            .await
            .map_err(|e| FmError::from_io(e, path))?;

        match range {
            Some(range) => {
                file.seek(SeekFrom::Start(range.start))
                    .await
                    .map_err(|e| FmError::from_io(e, path))?;
                let reader: Box<dyn tokio::io::AsyncRead + Send + Unpin> = match range.end {
                    Some(end) => Box::new(file.take(end.saturating_sub(range.start) + 1)),
                    None => Box::new(file),
                };
                Ok(Box::pin(ReaderStream::with_capacity(reader, READ_CHUNK_SIZE)))
            }
            None => Ok(Box::pin(ReaderStream::with_capacity(file, READ_CHUNK_SIZE))),
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<(), FmError> {
        let abs = self.abs(path)?;
        let temp = Self::write_temp(&abs, &data)
            .await
            .map_err(|e| FmError::from_io(e, path))?;
        if let Err(e) = fs::rename(&temp, &abs).await {
            let _ = fs::remove_file(&temp).await;
            return Err(FmError::from_io(e, path));
        }
        Ok(())
    }

    async fn create_new(&self, path: &str, data: Bytes) -> Result<(), FmError> {
        let abs = self.abs(path)?;
        let temp = Self::write_temp(&abs, &data)
            .await
            .map_err(|e| FmError::from_io(e, path))?;

        // 硬链接在目标已存在时失败，实现独占且原子的创建
        let linked = fs::hard_link(&temp, &abs).await;
        let _ = fs::remove_file(&temp).await;
        linked.map_err(|e| FmError::from_io(e, path))
    }

    async fn append(&self, path: &str, data: Bytes) -> Result<u64, FmError> {
        let abs = self.abs(path)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&abs)
            .await
            .map_err(|e| FmError::from_io(e, path))?;
        file.write_all(&data)
            .await
            .map_err(|e| FmError::from_io(e, path))?;
        file.flush().await.map_err(|e| FmError::from_io(e, path))?;
        let md = file
            .metadata()
            .await
            .map_err(|e| FmError::from_io(e, path))?;
        Ok(md.len())
    }

    async fn put_file(&self, local: &Path, path: &str) -> Result<(), FmError> {
        let abs = self.abs(path)?;
        let temp = Self::temp_sibling(&abs);
        if let Err(e) = fs::copy(local, &temp).await {
            let _ = fs::remove_file(&temp).await;
            return Err(FmError::from_io(e, path));
        }
        if let Err(e) = fs::rename(&temp, &abs).await {
            let _ = fs::remove_file(&temp).await;
            return Err(FmError::from_io(e, path));
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FmError> {
        let src = self.abs(from)?;
        let dst = self.abs(to)?;
        // rename 在 Unix 上会静默覆盖已有文件
        if fs::symlink_metadata(&dst).await.is_ok() {
            return Err(FmError::conflict(to));
        }
        fs::rename(&src, &dst)
            .await
            .map_err(|e| FmError::from_io(e, from))
    }

    async fn copy_file(&self, from: &str, to: &str) -> Result<(), FmError> {
        let src = self.abs(from)?;
        let dst = self.abs(to)?;
        fs::copy(&src, &dst)
            .await
            .map(|_| ())
            .map_err(|e| FmError::from_io(e, from))
    }

    async fn mkdir(&self, path: &str) -> Result<(), FmError> {
        let abs = self.abs(path)?;
        fs::create_dir(&abs)
            .await
            .map_err(|e| FmError::from_io(e, &relpath::as_dir(path)))
    }

    async fn mkdir_all(&self, path: &str) -> Result<(), FmError> {
        let abs = self.abs(path)?;
        fs::create_dir_all(&abs)
            .await
            .map_err(|e| FmError::from_io(e, &relpath::as_dir(path)))
    }

    async fn remove_file(&self, path: &str) -> Result<(), FmError> {
        let abs = self.abs(path)?;
        fs::remove_file(&abs)
            .await
            .map_err(|e| FmError::from_io(e, path))
    }

    async fn remove_dir(&self, path: &str) -> Result<(), FmError> {
        let abs = self.abs(path)?;
        fs::remove_dir(&abs)
            .await
            .map_err(|e| FmError::from_io(e, &relpath::as_dir(path)))
    }

    async fn real_size(&self, path: &str) -> Result<u64, FmError> {
        let abs = self.abs(path)?;

        // 1. 打开并定位到末尾
        if let Ok(mut file) = fs::File::open(&abs).await {
            if let Ok(size) = file.seek(SeekFrom::End(0)).await {
                return Ok(size);
            }
        }

        // 2. 回退到 stat
        let md = fs::metadata(&abs)
            .await
            .map_err(|e| FmError::from_io(e, path))?;
        Ok(md.len())
    }
}
