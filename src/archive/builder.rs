// 文件夹 ZIP 打包
//
// 先写入临时文件再流式下发；临时文件随返回的流一起释放

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempPath};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::security::{RequestContext, SecurityPolicyEngine};
use crate::storage::{relpath, ByteStream, ErrorKind, FmError, PathModel, StorageBackend, WalkEntry};

/// 压缩包内的标记文件
pub const SENTINEL_NAME: &str = "filemanager.txt";
const SENTINEL_CONTENT: &[u8] = b"This archive was generated by filemanager-rust.\n";

/// 下载流的分片大小（5MB）
pub const DOWNLOAD_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// 写入线程接收的消息
enum ZipMessage {
    Directory(String),
    File { name: String, large: bool },
    Chunk(Bytes),
}

fn zip_error(path: &str, detail: impl ToString) -> FmError {
    FmError::new(ErrorKind::Archive, "ERROR_CREATING_ZIP")
        .with_arg(detail.to_string())
        .with_path(path)
}

/// 生成好的压缩包
pub struct BuiltArchive {
    path: TempPath,
    pub size: u64,
    /// 文件条目数（含标记文件）
    pub entries: usize,
}

impl BuiltArchive {
    /// 以 5MB 分片读取压缩包，流结束或被丢弃时删除临时文件
    pub async fn into_stream(self) -> Result<ByteStream, FmError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| zip_error(&self.path.to_string_lossy(), e))?;
        let keep = self.path;
        let stream = ReaderStream::with_capacity(file, DOWNLOAD_CHUNK_SIZE).map(move |chunk| {
            let _ = &keep;
            chunk
        });
        Ok(Box::pin(stream))
    }
}

/// 压缩包写入线程：标记文件在最前，之后按消息顺序写入
fn write_archive(file: File, mut rx: mpsc::Receiver<ZipMessage>) -> zip::result::ZipResult<usize> {
    let mut zip = ZipWriter::new(file);
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(SENTINEL_NAME, stored)?;
    zip.write_all(SENTINEL_CONTENT)?;
    let mut files = 1;

    while let Some(message) = rx.blocking_recv() {
        match message {
            ZipMessage::Directory(name) => zip.add_directory(name, deflated)?,
            ZipMessage::File { name, large } => {
                zip.start_file(name, deflated.large_file(large))?;
                files += 1;
            }
            ZipMessage::Chunk(data) => zip.write_all(&data)?,
        }
    }

    zip.finish()?;
    Ok(files)
}

/// 文件夹打包器
#[derive(Clone)]
pub struct ZipBuilder {
    backend: Arc<dyn StorageBackend>,
    policy: Arc<SecurityPolicyEngine>,
}

impl ZipBuilder {
    pub fn new(backend: Arc<dyn StorageBackend>, policy: Arc<SecurityPolicyEngine>) -> Self {
        Self { backend, policy }
    }

    /// 把文件夹 `dir` 中可读且不受限的内容打包到临时文件
    ///
    /// 条目名相对于 `dir`；只有空文件夹才写入目录条目
    pub async fn build(&self, dir: &PathModel, ctx: &RequestContext) -> Result<BuiltArchive, FmError> {
        let root = relpath::as_dir(&dir.path_relative);
        let policy = self.policy.clone();
        let filter = |path: &str, meta: &crate::storage::EntryMeta| policy.is_readable(path, meta, ctx);
        let entries = crate::storage::walk(self.backend.as_ref(), &root, &filter).await?;

        let temp = NamedTempFile::new().map_err(|e| zip_error(&root, e))?;
        let file = temp.reopen().map_err(|e| zip_error(&root, e))?;
        let (tx, rx) = mpsc::channel::<ZipMessage>(8);
        let writer = tokio::task::spawn_blocking(move || write_archive(file, rx));

        let fed = self.feed(&root, &entries, &tx).await;
        drop(tx);

        let written = writer
            .await
            .map_err(|e| zip_error(&root, e))?
            .map_err(|e| zip_error(&root, e));
        // 写入线程提前退出时，送数据一侧的错误只是连带结果
        let files = match (written, fed) {
            (Err(e), _) => return Err(e),
            (Ok(_), Err(e)) => return Err(e),
            (Ok(files), Ok(())) => files,
        };

        let path = temp.into_temp_path();
        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| zip_error(&root, e))?
            .len();
        info!("打包完成: {} ({} 个文件, {} 字节)", root, files, size);

        Ok(BuiltArchive {
            path,
            size,
            entries: files,
        })
    }

    async fn feed(&self, root: &str, entries: &[WalkEntry], tx: &mpsc::Sender<ZipMessage>) -> Result<(), FmError> {
        let closed = || zip_error(root, "写入线程已退出");
        // 至少有一个子项通过过滤的目录
        let non_empty: HashSet<String> = entries.iter().map(|e| relpath::parent(&e.path)).collect();

        for entry in entries {
            let Some(name) = entry.path.strip_prefix(root) else {
                warn!("遍历结果不在打包目录内，跳过: {}", entry.path);
                continue;
            };

            if entry.meta.is_dir {
                if !non_empty.contains(&entry.path) {
                    tx.send(ZipMessage::Directory(name.to_string()))
                        .await
                        .map_err(|_| closed())?;
                }
                continue;
            }

            tx.send(ZipMessage::File {
                name: name.to_string(),
                large: entry.meta.size >= u32::MAX as u64,
            })
            .await
            .map_err(|_| closed())?;

            let mut stream = self.backend.read(&entry.path, None).await?;
            while let Some(chunk) = stream
                .try_next()
                .await
                .map_err(|e| FmError::from_io(e, &entry.path))?
            {
                tx.send(ZipMessage::Chunk(chunk)).await.map_err(|_| closed())?;
            }
            debug!("已打包: {}", entry.path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::security::PathResolver;
    use crate::storage::{LocalDisk, MemoryObjectClient, ObjectStore};
    use std::io::{Cursor, Read};
    use tempfile::TempDir;

    async fn collect(archive: BuiltArchive) -> Vec<u8> {
        let stream = archive.into_stream().await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    async fn populate(backend: &dyn StorageBackend) {
        backend.mkdir_all("/pack/sub/").await.unwrap();
        backend.mkdir_all("/pack/empty/").await.unwrap();
        backend.write("/pack/a.txt", Bytes::from_static(b"alpha")).await.unwrap();
        backend.write("/pack/sub/b.txt", Bytes::from_static(b"beta")).await.unwrap();
        backend.write("/pack/sub/c.md", Bytes::from_static(b"# gamma")).await.unwrap();
        backend.write("/pack/skip.exe", Bytes::from_static(b"MZ")).await.unwrap();
    }

    async fn build(backend: Arc<dyn StorageBackend>) -> Vec<u8> {
        let config = crate::config::AppConfig::default();
        let policy = Arc::new(SecurityPolicyEngine::new(&SecurityConfig::default()).unwrap());
        let resolver = PathResolver::new(backend.clone(), &config);
        let builder = ZipBuilder::new(backend, policy);
        let dir = resolver.resolve("/pack/").await.unwrap();
        let archive = builder.build(&dir, &RequestContext::default()).await.unwrap();
        assert_eq!(archive.entries, 4);
        collect(archive).await
    }

    fn names(bytes: Vec<u8>) -> Vec<String> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = (0..zip.len()).map(|i| zip.by_index(i).unwrap().name().to_string()).collect();
        let mut content = String::new();
        zip.by_name("sub/b.txt").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "beta");
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_archive_holds_files_plus_sentinel() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalDisk::new(dir.path()).unwrap());
        populate(backend.as_ref()).await;

        let names = names(build(backend).await);
        assert_eq!(
            names,
            vec!["a.txt", "empty/", "filemanager.txt", "sub/b.txt", "sub/c.md"]
        );
    }

    #[tokio::test]
    async fn test_object_store_archive_matches() {
        let backend: Arc<dyn StorageBackend> = Arc::new(ObjectStore::new(Arc::new(MemoryObjectClient::new()), ""));
        populate(backend.as_ref()).await;

        let names = names(build(backend).await);
        assert_eq!(
            names,
            vec!["a.txt", "empty/", "filemanager.txt", "sub/b.txt", "sub/c.md"]
        );
    }

    #[tokio::test]
    async fn test_folder_with_only_filtered_children_kept_as_empty() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalDisk::new(dir.path()).unwrap());
        populate(backend.as_ref()).await;
        backend.mkdir_all("/pack/bin/").await.unwrap();
        backend.write("/pack/bin/tool.exe", Bytes::from_static(b"MZ")).await.unwrap();

        let names = names(build(backend).await);
        assert_eq!(
            names,
            vec!["a.txt", "bin/", "empty/", "filemanager.txt", "sub/b.txt", "sub/c.md"]
        );
    }

    #[tokio::test]
    async fn test_temp_file_removed_after_stream_dropped() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalDisk::new(dir.path()).unwrap());
        populate(backend.as_ref()).await;

        let policy = Arc::new(SecurityPolicyEngine::new(&SecurityConfig::default()).unwrap());
        let resolver = PathResolver::new(backend.clone(), &crate::config::AppConfig::default());
        let builder = ZipBuilder::new(backend, policy);
        let model = resolver.resolve("/pack/").await.unwrap();
        let archive = builder.build(&model, &RequestContext::default()).await.unwrap();
        let temp = archive.path.to_path_buf();
        assert!(temp.exists());

        let stream = archive.into_stream().await.unwrap();
        drop(stream);
        assert!(!temp.exists());
    }
}
