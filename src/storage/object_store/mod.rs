// 对象存储后端
//
// 目录用以 `/` 结尾的零字节占位对象表示；没有占位对象但存在子键的前缀同样视为目录

mod client;
mod http;
mod memory;

pub use client::{ObjectClient, ObjectListing, ObjectStoreError, ObjectSummary};
pub use http::HttpObjectClient;
pub use memory::MemoryObjectClient;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::backend::StorageBackend;
use super::error::FmError;
use super::relpath;
use super::types::{ByteRange, ByteStream, DirEntry, EntryMeta, ObjectHead};

/// 对象存储后端
#[derive(Clone)]
pub struct ObjectStore {
    client: Arc<dyn ObjectClient>,
    /// 键前缀，非空时以 `/` 结尾
    prefix: String,
}

impl ObjectStore {
    pub fn new(client: Arc<dyn ObjectClient>, prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}/", trimmed)
        };
        Self { client, prefix }
    }

    fn file_key(&self, path: &str) -> String {
        let trimmed = relpath::trim_dir_marker(path).trim_start_matches('/');
        format!("{}{}", self.prefix, trimmed)
    }

    fn dir_key(&self, path: &str) -> String {
        if relpath::is_root(path) {
            return self.prefix.clone();
        }
        format!("{}/", self.file_key(path))
    }

    /// 对象的头部元数据（内容长度、类型、用户元数据）
    pub async fn head_metadata(&self, path: &str) -> Result<Option<ObjectHead>, FmError> {
        self.client
            .head(&self.file_key(path))
            .await
            .map_err(|e| e.into_fm(path))
    }

    fn check_segments(path: &str) -> Result<(), FmError> {
        if path.split('/').any(|s| s == ".." || s == ".") {
            return Err(FmError::path_escape(path));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for ObjectStore {
    fn name(&self) -> &'static str {
        "object_store"
    }

    async fn confine(&self, relative: &str) -> Result<String, FmError> {
        Self::check_segments(relative)?;
        // 对象键没有符号链接，前缀拼接即为约束
        Ok(if relative.ends_with('/') {
            self.dir_key(relative)
        } else {
            self.file_key(relative)
        })
    }

    async fn stat(&self, path: &str) -> Result<Option<EntryMeta>, FmError> {
        Self::check_segments(path)?;
        if relpath::is_root(path) {
            return Ok(Some(EntryMeta::dir()));
        }

        if let Some(head) = self.head_metadata(path).await? {
            return Ok(Some(EntryMeta::file(head.content_length, head.last_modified)));
        }

        let dir_key = self.dir_key(path);
        if let Some(head) = self
            .client
            .head(&dir_key)
            .await
            .map_err(|e| e.into_fm(path))?
        {
            let mut meta = EntryMeta::dir();
            meta.modified = head.last_modified;
            meta.created = head.last_modified;
            return Ok(Some(meta));
        }

        // 没有占位对象的隐式目录
        let listing = self
            .client
            .list(&dir_key, true)
            .await
            .map_err(|e| e.into_fm(path))?;
        if !listing.objects.is_empty() || !listing.prefixes.is_empty() {
            return Ok(Some(EntryMeta::dir()));
        }

        Ok(None)
    }

    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>, FmError> {
        let dir_key = self.dir_key(dir);
        let listing = self
            .client
            .list(&dir_key, true)
            .await
            .map_err(|e| e.into_fm(dir))?;

        Ok(entries_of(&dir_key, listing))
    }

    async fn read(&self, path: &str, range: Option<ByteRange>) -> Result<ByteStream, FmError> {
        self.client
            .get(&self.file_key(path), range)
            .await
            .map_err(|e| e.into_fm(path))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<(), FmError> {
        // 对象 PUT 本身即整体替换
        self.client
            .put(&self.file_key(path), data)
            .await
            .map_err(|e| e.into_fm(path))
    }

    async fn create_new(&self, path: &str, data: Bytes) -> Result<(), FmError> {
        // 客户端没有条件写入，检查与写入之间仍存在竞争窗口
        if self.stat(path).await?.is_some() {
            return Err(FmError::conflict(path));
        }
        self.write(path, data).await
    }

    async fn append(&self, path: &str, data: Bytes) -> Result<u64, FmError> {
        let mut existing = self.read_all(path).await?;
        existing.extend_from_slice(&data);
        let size = existing.len() as u64;
        self.write(path, Bytes::from(existing)).await?;
        Ok(size)
    }

    async fn put_file(&self, local: &Path, path: &str) -> Result<(), FmError> {
        self.client
            .put_file(&self.file_key(path), local)
            .await
            .map_err(|e| e.into_fm(path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FmError> {
        let meta = self
            .stat(from)
            .await?
            .ok_or_else(|| FmError::not_found(from))?;
        if meta.is_dir {
            // 目录下每个键都要单独复制
            return Err(FmError::cross_device(from));
        }
        if self.stat(to).await?.is_some() {
            return Err(FmError::conflict(to));
        }
        self.copy_file(from, to).await?;
        self.remove_file(from).await
    }

    async fn copy_file(&self, from: &str, to: &str) -> Result<(), FmError> {
        self.client
            .copy(&self.file_key(from), &self.file_key(to))
            .await
            .map_err(|e| e.into_fm(from))
    }

    async fn mkdir(&self, path: &str) -> Result<(), FmError> {
        let dir = relpath::as_dir(path);
        if self.stat(&dir).await?.is_some() {
            return Err(FmError::conflict(&dir));
        }
        self.client
            .put(&self.dir_key(&dir), Bytes::new())
            .await
            .map_err(|e| e.into_fm(&dir))
    }

    async fn mkdir_all(&self, path: &str) -> Result<(), FmError> {
        let mut current = String::from("/");
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = relpath::join_dir(&current, segment);
            let key = self.dir_key(&current);
            let exists = self
                .client
                .head(&key)
                .await
                .map_err(|e| e.into_fm(&current))?
                .is_some();
            if !exists {
                self.client
                    .put(&key, Bytes::new())
                    .await
                    .map_err(|e| e.into_fm(&current))?;
            }
        }
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<(), FmError> {
        self.client
            .delete(&self.file_key(path))
            .await
            .map_err(|e| e.into_fm(path))
    }

    async fn remove_dir(&self, path: &str) -> Result<(), FmError> {
        if relpath::is_root(path) {
            return Ok(());
        }
        self.client
            .delete(&self.dir_key(path))
            .await
            .map_err(|e| e.into_fm(path))
    }

    async fn real_size(&self, path: &str) -> Result<u64, FmError> {
        // 1. HEAD Content-Length
        match self.head_metadata(path).await {
            Ok(Some(head)) => return Ok(head.content_length),
            Ok(None) => {}
            Err(e) => debug!("HEAD 获取大小失败，回退到列表: {}", e),
        }

        // 2. 父目录列表中的大小
        let parent = relpath::parent(path);
        let name = relpath::file_name(path);
        if let Ok(entries) = self.list(&parent).await {
            if let Some(entry) = entries.iter().find(|e| e.name == name && !e.meta.is_dir) {
                return Ok(entry.meta.size);
            }
        }

        // 3. stat
        self.stat(path)
            .await?
            .map(|meta| meta.size)
            .ok_or_else(|| FmError::not_found(path))
    }
}

/// 把一层带分隔符的列表转成目录项
///
/// 分页返回的公共前缀可能重复，按名字去重
fn entries_of(dir_key: &str, listing: ObjectListing) -> Vec<DirEntry> {
    let mut entries: Vec<DirEntry> = Vec::new();
    for object in listing.objects {
        let Some(name) = object.key.strip_prefix(dir_key) else {
            continue;
        };
        if name.is_empty() || name.contains('/') {
            continue;
        }
        entries.push(DirEntry {
            name: name.to_string(),
            meta: EntryMeta::file(object.size, object.last_modified),
        });
    }

    let mut seen: HashSet<String> = HashSet::new();
    for prefix in listing.prefixes {
        let Some(name) = prefix.strip_prefix(dir_key) else {
            continue;
        };
        let name = name.trim_end_matches('/');
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }
        entries.push(DirEntry {
            name: name.to_string(),
            meta: EntryMeta::dir(),
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ErrorKind;

    fn store() -> (Arc<MemoryObjectClient>, ObjectStore) {
        let client = Arc::new(MemoryObjectClient::new());
        let store = ObjectStore::new(client.clone(), "/tenant/");
        (client, store)
    }

    #[tokio::test]
    async fn test_keys_use_prefix_and_placeholders() {
        let (client, store) = store();

        store.mkdir("/docs").await.unwrap();
        store.write("/docs/a.txt", Bytes::from_static(b"a")).await.unwrap();

        assert_eq!(
            client.keys(),
            vec!["tenant/docs/".to_string(), "tenant/docs/a.txt".to_string()]
        );
        assert_eq!(store.confine("/docs/").await.unwrap(), "tenant/docs/");
    }

    #[tokio::test]
    async fn test_implicit_directory() {
        let (client, store) = store();
        client.put("tenant/x/y/z.txt", Bytes::from_static(b"z")).await.unwrap();

        let meta = store.stat("/x/").await.unwrap().unwrap();
        assert!(meta.is_dir);

        let names: Vec<String> = store.list("/x/").await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["y".to_string()]);
    }

    #[test]
    fn test_repeated_prefixes_listed_once() {
        let listing = ObjectListing {
            objects: vec![
                ObjectSummary {
                    key: "tenant/docs/".to_string(),
                    size: 0,
                    last_modified: None,
                },
                ObjectSummary {
                    key: "tenant/docs/b.txt".to_string(),
                    size: 3,
                    last_modified: None,
                },
            ],
            prefixes: vec![
                "tenant/docs/a/".to_string(),
                "tenant/docs/c/".to_string(),
                "tenant/docs/a/".to_string(),
            ],
        };

        let entries = entries_of("tenant/docs/", listing);
        let names: Vec<(&str, bool)> = entries.iter().map(|e| (e.name.as_str(), e.meta.is_dir)).collect();
        assert_eq!(names, vec![("a", true), ("b.txt", false), ("c", true)]);
    }

    #[tokio::test]
    async fn test_directory_rename_falls_back_to_copy() {
        let (_client, store) = store();
        store.mkdir_all("/src/inner/").await.unwrap();
        store.write("/src/inner/f.txt", Bytes::from_static(b"f")).await.unwrap();

        let err = store.rename("/src/", "/dst/").await.unwrap_err();
        assert!(err.is_cross_device());

        store.move_recursive("/src/", "/dst/").await.unwrap();
        assert!(store.stat("/src/").await.unwrap().is_none());
        assert_eq!(store.read_all("/dst/inner/f.txt").await.unwrap(), b"f");
    }

    #[tokio::test]
    async fn test_head_metadata_and_real_size() {
        let (client, store) = store();
        store.write("/m.bin", Bytes::from(vec![7u8; 1234])).await.unwrap();
        client.set_metadata("tenant/m.bin", "owner", "alice");

        let head = store.head_metadata("/m.bin").await.unwrap().unwrap();
        assert_eq!(head.content_length, 1234);
        assert_eq!(head.metadata.get("owner").map(String::as_str), Some("alice"));
        assert_eq!(store.real_size("/m.bin").await.unwrap(), 1234);
    }

    #[tokio::test]
    async fn test_dot_segments_rejected() {
        let (_client, store) = store();
        let err = store.confine("/a/../b").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathEscape);
    }

    #[tokio::test]
    async fn test_append_concatenates() {
        let (_client, store) = store();
        store.create_new("/p.bin", Bytes::from_static(b"ab")).await.unwrap();

        let size = store.append("/p.bin", Bytes::from_static(b"cd")).await.unwrap();

        assert_eq!(size, 4);
        assert_eq!(store.read_all("/p.bin").await.unwrap(), b"abcd");
        let err = store.create_new("/p.bin", Bytes::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }
}
