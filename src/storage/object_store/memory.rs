// 进程内对象存储客户端
//
// 与 HTTP 客户端语义一致，用于测试和无外部依赖的部署

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use super::client::{ObjectClient, ObjectListing, ObjectStoreError, ObjectSummary};
use crate::storage::types::{ByteRange, ByteStream, ObjectHead, READ_CHUNK_SIZE};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    modified: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

/// 内存对象存储
#[derive(Debug, Default)]
pub struct MemoryObjectClient {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前所有键（测试辅助）
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// 设置用户元数据
    pub fn set_metadata(&self, key: &str, name: &str, value: &str) -> bool {
        match self.objects.write().get_mut(key) {
            Some(object) => {
                object.metadata.insert(name.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    fn store(&self, key: &str, data: Bytes) {
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                data,
                modified: Utc::now(),
                metadata: HashMap::new(),
            },
        );
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, ObjectStoreError> {
        Ok(self.objects.read().get(key).map(|object| ObjectHead {
            content_length: object.data.len() as u64,
            content_type: None,
            last_modified: Some(object.modified),
            metadata: object.metadata.clone(),
        }))
    }

    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<ByteStream, ObjectStoreError> {
        let data = self
            .objects
            .read()
            .get(key)
            .map(|object| object.data.clone())
            .ok_or_else(|| ObjectStoreError::not_found(key))?;

        let slice = match range {
            Some(range) => {
                let (start, end) = range
                    .resolve(data.len() as u64)
                    .ok_or_else(|| ObjectStoreError::status(416, "range not satisfiable"))?;
                data.slice(start as usize..=end as usize)
            }
            None => data,
        };

        let chunks: Vec<std::io::Result<Bytes>> = (0..slice.len())
            .step_by(READ_CHUNK_SIZE)
            .map(|offset| {
                let end = (offset + READ_CHUNK_SIZE).min(slice.len());
                Ok(slice.slice(offset..end))
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), ObjectStoreError> {
        self.store(key, body);
        Ok(())
    }

    async fn put_file(&self, key: &str, local: &Path) -> Result<(), ObjectStoreError> {
        let data = tokio::fs::read(local).await?;
        self.store(key, Bytes::from(data));
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), ObjectStoreError> {
        let mut objects = self.objects.write();
        let mut object = objects
            .get(from)
            .cloned()
            .ok_or_else(|| ObjectStoreError::not_found(from))?;
        object.modified = Utc::now();
        objects.insert(to.to_string(), object);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str, delimited: bool) -> Result<ObjectListing, ObjectStoreError> {
        let objects = self.objects.read();
        let mut listing = ObjectListing::default();
        let mut prefixes = BTreeSet::new();

        for (key, object) in objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            if delimited {
                if let Some(idx) = rest.find('/') {
                    // 目录占位对象本身（rest 为空）按对象返回
                    if !rest.is_empty() {
                        prefixes.insert(format!("{}{}", prefix, &rest[..=idx]));
                        continue;
                    }
                }
            }
            listing.objects.push(ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.modified),
            });
        }

        listing.prefixes = prefixes.into_iter().collect();
        Ok(listing)
    }
}
