// 基于 HTTP 的对象存储客户端
//
// REST 约定：{endpoint}/{bucket}/{key}
// 列表：GET {endpoint}/{bucket}?prefix=..&delimiter=/ 返回 JSON

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED, RANGE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::client::{ObjectClient, ObjectListing, ObjectStoreError, ObjectSummary};
use crate::config::ObjectStoreConfig;
use crate::storage::types::{ByteRange, ByteStream, ObjectHead};

const COPY_SOURCE_HEADER: &str = "x-amz-copy-source";
const CONTENT_MD5_HEADER: &str = "content-md5";
const USER_META_PREFIX: &str = "x-amz-meta-";

/// 列表接口的响应
#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    objects: Vec<ListObject>,
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListObject {
    key: String,
    size: u64,
    #[serde(default)]
    last_modified: Option<DateTime<Utc>>,
}

/// HTTP 对象存储客户端
#[derive(Debug, Clone)]
pub struct HttpObjectClient {
    client: Client,
    endpoint: String,
    bucket: String,
    access_token: Option<String>,
}

impl HttpObjectClient {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self, ObjectStoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.bucket)
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url(), encode_key(key))
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.access_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// 非 2xx 响应转换为错误
    async fn check(response: Response) -> Result<Response, ObjectStoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ObjectStoreError::status(status.as_u16(), message))
    }
}

/// 逐段百分号编码，保留 `/`
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_head(headers: &HeaderMap) -> ObjectHead {
    let header_str = |name| headers.get(name).and_then(|v| v.to_str().ok());

    let content_length = header_str(CONTENT_LENGTH)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let content_type = header_str(CONTENT_TYPE).map(|v| v.to_string());
    let last_modified = header_str(LAST_MODIFIED)
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|d| d.with_timezone(&Utc));

    let metadata: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(USER_META_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();

    ObjectHead {
        content_length,
        content_type,
        last_modified,
        metadata,
    }
}

fn range_header(range: ByteRange) -> String {
    match range.end {
        Some(end) => format!("bytes={}-{}", range.start, end),
        None => format!("bytes={}-", range.start),
    }
}

/// 流式计算本地文件的 MD5 与长度
fn file_digest(path: &Path) -> io::Result<(md5::Digest, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
        total += n as u64;
    }
    Ok((context.compute(), total))
}

#[async_trait]
impl ObjectClient for HttpObjectClient {
    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, ObjectStoreError> {
        let response = self
            .request(Method::HEAD, self.object_url(key))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        Ok(Some(parse_head(response.headers())))
    }

    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<ByteStream, ObjectStoreError> {
        let mut request = self.request(Method::GET, self.object_url(key));
        if let Some(range) = range {
            request = request.header(RANGE, range_header(range));
        }
        let response = Self::check(request.send().await?).await?;
        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(Box::pin(stream))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), ObjectStoreError> {
        let digest = md5::compute(&body);
        let content_md5 = base64::engine::general_purpose::STANDARD.encode(digest.0);
        let response = self
            .request(Method::PUT, self.object_url(key))
            .header(CONTENT_MD5_HEADER, content_md5)
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await?;
        Self::check(response).await?;
        debug!("对象已写入: {}", key);
        Ok(())
    }

    async fn put_file(&self, key: &str, local: &Path) -> Result<(), ObjectStoreError> {
        let path = local.to_path_buf();
        let (digest, length) = tokio::task::spawn_blocking(move || file_digest(&path))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        let content_md5 = base64::engine::general_purpose::STANDARD.encode(digest.0);

        let file = tokio::fs::File::open(local).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .request(Method::PUT, self.object_url(key))
            .header(CONTENT_MD5_HEADER, content_md5)
            .header(CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await?;
        Self::check(response).await?;
        debug!("对象已上传: {} ({} bytes)", key, length);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), ObjectStoreError> {
        let source = format!("/{}/{}", self.bucket, encode_key(from));
        let response = self
            .request(Method::PUT, self.object_url(to))
            .header(COPY_SOURCE_HEADER, source)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let response = self
            .request(Method::DELETE, self.object_url(key))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str, delimited: bool) -> Result<ObjectListing, ObjectStoreError> {
        let mut listing = ObjectListing::default();
        let mut token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = vec![("prefix", prefix.to_string())];
            if delimited {
                query.push(("delimiter", "/".to_string()));
            }
            if let Some(ref t) = token {
                query.push(("continuation-token", t.clone()));
            }

            let response = self
                .request(Method::GET, self.bucket_url())
                .query(&query)
                .send()
                .await?;
            let body = Self::check(response).await?.bytes().await?;
            let page: ListResponse = serde_json::from_slice(&body)
                .map_err(|e| ObjectStoreError::InvalidResponse(e.to_string()))?;

            listing
                .objects
                .extend(page.objects.into_iter().map(|o| ObjectSummary {
                    key: o.key,
                    size: o.size,
                    last_modified: o.last_modified,
                }));
            listing.prefixes.extend(page.prefixes);

            match page.next_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        Ok(listing)
    }
}
