// 存储模块数据类型定义

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::io;
use std::pin::Pin;

use super::relpath;

/// 后端读取返回的字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// 范围读取分片大小（8KB）
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// 后端原生元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub is_dir: bool,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    /// 系统层面可读
    pub readable: bool,
    /// 系统层面可写（目录还需要可执行）
    pub writable: bool,
}

impl EntryMeta {
    pub fn dir() -> Self {
        Self {
            is_dir: true,
            size: 0,
            created: None,
            modified: None,
            readable: true,
            writable: true,
        }
    }

    pub fn file(size: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            is_dir: false,
            size,
            created: modified,
            modified,
            readable: true,
            writable: true,
        }
    }
}

/// 目录列表中的一项
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub meta: EntryMeta,
}

/// 解析后的路径
///
/// `path_absolute` 的规范形式一定以规范化的存储根目录为前缀；
/// 不满足这一点的路径在解析阶段就被拒绝
#[derive(Debug, Clone)]
pub struct PathModel {
    /// 面向用户的相对路径，根目录为 `/`，目录以 `/` 结尾
    pub path_relative: String,
    /// 后端原生路径（本地绝对路径或对象键）
    pub path_absolute: String,
    pub is_dir: bool,
    pub is_exists: bool,
    /// 存在时的元数据
    pub meta: Option<EntryMeta>,
}

impl PathModel {
    pub fn is_root(&self) -> bool {
        relpath::is_root(&self.path_relative)
    }

    pub fn name(&self) -> &str {
        relpath::file_name(&self.path_relative)
    }

    pub fn extension(&self) -> &str {
        if self.is_dir {
            ""
        } else {
            relpath::extension(self.name())
        }
    }
}

/// 条目类型
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Folder,
}

/// 条目属性
#[derive(Debug, Clone, Serialize)]
pub struct ItemAttributes {
    pub name: String,
    pub extension: String,
    /// 相对路径
    pub path: String,
    /// 后端原生路径，仅服务端使用，不输出给客户端
    #[serde(skip_serializing)]
    pub absolute_path: String,
    pub readable: bool,
    pub writable: bool,
    /// 创建时间 (ISO8601)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// 修改时间 (ISO8601)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    /// 修改时间戳（秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// 字节数，使用字符串避免客户端整数溢出
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// 文本内容（仅 editfile）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// 文件或文件夹的元数据记录
#[derive(Debug, Clone, Serialize)]
pub struct ResourceItem {
    /// 相对路径，目录以 `/` 结尾
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub attributes: ItemAttributes,
}

impl ResourceItem {
    /// 由路径模型与元数据构造，`readable`/`writable` 为综合权限判断结果
    pub fn from_model(model: &PathModel, meta: &EntryMeta, readable: bool, writable: bool) -> Self {
        let is_dir = meta.is_dir;
        let id = if is_dir {
            relpath::as_dir(&model.path_relative)
        } else {
            relpath::trim_dir_marker(&model.path_relative).to_string()
        };
        let name = relpath::file_name(&id).to_string();
        let extension = if is_dir {
            String::new()
        } else {
            relpath::extension(&name).to_string()
        };

        Self {
            item_type: if is_dir { ItemType::Folder } else { ItemType::File },
            attributes: ItemAttributes {
                name,
                extension,
                path: id.clone(),
                absolute_path: model.path_absolute.clone(),
                readable,
                writable,
                created: meta.created.map(|t| t.to_rfc3339()),
                modified: meta.modified.map(|t| t.to_rfc3339()),
                timestamp: meta.modified.map(|t| t.timestamp()),
                size: if is_dir {
                    "0".to_string()
                } else {
                    meta.size.to_string()
                },
                width: None,
                height: None,
                content: None,
            },
            id,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.item_type == ItemType::Folder
    }
}

/// 字节范围（闭区间，结束位置可省略）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// 按文件总大小计算实际区间 `[start, end]`，不可满足时返回 None
    pub fn resolve(&self, total: u64) -> Option<(u64, u64)> {
        if total == 0 || self.start >= total {
            return None;
        }
        let last = total - 1;
        let end = self.end.map(|e| e.min(last)).unwrap_or(last);
        if end < self.start {
            return None;
        }
        Some((self.start, end))
    }
}

/// 对象存储的头部元数据
#[derive(Debug, Clone, Default)]
pub struct ObjectHead {
    pub content_length: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// 用户自定义元数据
    pub metadata: std::collections::HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_resolve() {
        let r = ByteRange { start: 0, end: None };
        assert_eq!(r.resolve(10), Some((0, 9)));

        let r = ByteRange { start: 2, end: Some(5) };
        assert_eq!(r.resolve(10), Some((2, 5)));

        let r = ByteRange { start: 2, end: Some(100) };
        assert_eq!(r.resolve(10), Some((2, 9)));

        let r = ByteRange { start: 10, end: None };
        assert_eq!(r.resolve(10), None);

        let r = ByteRange { start: 5, end: Some(3) };
        assert_eq!(r.resolve(10), None);
    }

    #[test]
    fn test_item_from_model() {
        let model = PathModel {
            path_relative: "/docs/report.pdf".to_string(),
            path_absolute: "/srv/files/docs/report.pdf".to_string(),
            is_dir: false,
            is_exists: true,
            meta: None,
        };
        let meta = EntryMeta::file(5_000_000_000, None);
        let item = ResourceItem::from_model(&model, &meta, true, false);

        assert_eq!(item.id, "/docs/report.pdf");
        assert_eq!(item.item_type, ItemType::File);
        assert_eq!(item.attributes.extension, "pdf");
        assert_eq!(item.attributes.size, "5000000000");
        assert!(!item.attributes.writable);

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "file");
        assert!(json["attributes"].get("absolute_path").is_none());
    }

    #[test]
    fn test_folder_id_has_trailing_slash() {
        let model = PathModel {
            path_relative: "/docs".to_string(),
            path_absolute: "/srv/files/docs".to_string(),
            is_dir: true,
            is_exists: true,
            meta: None,
        };
        let item = ResourceItem::from_model(&model, &EntryMeta::dir(), true, true);
        assert_eq!(item.id, "/docs/");
        assert_eq!(item.attributes.name, "docs");
        assert_eq!(item.attributes.size, "0");
    }
}
