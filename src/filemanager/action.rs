// 连接器动作与结果载荷
//
// 传输层把请求解析为 Action，再把 Payload 序列化为响应；核心不接触 HTTP

use serde::Serialize;
use std::fmt;

use crate::config::AppConfig;
use crate::storage::{ByteRange, ByteStream, ResourceItem};
use crate::uploader::{UploadFile, UploadOutcome};

/// 一次连接器请求
#[derive(Debug)]
pub enum Action {
    Initiate,
    GetFolder { path: String },
    GetFile { path: String },
    AddFolder { path: String, name: String },
    Upload { path: String, files: Vec<UploadFile> },
    Replace { path: String, file: UploadFile },
    Rename { old: String, new: String },
    Move { old: String, new: String },
    Copy { source: String, target: String },
    Delete { path: String },
    EditFile { path: String },
    SaveFile { path: String, content: String },
    ReadFile { path: String, range: Option<ByteRange> },
    GetImage { path: String, thumbnail: bool },
    Download { path: String },
    Summarize,
    Extract { source: String, target: String },
}

impl Action {
    /// 客户端使用的 mode 名称
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Initiate => "initiate",
            Self::GetFolder { .. } => "getfolder",
            Self::GetFile { .. } => "getfile",
            Self::AddFolder { .. } => "addfolder",
            Self::Upload { .. } => "upload",
            Self::Replace { .. } => "replace",
            Self::Rename { .. } => "rename",
            Self::Move { .. } => "move",
            Self::Copy { .. } => "copy",
            Self::Delete { .. } => "delete",
            Self::EditFile { .. } => "editfile",
            Self::SaveFile { .. } => "savefile",
            Self::ReadFile { .. } => "readfile",
            Self::GetImage { .. } => "getimage",
            Self::Download { .. } => "download",
            Self::Summarize => "summarize",
            Self::Extract { .. } => "extract",
        }
    }
}

/// 下发给客户端的扩展名规则
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedExtensions {
    pub policy: String,
    pub ignore_case: bool,
    pub restrictions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedSecurity {
    pub read_only: bool,
    pub extensions: SharedExtensions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedUpload {
    pub file_size_limit: Option<u64>,
    pub param_name: String,
    pub chunk_size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedOptions {
    pub chars_latin_only: bool,
    pub date_format: String,
}

/// initiate 返回的前端配置子集
#[derive(Debug, Clone, Serialize)]
pub struct InitiateInfo {
    pub security: SharedSecurity,
    pub upload: SharedUpload,
    pub options: SharedOptions,
}

impl InitiateInfo {
    pub fn from_config(config: &AppConfig) -> Self {
        let extensions = &config.security.extensions;
        Self {
            security: SharedSecurity {
                read_only: config.security.read_only,
                extensions: SharedExtensions {
                    policy: extensions.policy.into(),
                    ignore_case: extensions.ignore_case,
                    restrictions: extensions.restrictions.clone(),
                },
            },
            upload: SharedUpload {
                file_size_limit: config.upload.file_size_limit,
                param_name: config.upload.param_name.clone(),
                chunk_size: config.upload.chunk_size,
            },
            options: SharedOptions {
                chars_latin_only: config.options.chars_latin_only,
                date_format: config.options.date_format.clone(),
            },
        }
    }
}

/// 存储根目录统计
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FolderSummary {
    pub size: u64,
    pub files: u64,
    pub folders: u64,
    pub size_limit: Option<u64>,
}

/// 文件流的展示方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

/// 字节流结果
pub struct FileStream {
    /// 客户端看到的文件名
    pub name: String,
    /// 本次下发的字节数
    pub length: u64,
    /// 文件总大小
    pub total: u64,
    /// 范围请求的实际区间 `[start, end]`
    pub range: Option<(u64, u64)>,
    pub disposition: Disposition,
    pub stream: ByteStream,
}

impl fmt::Debug for FileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStream")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("total", &self.total)
            .field("range", &self.range)
            .field("disposition", &self.disposition)
            .finish_non_exhaustive()
    }
}

/// 动作结果
#[derive(Debug)]
pub enum Payload {
    Item(ResourceItem),
    Items(Vec<ResourceItem>),
    Uploaded(Vec<UploadOutcome>),
    Summary(FolderSummary),
    Initiate(InitiateInfo),
    File(FileStream),
}

impl Payload {
    pub fn into_item(self) -> Option<ResourceItem> {
        match self {
            Self::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn into_items(self) -> Option<Vec<ResourceItem>> {
        match self {
            Self::Items(items) => Some(items),
            Self::Uploaded(outcomes) => Some(outcomes.into_iter().map(|o| o.item).collect()),
            _ => None,
        }
    }

    pub fn into_file(self) -> Option<FileStream> {
        match self {
            Self::File(file) => Some(file),
            _ => None,
        }
    }
}
