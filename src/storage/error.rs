// 文件管理错误类型
//
// 所有后端错误（io::Error、对象存储 HTTP 状态）都在 StorageBackend 边界内转换为 FmError

use std::io;

/// 错误类别
/// 错误码范围：60001 - 60099
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 路径越出存储根目录
    PathEscape = 60001,
    /// 文件或目录不存在
    NotFound = 60002,
    /// 被扩展名/路径模式/只读/权限策略拒绝
    PolicyRestricted = 60003,
    /// 超出单文件或根目录容量限制
    QuotaExceeded = 60004,
    /// 上传校验失败（类型、尺寸、大小、数量）
    UploadValidation = 60005,
    /// 压缩包损坏或解压失败
    Archive = 60006,
    /// 目标已存在
    Conflict = 60007,
    /// 请求不适用于目标（如把目录当文件读取、Range 无效）
    InvalidRequest = 60008,
    /// 其他后端错误（磁盘 I/O、网络）
    Storage = 60009,
}

impl ErrorKind {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::PathEscape => "路径超出存储根目录",
            Self::NotFound => "文件或目录不存在",
            Self::PolicyRestricted => "操作被安全策略拒绝",
            Self::QuotaExceeded => "超出容量限制",
            Self::UploadValidation => "上传文件校验失败",
            Self::Archive => "压缩包处理失败",
            Self::Conflict => "目标已存在",
            Self::InvalidRequest => "请求无效",
            Self::Storage => "存储后端错误",
        }
    }
}

/// 文件管理错误
///
/// `key` 是前端本地化使用的消息键，`args` 为其参数
#[derive(Debug, Clone)]
pub struct FmError {
    pub kind: ErrorKind,
    pub key: &'static str,
    pub args: Vec<String>,
    pub path: Option<String>,
}

impl FmError {
    pub fn new(kind: ErrorKind, key: &'static str) -> Self {
        Self {
            kind,
            key,
            args: Vec::new(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_escape(path: &str) -> Self {
        Self::new(ErrorKind::PathEscape, "INVALID_DIRECTORY_OR_FILE")
            .with_arg(path)
            .with_path(path)
    }

    pub fn not_found(path: &str) -> Self {
        let key = if path.ends_with('/') {
            "DIRECTORY_NOT_EXIST"
        } else {
            "FILE_DOES_NOT_EXIST"
        };
        Self::new(ErrorKind::NotFound, key)
            .with_arg(path)
            .with_path(path)
    }

    pub fn conflict(path: &str) -> Self {
        let key = if path.ends_with('/') {
            "DIRECTORY_ALREADY_EXISTS"
        } else {
            "FILE_ALREADY_EXISTS"
        };
        Self::new(ErrorKind::Conflict, key)
            .with_arg(path)
            .with_path(path)
    }

    pub fn restricted(key: &'static str, path: &str) -> Self {
        Self::new(ErrorKind::PolicyRestricted, key)
            .with_arg(path)
            .with_path(path)
    }

    pub fn storage(key: &'static str, path: &str) -> Self {
        Self::new(ErrorKind::Storage, key).with_path(path)
    }

    /// 重命名跨越卷/无法原子重命名，调用方应回退到复制 + 删除
    pub fn cross_device(path: &str) -> Self {
        Self::new(ErrorKind::Storage, CROSS_DEVICE_KEY).with_path(path)
    }

    pub fn is_cross_device(&self) -> bool {
        self.kind == ErrorKind::Storage && self.key == CROSS_DEVICE_KEY
    }

    /// 把 io::Error 映射为错误类别，附带出错路径
    pub fn from_io(err: io::Error, path: &str) -> Self {
        if is_cross_device_error(&err) {
            return Self::cross_device(path);
        }
        if is_storage_full_error(&err) {
            return Self::new(ErrorKind::QuotaExceeded, "ERROR_SERVER")
                .with_arg(err.to_string())
                .with_path(path);
        }

        match err.kind() {
            io::ErrorKind::NotFound => Self::not_found(path),
            io::ErrorKind::PermissionDenied => Self::restricted("NOT_ALLOWED_SYSTEM", path),
            io::ErrorKind::AlreadyExists => Self::conflict(path),
            _ => Self::new(ErrorKind::Storage, "ERROR_SERVER")
                .with_arg(err.to_string())
                .with_path(path),
        }
    }
}

const CROSS_DEVICE_KEY: &str = "ERROR_CROSS_DEVICE";

#[cfg(unix)]
fn is_cross_device_error(err: &io::Error) -> bool {
    // EXDEV
    err.raw_os_error() == Some(18)
}

#[cfg(windows)]
fn is_cross_device_error(err: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    err.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device_error(_err: &io::Error) -> bool {
    false
}

#[cfg(unix)]
fn is_storage_full_error(err: &io::Error) -> bool {
    // ENOSPC / EDQUOT
    matches!(err.raw_os_error(), Some(28) | Some(122))
}

#[cfg(windows)]
fn is_storage_full_error(err: &io::Error) -> bool {
    // ERROR_DISK_FULL / ERROR_HANDLE_DISK_FULL
    matches!(err.raw_os_error(), Some(112) | Some(39))
}

#[cfg(not(any(unix, windows)))]
fn is_storage_full_error(_err: &io::Error) -> bool {
    false
}

impl std::fmt::Display for FmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.kind.message(), self.key)?;
        if !self.args.is_empty() {
            write!(f, " [{}]", self.args.join(", "))?;
        }
        if let Some(ref path) = self.path {
            write!(f, ": {}", path)?;
        }
        Ok(())
    }
}

impl std::error::Error for FmError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_code() {
        assert_eq!(ErrorKind::PathEscape.code(), 60001);
        assert_eq!(ErrorKind::Conflict.code(), 60007);
        assert_eq!(ErrorKind::Storage.code(), 60009);
    }

    #[test]
    fn test_io_mapping() {
        let err = FmError::from_io(io::Error::from(io::ErrorKind::NotFound), "/a.txt");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.key, "FILE_DOES_NOT_EXIST");
        assert_eq!(err.path.as_deref(), Some("/a.txt"));

        let err = FmError::from_io(io::Error::from(io::ErrorKind::NotFound), "/dir/");
        assert_eq!(err.key, "DIRECTORY_NOT_EXIST");

        let err = FmError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "/a");
        assert_eq!(err.kind, ErrorKind::PolicyRestricted);

        let err = FmError::from_io(io::Error::from(io::ErrorKind::AlreadyExists), "/a");
        assert_eq!(err.kind, ErrorKind::Conflict);

        let err = FmError::from_io(io::Error::new(io::ErrorKind::Other, "boom"), "/a");
        assert_eq!(err.kind, ErrorKind::Storage);
        assert_eq!(err.args, vec!["boom".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_raw_os_mapping() {
        let err = FmError::from_io(io::Error::from_raw_os_error(18), "/a");
        assert!(err.is_cross_device());

        let err = FmError::from_io(io::Error::from_raw_os_error(28), "/a");
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
    }

    #[test]
    fn test_display() {
        let err = FmError::not_found("/missing.txt");
        let text = err.to_string();
        assert!(text.contains("FILE_DOES_NOT_EXIST"));
        assert!(text.ends_with(": /missing.txt"));
    }
}
