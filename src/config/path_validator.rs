// 存储根目录检查
//
// 启动时确认本地后端的根目录可用；对象存储后端不经过这里

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// 根目录不可用的原因
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RootProblem {
    #[error("存储根目录 {0:?} 不存在")]
    Missing(String),
    #[error("存储根目录 {0:?} 不是一个目录")]
    NotDirectory(String),
    #[error("存储根目录 {0:?} 没有写入权限")]
    NotWritable(String),
}

/// 存储根目录检查器
pub struct PathValidator;

impl PathValidator {
    /// 依次检查 存在 → 是目录 → 可写
    ///
    /// # 参数
    /// - path: 存储根目录
    /// - read_only: 只读模式下跳过可写检查
    pub fn check(path: &Path, read_only: bool) -> Result<(), RootProblem> {
        let shown = path.display().to_string();
        let meta = fs::metadata(path).map_err(|_| RootProblem::Missing(shown.clone()))?;
        if !meta.is_dir() {
            return Err(RootProblem::NotDirectory(shown));
        }
        if !read_only && !Self::can_create_file(path) {
            return Err(RootProblem::NotWritable(shown));
        }
        Ok(())
    }

    /// 创建并删除一个临时文件
    fn can_create_file(path: &Path) -> bool {
        let marker = path.join(format!(".write_test_{}", uuid::Uuid::new_v4().simple()));
        match fs::File::create(&marker) {
            Ok(_) => {
                let _ = fs::remove_file(&marker);
                true
            }
            Err(_) => false,
        }
    }

    /// 启动用：检查失败时转成带上下文的错误
    pub fn validate_or_error(path: &Path, read_only: bool) -> Result<()> {
        Self::check(path, read_only).context("存储根目录不可用")
    }

    /// 首次启动时创建默认根目录
    pub fn ensure_directory_exists(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path).with_context(|| format!("无法创建目录: {:?}", path))?;
            tracing::info!("自动创建存储根目录: {:?}", path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writable_root_passes_without_leftovers() {
        let dir = TempDir::new().unwrap();
        assert_eq!(PathValidator::check(dir.path(), false), Ok(()));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nowhere");
        assert!(matches!(
            PathValidator::check(&missing, false),
            Err(RootProblem::Missing(_))
        ));
        assert!(PathValidator::validate_or_error(&missing, true).is_err());
    }

    #[test]
    fn test_file_as_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("root.txt");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            PathValidator::check(&file, true),
            Err(RootProblem::NotDirectory(_))
        ));
    }

    #[test]
    fn test_ensure_directory_exists() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("userfiles");

        PathValidator::ensure_directory_exists(&root).unwrap();
        PathValidator::ensure_directory_exists(&root).unwrap();
        assert!(PathValidator::validate_or_error(&root, false).is_ok());
    }
}
