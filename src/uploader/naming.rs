// 上传文件的唯一命名
//
// 不允许覆盖时依次尝试 name、name(1)、name(2)……；
// 计数从候选名上已有的 `(n)` 后缀继续递增

use regex::Regex;

use crate::storage::{relpath, FmError, StorageBackend};

/// 最多尝试的候选名数量
pub const MAX_NAME_ATTEMPTS: usize = 1000;

/// 拆分主名与扩展名（以 `.` 开头且没有其他点的名称视为无扩展名）
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// 在扩展名前递增 `(n)` 计数
///
/// `report.pdf` → `report(1).pdf`，`report(1).pdf` → `report(2).pdf`
pub fn upcount_name(name: &str) -> String {
    let (stem, extension) = split_name(name);
    let counted = Regex::new(r"^(.*)\((\d+)\)$")
        .ok()
        .and_then(|re| {
            let caps = re.captures(stem)?;
            let n = caps.get(2)?.as_str().parse::<u64>().ok()?;
            Some(format!("{}({})", caps.get(1)?.as_str(), n.saturating_add(1)))
        });

    match counted {
        Some(stem) => format!("{}{}", stem, extension),
        None => format!("{}(1){}", stem, extension),
    }
}

/// 在目录 `dir` 下为 `name` 找一个可用的文件名
///
/// 同名文件夹总是跳过；`chunk_offset` 大于 0 时，大小恰好等于偏移量的同名文件
/// 视为本次分片上传的半成品，直接沿用
pub async fn unique_name(
    backend: &dyn StorageBackend,
    dir: &str,
    name: &str,
    chunk_offset: u64,
) -> Result<String, FmError> {
    let mut candidate = name.to_string();
    for _ in 0..MAX_NAME_ATTEMPTS {
        let path = relpath::join(dir, &candidate);
        match backend.stat(&path).await? {
            None => return Ok(candidate),
            Some(meta) if !meta.is_dir && chunk_offset > 0 && meta.size == chunk_offset => {
                return Ok(candidate);
            }
            Some(_) => candidate = upcount_name(&candidate),
        }
    }
    Err(FmError::conflict(&relpath::join(dir, name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalDisk;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[test]
    fn test_upcount_name() {
        assert_eq!(upcount_name("report.pdf"), "report(1).pdf");
        assert_eq!(upcount_name("report(1).pdf"), "report(2).pdf");
        assert_eq!(upcount_name("report(9)"), "report(10)");
        assert_eq!(upcount_name("a.tar.gz"), "a.tar(1).gz");
        assert_eq!(upcount_name(".env"), ".env(1)");
        assert_eq!(upcount_name("x(abc).txt"), "x(abc)(1).txt");
    }

    #[tokio::test]
    async fn test_unique_name_attempts() {
        let dir = TempDir::new().unwrap();
        let backend = LocalDisk::new(dir.path()).unwrap();
        backend.write("/report.pdf", Bytes::from_static(b"old")).await.unwrap();
        backend.write("/report(1).pdf", Bytes::from_static(b"old")).await.unwrap();
        backend.mkdir("/data.csv/").await.unwrap();

        assert_eq!(unique_name(&backend, "/", "report.pdf", 0).await.unwrap(), "report(2).pdf");
        assert_eq!(unique_name(&backend, "/", "data.csv", 0).await.unwrap(), "data(1).csv");
        assert_eq!(unique_name(&backend, "/", "new.txt", 0).await.unwrap(), "new.txt");
    }

    #[tokio::test]
    async fn test_unique_name_reuses_partial_chunk_target() {
        let dir = TempDir::new().unwrap();
        let backend = LocalDisk::new(dir.path()).unwrap();
        backend.write("/big.bin", Bytes::from(vec![0u8; 10])).await.unwrap();

        assert_eq!(unique_name(&backend, "/", "big.bin", 10).await.unwrap(), "big.bin");
        assert_eq!(unique_name(&backend, "/", "big.bin", 4).await.unwrap(), "big(1).bin");
    }
}
