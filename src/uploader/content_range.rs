// 分片上传的 Content-Range 解析
//
// 格式：`bytes {start}-{end}/{total}`，end 为闭区间

use regex::Regex;
use std::str::FromStr;

use crate::storage::{ErrorKind, FmError};

/// 单个分片在整个文件中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// 文件声明的总大小
    pub total: u64,
}

fn invalid(header: &str) -> FmError {
    FmError::new(ErrorKind::InvalidRequest, "INVALID_CONTENT_RANGE").with_arg(header)
}

impl ContentRange {
    /// 解析请求头
    ///
    /// # 参数
    /// * `header` - Content-Range 头的值
    ///
    /// # 返回
    /// 起止位置合法（start <= end < total）时返回分片位置
    pub fn parse(header: &str) -> Result<Self, FmError> {
        let re = Regex::new(r"^bytes\s+(\d+)-(\d+)/(\d+)$").map_err(|_| invalid(header))?;
        let caps = re.captures(header.trim()).ok_or_else(|| invalid(header))?;

        let number = |i: usize| -> Result<u64, FmError> {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .ok_or_else(|| invalid(header))
        };
        let range = Self {
            start: number(1)?,
            end: number(2)?,
            total: number(3)?,
        };

        if range.start > range.end || range.end >= range.total {
            return Err(invalid(header));
        }
        Ok(range)
    }

    /// 分片长度
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// 是否为第一个分片
    pub fn is_first(&self) -> bool {
        self.start == 0
    }

    /// 该分片写入后文件是否完整
    pub fn completes(&self) -> bool {
        self.end + 1 == self.total
    }
}

impl FromStr for ContentRange {
    type Err = FmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let range: ContentRange = "bytes 0-1048575/5000000".parse().unwrap();
        assert_eq!(range.start, 0);
        assert_eq!(range.len(), 1_048_576);
        assert!(range.is_first());
        assert!(!range.completes());

        let last = ContentRange::parse("bytes 4194304-4999999/5000000").unwrap();
        assert!(last.completes());
        assert!(!last.is_first());
    }

    #[test]
    fn test_parse_large_values() {
        let range = ContentRange::parse("bytes 6000000000-6000000099/6000000100").unwrap();
        assert_eq!(range.len(), 100);
        assert!(range.completes());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for header in ["", "bytes */100", "bytes 10-5/100", "bytes 0-100/100", "items 0-1/2", "bytes -1-2/3"] {
            let err = ContentRange::parse(header).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidRequest, "header {:?}", header);
        }
    }
}
