// 路径解析与文件名规范化
//
// 所有用户提供的路径都经过这里：解码、规范化、约束到存储根目录，
// 约束失败的路径永远到达不了存储后端的读写操作

use std::sync::Arc;
use tracing::debug;

use crate::config::AppConfig;
use crate::storage::{relpath, FmError, PathModel, StorageBackend};

/// 新名称的规范化模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMode {
    /// 文件/文件夹名：额外保留 `.` 和 `-`
    Filename,
    /// 自由文本片段（如下载的压缩包名）
    Segment,
}

/// 路径解析器
#[derive(Clone)]
pub struct PathResolver {
    backend: Arc<dyn StorageBackend>,
    normalize_filename: bool,
    latin_only: bool,
}

/// 连续下划线合并为一个
fn collapse_underscores(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out
}

impl PathResolver {
    pub fn new(backend: Arc<dyn StorageBackend>, config: &AppConfig) -> Self {
        Self {
            backend,
            normalize_filename: config.security.normalize_filename,
            latin_only: config.options.chars_latin_only,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// 词法规范化：去控制字符、`\` 转 `/`、合并重复斜杠、
    /// 处理 `.` 与 `..`，保留结尾 `/` 作为目录标记
    ///
    /// 输入已由传输层（Query/Form 提取器）解码过一次，这里不再解码，
    /// 否则名字里带 `%XX` 的条目无法用自己的 id 定位
    ///
    /// 返回以 `/` 开头的相对路径；`..` 越过根目录时返回 PathEscape
    pub fn normalize_relative(raw: &str) -> Result<String, FmError> {
        let cleaned: String = raw
            .chars()
            .filter(|c| !c.is_control())
            .map(|c| if c == '\\' { '/' } else { c })
            .collect();

        let is_dir = cleaned.ends_with('/');
        let mut segments: Vec<String> = Vec::new();

        for raw_segment in cleaned.split('/') {
            let segment = raw_segment.trim_matches(' ');
            if segment.is_empty() {
                continue;
            }
            if segment.chars().all(|c| c == '.') {
                if segment == ".." {
                    if segments.pop().is_none() {
                        return Err(FmError::path_escape(raw));
                    }
                }
                // `.` 以及 `...` 之类的全点段直接丢弃
                continue;
            }
            // Windows 会静默去掉结尾的点和空格
            let segment = segment.trim_end_matches(['.', ' ']);
            segments.push(segment.to_string());
        }

        let mut path = String::from("/");
        path.push_str(&segments.join("/"));
        if is_dir && !segments.is_empty() {
            path.push('/');
        }
        Ok(path)
    }

    /// 解析用户路径为 PathModel
    pub async fn resolve(&self, raw: &str) -> Result<PathModel, FmError> {
        let relative = Self::normalize_relative(raw)?;
        self.resolve_relative(&relative).await
    }

    /// 在已解析的目录下解析子项（名称必须已经过 sanitize_name）
    pub async fn resolve_child(&self, dir: &PathModel, name: &str, is_dir: bool) -> Result<PathModel, FmError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(FmError::restricted("FORBIDDEN_NAME", name));
        }
        let relative = if is_dir {
            relpath::join_dir(&dir.path_relative, name)
        } else {
            relpath::join(&dir.path_relative, name)
        };
        self.resolve_relative(&relative).await
    }

    async fn resolve_relative(&self, relative: &str) -> Result<PathModel, FmError> {
        let absolute = self.backend.confine(relative).await?;
        let meta = self.backend.stat(relative).await?;

        let is_dir = match meta {
            Some(ref m) => m.is_dir,
            None => relative.ends_with('/') || relpath::is_root(relative),
        };
        let path_relative = if is_dir {
            relpath::as_dir(relative)
        } else {
            relpath::trim_dir_marker(relative).to_string()
        };

        debug!("路径解析: {} -> {} (exists={})", relative, absolute, meta.is_some());
        Ok(PathModel {
            path_relative,
            path_absolute: absolute,
            is_dir,
            is_exists: meta.is_some(),
            meta,
        })
    }

    /// 规范化新建条目的名称，结果为空时返回 FORBIDDEN_NAME
    pub fn sanitize_name(&self, name: &str, mode: NameMode) -> Result<String, FmError> {
        let mut value = name.to_string();

        if self.normalize_filename {
            // 只保留最后一段，去掉两端的点、控制字符和空格
            let base = value.rsplit(['/', '\\']).next().unwrap_or_default();
            value = base
                .trim_matches(|c: char| c == '.' || c == ' ' || c.is_control())
                .chars()
                .filter(|c| !c.is_control())
                .map(|c| if c == ' ' || c == '\'' { '_' } else { c })
                .collect();
        }

        if self.latin_only {
            let ascii = deunicode::deunicode(&value);
            value = ascii
                .chars()
                .filter(|c| {
                    c.is_ascii_alphanumeric()
                        || *c == '_'
                        || (mode == NameMode::Filename && (*c == '.' || *c == '-'))
                })
                .collect();
        }

        let value = collapse_underscores(&value);
        if value.is_empty() || value.contains('/') || value == "." || value == ".." {
            return Err(FmError::restricted("FORBIDDEN_NAME", name));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ErrorKind, LocalDisk};
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn resolver(config: &AppConfig) -> (TempDir, PathResolver) {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(LocalDisk::new(dir.path()).unwrap());
        (dir, PathResolver::new(backend, config))
    }

    #[test]
    fn test_normalize_relative() {
        let cases = [
            ("", "/"),
            ("/", "/"),
            ("docs//a.txt", "/docs/a.txt"),
            ("\\docs\\sub\\", "/docs/sub/"),
            ("/docs/./sub/../a.txt", "/docs/a.txt"),
            ("/docs/%2e%2e/a.txt", "/docs/%2e%2e/a.txt"),
            ("/a%2Fb/", "/a%2Fb/"),
            ("/50%41off.txt", "/50%41off.txt"),
            ("/ name . /x.txt. ", "/name/x.txt"),
            ("/.../a", "/a"),
            ("/tab\there", "/tabhere"),
        ];
        for (input, expected) in cases {
            assert_eq!(PathResolver::normalize_relative(input).unwrap(), expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_normalize_rejects_climbing_above_root() {
        for input in ["/../etc/passwd", "..", "/a/../../b", "..\\..\\x"] {
            let err = PathResolver::normalize_relative(input).unwrap_err();
            assert_eq!(err.kind, ErrorKind::PathEscape, "input {:?}", input);
        }
    }

    #[tokio::test]
    async fn test_resolve_existing_and_missing() {
        let (dir, resolver) = resolver(&AppConfig::default());
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.txt"), b"a").unwrap();

        let model = resolver.resolve("/docs").await.unwrap();
        assert!(model.is_dir && model.is_exists);
        assert_eq!(model.path_relative, "/docs/");

        let model = resolver.resolve("/docs/a.txt").await.unwrap();
        assert!(!model.is_dir && model.is_exists);

        let model = resolver.resolve("/docs/new/").await.unwrap();
        assert!(model.is_dir && !model.is_exists);

        let model = resolver.resolve("/").await.unwrap();
        assert!(model.is_root() && model.is_dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_symlink_escape() {
        let outside = TempDir::new().unwrap();
        let (dir, resolver) = resolver(&AppConfig::default());
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let err = resolver.resolve("/link/secret.txt").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathEscape);
    }

    #[tokio::test]
    async fn test_sanitize_name() {
        let (_dir, resolver) = resolver(&AppConfig::default());

        assert_eq!(resolver.sanitize_name("my file's.txt", NameMode::Filename).unwrap(), "my_file_s.txt");
        assert_eq!(resolver.sanitize_name("../../.hidden.", NameMode::Filename).unwrap(), "hidden");
        assert_eq!(resolver.sanitize_name("a\\b\\c.txt", NameMode::Filename).unwrap(), "c.txt");
        assert_eq!(resolver.sanitize_name("a   b", NameMode::Filename).unwrap(), "a_b");

        let err = resolver.sanitize_name(" ... ", NameMode::Filename).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PolicyRestricted);
        assert_eq!(err.key, "FORBIDDEN_NAME");
    }

    #[tokio::test]
    async fn test_sanitize_latin_only() {
        let mut config = AppConfig::default();
        config.options.chars_latin_only = true;
        let (_dir, resolver) = resolver(&config);

        assert_eq!(resolver.sanitize_name("Übergrößen-liste.pdf", NameMode::Filename).unwrap(), "Ubergrossen-liste.pdf");
        assert_eq!(resolver.sanitize_name("report-v1.2", NameMode::Segment).unwrap(), "reportv12");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_resolved_paths_stay_inside_root(
            segments in proptest::collection::vec(
                prop_oneof![
                    Just("..".to_string()),
                    Just(".".to_string()),
                    Just("%2e%2e".to_string()),
                    Just("%2F".to_string()),
                    Just("\\".to_string()),
                    Just("".to_string()),
                    "[a-z. ]{1,6}",
                ],
                0..8,
            )
        ) {
            let raw = segments.join("/");
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let (dir, resolver) = resolver(&AppConfig::default());
            let root = dunce::canonicalize(dir.path()).unwrap();

            match runtime.block_on(resolver.resolve(&raw)) {
                Ok(model) => {
                    let absolute = std::path::PathBuf::from(&model.path_absolute);
                    prop_assert!(absolute.starts_with(&root), "{} escaped to {}", raw, model.path_absolute);
                }
                Err(err) => prop_assert_eq!(err.kind, ErrorKind::PathEscape),
            }
        }
    }
}
