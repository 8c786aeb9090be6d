// 安全策略引擎
//
// 扩展名与路径模式两道闸门 + 有序的读写授权检查

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::debug;

use super::context::RequestContext;
use crate::config::{PolicyMode, RestrictionConfig, SecurityConfig};
use crate::storage::{relpath, EntryMeta, FmError, PathModel, StorageBackend};

/// 编译后的扩展名规则
#[derive(Debug, Clone)]
struct ExtensionGate {
    policy: PolicyMode,
    ignore_case: bool,
    restrictions: Vec<String>,
}

impl ExtensionGate {
    fn new(config: &RestrictionConfig) -> Self {
        let restrictions = config
            .restrictions
            .iter()
            .map(|r| {
                if config.ignore_case {
                    r.to_lowercase()
                } else {
                    r.clone()
                }
            })
            .collect();
        Self {
            policy: config.policy,
            ignore_case: config.ignore_case,
            restrictions,
        }
    }

    fn allows(&self, name: &str) -> bool {
        let extension = relpath::extension(name);
        let extension = if self.ignore_case {
            extension.to_lowercase()
        } else {
            extension.to_string()
        };
        let listed = self.restrictions.iter().any(|r| *r == extension);
        match self.policy {
            PolicyMode::AllowList => listed,
            PolicyMode::DisallowList => !listed,
            PolicyMode::Invalid => false,
        }
    }
}

/// 编译后的路径模式规则
#[derive(Debug, Clone)]
struct PatternGate {
    policy: PolicyMode,
    set: GlobSet,
}

impl PatternGate {
    fn new(config: &RestrictionConfig) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.restrictions {
            // `*` 可以跨越 `/`
            let glob = GlobBuilder::new(pattern)
                .literal_separator(false)
                .case_insensitive(config.ignore_case)
                .build()?;
            builder.add(glob);
        }
        Ok(Self {
            policy: config.policy,
            set: builder.build()?,
        })
    }

    fn allows(&self, relative: &str) -> bool {
        let matched = self.set.is_match(relative);
        match self.policy {
            PolicyMode::AllowList => matched,
            PolicyMode::DisallowList => !matched,
            PolicyMode::Invalid => false,
        }
    }
}

/// 安全策略引擎
#[derive(Debug, Clone)]
pub struct SecurityPolicyEngine {
    read_only: bool,
    extensions: ExtensionGate,
    patterns: PatternGate,
}

impl SecurityPolicyEngine {
    /// 构造时编译全部路径模式，无法编译的模式属于配置错误
    pub fn new(config: &SecurityConfig) -> Result<Self, globset::Error> {
        Ok(Self {
            read_only: config.read_only,
            extensions: ExtensionGate::new(&config.extensions),
            patterns: PatternGate::new(&config.patterns)?,
        })
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// 扩展名闸门（按文件名判断）
    pub fn is_allowed_extension(&self, name: &str) -> bool {
        self.extensions.allows(name)
    }

    /// 路径模式闸门（按根目录相对路径判断）
    pub fn is_allowed_pattern(&self, relative: &str) -> bool {
        self.patterns.allows(relative)
    }

    /// 两道闸门都通过；文件夹没有扩展名，只检查路径模式
    pub fn is_unrestricted(&self, relative: &str, is_dir: bool) -> bool {
        let extension_ok = is_dir || self.is_allowed_extension(relpath::file_name(relative));
        extension_ok && self.is_allowed_pattern(relative)
    }

    /// 读权限检查：系统权限 → 策略闸门 → 外部谓词
    pub fn check_read(&self, model: &PathModel, ctx: &RequestContext) -> Result<(), FmError> {
        let path = &model.path_relative;
        if let Some(ref meta) = model.meta {
            if !meta.readable {
                return Err(FmError::restricted("NOT_ALLOWED_SYSTEM", path));
            }
        }
        if !self.is_unrestricted(path, model.is_dir) {
            debug!("读取被策略拒绝: {}", path);
            return Err(FmError::restricted("FORBIDDEN_NAME", path));
        }
        if !ctx.can_read(path) {
            return Err(FmError::restricted("NOT_ALLOWED", path));
        }
        Ok(())
    }

    /// 写权限检查：系统权限 → 只读模式 → 策略闸门 → 外部谓词
    ///
    /// 目标尚不存在时，检查最近的已存在祖先目录是否可写
    pub async fn check_write(
        &self,
        model: &PathModel,
        ctx: &RequestContext,
        backend: &dyn StorageBackend,
    ) -> Result<(), FmError> {
        let path = &model.path_relative;

        let system_writable = match model.meta {
            Some(ref meta) => meta.writable,
            None => Self::ancestor_writable(path, backend).await?,
        };
        if !system_writable {
            return Err(FmError::restricted("NOT_ALLOWED_SYSTEM", path));
        }
        if self.read_only {
            return Err(FmError::restricted("NOT_ALLOWED", path));
        }
        if !self.is_unrestricted(path, model.is_dir) {
            debug!("写入被策略拒绝: {}", path);
            return Err(FmError::restricted("FORBIDDEN_NAME", path));
        }
        if !ctx.can_write(path) {
            return Err(FmError::restricted("NOT_ALLOWED", path));
        }
        Ok(())
    }

    async fn ancestor_writable(path: &str, backend: &dyn StorageBackend) -> Result<bool, FmError> {
        let mut current = relpath::parent(path);
        loop {
            if let Some(meta) = backend.stat(&current).await? {
                return Ok(meta.is_dir && meta.writable);
            }
            if relpath::is_root(&current) {
                return Ok(false);
            }
            current = relpath::parent(&current);
        }
    }

    /// 列表/条目中展示的可读标记
    pub fn is_readable(&self, relative: &str, meta: &EntryMeta, ctx: &RequestContext) -> bool {
        meta.readable && self.is_unrestricted(relative, meta.is_dir) && ctx.can_read(relative)
    }

    /// 列表/条目中展示的可写标记
    pub fn is_writable(&self, relative: &str, meta: &EntryMeta, ctx: &RequestContext) -> bool {
        meta.writable && !self.read_only && self.is_unrestricted(relative, meta.is_dir) && ctx.can_write(relative)
    }

    /// 存储根目录不能被重命名、移动、复制或删除
    pub fn ensure_not_root(&self, model: &PathModel) -> Result<(), FmError> {
        if model.is_root() {
            return Err(FmError::restricted("NOT_ALLOWED", &model.path_relative));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::context::PredicateAccess;
    use crate::storage::{ErrorKind, LocalDisk};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn rules(policy: PolicyMode, restrictions: &[&str]) -> RestrictionConfig {
        RestrictionConfig {
            policy,
            ignore_case: true,
            restrictions: restrictions.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn model(path: &str, meta: Option<EntryMeta>) -> PathModel {
        PathModel {
            path_relative: path.to_string(),
            path_absolute: path.to_string(),
            is_dir: path.ends_with('/'),
            is_exists: meta.is_some(),
            meta,
        }
    }

    #[test]
    fn test_extension_gate() {
        let mut config = SecurityConfig::default();
        config.extensions = rules(PolicyMode::AllowList, &["jpg", "png", ""]);
        let engine = SecurityPolicyEngine::new(&config).unwrap();

        assert!(engine.is_allowed_extension("cat.PNG"));
        assert!(engine.is_allowed_extension("README"));
        assert!(!engine.is_allowed_extension("malware.exe"));

        config.extensions = rules(PolicyMode::DisallowList, &["exe"]);
        let engine = SecurityPolicyEngine::new(&config).unwrap();
        assert!(!engine.is_allowed_extension("malware.EXE"));
        assert!(engine.is_allowed_extension("notes.txt"));
    }

    #[test]
    fn test_invalid_policy_denies_everything() {
        let mut config = SecurityConfig::default();
        config.extensions = rules(PolicyMode::from("SOMETIMES".to_string()), &["jpg"]);
        config.patterns = rules(PolicyMode::Invalid, &[]);
        let engine = SecurityPolicyEngine::new(&config).unwrap();

        assert!(!engine.is_allowed_extension("a.jpg"));
        assert!(!engine.is_allowed_pattern("/a.jpg"));
        assert!(!engine.is_unrestricted("/dir/", true));
    }

    #[test]
    fn test_default_patterns() {
        let engine = SecurityPolicyEngine::new(&SecurityConfig::default()).unwrap();

        assert!(!engine.is_allowed_pattern("/.htaccess"));
        assert!(!engine.is_allowed_pattern("/sub/WEB.CONFIG"));
        assert!(!engine.is_allowed_pattern("/_thumbs/"));
        assert!(!engine.is_allowed_pattern("/_thumbs/dir/a.jpg"));
        assert!(engine.is_allowed_pattern("/docs/a.jpg"));
        assert!(engine.is_unrestricted("/docs/", true));
    }

    #[test]
    fn test_bad_glob_is_config_error() {
        let mut config = SecurityConfig::default();
        config.patterns = rules(PolicyMode::DisallowList, &["[unclosed"]);
        assert!(SecurityPolicyEngine::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_write_check_order() {
        let dir = TempDir::new().unwrap();
        let backend = LocalDisk::new(dir.path()).unwrap();
        let ctx = RequestContext::new(Arc::new(PredicateAccess::new(|_| true, |p| !p.starts_with("/locked"))));

        let mut config = SecurityConfig::default();
        let engine = SecurityPolicyEngine::new(&config).unwrap();

        // 不存在的目标检查父目录
        engine.check_write(&model("/new/deep/a.txt", None), &ctx, &backend).await.unwrap();

        let err = engine.check_write(&model("/a.exe", None), &ctx, &backend).await.unwrap_err();
        assert_eq!(err.key, "FORBIDDEN_NAME");

        let err = engine.check_write(&model("/locked.txt", None), &ctx, &backend).await.unwrap_err();
        assert_eq!(err.key, "NOT_ALLOWED");

        let mut meta = EntryMeta::file(1, None);
        meta.writable = false;
        let err = engine
            .check_write(&model("/a.exe", Some(meta)), &ctx, &backend)
            .await
            .unwrap_err();
        assert_eq!(err.key, "NOT_ALLOWED_SYSTEM");

        config.read_only = true;
        let engine = SecurityPolicyEngine::new(&config).unwrap();
        let err = engine.check_write(&model("/a.exe", None), &ctx, &backend).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PolicyRestricted);
        assert_eq!(err.key, "NOT_ALLOWED");
    }

    #[test]
    fn test_read_check_and_root() {
        let engine = SecurityPolicyEngine::new(&SecurityConfig::default()).unwrap();
        let ctx = RequestContext::new(Arc::new(PredicateAccess::new(|p| p != "/secret.txt", |_| true)));

        engine.check_read(&model("/a.txt", Some(EntryMeta::file(1, None))), &ctx).unwrap();
        let err = engine
            .check_read(&model("/secret.txt", Some(EntryMeta::file(1, None))), &ctx)
            .unwrap_err();
        assert_eq!(err.key, "NOT_ALLOWED");

        let root = model("/", Some(EntryMeta::dir()));
        assert!(engine.ensure_not_root(&root).is_err());
        assert!(engine.ensure_not_root(&model("/a.txt", None)).is_ok());
    }
}
