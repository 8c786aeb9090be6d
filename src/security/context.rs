// 请求上下文与外部授权谓词

use std::fmt;
use std::sync::Arc;

/// 外部提供的授权判断
///
/// 核心只负责在读写检查的最后一步调用它
pub trait AccessControl: Send + Sync {
    fn has_read_permission(&self, path: &str) -> bool;
    fn has_write_permission(&self, path: &str) -> bool;
}

/// 默认实现：全部放行
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn has_read_permission(&self, _path: &str) -> bool {
        true
    }

    fn has_write_permission(&self, _path: &str) -> bool {
        true
    }
}

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// 由两个闭包组成的授权判断
pub struct PredicateAccess {
    read: Predicate,
    write: Predicate,
}

impl PredicateAccess {
    pub fn new(
        read: impl Fn(&str) -> bool + Send + Sync + 'static,
        write: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            read: Box::new(read),
            write: Box::new(write),
        }
    }
}

impl AccessControl for PredicateAccess {
    fn has_read_permission(&self, path: &str) -> bool {
        (self.read)(path)
    }

    fn has_write_permission(&self, path: &str) -> bool {
        (self.write)(path)
    }
}

/// 单次请求的上下文，显式传入每个操作
#[derive(Clone)]
pub struct RequestContext {
    access: Arc<dyn AccessControl>,
    /// 请求体长度（Content-Length）
    pub content_length: Option<u64>,
}

impl RequestContext {
    pub fn new(access: Arc<dyn AccessControl>) -> Self {
        Self {
            access,
            content_length: None,
        }
    }

    pub fn allow_all() -> Self {
        Self::new(Arc::new(AllowAll))
    }

    pub fn with_content_length(mut self, length: Option<u64>) -> Self {
        self.content_length = length;
        self
    }

    pub fn can_read(&self, path: &str) -> bool {
        self.access.has_read_permission(path)
    }

    pub fn can_write(&self, path: &str) -> bool {
        self.access.has_write_permission(path)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}
