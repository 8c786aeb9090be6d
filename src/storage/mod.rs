// 存储模块
//
// 统一的存储后端抽象（本地磁盘 / 对象存储）、数据模型与错误类型

mod backend;
mod error;
mod local;
pub mod object_store;
pub mod relpath;
mod types;
pub mod walker;

pub use backend::StorageBackend;
pub use error::{ErrorKind, FmError};
pub use local::LocalDisk;
pub use object_store::{HttpObjectClient, MemoryObjectClient, ObjectClient, ObjectStore};
pub use types::*;
pub use walker::{summarize, walk, TreeSummary, WalkEntry};
