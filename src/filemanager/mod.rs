// 文件管理连接器
//
// 对外的唯一入口：FileManager 为每个连接器动作提供一个方法

mod action;
mod item;
mod service;

pub use action::{
    Action, Disposition, FileStream, FolderSummary, InitiateInfo, Payload, SharedExtensions, SharedOptions,
    SharedSecurity, SharedUpload,
};
pub use item::ItemFactory;
pub use service::FileManager;
