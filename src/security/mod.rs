// 安全模块
//
// 路径解析与根目录约束、文件名规范化、策略闸门、外部授权谓词

pub mod context;
pub mod policy;
pub mod resolver;

pub use context::{AccessControl, AllowAll, PredicateAccess, RequestContext};
pub use policy::SecurityPolicyEngine;
pub use resolver::{NameMode, PathResolver};
