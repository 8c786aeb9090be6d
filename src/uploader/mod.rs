// 上传模块
//
// - 固定顺序的上传校验（容量、类型、数量、图片内容与尺寸）
// - 基于 Content-Range 的分片续传
// - 不覆盖时的唯一文件名（name(1).ext）

pub mod content_range;
pub mod naming;
pub mod pipeline;

pub use content_range::ContentRange;
pub use naming::{unique_name, upcount_name};
pub use pipeline::{UploadFile, UploadOutcome, UploadPipeline, UploadSession};
