// 压缩包模块
//
// - 解压：逐条目独立校验，拒绝越出目标目录的条目
// - 打包：文件夹下载时生成 ZIP

mod builder;
mod extractor;

pub use builder::{BuiltArchive, ZipBuilder, DOWNLOAD_CHUNK_SIZE, SENTINEL_NAME};
pub use extractor::ArchiveExtractor;
