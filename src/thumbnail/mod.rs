// 缩略图模块
//
// 图片处理（方向校正、缩放、裁剪）与镜像目录树的缩略图缓存

mod cache;
pub mod imaging;

pub use cache::ThumbnailCache;
pub use imaging::{is_raster_extension, read_info, ImageInfo};
