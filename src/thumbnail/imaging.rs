// 图片解码、方向校正与缩放
//
// 这里全部是同步 CPU 计算，调用方负责放进 spawn_blocking

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, ImageResult};
use std::io::Cursor;

use crate::config::MainImageConfig;

/// 按扩展名可以生成缩略图的位图格式
const RASTER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "jpe", "png", "gif", "bmp", "webp"];

pub fn is_raster_extension(extension: &str) -> bool {
    let extension = extension.to_lowercase();
    RASTER_EXTENSIONS.contains(&extension.as_str())
}

/// 从图片头部读出的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// EXIF 方向 >= 5，自动旋转后宽高互换
    pub transposed: bool,
}

impl ImageInfo {
    /// 自动旋转之后的宽高
    pub fn oriented_dimensions(&self) -> (u32, u32) {
        if self.transposed {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

fn is_transposed(orientation: Orientation) -> bool {
    matches!(
        orientation,
        Orientation::Rotate90 | Orientation::Rotate270 | Orientation::Rotate90FlipH | Orientation::Rotate270FlipH
    )
}

/// 只解析头部判断是否为真实位图，并读取尺寸与方向
///
/// 不看扩展名；无法识别时返回 None
pub fn read_info(bytes: &[u8]) -> Option<ImageInfo> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().ok()?;
    let format = reader.format()?;
    let mut decoder = reader.into_decoder().ok()?;
    let (width, height) = decoder.dimensions();
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

    Some(ImageInfo {
        format,
        width,
        height,
        transposed: is_transposed(orientation),
    })
}

struct Decoded {
    img: DynamicImage,
    format: ImageFormat,
    /// 是否按 EXIF 方向做过旋转/翻转
    reoriented: bool,
}

/// 完整解码，可选按 EXIF 方向校正
fn decode(bytes: &[u8], auto_orient: bool) -> ImageResult<Decoded> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format().unwrap_or(ImageFormat::Png);
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)?;
    let reoriented = auto_orient && orientation != Orientation::NoTransforms;
    if reoriented {
        img.apply_orientation(orientation);
    }
    Ok(Decoded { img, format, reoriented })
}

/// 按原格式编码，编码器不支持时回退为 PNG
fn encode(img: &DynamicImage, format: ImageFormat) -> ImageResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    let result = match format {
        // JPEG 不支持透明通道
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut out, format),
        _ => img.write_to(&mut out, format),
    };
    if result.is_err() {
        out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)?;
    }
    Ok(out.into_inner())
}

/// 生成缩略图
///
/// `crop` 为真时先按外接框缩放再居中裁剪为固定尺寸，否则只在框内等比缩放
pub fn make_thumbnail(bytes: &[u8], width: u32, height: u32, crop: bool) -> ImageResult<Vec<u8>> {
    let Decoded { img, format, .. } = decode(bytes, true)?;
    let thumb = if crop {
        img.resize_to_fill(width, height, FilterType::Triangle)
    } else {
        img.thumbnail(width, height)
    };
    encode(&thumb, format)
}

/// 上传完成后的主图处理：自动旋转 + 只缩小的等比缩放
///
/// 不需要任何改动时返回 None
pub fn prepare_main(bytes: &[u8], config: &MainImageConfig) -> ImageResult<Option<Vec<u8>>> {
    let Decoded { img, format, reoriented } = decode(bytes, config.auto_orient)?;
    let max_width = config.max_width.unwrap_or(u32::MAX);
    let max_height = config.max_height.unwrap_or(u32::MAX);

    let needs_resize = img.width() > max_width || img.height() > max_height;
    if !needs_resize && !reoriented {
        return Ok(None);
    }

    let img = if needs_resize {
        img.resize(max_width, max_height, FilterType::Lanczos3)
    } else {
        img
    };
    encode(&img, format).map(Some)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// 生成指定尺寸的 PNG
    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// 生成在 SOI 之后带 EXIF 方向标记的 JPEG
    pub(crate) fn jpeg_with_orientation(width: u32, height: u32, orientation: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([30, 120, 200]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Jpeg).unwrap();
        let jpeg = out.into_inner();

        // 大端 TIFF 头 + 只含 0x0112 一项的 IFD0
        let mut tiff = vec![b'M', b'M', 0, 42, 0, 0, 0, 8, 0, 1];
        tiff.extend_from_slice(&[0x01, 0x12, 0, 3, 0, 0, 0, 1, 0, orientation, 0, 0]);
        tiff.extend_from_slice(&[0, 0, 0, 0]);

        let mut app1 = vec![0xFF, 0xE1];
        app1.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
        app1.extend_from_slice(b"Exif\0\0");
        app1.extend_from_slice(&tiff);

        let mut bytes = jpeg[..2].to_vec();
        bytes.extend_from_slice(&app1);
        bytes.extend_from_slice(&jpeg[2..]);
        bytes
    }

    #[test]
    fn test_transposed_orientations() {
        for value in 1..=8u8 {
            let orientation = Orientation::from_exif(value).unwrap();
            assert_eq!(is_transposed(orientation), value >= 5, "orientation {}", value);
        }
    }

    #[test]
    fn test_exif_rotation_swaps_dimensions() {
        let info = read_info(&jpeg_with_orientation(200, 100, 6)).unwrap();
        assert_eq!(info.format, ImageFormat::Jpeg);
        assert_eq!((info.width, info.height), (200, 100));
        assert!(info.transposed);
        assert_eq!(info.oriented_dimensions(), (100, 200));

        let info = read_info(&jpeg_with_orientation(200, 100, 3)).unwrap();
        assert_eq!(info.oriented_dimensions(), (200, 100));
    }

    #[test]
    fn test_read_info() {
        let info = read_info(&png_bytes(40, 20)).unwrap();
        assert_eq!(info.format, ImageFormat::Png);
        assert_eq!((info.width, info.height), (40, 20));
        assert_eq!(info.oriented_dimensions(), (40, 20));

        assert!(read_info(b"MZ\x90\x00 definitely not an image").is_none());
    }

    #[test]
    fn test_thumbnail_crop_is_exact() {
        let thumb = make_thumbnail(&png_bytes(300, 100), 64, 64, true).unwrap();
        let info = read_info(&thumb).unwrap();
        assert_eq!((info.width, info.height), (64, 64));

        let thumb = make_thumbnail(&png_bytes(300, 100), 64, 64, false).unwrap();
        let info = read_info(&thumb).unwrap();
        assert_eq!(info.width, 64);
        assert!(info.height < 64);
    }

    #[test]
    fn test_prepare_main_only_shrinks() {
        let config = MainImageConfig {
            auto_orient: true,
            max_width: Some(100),
            max_height: Some(100),
        };
        assert!(prepare_main(&png_bytes(50, 40), &config).unwrap().is_none());

        let resized = prepare_main(&png_bytes(400, 200), &config).unwrap().unwrap();
        let info = read_info(&resized).unwrap();
        assert_eq!((info.width, info.height), (100, 50));
    }

    #[test]
    fn test_raster_extension() {
        assert!(is_raster_extension("JPG"));
        assert!(is_raster_extension("webp"));
        assert!(!is_raster_extension("svg"));
        assert!(!is_raster_extension(""));
    }
}
