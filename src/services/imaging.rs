//! Thin layer over the `image` crate.
//!
//! | Step | Implementation |
//! |------|----------------|
//! | Open | `image::load_from_memory` |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Grayscale | `DynamicImage::grayscale` |
//! | Blur | `DynamicImage::blur` |
//! | Sharpen | `DynamicImage::unsharpen` |
//! | Encode | JPEG and WebP at `quality` (`webp::Encoder`), lossless PNG |

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage};
use std::borrow::Cow;

use crate::models::job::ImageFormat;
use crate::models::operation::FilterKind;

const BLUR_SIGMA: f32 = 2.0;
const SHARPEN_SIGMA: f32 = 1.0;
const SHARPEN_THRESHOLD: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ImagingError {
    #[error("Failed to decode source image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode {format} output: {source}")]
    Encode {
        format: ImageFormat,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode webp output: {0}")]
    Webp(String),

    #[error("Resize to {width}x{height} exceeds the {limit} pixel limit")]
    TooLarge { width: u32, height: u32, limit: u64 },
}

/// Detect the encoding of uploaded bytes, if it is one we accept.
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpg),
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::WebP => Some(ImageFormat::Webp),
        _ => None,
    }
}

pub fn open(bytes: &[u8]) -> Result<DynamicImage, ImagingError> {
    image::load_from_memory(bytes).map_err(ImagingError::Decode)
}

/// Resample to exactly `width` x `height`, ignoring aspect ratio.
pub fn resize(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    image.resize_exact(width, height, FilterType::Lanczos3)
}

pub fn apply_filter(image: &DynamicImage, filter: FilterKind) -> DynamicImage {
    match filter {
        FilterKind::Grayscale => image.grayscale(),
        FilterKind::Blur => image.blur(BLUR_SIGMA),
        FilterKind::Sharpen => image.unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD),
    }
}

/// Encode to `format`. `quality` (1-100) drives the lossy JPEG and WebP
/// encoders; PNG is always lossless.
pub fn encode(image: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>, ImagingError> {
    let mut buffer = Vec::new();

    let result = match format {
        ImageFormat::Jpg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
            jpeg_compatible(image).write_with_encoder(encoder)
        }
        ImageFormat::Png => image.write_with_encoder(PngEncoder::new(&mut buffer)),
        ImageFormat::Webp => {
            let source = webp_compatible(image);
            let encoder = webp::Encoder::from_image(&source)
                .map_err(|e| ImagingError::Webp(e.to_string()))?;
            return Ok(encoder.encode(f32::from(quality.clamp(1, 100))).to_vec());
        }
    };

    result.map_err(|source| ImagingError::Encode { format, source })?;
    Ok(buffer)
}

// JPEG has no alpha channel and no 16-bit support.
fn jpeg_compatible(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    match image.color() {
        ColorType::L8 | ColorType::Rgb8 => Cow::Borrowed(image),
        ColorType::La8 | ColorType::L16 | ColorType::La16 => {
            Cow::Owned(DynamicImage::ImageLuma8(image.to_luma8()))
        }
        _ => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
    }
}

// libwebp only takes 8-bit RGB or RGBA.
fn webp_compatible(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    match image.color() {
        ColorType::Rgb8 | ColorType::Rgba8 => Cow::Borrowed(image),
        ColorType::L8 | ColorType::L16 => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
        _ => Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8())),
    }
}
