//! Synthetic source images and the jobs run against them

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat as Codec, Rgb, RgbImage};
use serde_json::{json, Value};
use std::io::Cursor;

/// A source image, the operations submitted with it and the expected output.
#[derive(Debug, Clone)]
pub struct ImageJobFixture {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub source_codec: Codec,
    pub format: Option<&'static str>,
    pub operations: fn() -> Value,
    pub expected_dimensions: (u32, u32),
    pub expected_extension: &'static str,
    pub description: &'static str,
}

pub const JOB_FIXTURES: &[ImageJobFixture] = &[
    ImageJobFixture {
        name: "gradient_resize",
        width: 64,
        height: 48,
        source_codec: Codec::Png,
        format: None,
        operations: || json!([{"operation_type": "resize", "parameters": {"width": 32, "height": 16}}]),
        expected_dimensions: (32, 16),
        expected_extension: "jpg",
        description: "PNG resized, default jpg output",
    },
    ImageJobFixture {
        name: "gray_to_webp",
        width: 40,
        height: 40,
        source_codec: Codec::Jpeg,
        format: Some("png"),
        operations: || {
            json!([
                {"operation_type": "filter", "parameters": {"type": "grayscale"}},
                {"operation_type": "convert", "parameters": {"format": "webp"}}
            ])
        },
        expected_dimensions: (40, 40),
        expected_extension: "webp",
        description: "JPEG grayscaled, convert overrides the requested png",
    },
    ImageJobFixture {
        name: "compressed_sharpen",
        width: 30,
        height: 20,
        source_codec: Codec::Png,
        format: Some("JPG"),
        operations: || {
            json!([
                {"operation_type": "filter", "parameters": {"type": "sharpen"}},
                {"operation_type": "compress", "parameters": {"quality": 60}}
            ])
        },
        expected_dimensions: (30, 20),
        expected_extension: "jpg",
        description: "Sharpened and compressed within the anonymous quality range",
    },
];

/// Deterministic RGB gradient.
pub fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    }))
}

/// Encode a gradient with the given codec.
pub fn encoded(width: u32, height: u32, codec: Codec) -> Vec<u8> {
    let mut bytes = Vec::new();
    gradient(width, height)
        .write_to(&mut Cursor::new(&mut bytes), codec)
        .expect("encode fixture image");
    bytes
}

impl ImageJobFixture {
    pub fn source(&self) -> Vec<u8> {
        encoded(self.width, self.height, self.source_codec)
    }
}
