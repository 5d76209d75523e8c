use crate::error::{Error, Result};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

pub const STATUS_START: &str = "start";
pub const STATUS_PREPROCESSING: &str = "preprocessing";
pub const STATUS_INFERENCE: &str = "inference";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_FINISH: &str = "finish";

/// Optional region of the source image a recognition refers to, in input pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationHint {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub label: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationHint>,
}

impl Recognition {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            location: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Luma8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            Self::Luma8 => 1,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

/// A decoded 2-D pixel buffer. Preprocessing reads it and produces a new buffer.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    image: DynamicImage,
}

impl ImageBuffer {
    pub fn from_raw(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * format.channels();
        if pixels.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "{width}x{height} {format:?} buffer needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        let image = match format {
            PixelFormat::Luma8 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
            PixelFormat::Rgb8 => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
            PixelFormat::Rgba8 => RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8),
        }
        .ok_or_else(|| Error::InvalidArgument("pixel buffer does not match its dimensions".into()))?;
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Anything other than 8-bit gray or RGB reports as RGBA.
    pub fn format(&self) -> PixelFormat {
        match self.image {
            DynamicImage::ImageLuma8(_) => PixelFormat::Luma8,
            DynamicImage::ImageRgb8(_) => PixelFormat::Rgb8,
            _ => PixelFormat::Rgba8,
        }
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    pub fn to_rgb8(&self) -> RgbImage {
        self.image.to_rgb8()
    }
}

impl From<DynamicImage> for ImageBuffer {
    fn from(image: DynamicImage) -> Self {
        Self { image }
    }
}

impl From<RgbImage> for ImageBuffer {
    fn from(image: RgbImage) -> Self {
        Self {
            image: DynamicImage::ImageRgb8(image),
        }
    }
}

/// One staged message of a pipeline invocation. `Result` and `Failure` are terminal.
#[derive(Debug)]
pub enum PipelineEvent<T = Vec<Recognition>> {
    Status(String),
    Result(T),
    Failure(Error),
}

impl<T> PipelineEvent<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Status(_))
    }
}
