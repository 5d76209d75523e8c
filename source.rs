use crate::error::Result;
use crate::models::{ImageBuffer, PixelFormat};
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Where a photo came from before it reaches the pipeline.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Low-resolution preview handed back directly by a capture flow.
    Captured {
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    },
    /// A file the user picked, decoded on demand.
    Picked(PathBuf),
}

impl ImageSource {
    pub fn decode(self) -> Result<ImageBuffer> {
        match self {
            Self::Captured {
                width,
                height,
                format,
                pixels,
            } => ImageBuffer::from_raw(width, height, format, pixels),
            Self::Picked(path) => open_image(&path),
        }
    }
}

pub fn open_image(path: &Path) -> Result<ImageBuffer> {
    let img = image::open(path)?;
    log::debug!(
        "Decoded {} ({}x{})",
        path.display(),
        img.width(),
        img.height()
    );
    Ok(ImageBuffer::from(img))
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
