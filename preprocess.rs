use crate::error::{Error, Result};
use crate::models::ImageBuffer;
use image::imageops::FilterType;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    Nhwc,
    Nchw,
}

/// Stretches `buffer` onto a `size` x `size` square.
///
/// Both axes are scaled independently, so the aspect ratio is not preserved.
// TODO: add center-crop and letterbox modes for non-square photos.
pub fn scale_to_square(buffer: &ImageBuffer, size: i64) -> Result<ImageBuffer> {
    if size <= 0 {
        return Err(Error::InvalidArgument(format!(
            "target size must be positive, got {size}"
        )));
    }
    let size = u32::try_from(size)
        .map_err(|_| Error::InvalidArgument(format!("target size {size} is too large")))?;
    if buffer.width() == 0 || buffer.height() == 0 {
        return Err(Error::InvalidArgument(format!(
            "cannot scale a {}x{} image",
            buffer.width(),
            buffer.height()
        )));
    }
    let resized = buffer
        .as_dynamic()
        .resize_exact(size, size, FilterType::Triangle);
    Ok(ImageBuffer::from(resized))
}

/// Converts a square RGB buffer into a batch-of-one float tensor, `(value - mean) / std` per channel.
pub fn to_input_tensor(
    buffer: &ImageBuffer,
    mean: f32,
    std: f32,
    layout: TensorLayout,
) -> Result<Array4<f32>> {
    if std == 0.0 || !std.is_finite() {
        return Err(Error::InvalidArgument(format!(
            "normalization scale must be finite and non-zero, got {std}"
        )));
    }
    let rgb = buffer.to_rgb8();
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    let normalize = |v: u8| (v as f32 - mean) / std;
    let tensor = match layout {
        TensorLayout::Nhwc => Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| {
            normalize(rgb.get_pixel(x as u32, y as u32)[c])
        }),
        TensorLayout::Nchw => Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
            normalize(rgb.get_pixel(x as u32, y as u32)[c])
        }),
    };
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PixelFormat;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32, value: [u8; 3]) -> ImageBuffer {
        ImageBuffer::from(RgbImage::from_pixel(width, height, Rgb(value)))
    }

    #[test]
    fn output_is_exactly_square() {
        for (w, h, size) in [(1, 1, 224), (640, 480, 224), (30, 1000, 17), (5, 5, 1)] {
            let out = scale_to_square(&solid(w, h, [10, 20, 30]), size).unwrap();
            assert_eq!((out.width(), out.height()), (size as u32, size as u32));
        }
    }

    #[test]
    fn non_positive_size_is_rejected() {
        let img = solid(4, 4, [0, 0, 0]);
        assert!(matches!(scale_to_square(&img, 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(scale_to_square(&img, -3), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn zero_area_source_is_rejected() {
        let wide = ImageBuffer::from_raw(8, 0, PixelFormat::Rgb8, Vec::new()).unwrap();
        let empty = ImageBuffer::from_raw(0, 0, PixelFormat::Rgb8, Vec::new()).unwrap();
        assert!(matches!(scale_to_square(&wide, 224), Err(Error::InvalidArgument(_))));
        assert!(matches!(scale_to_square(&empty, 224), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn stretch_maps_whole_source_onto_square() {
        // Left half red, right half blue on a wide image; both halves must survive the stretch.
        let mut img = RgbImage::new(40, 10);
        for (x, _, px) in img.enumerate_pixels_mut() {
            *px = if x < 20 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) };
        }
        let src = ImageBuffer::from(img);
        let out = scale_to_square(&src, 8).unwrap().to_rgb8();
        assert!(out.get_pixel(0, 4)[0] >= 250 && out.get_pixel(0, 4)[2] <= 5);
        assert!(out.get_pixel(7, 4)[2] >= 250 && out.get_pixel(7, 4)[0] <= 5);
        assert_eq!((src.width(), src.height()), (40, 10));
    }

    #[test]
    fn tensor_applies_mean_and_scale() {
        let img = solid(2, 2, [117, 118, 127]);
        let t = to_input_tensor(&img, 117.0, 1.0, TensorLayout::Nhwc).unwrap();
        assert_eq!(t.shape(), &[1, 2, 2, 3]);
        assert_eq!(t[[0, 1, 1, 0]], 0.0);
        assert_eq!(t[[0, 1, 1, 1]], 1.0);
        assert_eq!(t[[0, 1, 1, 2]], 10.0);

        let t = to_input_tensor(&img, 127.5, 127.5, TensorLayout::Nchw).unwrap();
        assert_eq!(t.shape(), &[1, 3, 2, 2]);
        assert!((t[[0, 2, 0, 0]] - (-0.003_921_6)).abs() < 1e-5);
    }

    #[test]
    fn zero_scale_is_rejected() {
        let img = solid(1, 1, [0, 0, 0]);
        assert!(matches!(
            to_input_tensor(&img, 0.0, 0.0, TensorLayout::Nhwc),
            Err(Error::InvalidArgument(_))
        ));
    }
}
