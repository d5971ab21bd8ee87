use std::path::Path;

use image::imageops::FilterType;
use image::io::Reader as ImageReader;
use image::{DynamicImage, GenericImageView};
use ndarray::{Array, Array2, ArrayD, ArrayView3, Axis, IxDyn};

use crate::error::Result;

/// ITU-R BT.709 luma coefficients.
const LUMA_WEIGHTS: [f64; 3] = [0.2125, 0.7154, 0.0721];

/// Decode an image from disk, shrink it so its longest side is at most
/// `max_dimension` and convert it to a float array with values in `[0, 1]`.
///
/// Grayscale output is `[rows, cols]`, colour output is `[rows, cols, 3]`.
pub fn load_image<P: AsRef<Path>>(path: P, max_dimension: u32, colour: bool) -> Result<ArrayD<f64>> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let image = resize_to_max(image, max_dimension);
    to_ndarray(&image, colour)
}

/// Resize preserving aspect ratio, only if the image is larger than `max_dimension`.
pub fn resize_to_max(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width.max(height) <= max_dimension {
        return image;
    }
    image.resize(max_dimension, max_dimension, FilterType::Triangle)
}

pub fn to_ndarray(image: &DynamicImage, colour: bool) -> Result<ArrayD<f64>> {
    let (width, height) = image.dimensions();
    let (rows, cols) = (height as usize, width as usize);

    if colour {
        let buffer: Vec<f64> = image.to_rgb32f().into_raw().into_iter().map(f64::from).collect();
        Ok(Array::from_shape_vec(IxDyn(&[rows, cols, 3]), buffer)?)
    } else {
        let buffer: Vec<f64> = image.to_luma32f().into_raw().into_iter().map(f64::from).collect();
        Ok(Array::from_shape_vec(IxDyn(&[rows, cols]), buffer)?)
    }
}

/// Luminance of a `[rows, cols, channels]` array. Anything other than three
/// channels is taken to be grayscale already and its first channel is used.
pub fn luminance(image: ArrayView3<f64>) -> Array2<f64> {
    match image.dim().2 {
        3 => Array2::from_shape_fn((image.dim().0, image.dim().1), |(y, x)| {
            (0..3).map(|c| LUMA_WEIGHTS[c] * image[[y, x, c]]).sum()
        }),
        _ => image.index_axis(Axis(2), 0).to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn test_gray_to_ndarray() {
        let image = GrayImage::from_fn(3, 2, |x, y| Luma([(x + 3 * y) as u8 * 51]));
        let array = to_ndarray(&DynamicImage::ImageLuma8(image), false).unwrap();

        assert_eq!(array.shape(), &[2, 3]);
        assert!((array[[0, 0]] - 0.0).abs() < 1e-6);
        assert!((array[[0, 2]] - 0.4).abs() < 1e-6);
        assert!((array[[1, 0]] - 0.6).abs() < 1e-6);
        assert!((array[[1, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_colour_to_ndarray() {
        let image = RgbImage::from_pixel(4, 2, Rgb([255, 0, 51]));
        let array = to_ndarray(&DynamicImage::ImageRgb8(image), true).unwrap();

        assert_eq!(array.shape(), &[2, 4, 3]);
        assert!((array[[1, 3, 0]] - 1.0).abs() < 1e-6);
        assert!((array[[1, 3, 1]] - 0.0).abs() < 1e-6);
        assert!((array[[1, 3, 2]] - 0.2).abs() < 1e-6);

        let gray = luminance(array.view().into_dimensionality().unwrap());
        assert_eq!(gray.dim(), (2, 4));
        assert!((gray[[0, 0]] - (0.2125 + 0.0721 * 0.2)).abs() < 1e-6);
    }

    #[test]
    fn test_resize_preserves_aspect() {
        let image = DynamicImage::ImageLuma8(GrayImage::new(400, 200));
        let resized = resize_to_max(image, 100);
        assert_eq!(resized.dimensions(), (100, 50));

        let small = DynamicImage::ImageLuma8(GrayImage::new(40, 20));
        assert_eq!(resize_to_max(small, 100).dimensions(), (40, 20));
    }
}
