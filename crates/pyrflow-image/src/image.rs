use serde::{Deserialize, Serialize};

use crate::error::ImageError;

/// Image size in pixels
///
/// A struct to represent the size of an image in pixels.
///
/// # Examples
///
/// ```
/// use pyrflow_image::ImageSize;
///
/// let image_size = ImageSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(image_size.width, 10);
/// assert_eq!(image_size.height, 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl ImageSize {
    /// Number of pixels covered by the size.
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Size of the next pyramid level.
    ///
    /// Halving truncates: a 5×3 image becomes 2×1.
    pub fn halved(&self) -> ImageSize {
        ImageSize {
            width: self.width / 2,
            height: self.height / 2,
        }
    }

    /// Size of pyramid level `level` when `self` is level 0.
    ///
    /// Equivalent to halving `level` times, i.e. `floor(size / 2^level)`.
    pub fn at_level(&self, level: usize) -> ImageSize {
        let shift = level.min(usize::BITS as usize - 1);
        ImageSize {
            width: self.width >> shift,
            height: self.height >> shift,
        }
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ImageSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// Numeric sample type of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleType {
    /// 8-bit unsigned intensity.
    U8,
    /// 16-bit signed derivative.
    I16,
    /// 32-bit signed tensor component.
    I32,
    /// 32-bit float vector component.
    F32,
}

impl SampleType {
    /// Size of one sample in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            SampleType::U8 => 1,
            SampleType::I16 => 2,
            SampleType::I32 => 4,
            SampleType::F32 => 4,
        }
    }
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            SampleType::U8 => "u8",
            SampleType::I16 => "i16",
            SampleType::I32 => "i32",
            SampleType::F32 => "f32",
        };
        write!(f, "{name}")
    }
}

/// Trait for image sample types.
///
/// Send and Sync is required to share images between device operations.
pub trait Sample: Copy + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    /// The runtime descriptor of the sample type.
    const TYPE: SampleType;
}

impl Sample for u8 {
    const TYPE: SampleType = SampleType::U8;
}

impl Sample for i16 {
    const TYPE: SampleType = SampleType::I16;
}

impl Sample for i32 {
    const TYPE: SampleType = SampleType::I32;
}

impl Sample for f32 {
    const TYPE: SampleType = SampleType::F32;
}

/// Represents a host image with pixel data.
///
/// The pixel data is stored row-major and interleaved, with shape (H, W, C).
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T, const CHANNELS: usize> {
    size: ImageSize,
    data: Vec<T>,
}

impl<T, const CHANNELS: usize> Image<T, CHANNELS>
where
    T: Sample,
{
    /// Create a new image from pixel data.
    ///
    /// # Arguments
    ///
    /// * `size` - The size of the image in pixels.
    /// * `data` - The pixel data of the image.
    ///
    /// # Errors
    ///
    /// If the length of the pixel data does not match the image size, an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use pyrflow_image::{Image, ImageSize};
    ///
    /// let image = Image::<u8, 3>::new(
    ///    ImageSize {
    ///       width: 10,
    ///      height: 20,
    ///  },
    /// vec![0u8; 10 * 20 * 3],
    /// ).unwrap();
    ///
    /// assert_eq!(image.size().width, 10);
    /// assert_eq!(image.size().height, 20);
    /// assert_eq!(image.num_channels(), 3);
    /// ```
    pub fn new(size: ImageSize, data: Vec<T>) -> Result<Self, ImageError> {
        if data.len() != size.width * size.height * CHANNELS {
            return Err(ImageError::InvalidChannelShape(
                data.len(),
                size.width * size.height * CHANNELS,
            ));
        }

        Ok(Self { size, data })
    }

    /// Create a new image with the given size and default pixel data.
    ///
    /// # Examples
    ///
    /// ```
    /// use pyrflow_image::{Image, ImageSize};
    ///
    /// let image = Image::<f32, 2>::from_size_val([4, 3].into(), 0.5).unwrap();
    ///
    /// assert_eq!(image.width(), 4);
    /// assert_eq!(image.as_slice().len(), 4 * 3 * 2);
    /// ```
    pub fn from_size_val(size: ImageSize, val: T) -> Result<Self, ImageError> {
        let data = vec![val; size.width * size.height * CHANNELS];
        Image::new(size, data)
    }

    /// Create a new image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(size: ImageSize, f: impl Fn(usize, usize) -> [T; CHANNELS]) -> Self {
        let mut data = Vec::with_capacity(size.area() * CHANNELS);
        for y in 0..size.height {
            for x in 0..size.width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self { size, data }
    }

    /// Get the size of the image in pixels.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Get the width of the image in pixels.
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// Get the height of the image in pixels.
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// Get the number of channels in the image.
    pub fn num_channels(&self) -> usize {
        CHANNELS
    }

    /// Number of samples between the starts of two consecutive rows.
    pub fn row_stride(&self) -> usize {
        self.size.width * CHANNELS
    }

    /// The sample type of the image.
    pub fn sample_type(&self) -> SampleType {
        T::TYPE
    }

    /// Get the pixel data of the image.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Get all channels of the pixel at (x, y).
    ///
    /// # Errors
    ///
    /// If the pixel is out of bounds, an error is returned.
    pub fn get_pixel(&self, x: usize, y: usize) -> Result<[T; CHANNELS], ImageError> {
        if x >= self.width() || y >= self.height() {
            return Err(ImageError::PixelIndexOutOfBounds(
                x,
                y,
                self.width(),
                self.height(),
            ));
        }
        let offset = (y * self.size.width + x) * CHANNELS;
        let mut pixel = [T::default(); CHANNELS];
        pixel.copy_from_slice(&self.data[offset..offset + CHANNELS]);
        Ok(pixel)
    }
}

#[cfg(test)]
mod tests {
    use crate::image::{Image, ImageError, ImageSize, SampleType};

    #[test]
    fn image_size() {
        let image_size = ImageSize {
            width: 10,
            height: 20,
        };
        assert_eq!(image_size.width, 10);
        assert_eq!(image_size.height, 20);
        assert_eq!(image_size.area(), 200);
    }

    #[test]
    fn image_size_halving_truncates() {
        let size = ImageSize {
            width: 65,
            height: 33,
        };
        assert_eq!(size.halved(), [32, 16].into());
        assert_eq!(size.halved().halved(), [16, 8].into());
        assert_eq!(size.at_level(2), size.halved().halved());
        assert_eq!(size.at_level(7), [0, 0].into());
        assert_eq!(size.at_level(0), size);
    }

    #[test]
    fn image_smoke() -> Result<(), ImageError> {
        let image = Image::<u8, 3>::new(
            ImageSize {
                width: 10,
                height: 20,
            },
            vec![0u8; 10 * 20 * 3],
        )?;
        assert_eq!(image.size().width, 10);
        assert_eq!(image.size().height, 20);
        assert_eq!(image.num_channels(), 3);
        assert_eq!(image.row_stride(), 30);
        assert_eq!(image.sample_type(), SampleType::U8);

        Ok(())
    }

    #[test]
    fn image_invalid_length() {
        let res = Image::<f32, 2>::new([2, 2].into(), vec![0.0; 7]);
        assert_eq!(res, Err(ImageError::InvalidChannelShape(7, 8)));
    }

    #[test]
    fn image_from_fn() -> Result<(), ImageError> {
        let image = Image::<i32, 2>::from_fn([3, 2].into(), |x, y| [x as i32, y as i32]);
        assert_eq!(image.get_pixel(2, 1)?, [2, 1]);
        assert_eq!(image.as_slice()[2..4], [1, 0]);
        assert_eq!(
            image.get_pixel(3, 0),
            Err(ImageError::PixelIndexOutOfBounds(3, 0, 3, 2))
        );

        Ok(())
    }
}
