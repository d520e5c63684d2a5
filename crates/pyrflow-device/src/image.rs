use std::sync::{Mutex, OnceLock, PoisonError};

use pyrflow_image::{Image, ImageSize, Sample, SampleType};

use crate::device::Residency;
use crate::error::DeviceError;
use crate::event::CompletionHandle;

/// A single-writer image living on the compute device.
///
/// Storage is reserved when the image is allocated. Exactly one operation
/// publishes the pixel data; afterwards the image is read-only. Reading an
/// image before it was published fails with [`DeviceError::UnwrittenRead`],
/// which is how a missing dependency edge shows up at runtime.
pub struct DeviceImage<T, const C: usize> {
    name: String,
    size: ImageSize,
    residency: Residency,
    staging: Mutex<Option<Vec<T>>>,
    data: OnceLock<Vec<T>>,
}

impl<T, const C: usize> std::fmt::Debug for DeviceImage<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceImage")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("channels", &C)
            .field("residency", &self.residency)
            .field("written", &self.data.get().is_some())
            .finish()
    }
}

impl<T: Sample, const C: usize> DeviceImage<T, C> {
    /// Allocate an image of `size` pixels.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::ResourceExhausted`] if the storage cannot be reserved.
    pub fn allocate(
        name: impl Into<String>,
        size: ImageSize,
        residency: Residency,
    ) -> Result<Self, DeviceError> {
        let name = name.into();
        let len = size
            .width
            .checked_mul(size.height)
            .and_then(|n| n.checked_mul(C));
        let bytes = len
            .and_then(|n| n.checked_mul(T::TYPE.size_in_bytes()))
            .unwrap_or(usize::MAX);

        let Some(len) = len else {
            return Err(DeviceError::ResourceExhausted { name, bytes });
        };

        let mut storage = Vec::new();
        if storage.try_reserve_exact(len).is_err() {
            return Err(DeviceError::ResourceExhausted { name, bytes });
        }
        storage.resize(len, T::default());

        Ok(Self {
            name,
            size,
            residency,
            staging: Mutex::new(Some(storage)),
            data: OnceLock::new(),
        })
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the image in pixels.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Width of the image in pixels.
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// Height of the image in pixels.
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// Number of interleaved channels.
    pub fn num_channels(&self) -> usize {
        C
    }

    /// Number of samples between the starts of two consecutive rows.
    pub fn row_stride(&self) -> usize {
        self.size.width * C
    }

    /// Numeric type of the samples.
    pub fn sample_type(&self) -> SampleType {
        T::TYPE
    }

    /// Where the image storage lives.
    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Whether the producing operation has published the data.
    pub fn is_written(&self) -> bool {
        self.data.get().is_some()
    }

    /// Check that the image has the size a kernel expects.
    pub fn expect_size(&self, expected: ImageSize) -> Result<(), DeviceError> {
        if self.size != expected {
            return Err(DeviceError::InvalidImageSize {
                name: self.name.clone(),
                expected,
                actual: self.size,
            });
        }
        Ok(())
    }

    /// Fill the reserved storage with `f` and publish it.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::AlreadyWritten`] on a second write, or the
    /// error returned by `f` (in which case nothing is published).
    pub fn write_with<F>(&self, f: F) -> Result<(), DeviceError>
    where
        F: FnOnce(&mut [T]) -> Result<(), DeviceError>,
    {
        let mut storage = self
            .staging
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| DeviceError::AlreadyWritten(self.name.clone()))?;

        f(&mut storage)?;

        self.data
            .set(storage)
            .map_err(|_| DeviceError::AlreadyWritten(self.name.clone()))
    }

    /// The published pixel data.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::UnwrittenRead`] if nothing was published yet.
    pub fn view(&self) -> Result<&[T], DeviceError> {
        self.data
            .get()
            .map(Vec::as_slice)
            .ok_or_else(|| DeviceError::UnwrittenRead(self.name.clone()))
    }

    /// Map a host-visible image once `handle` (its producer) retired.
    ///
    /// Blocks the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NotHostVisible`] for device-only images, or the
    /// failure of the producing operation.
    pub fn map(&self, handle: &CompletionHandle) -> Result<&[T], DeviceError> {
        if self.residency != Residency::HostVisible {
            return Err(DeviceError::NotHostVisible(self.name.clone()));
        }
        handle.wait()?;
        self.view()
    }

    /// Copy the published data into a host image.
    pub(crate) fn to_host(&self) -> Result<Image<T, C>, DeviceError> {
        Ok(Image::new(self.size, self.view()?.to_vec())?)
    }
}
