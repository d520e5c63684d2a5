use std::sync::{Arc, Mutex, PoisonError};

use pyrflow_image::{Image, Sample};

use crate::device::ExecutionStrategy;
use crate::error::DeviceError;
use crate::event::CompletionHandle;
use crate::graph::{ExecutionGraph, Kernel, NdRange};
use crate::image::DeviceImage;

/// Copies a host image into a device image.
pub struct WriteImage<T, const C: usize> {
    src: Image<T, C>,
    dst: Arc<DeviceImage<T, C>>,
}

impl<T: Sample, const C: usize> Kernel for WriteImage<T, C> {
    fn name(&self) -> &'static str {
        "write_image"
    }

    fn launch(&self, _: &NdRange, _: ExecutionStrategy) -> Result<(), DeviceError> {
        self.dst.expect_size(self.src.size())?;
        self.dst.write_with(|data| {
            data.copy_from_slice(self.src.as_slice());
            Ok(())
        })
    }
}

/// Copies a device image into host memory.
struct ReadImage<T, const C: usize> {
    src: Arc<DeviceImage<T, C>>,
    dst: Arc<Mutex<Option<Image<T, C>>>>,
}

impl<T: Sample, const C: usize> Kernel for ReadImage<T, C> {
    fn name(&self) -> &'static str {
        "read_image"
    }

    fn launch(&self, _: &NdRange, _: ExecutionStrategy) -> Result<(), DeviceError> {
        let host = self.src.to_host()?;
        *self.dst.lock().unwrap_or_else(PoisonError::into_inner) = Some(host);
        Ok(())
    }
}

/// Enqueue the upload of `src` into `dst`.
///
/// The host data is copied at dispatch time, so `src` may be dropped right away.
pub fn enqueue_write<T: Sample, const C: usize>(
    graph: &ExecutionGraph,
    label: impl Into<String>,
    src: &Image<T, C>,
    dst: &Arc<DeviceImage<T, C>>,
    wait_list: &[&CompletionHandle],
) -> CompletionHandle {
    graph.enqueue(
        label,
        WriteImage {
            src: src.clone(),
            dst: dst.clone(),
        },
        NdRange::new(src.size()),
        wait_list,
    )
}

/// Read a device image back to the host once `producer` retired.
///
/// Works for any residency. Blocks the calling thread.
///
/// # Errors
///
/// Returns the failure of the producer or of the transfer itself.
pub fn read_back<T: Sample, const C: usize>(
    graph: &ExecutionGraph,
    src: &Arc<DeviceImage<T, C>>,
    producer: &CompletionHandle,
) -> Result<Image<T, C>, DeviceError> {
    let dst = Arc::new(Mutex::new(None));
    let handle = graph.enqueue(
        format!("Read {}", src.name()),
        ReadImage {
            src: src.clone(),
            dst: dst.clone(),
        },
        NdRange::new(src.size()),
        &[producer],
    );
    handle.wait()?;

    let image = dst.lock().unwrap_or_else(PoisonError::into_inner).take();
    image.ok_or_else(|| DeviceError::UnwrittenRead(src.name().to_string()))
}
