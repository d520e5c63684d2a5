use std::sync::Arc;

use pyrflow_device::{
    enqueue_write, read_back, CompletionHandle, DeviceError, DeviceImage, ExecutionGraph,
    NdRange, ProfileRecorder, Residency, ResidencyConfig,
};
use pyrflow_image::{Image, ImageSize, Sample};

use crate::error::FlowError;
use crate::kernels::{Axis, DownFilter};
use crate::program::Program;

/// One level of a pyramid: the image and the handle of the operation producing it.
pub struct PyramidLevel<T, const C: usize> {
    image: Arc<DeviceImage<T, C>>,
    handle: CompletionHandle,
}

impl<T, const C: usize> Clone for PyramidLevel<T, C> {
    fn clone(&self) -> Self {
        Self {
            image: self.image.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<T: Sample, const C: usize> PyramidLevel<T, C> {
    pub(crate) fn new(image: Arc<DeviceImage<T, C>>, handle: CompletionHandle) -> Self {
        Self { image, handle }
    }

    /// The image of the level.
    pub fn image(&self) -> &Arc<DeviceImage<T, C>> {
        &self.image
    }

    /// Completion handle of the operation writing the image.
    pub fn handle(&self) -> &CompletionHandle {
        &self.handle
    }

    /// Size of the level in pixels.
    pub fn size(&self) -> ImageSize {
        self.image.size()
    }

    /// Copy the level to host memory once its producer retired.
    pub fn read_back(&self, graph: &ExecutionGraph) -> Result<Image<T, C>, DeviceError> {
        read_back(graph, &self.image, &self.handle)
    }
}

/// An ordered sequence of levels, index 0 being the finest.
///
/// Intermediate images of separable passes are kept alongside the levels so
/// the pyramid owns every image its operations wrote.
pub struct Pyramid<T, const C: usize> {
    levels: Vec<PyramidLevel<T, C>>,
    intermediates: Vec<PyramidLevel<T, C>>,
}

/// Pyramid of 8-bit intensity images.
pub type ImagePyramid = Pyramid<u8, 1>;

/// Pyramid of 16-bit directional derivatives.
pub type GradientPyramid = Pyramid<i16, 1>;

/// Pyramid of 4-component structure tensors.
pub type TensorPyramid = Pyramid<i32, 4>;

/// Pyramid of 2-component flow vectors.
pub type FlowPyramid = Pyramid<f32, 2>;

impl<T: Sample, const C: usize> Pyramid<T, C> {
    pub(crate) fn new(
        levels: Vec<PyramidLevel<T, C>>,
        intermediates: Vec<PyramidLevel<T, C>>,
    ) -> Self {
        Self {
            levels,
            intermediates,
        }
    }

    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Level `i`, if it exists.
    pub fn level(&self, i: usize) -> Option<&PyramidLevel<T, C>> {
        self.levels.get(i)
    }

    /// All levels, finest first.
    pub fn levels(&self) -> &[PyramidLevel<T, C>] {
        &self.levels
    }

    /// Intermediate images of the separable passes, in dispatch order.
    pub fn intermediates(&self) -> &[PyramidLevel<T, C>] {
        &self.intermediates
    }

    /// Iterate over the levels, finest first.
    pub fn iter(&self) -> std::slice::Iter<'_, PyramidLevel<T, C>> {
        self.levels.iter()
    }

    /// Take ownership of the levels.
    pub fn into_levels(self) -> Vec<PyramidLevel<T, C>> {
        self.levels
    }
}

/// Check that `levels` levels can be built from an image of `size`.
///
/// Halving truncates, so the coarsest level `floor(size / 2^(levels - 1))`
/// must still be at least one pixel wide and high.
pub fn validate_levels(size: ImageSize, levels: usize) -> Result<(), FlowError> {
    if levels == 0 || levels > usize::BITS as usize {
        return Err(FlowError::InvalidLevelCount { levels, size });
    }
    let coarsest = size.at_level(levels - 1);
    if coarsest.width == 0 || coarsest.height == 0 {
        return Err(FlowError::InvalidLevelCount { levels, size });
    }
    Ok(())
}

/// Allocate one image per level of a pyramid based on `size`.
pub(crate) fn allocate_levels<T: Sample, const C: usize>(
    name: &str,
    size: ImageSize,
    levels: usize,
    residency: impl Fn(usize) -> Residency,
) -> Result<Vec<Arc<DeviceImage<T, C>>>, FlowError> {
    (0..levels)
        .map(|i| {
            let image = DeviceImage::<T, C>::allocate(
                format!("{name} level {i}"),
                size.at_level(i),
                residency(i),
            )?;
            Ok(Arc::new(image))
        })
        .collect()
}

/// Builds the multi-resolution pyramid of one input frame.
///
/// Level 0 is the uploaded frame. Level `i + 1` is produced from level `i`
/// by a downfilter pass along x followed by a pass along y; every pass waits
/// exactly on its direct predecessor.
///
/// The images are allocated by [`PyramidBuilder::allocate`] and written by
/// the operations dispatched in [`PyramidBuilder::build`].
pub struct PyramidBuilder {
    name: String,
    levels: Vec<Arc<DeviceImage<u8, 1>>>,
    intermediates: Vec<Arc<DeviceImage<u8, 1>>>,
}

impl PyramidBuilder {
    /// Allocate the images of a `levels`-level pyramid of a frame of `size`.
    ///
    /// `name` identifies the frame in operation labels, e.g. `"Image 1"`.
    pub fn allocate(
        name: impl Into<String>,
        size: ImageSize,
        levels: usize,
        residency: &ResidencyConfig,
    ) -> Result<Self, FlowError> {
        validate_levels(size, levels)?;
        let name = name.into();

        let levels = allocate_levels(&name, size, levels, |i| {
            if i == 0 {
                residency.input
            } else {
                residency.intermediate
            }
        })?;

        let intermediates = levels[..levels.len() - 1]
            .iter()
            .map(|level| {
                let image = DeviceImage::<u8, 1>::allocate(
                    format!("{} x", level.name()),
                    DownFilter::output_size(Axis::X, level.size()),
                    residency.intermediate,
                )?;
                Ok(Arc::new(image))
            })
            .collect::<Result<Vec<_>, FlowError>>()?;

        Ok(Self {
            name,
            levels,
            intermediates,
        })
    }

    /// Number of levels the pyramid will have.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Dispatch the upload of `source` and every downfilter pass.
    ///
    /// Never blocks; a `source` of the wrong size makes the upload fail.
    pub fn build(
        self,
        graph: &ExecutionGraph,
        program: &Program,
        source: &Image<u8, 1>,
        local: Option<[usize; 2]>,
        recorder: &mut ProfileRecorder,
    ) -> ImagePyramid {
        let mut levels: Vec<PyramidLevel<u8, 1>> = Vec::with_capacity(self.levels.len());
        let mut intermediates = Vec::with_capacity(self.intermediates.len());

        let label = format!("Upload {}", self.name);
        let upload = enqueue_write(graph, label.as_str(), source, &self.levels[0], &[]);
        recorder.track(label, &upload);
        levels.push(PyramidLevel::new(self.levels[0].clone(), upload));

        for (i, (intermediate, next)) in self
            .intermediates
            .into_iter()
            .zip(self.levels.into_iter().skip(1))
            .enumerate()
        {
            let Some(previous) = levels.last() else {
                break;
            };

            let label = format!("DownFilterX {} Level {i}", self.name);
            let handle = graph.enqueue(
                label.as_str(),
                DownFilter::new(
                    Axis::X,
                    program.downfilter(),
                    program.downfilter_sum(),
                    previous.image.clone(),
                    intermediate.clone(),
                ),
                NdRange::new(intermediate.size()).with_local(local),
                &[&previous.handle],
            );
            recorder.track(label, &handle);
            let intermediate = PyramidLevel::new(intermediate, handle);

            let label = format!("DownFilterY {} Level {i}", self.name);
            let handle = graph.enqueue(
                label.as_str(),
                DownFilter::new(
                    Axis::Y,
                    program.downfilter(),
                    program.downfilter_sum(),
                    intermediate.image.clone(),
                    next.clone(),
                ),
                NdRange::new(next.size()).with_local(local),
                &[&intermediate.handle],
            );
            recorder.track(label, &handle);

            intermediates.push(intermediate);
            levels.push(PyramidLevel::new(next, handle));
        }

        log::debug!(
            "dispatched {} pyramid with {} levels",
            self.name,
            levels.len()
        );
        Pyramid::new(levels, intermediates)
    }
}
