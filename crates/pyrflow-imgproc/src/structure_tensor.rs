use std::sync::Arc;

use pyrflow_device::{DeviceImage, ExecutionGraph, NdRange, ProfileRecorder, ResidencyConfig};
use pyrflow_image::ImageSize;

use crate::error::FlowError;
use crate::kernels::StructureTensor;
use crate::program::Program;
use crate::pyramid::{
    allocate_levels, validate_levels, GradientPyramid, Pyramid, PyramidLevel, TensorPyramid,
};

/// Combines the x and y gradient pyramids into a structure tensor pyramid.
///
/// Level `i` waits on `{gx[i], gy[i]}`.
pub struct StructureTensorBuilder {
    levels: Vec<Arc<DeviceImage<i32, 4>>>,
}

impl StructureTensorBuilder {
    /// Allocate the images of the tensor pyramid.
    pub fn allocate(
        size: ImageSize,
        levels: usize,
        residency: &ResidencyConfig,
    ) -> Result<Self, FlowError> {
        validate_levels(size, levels)?;
        Ok(Self {
            levels: allocate_levels("StructureTensor", size, levels, |_| {
                residency.intermediate
            })?,
        })
    }

    /// Dispatch the tensor assembly of every level.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InvalidLevelCount`] if the gradient pyramids do
    /// not have the allocated number of levels.
    pub fn build(
        self,
        graph: &ExecutionGraph,
        program: &Program,
        gx: &GradientPyramid,
        gy: &GradientPyramid,
        local: Option<[usize; 2]>,
        recorder: &mut ProfileRecorder,
    ) -> Result<TensorPyramid, FlowError> {
        let expected = self.levels.len();
        for pyramid in [gx, gy] {
            if pyramid.num_levels() != expected {
                return Err(FlowError::InvalidLevelCount {
                    levels: expected,
                    size: self.levels[0].size(),
                });
            }
        }

        let levels = gx
            .iter()
            .zip(gy.iter())
            .zip(self.levels)
            .enumerate()
            .map(|(i, ((gx, gy), tensor))| {
                let label = format!("StructureTensor Level {i}");
                let handle = graph.enqueue(
                    label.as_str(),
                    StructureTensor::new(
                        program.window_radius(),
                        gx.image().clone(),
                        gy.image().clone(),
                        tensor.clone(),
                    ),
                    NdRange::new(tensor.size()).with_local(local),
                    &[gx.handle(), gy.handle()],
                );
                recorder.track(label, &handle);
                PyramidLevel::new(tensor, handle)
            })
            .collect();

        Ok(Pyramid::new(levels, Vec::new()))
    }
}
