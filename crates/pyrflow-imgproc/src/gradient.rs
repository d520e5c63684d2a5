use std::sync::Arc;

use pyrflow_device::{DeviceImage, ExecutionGraph, NdRange, ProfileRecorder, ResidencyConfig};
use pyrflow_image::ImageSize;

use crate::error::FlowError;
use crate::kernels::{Axis, SeparablePass};
use crate::program::Program;
use crate::pyramid::{
    allocate_levels, validate_levels, GradientPyramid, ImagePyramid, Pyramid, PyramidLevel,
};

/// Builds the directional derivative pyramid of a base pyramid along one axis.
///
/// Each level is a horizontal pass into an intermediate image followed by a
/// vertical pass. The x instance differentiates horizontally and smooths
/// vertically, the y instance swaps the two 1D kernels. A level only waits
/// on its base image, so levels run in parallel with each other.
pub struct GradientPyramidBuilder {
    axis: Axis,
    horizontal: Vec<Arc<DeviceImage<i16, 1>>>,
    vertical: Vec<Arc<DeviceImage<i16, 1>>>,
}

impl GradientPyramidBuilder {
    /// Allocate the images of the gradient pyramid along `axis`.
    pub fn allocate(
        axis: Axis,
        size: ImageSize,
        levels: usize,
        residency: &ResidencyConfig,
    ) -> Result<Self, FlowError> {
        validate_levels(size, levels)?;
        let name = format!("Gradient{axis}");
        Ok(Self {
            axis,
            horizontal: allocate_levels(&format!("{name} h"), size, levels, |_| {
                residency.intermediate
            })?,
            vertical: allocate_levels(&name, size, levels, |_| residency.intermediate)?,
        })
    }

    /// Axis of the derivative.
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Dispatch both passes of every level of `base`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InvalidLevelCount`] if `base` does not have the
    /// allocated number of levels.
    pub fn build(
        self,
        graph: &ExecutionGraph,
        program: &Program,
        base: &ImagePyramid,
        local: Option<[usize; 2]>,
        recorder: &mut ProfileRecorder,
    ) -> Result<GradientPyramid, FlowError> {
        if base.num_levels() != self.vertical.len() {
            return Err(FlowError::InvalidLevelCount {
                levels: self.vertical.len(),
                size: base.level(0).map_or([0, 0].into(), |l| l.size()),
            });
        }

        let (first_taps, second_taps) = match self.axis {
            Axis::X => (program.derivative(), program.smoothing()),
            Axis::Y => (program.smoothing(), program.derivative()),
        };

        let mut levels = Vec::with_capacity(self.vertical.len());
        let mut intermediates = Vec::with_capacity(self.horizontal.len());

        for (i, ((source, horizontal), vertical)) in base
            .iter()
            .zip(self.horizontal)
            .zip(self.vertical)
            .enumerate()
        {
            let range = NdRange::new(source.size()).with_local(local);

            let label = format!("Gradient{} Pass H Level {i}", self.axis);
            let handle = graph.enqueue(
                label.as_str(),
                SeparablePass::new(
                    Axis::X,
                    first_taps,
                    source.image().clone(),
                    horizontal.clone(),
                ),
                range,
                &[source.handle()],
            );
            recorder.track(label, &handle);
            let horizontal = PyramidLevel::new(horizontal, handle);

            let label = format!("Gradient{} Pass V Level {i}", self.axis);
            let handle = graph.enqueue(
                label.as_str(),
                SeparablePass::new(
                    Axis::Y,
                    second_taps,
                    horizontal.image().clone(),
                    vertical.clone(),
                ),
                range,
                &[horizontal.handle()],
            );
            recorder.track(label, &handle);

            intermediates.push(horizontal);
            levels.push(PyramidLevel::new(vertical, handle));
        }

        log::debug!("dispatched gradient {} pyramid", self.axis);
        Ok(Pyramid::new(levels, intermediates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramSource;
    use crate::pyramid::PyramidBuilder;
    use pyrflow_device::DeviceConfig;
    use pyrflow_image::Image;

    #[test]
    fn test_gradient_of_ramp() -> Result<(), Box<dyn std::error::Error>> {
        let graph = ExecutionGraph::new(DeviceConfig::default())?;
        let program = Program::build(ProgramSource::default())?;
        let residency = ResidencyConfig::default();
        let frame = Image::<u8, 1>::from_fn([16, 8].into(), |x, y| [(3 * x + y) as u8]);

        let mut recorder = ProfileRecorder::new();
        let base = PyramidBuilder::allocate("Image 1", frame.size(), 2, &residency)?
            .build(&graph, &program, &frame, None, &mut recorder);
        let gx = GradientPyramidBuilder::allocate(Axis::X, frame.size(), 2, &residency)?
            .build(&graph, &program, &base, None, &mut recorder)?;
        let gy = GradientPyramidBuilder::allocate(Axis::Y, frame.size(), 2, &residency)?
            .build(&graph, &program, &base, None, &mut recorder)?;
        graph.drain()?;

        // interior response of a ramp: slope * 2 * 4
        let gx0 = gx.levels()[0].read_back(&graph)?;
        let gy0 = gy.levels()[0].read_back(&graph)?;
        assert_eq!(gx0.get_pixel(5, 4)?, [24]);
        assert_eq!(gy0.get_pixel(5, 4)?, [8]);
        // replicated border halves the central difference
        assert_eq!(gx0.get_pixel(0, 4)?, [12]);

        // every level waits on its base level only
        for (level, source) in gx.intermediates().iter().zip(base.iter()) {
            assert_eq!(level.handle().wait_list(), &[source.handle().id()]);
        }
        assert_eq!(gy.num_levels(), 2);
        assert_eq!(recorder.len(), 3 + 4 + 4);
        Ok(())
    }

    #[test]
    fn test_level_count_mismatch() -> Result<(), Box<dyn std::error::Error>> {
        let graph = ExecutionGraph::new(DeviceConfig::default())?;
        let program = Program::build(ProgramSource::default())?;
        let residency = ResidencyConfig::default();
        let frame = Image::<u8, 1>::from_size_val([8, 8].into(), 0)?;

        let mut recorder = ProfileRecorder::new();
        let base = PyramidBuilder::allocate("Image 1", frame.size(), 3, &residency)?
            .build(&graph, &program, &frame, None, &mut recorder);
        let res = GradientPyramidBuilder::allocate(Axis::X, frame.size(), 2, &residency)?
            .build(&graph, &program, &base, None, &mut recorder);
        assert!(matches!(res, Err(FlowError::InvalidLevelCount { levels: 2, .. })));
        graph.drain()?;
        Ok(())
    }
}
