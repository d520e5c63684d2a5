use std::sync::Arc;

use pyrflow_device::{
    CompletionHandle, DeviceImage, ExecutionGraph, NdRange, ProfileRecorder, ResidencyConfig,
};
use pyrflow_image::ImageSize;

use crate::error::FlowError;
use crate::kernels::{FlowGuess, FlowSolve};
use crate::program::Program;
use crate::pyramid::{
    allocate_levels, validate_levels, FlowPyramid, GradientPyramid, ImagePyramid, Pyramid,
    PyramidLevel, TensorPyramid,
};

/// How a flow level is initialised.
pub enum FlowLevel<'a> {
    /// The coarsest level: the initial guess is the zero field.
    Initial,
    /// The initial guess is the flow of the next coarser level, scaled to this level.
    Refinement(&'a PyramidLevel<f32, 2>),
}

impl FlowLevel<'_> {
    /// The handle the level has to wait for besides its tensor, if any.
    pub fn dependency(&self) -> Option<&CompletionHandle> {
        match self {
            FlowLevel::Initial => None,
            FlowLevel::Refinement(coarser) => Some(coarser.handle()),
        }
    }

    fn guess(&self) -> FlowGuess {
        match self {
            FlowLevel::Initial => FlowGuess::Zero,
            FlowLevel::Refinement(coarser) => FlowGuess::Upsampled(coarser.image().clone()),
        }
    }
}

/// The pyramids the flow estimator reads.
pub struct FlowInputs<'a> {
    /// Pyramid of the first frame.
    pub first: &'a ImagePyramid,
    /// Pyramid of the second frame.
    pub second: &'a ImagePyramid,
    /// Horizontal derivatives of the first frame.
    pub gradient_x: &'a GradientPyramid,
    /// Vertical derivatives of the first frame.
    pub gradient_y: &'a GradientPyramid,
    /// Structure tensors of the first frame.
    pub tensor: &'a TensorPyramid,
}

impl FlowInputs<'_> {
    fn num_levels(&self) -> Option<usize> {
        let levels = self.first.num_levels();
        let counts = [
            self.second.num_levels(),
            self.gradient_x.num_levels(),
            self.gradient_y.num_levels(),
            self.tensor.num_levels(),
        ];
        counts.iter().all(|&n| n == levels).then_some(levels)
    }
}

/// Coarse-to-fine flow refinement.
///
/// Levels are dispatched from the coarsest to the finest. Level `i` waits on
/// `first[i]`, `second[i]` and `tensor[i]` and, below the coarsest level, on
/// `flow[i + 1]`. The host never blocks between levels.
pub struct FlowEstimator {
    levels: Vec<Arc<DeviceImage<f32, 2>>>,
}

impl FlowEstimator {
    /// Allocate the flow pyramid.
    pub fn allocate(
        size: ImageSize,
        levels: usize,
        residency: &ResidencyConfig,
    ) -> Result<Self, FlowError> {
        validate_levels(size, levels)?;
        Ok(Self {
            levels: allocate_levels("Flow", size, levels, |_| residency.output)?,
        })
    }

    /// Dispatch one flow solve per level.
    ///
    /// The operation of each level is exactly one direct solve of the 2x2
    /// system at every pixel.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InvalidLevelCount`] if an input pyramid does not
    /// have the allocated number of levels.
    pub fn build(
        self,
        graph: &ExecutionGraph,
        program: &Program,
        inputs: FlowInputs<'_>,
        local: Option<[usize; 2]>,
        recorder: &mut ProfileRecorder,
    ) -> Result<FlowPyramid, FlowError> {
        let num_levels = self.levels.len();
        if inputs.num_levels() != Some(num_levels) {
            return Err(FlowError::InvalidLevelCount {
                levels: num_levels,
                size: self.levels[0].size(),
            });
        }

        let mut coarse_to_fine: Vec<PyramidLevel<f32, 2>> = Vec::with_capacity(num_levels);

        for (i, flow) in self.levels.into_iter().enumerate().rev() {
            let level = match coarse_to_fine.last() {
                None => FlowLevel::Initial,
                Some(coarser) => FlowLevel::Refinement(coarser),
            };

            let first = &inputs.first.levels()[i];
            let second = &inputs.second.levels()[i];
            let tensor = &inputs.tensor.levels()[i];
            let mut wait_list = vec![first.handle(), second.handle(), tensor.handle()];
            wait_list.extend(level.dependency());

            let kernel = FlowSolve::new(
                program.window_radius(),
                program.derivative_gain(),
                first.image().clone(),
                second.image().clone(),
                inputs.gradient_x.levels()[i].image().clone(),
                inputs.gradient_y.levels()[i].image().clone(),
                tensor.image().clone(),
                level.guess(),
                flow.clone(),
            );

            let label = format!("Flow Level {i}");
            let handle = graph.enqueue(
                label.as_str(),
                kernel,
                NdRange::new(flow.size()).with_local(local),
                &wait_list,
            );
            recorder.track(label, &handle);
            coarse_to_fine.push(PyramidLevel::new(flow, handle));
        }

        coarse_to_fine.reverse();
        Ok(Pyramid::new(coarse_to_fine, Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::GradientPyramidBuilder;
    use crate::kernels::Axis;
    use crate::program::ProgramSource;
    use crate::pyramid::PyramidBuilder;
    use crate::structure_tensor::StructureTensorBuilder;
    use pyrflow_device::DeviceConfig;
    use pyrflow_image::Image;

    #[test]
    fn test_coarse_to_fine_wiring() -> Result<(), Box<dyn std::error::Error>> {
        let graph = ExecutionGraph::new(DeviceConfig::default())?;
        let program = Program::build(ProgramSource::default())?;
        let residency = ResidencyConfig::default();
        let frame = Image::<u8, 1>::from_fn([24, 20].into(), |x, y| [((x * y) % 251) as u8]);
        let (size, levels) = (frame.size(), 3);

        let mut recorder = ProfileRecorder::new();
        let first = PyramidBuilder::allocate("Image 1", size, levels, &residency)?
            .build(&graph, &program, &frame, None, &mut recorder);
        let second = PyramidBuilder::allocate("Image 2", size, levels, &residency)?
            .build(&graph, &program, &frame, None, &mut recorder);
        let gradient_x = GradientPyramidBuilder::allocate(Axis::X, size, levels, &residency)?
            .build(&graph, &program, &first, None, &mut recorder)?;
        let gradient_y = GradientPyramidBuilder::allocate(Axis::Y, size, levels, &residency)?
            .build(&graph, &program, &first, None, &mut recorder)?;
        let tensor = StructureTensorBuilder::allocate(size, levels, &residency)?
            .build(&graph, &program, &gradient_x, &gradient_y, None, &mut recorder)?;
        let flow = FlowEstimator::allocate(size, levels, &residency)?.build(
            &graph,
            &program,
            FlowInputs {
                first: &first,
                second: &second,
                gradient_x: &gradient_x,
                gradient_y: &gradient_y,
                tensor: &tensor,
            },
            None,
            &mut recorder,
        )?;
        graph.drain()?;

        assert_eq!(flow.num_levels(), levels);
        assert_eq!(
            flow.levels()[2].handle().wait_list(),
            &[
                first.levels()[2].handle().id(),
                second.levels()[2].handle().id(),
                tensor.levels()[2].handle().id()
            ]
        );
        for i in 0..levels - 1 {
            assert_eq!(
                flow.levels()[i].handle().wait_list(),
                &[
                    first.levels()[i].handle().id(),
                    second.levels()[i].handle().id(),
                    tensor.levels()[i].handle().id(),
                    flow.levels()[i + 1].handle().id()
                ]
            );
        }

        // identical frames: no motion anywhere
        for level in flow.iter() {
            let host = level.read_back(&graph)?;
            assert!(host.as_slice().iter().all(|v| v.abs() < 1e-6));
        }

        // the coarsest level is labelled and dispatched first
        let labels = recorder.records()?;
        let flow_labels = labels
            .iter()
            .filter(|r| r.name.starts_with("Flow"))
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(flow_labels, vec!["Flow Level 2", "Flow Level 1", "Flow Level 0"]);
        Ok(())
    }

    #[test]
    fn test_flow_level_dependency() {
        assert!(FlowLevel::Initial.dependency().is_none());
    }
}
