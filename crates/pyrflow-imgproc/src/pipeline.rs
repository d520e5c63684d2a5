use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use pyrflow_device::{
    DeviceConfig, DeviceError, ExecutionGraph, ProfileRecord, ProfileRecorder, ResidencyConfig,
    ScopedTimer,
};
use pyrflow_image::{Image, ImageSize};

use crate::error::FlowError;
use crate::flow::{FlowEstimator, FlowInputs};
use crate::gradient::GradientPyramidBuilder;
use crate::kernels::Axis;
use crate::program::Program;
use crate::pyramid::{
    validate_levels, FlowPyramid, GradientPyramid, ImagePyramid, PyramidBuilder, TensorPyramid,
};
use crate::structure_tensor::StructureTensorBuilder;

/// Configuration of the optical flow pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of pyramid levels.
    pub levels: usize,
    /// Residency of the input, intermediate and output images.
    pub residency: ResidencyConfig,
    /// Configuration of the compute device.
    pub device: DeviceConfig,
    /// Optional fixed local batch shape of every dispatch.
    pub local_size: Option<[usize; 2]>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            levels: 3,
            residency: ResidencyConfig::default(),
            device: DeviceConfig::default(),
            local_size: None,
        }
    }
}

impl PipelineConfig {
    /// Create the execution graph described by the device configuration.
    pub fn create_graph(&self) -> Result<ExecutionGraph, DeviceError> {
        ExecutionGraph::new(self.device)
    }
}

/// Every pyramid of one run, with the profile of its operations.
///
/// The output owns all images of the run; dropping it releases them.
pub struct FlowOutput {
    first: ImagePyramid,
    second: ImagePyramid,
    gradient_x: GradientPyramid,
    gradient_y: GradientPyramid,
    tensor: TensorPyramid,
    flow: FlowPyramid,
    profile: Vec<ProfileRecord>,
    elapsed: Duration,
}

impl FlowOutput {
    /// Pyramid of the first frame.
    pub fn first_pyramid(&self) -> &ImagePyramid {
        &self.first
    }

    /// Pyramid of the second frame.
    pub fn second_pyramid(&self) -> &ImagePyramid {
        &self.second
    }

    /// Horizontal derivative pyramid of the first frame.
    pub fn gradient_x(&self) -> &GradientPyramid {
        &self.gradient_x
    }

    /// Vertical derivative pyramid of the first frame.
    pub fn gradient_y(&self) -> &GradientPyramid {
        &self.gradient_y
    }

    /// Structure tensor pyramid of the first frame.
    pub fn tensor(&self) -> &TensorPyramid {
        &self.tensor
    }

    /// Flow pyramid; level 0 is the final result.
    pub fn flow(&self) -> &FlowPyramid {
        &self.flow
    }

    /// One record per tracked operation, in dispatch order.
    pub fn profile(&self) -> &[ProfileRecord] {
        &self.profile
    }

    /// Device time between the first queued and the last finished operation, in nanoseconds.
    pub fn span(&self) -> u64 {
        self.profile
            .iter()
            .map(ProfileRecord::end_offset)
            .max()
            .unwrap_or(0)
    }

    /// Host wall-clock time of the run.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Read the finest flow level back to the host.
    pub fn read_flow(&self, graph: &ExecutionGraph) -> Result<Image<f32, 2>, FlowError> {
        let level = self.flow.level(0).ok_or(FlowError::InvalidLevelCount {
            levels: 0,
            size: ImageSize {
                width: 0,
                height: 0,
            },
        })?;
        Ok(level.read_back(graph)?)
    }

    /// Take ownership of the first frame's pyramid.
    pub fn into_first_pyramid(self) -> ImagePyramid {
        self.first
    }

    /// Take ownership of the second frame's pyramid.
    pub fn into_second_pyramid(self) -> ImagePyramid {
        self.second
    }

    /// Take ownership of the horizontal derivative pyramid.
    pub fn into_gradient_x(self) -> GradientPyramid {
        self.gradient_x
    }

    /// Take ownership of the vertical derivative pyramid.
    pub fn into_gradient_y(self) -> GradientPyramid {
        self.gradient_y
    }

    /// Take ownership of the structure tensor pyramid.
    pub fn into_tensor(self) -> TensorPyramid {
        self.tensor
    }

    /// Take ownership of the flow pyramid.
    pub fn into_flow(self) -> FlowPyramid {
        self.flow
    }

    /// Take ownership of the profile records.
    pub fn into_profile(self) -> Vec<ProfileRecord> {
        self.profile
    }
}

/// Dense pyramidal Lucas-Kanade optical flow between two frames.
///
/// # Example
///
/// ```
/// use pyrflow_image::Image;
/// use pyrflow_imgproc::pipeline::{OpticalFlowPipeline, PipelineConfig};
/// use pyrflow_imgproc::program::{Program, ProgramSource};
///
/// let config = PipelineConfig::default();
/// let graph = config.create_graph().unwrap();
/// let program = Program::build(ProgramSource::default()).unwrap();
/// let pipeline = OpticalFlowPipeline::new(graph, program, config);
///
/// let frame = Image::<u8, 1>::from_size_val([32, 32].into(), 100).unwrap();
/// let output = pipeline.run(&frame, &frame).unwrap();
///
/// assert_eq!(output.flow().num_levels(), 3);
/// ```
pub struct OpticalFlowPipeline {
    graph: ExecutionGraph,
    program: Program,
    config: PipelineConfig,
}

impl OpticalFlowPipeline {
    /// Create a pipeline dispatching on `graph`.
    pub fn new(graph: ExecutionGraph, program: Program, config: PipelineConfig) -> Self {
        Self {
            graph,
            program,
            config,
        }
    }

    /// The execution graph the pipeline dispatches on.
    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    /// The device program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Compute the flow from `first` to `second`.
    ///
    /// Blocks until every operation of the run retired.
    ///
    /// # Errors
    ///
    /// * [`FlowError::DimensionMismatch`] or [`FlowError::InvalidLevelCount`]
    ///   before any operation is dispatched.
    /// * [`FlowError::ResourceExhaustion`] if an image cannot be allocated,
    ///   also before any dispatch.
    /// * [`FlowError::DeviceOperationFailure`] for the first failed operation.
    pub fn run(
        &self,
        first: &Image<u8, 1>,
        second: &Image<u8, 1>,
    ) -> Result<FlowOutput, FlowError> {
        let _timer = ScopedTimer::new("Optical Flow");
        let start = Instant::now();

        if first.size() != second.size() {
            return Err(FlowError::DimensionMismatch {
                first: first.size(),
                second: second.size(),
            });
        }

        let size = first.size();
        let levels = self.config.levels;
        let residency = &self.config.residency;
        let local = self.config.local_size;
        validate_levels(size, levels)?;

        let (first_builder, second_builder, gx_builder, gy_builder, tensor_builder, flow_builder) = {
            let _timer = ScopedTimer::new("Allocate Images");
            (
                PyramidBuilder::allocate("Image 1", size, levels, residency)?,
                PyramidBuilder::allocate("Image 2", size, levels, residency)?,
                GradientPyramidBuilder::allocate(Axis::X, size, levels, residency)?,
                GradientPyramidBuilder::allocate(Axis::Y, size, levels, residency)?,
                StructureTensorBuilder::allocate(size, levels, residency)?,
                FlowEstimator::allocate(size, levels, residency)?,
            )
        };

        let graph = &self.graph;
        let program = &self.program;
        let mut recorder = ProfileRecorder::new();

        let first = first_builder.build(graph, program, first, local, &mut recorder);
        let second = second_builder.build(graph, program, second, local, &mut recorder);
        let gradient_x = gx_builder.build(graph, program, &first, local, &mut recorder)?;
        let gradient_y = gy_builder.build(graph, program, &first, local, &mut recorder)?;
        let tensor =
            tensor_builder.build(graph, program, &gradient_x, &gradient_y, local, &mut recorder)?;
        let flow = flow_builder.build(
            graph,
            program,
            FlowInputs {
                first: &first,
                second: &second,
                gradient_x: &gradient_x,
                gradient_y: &gradient_y,
                tensor: &tensor,
            },
            local,
            &mut recorder,
        )?;

        log::debug!("dispatched {} operations, draining", recorder.len());
        {
            let _timer = ScopedTimer::new("Drain");
            self.graph.drain()?;
        }

        let profile = recorder.records()?;
        let elapsed = start.elapsed();
        log::info!(
            "computed {levels}-level flow of {}x{} frames in {:.3} ms",
            size.width,
            size.height,
            elapsed.as_secs_f64() * 1e3
        );

        Ok(FlowOutput {
            first,
            second,
            gradient_x,
            gradient_y,
            tensor,
            flow,
            profile,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramSource;

    #[test]
    fn test_config_from_json() -> Result<(), Box<dyn std::error::Error>> {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"levels": 4, "local_size": [16, 8]}"#)?;
        assert_eq!(config.levels, 4);
        assert_eq!(config.local_size, Some([16, 8]));
        assert_eq!(config.residency, ResidencyConfig::default());

        let json = serde_json::to_string(&PipelineConfig::default())?;
        let back: PipelineConfig = serde_json::from_str(&json)?;
        assert_eq!(back, PipelineConfig::default());
        Ok(())
    }

    #[test]
    fn test_output_transfers_ownership() -> Result<(), Box<dyn std::error::Error>> {
        let config = PipelineConfig {
            levels: 2,
            ..Default::default()
        };
        let pipeline = OpticalFlowPipeline::new(
            config.create_graph()?,
            Program::build(ProgramSource::default())?,
            config,
        );
        let first = Image::<u8, 1>::from_fn([12, 10].into(), |x, _| [(x * 20) as u8]);
        let second = Image::<u8, 1>::from_size_val([12, 10].into(), 40)?;
        let run = || pipeline.run(&first, &second);

        let graph = pipeline.graph();
        assert_eq!(run()?.into_first_pyramid().level(0).map(|l| l.size()), Some(first.size()));
        assert_eq!(
            run()?.into_second_pyramid().levels()[1].read_back(graph)?.as_slice(),
            &[40u8; 6 * 5][..]
        );
        assert_eq!(run()?.into_gradient_x().intermediates().len(), 2);
        assert_eq!(run()?.into_gradient_y().num_levels(), 2);
        assert_eq!(run()?.into_tensor().levels()[1].size(), ImageSize::from([6, 5]));
        assert_eq!(run()?.into_flow().num_levels(), 2);
        assert_eq!(run()?.into_profile().len(), 2 * (1 + 2) + 2 * 4 + 2 + 2);
        Ok(())
    }

    #[test]
    fn test_invalid_level_count() -> Result<(), Box<dyn std::error::Error>> {
        let config = PipelineConfig {
            levels: 4,
            ..Default::default()
        };
        let pipeline = OpticalFlowPipeline::new(
            config.create_graph()?,
            Program::build(ProgramSource::default())?,
            config,
        );
        let frame = Image::<u8, 1>::from_size_val([7, 40].into(), 9)?;
        assert!(matches!(
            pipeline.run(&frame, &frame),
            Err(FlowError::InvalidLevelCount { levels: 4, .. })
        ));
        assert_eq!(pipeline.graph().num_enqueued(), 0);
        Ok(())
    }

    #[test]
    fn test_local_size_with_zero_fails_at_drain() -> Result<(), Box<dyn std::error::Error>> {
        let config = PipelineConfig {
            levels: 2,
            local_size: Some([0, 4]),
            ..Default::default()
        };
        let pipeline = OpticalFlowPipeline::new(
            config.create_graph()?,
            Program::build(ProgramSource::default())?,
            config,
        );
        let frame = Image::<u8, 1>::from_size_val([16, 16].into(), 9)?;
        let err = pipeline.run(&frame, &frame).err();
        match err {
            Some(FlowError::DeviceOperationFailure(err)) => {
                assert!(matches!(err.root_cause(), DeviceError::InvalidRange(_)))
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }
}
