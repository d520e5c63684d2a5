//! Dense optical flow between two grayscale frames.
//!
//! The frames are turned into image pyramids, gradient pyramids and a
//! structure tensor pyramid, and the flow is refined from the coarsest to
//! the finest level. Every step is an asynchronous operation on a
//! [`device::ExecutionGraph`], ordered only by explicit wait-lists.
//!
//! ```
//! use pyrflow::image::Image;
//! use pyrflow::imgproc::{OpticalFlowPipeline, PipelineConfig, Program, ProgramSource};
//!
//! let config = PipelineConfig::default();
//! let pipeline = OpticalFlowPipeline::new(
//!     config.create_graph().unwrap(),
//!     Program::build(ProgramSource::default()).unwrap(),
//!     config,
//! );
//!
//! let frame = Image::<u8, 1>::from_size_val([64, 48].into(), 128).unwrap();
//! let output = pipeline.run(&frame, &frame).unwrap();
//! let flow = output.read_flow(pipeline.graph()).unwrap();
//! assert_eq!(flow.num_channels(), 2);
//! ```

#[doc(inline)]
pub use pyrflow_device as device;

#[doc(inline)]
pub use pyrflow_image as image;

#[doc(inline)]
pub use pyrflow_imgproc as imgproc;
