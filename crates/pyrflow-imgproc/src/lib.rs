#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for the optical flow stages.
pub mod error;

/// coarse-to-fine flow estimation.
pub mod flow;

/// directional derivative pyramids.
pub mod gradient;

/// device kernels of the optical flow program.
pub mod kernels;

/// end-to-end optical flow pipeline.
pub mod pipeline;

/// device program coefficients and their validation.
pub mod program;

/// pyramid containers and the image pyramid builder.
pub mod pyramid;

/// structure tensor pyramids.
pub mod structure_tensor;

pub use crate::error::FlowError;
pub use crate::pipeline::{FlowOutput, OpticalFlowPipeline, PipelineConfig};
pub use crate::program::{Program, ProgramSource};
