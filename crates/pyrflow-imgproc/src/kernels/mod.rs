//! Device kernels of the optical flow program.
//!
//! Each kernel binds its input and output images and its coefficients, and
//! is dispatched through [`pyrflow_device::ExecutionGraph::enqueue`].

mod derivative;
mod downfilter;
mod flow;
mod tensor;

pub use derivative::SeparablePass;
pub use downfilter::DownFilter;
pub use flow::{FlowGuess, FlowSolve};
pub use tensor::StructureTensor;

/// Image axis a 1D pass runs along.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Along rows.
    X,
    /// Along columns.
    Y,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}
