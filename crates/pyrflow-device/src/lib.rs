#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// device configuration and memory residency.
pub mod device;

/// Error types for the device module.
pub mod error;

/// completion handles and their profiling timestamps.
pub mod event;

/// the execution graph accepting asynchronous dispatches.
pub mod graph;

/// single-writer images living on the device.
pub mod image;

/// module containing parallization utilities.
pub mod parallel;

/// per-operation latency recording.
pub mod profile;

/// host <-> device transfer operations.
pub mod transfer;

pub use crate::device::{DeviceConfig, ExecutionStrategy, Residency, ResidencyConfig};
pub use crate::error::DeviceError;
pub use crate::event::{CompletionHandle, HandleId, HandleStatus, ProfilingInfo};
pub use crate::graph::{DelayInjector, ExecutionGraph, Kernel, NdRange};
pub use crate::image::DeviceImage;
pub use crate::profile::{write_profile_table, ProfileRecord, ProfileRecorder, ScopedTimer};
pub use crate::transfer::{enqueue_write, read_back};
