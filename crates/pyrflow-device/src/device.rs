use serde::{Deserialize, Serialize};

/// Controls how a kernel walks the rows of its iteration domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    /// Use the device thread pool to process rows (or row batches) in parallel.
    #[default]
    ParallelRows,

    /// Run every kernel sequentially on the worker that picked it up.
    ///
    /// Useful for small images and debugging. Independent operations still
    /// run concurrently with each other.
    Serial,
}

impl ExecutionStrategy {
    /// Whether rows are processed in parallel.
    pub fn is_parallel(&self) -> bool {
        matches!(self, ExecutionStrategy::ParallelRows)
    }
}

/// Where the storage of a device image lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Residency {
    /// The host may map the image directly once it is written.
    HostVisible,
    /// Only device operations may touch the image; the host needs an explicit read-back.
    #[default]
    DeviceOnly,
}

impl std::fmt::Display for Residency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Residency::HostVisible => write!(f, "host-visible"),
            Residency::DeviceOnly => write!(f, "device-only"),
        }
    }
}

/// Residency of the three image classes of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidencyConfig {
    /// Images uploaded from the host (pyramid level 0).
    pub input: Residency,
    /// Images consumed only by other device operations.
    pub intermediate: Residency,
    /// Images handed to the export step (the flow pyramid).
    pub output: Residency,
}

impl ResidencyConfig {
    /// Every image is host visible.
    pub fn all_host_visible() -> Self {
        Self {
            input: Residency::HostVisible,
            intermediate: Residency::HostVisible,
            output: Residency::HostVisible,
        }
    }
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            input: Residency::HostVisible,
            intermediate: Residency::DeviceOnly,
            output: Residency::HostVisible,
        }
    }
}

/// Configuration of the compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Number of worker threads, `0` selects one per logical core.
    pub num_threads: usize,
    /// How kernels walk their iteration domain.
    pub strategy: ExecutionStrategy,
}
