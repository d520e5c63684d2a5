use pyrflow_image::{ImageError, ImageSize};

/// An error type for the device module.
///
/// Errors raised while an operation executes are never returned from the
/// dispatch call; they surface at the next host synchronization point
/// ([`crate::CompletionHandle::wait`] or [`crate::ExecutionGraph::drain`]).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// A dispatched operation reported an error while executing.
    #[error("operation '{label}' failed: {source}")]
    OperationFailed {
        /// Label of the failed operation.
        label: String,
        /// The error reported by the kernel.
        #[source]
        source: Box<DeviceError>,
    },

    /// An operation was skipped because an operation in its wait-list failed.
    #[error("operation '{label}' was not executed: dependency '{dependency}' failed")]
    DependencyFailed {
        /// Label of the skipped operation.
        label: String,
        /// Label of the failed dependency.
        dependency: String,
    },

    /// A kernel could not complete its work.
    #[error("kernel '{kernel}' failed: {reason}")]
    KernelFailed {
        /// Name of the kernel.
        kernel: String,
        /// Backend diagnostic.
        reason: String,
    },

    /// An image was read before its producing operation published it.
    #[error("image '{0}' was read before its producer wrote it")]
    UnwrittenRead(String),

    /// An image was written a second time.
    #[error("image '{0}' was already written")]
    AlreadyWritten(String),

    /// The host tried to map an image allocated as device-only.
    #[error("image '{0}' is not host visible")]
    NotHostVisible(String),

    /// Image storage could not be allocated.
    #[error("failed to allocate {bytes} bytes for image '{name}'")]
    ResourceExhausted {
        /// Name of the image.
        name: String,
        /// Requested number of bytes.
        bytes: usize,
    },

    /// A bound image does not have the size the kernel expects.
    #[error("image '{name}' has size {actual}, expected {expected}")]
    InvalidImageSize {
        /// Name of the image.
        name: String,
        /// The size the kernel expects.
        expected: ImageSize,
        /// The size of the bound image.
        actual: ImageSize,
    },

    /// The iteration domain of a dispatch is not valid.
    #[error("invalid iteration domain: {0}")]
    InvalidRange(String),

    /// Profiling timestamps were queried before the operation retired.
    #[error("profiling information of '{0}' is not available before the operation retires")]
    ProfilingUnavailable(String),

    /// The worker thread pool failed to build.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),

    /// Error from the host image types.
    #[error(transparent)]
    Image(#[from] ImageError),
}

impl DeviceError {
    /// The innermost error, unwrapping [`DeviceError::OperationFailed`] layers.
    pub fn root_cause(&self) -> &DeviceError {
        match self {
            DeviceError::OperationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause() {
        let err = DeviceError::OperationFailed {
            label: "Flow Level 0".to_string(),
            source: Box::new(DeviceError::UnwrittenRead("tensor level 0".to_string())),
        };
        assert_eq!(
            err.root_cause(),
            &DeviceError::UnwrittenRead("tensor level 0".to_string())
        );
        assert_eq!(
            err.to_string(),
            "operation 'Flow Level 0' failed: image 'tensor level 0' was read before its producer wrote it"
        );
    }
}
