use pyrflow_device::DeviceError;
use pyrflow_image::{ImageError, ImageSize};

/// An error type for the optical flow pipeline.
///
/// Every variant is fatal for the frame pair being processed.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// The two input frames do not have the same size.
    #[error("input frames differ in size: {first} vs {second}")]
    DimensionMismatch {
        /// Size of the first frame.
        first: ImageSize,
        /// Size of the second frame.
        second: ImageSize,
    },

    /// The compute device reported a launch or execution error.
    #[error("device operation failed: {0}")]
    DeviceOperationFailure(#[source] DeviceError),

    /// An image could not be allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhaustion(#[source] DeviceError),

    /// The device program failed to build. Carries the raw build log.
    #[error("device program failed to build:\n{0}")]
    ConfigurationError(String),

    /// The requested number of pyramid levels does not fit the frame size.
    #[error("cannot build {levels} pyramid levels from a frame of {size}")]
    InvalidLevelCount {
        /// Requested number of levels.
        levels: usize,
        /// Size of the finest level.
        size: ImageSize,
    },

    /// Error from the host image types.
    #[error(transparent)]
    Image(#[from] ImageError),
}

impl From<DeviceError> for FlowError {
    fn from(err: DeviceError) -> Self {
        match err.root_cause() {
            DeviceError::ResourceExhausted { .. } => FlowError::ResourceExhaustion(err),
            DeviceError::Image(image_err) => FlowError::Image(image_err.clone()),
            _ => FlowError::DeviceOperationFailure(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_device_error() {
        let alloc = DeviceError::ResourceExhausted {
            name: "flow level 0".to_string(),
            bytes: 8,
        };
        assert!(matches!(
            FlowError::from(alloc),
            FlowError::ResourceExhaustion(_)
        ));

        let failed = DeviceError::OperationFailed {
            label: "Flow Level 0".to_string(),
            source: Box::new(DeviceError::UnwrittenRead("tensor level 0".to_string())),
        };
        let err = FlowError::from(failed.clone());
        assert_eq!(err, FlowError::DeviceOperationFailure(failed));
        assert!(err.to_string().starts_with("device operation failed"));
    }
}
