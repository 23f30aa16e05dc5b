//! Error handling for the GPU pipeline

use thiserror::Error;

/// Failures raised while creating or driving GPU resources
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("device request failed: {message}")]
    RequestDevice { message: String },

    #[error(
        "cannot allocate '{label}': {requested} bytes exceeds the device limit of {limit} bytes"
    )]
    ResourceAllocation {
        label: String,
        requested: u64,
        limit: u64,
    },

    #[error("device ran out of memory allocating '{label}': {message}")]
    OutOfMemory { label: String, message: String },

    #[error(
        "dispatch of {count} items needs {rows} workgroup rows, above the device limit of {limit}"
    )]
    DispatchTooLarge { count: u32, rows: u32, limit: u32 },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("buffer readback failed: {message}")]
    Readback { message: String },
}

impl GpuError {
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn readback<S: Into<String>>(message: S) -> Self {
        Self::Readback {
            message: message.into(),
        }
    }

    /// Allocation failures are fatal for the frame but may succeed after the
    /// host adjusts its configuration.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            Self::ResourceAllocation { .. } | Self::OutOfMemory { .. }
        )
    }
}

/// Result type for GPU operations
pub type GpuResult<T> = Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = GpuError::invalid_config("width must be non-zero");
        assert!(matches!(err, GpuError::InvalidConfig { .. }));
        assert_eq!(
            err.to_string(),
            "invalid configuration: width must be non-zero"
        );
    }

    #[test]
    fn test_allocation_classification() {
        let err = GpuError::ResourceAllocation {
            label: "index buffer".into(),
            requested: 1 << 40,
            limit: 1 << 28,
        };
        assert!(err.is_allocation_failure());
        assert!(err.to_string().contains("index buffer"));
        assert!(!GpuError::NoAdapter.is_allocation_failure());
    }
}
