//! Error types for MVP kernel operations.

use thiserror::Error;

/// Result type alias for MVP kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors that can occur while planning, building, or executing a
/// kernel.
///
/// `InvalidParameter` and `InvalidRange` returned from a validate-only
/// plan are expected control flow: the strategy selector uses them to
/// fall back between generators, and the `is_supported` probes flatten
/// them into `false`.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Malformed or unsupported call parameters: bad shape, misaligned
    /// buffer, nonzero weight offset, value outside the representable
    /// range.
    #[error("Invalid parameter: {reason}")]
    InvalidParameter {
        /// Reason for rejection.
        reason: String,
    },

    /// A hardware resource constraint was violated while mapping the
    /// kernel: too many active dimensions, dimension count or stride
    /// over the limit, impossible factorization.
    #[error("Out of hardware range: {reason}")]
    InvalidRange {
        /// Constraint that failed.
        reason: String,
    },

    /// Every candidate generator was exhausted for this kernel.
    #[error("No generator supports this {kernel} configuration")]
    Unsupported {
        /// Kernel name.
        kernel: &'static str,
    },

    /// The execution backend rejected or failed a submitted program.
    #[error("Execution fault: {reason}")]
    Fault {
        /// Reason for failure.
        reason: String,
    },
}

impl KernelError {
    /// Create an invalid parameter error.
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::InvalidParameter { reason: reason.into() }
    }

    /// Create an invalid range error.
    pub fn invalid_range(reason: impl Into<String>) -> Self {
        Self::InvalidRange { reason: reason.into() }
    }

    /// Create an execution fault error.
    pub fn fault(reason: impl Into<String>) -> Self {
        Self::Fault { reason: reason.into() }
    }
}
