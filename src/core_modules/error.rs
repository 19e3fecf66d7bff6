// THEORY:
// Every fallible path in the comparison core funnels into one error type. The
// pipeline is a pure, deterministic function, so there is nothing to retry and
// nothing to recover from locally: a failure is either a bad call (mismatched
// buffers, a parameter out of range) or the machine refusing to hand out memory
// for an intermediate plane. All three are fatal for the call and are reported
// before anything is written to the output.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("dimension mismatch: old is {old_width}x{old_height}, new is {new_width}x{new_height}")]
    DimensionMismatch {
        old_width: u32,
        old_height: u32,
        new_width: u32,
        new_height: u32,
    },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("failed to allocate {bytes} bytes for an intermediate buffer")]
    AllocationFailure { bytes: usize },
}

impl CoreError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        CoreError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
