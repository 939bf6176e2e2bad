//! Error types for the delta crate.

use thiserror::Error;

/// Result type for delta operations.
pub type DeltaResult<T> = Result<T, DeltaError>;

/// Errors that can occur while encoding, decoding or applying deltas.
///
/// Every variant is fatal for the file being reconstructed. Incomplete
/// input is not an error: the decoder reports it through
/// [`crate::Progress::NeedMore`] instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeltaError {
    /// The stream does not start with the delta magic bytes.
    #[error("malformed delta header")]
    CorruptHeader,

    /// A window violates the format or its own invariants.
    #[error("corrupt delta window: {message}")]
    CorruptWindow {
        /// Description of the violation.
        message: String,
    },

    /// A variable-length integer does not fit in 64 bits.
    #[error("delta integer overflows 64 bits")]
    IntegerOverflow,

    /// The instruction section ended in the middle of an instruction.
    ///
    /// The section length is announced up front, so a truncated
    /// instruction is corruption, never short input.
    #[error("delta instruction bytes truncated")]
    TruncatedInstructions,

    /// A copy instruction reaches outside the supplied source view.
    #[error("source view out of bounds: need {need} bytes, have {have}")]
    SourceOutOfBounds {
        /// Bytes the instruction requires.
        need: u64,
        /// Bytes actually available.
        have: u64,
    },
}

impl DeltaError {
    /// Creates a corrupt window error.
    pub fn corrupt_window(message: impl Into<String>) -> Self {
        Self::CorruptWindow {
            message: message.into(),
        }
    }
}
