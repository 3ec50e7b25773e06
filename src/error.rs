// error.rs — Error taxonomy for the equalizer node.
//
// Every error here is per-frame and non-escalating: the host logs it,
// drops the frame, and the node keeps serving the stream. Nothing in this
// crate's own logic is fatal after construction.

use thiserror::Error;

use crate::frame::Encoding;
use crate::gpu::device::GpuError;

/// Result type alias for equalizer operations.
pub type Result<T> = std::result::Result<T, EqualizeError>;

#[derive(Error, Debug)]
pub enum EqualizeError {
    /// The inbound frame's encoding is neither 3-channel 8-bit color nor
    /// 8-bit grayscale. The frame is dropped; nothing is published.
    #[error("unsupported encoding {encoding:?}: expected Mono8, Bgr8 or Rgb8")]
    UnsupportedEncoding { encoding: Encoding },

    /// The inbound frame's buffer does not match its declared geometry.
    #[error("malformed frame: expected {expected} bytes, got {got}")]
    MalformedFrame { expected: usize, got: usize },

    /// A conversion or equalization step failed. Recoverable per-frame.
    #[error("{operation} failed: {message}")]
    Processing {
        operation: &'static str,
        message: String,
    },

    /// A configuration value was rejected; the previous configuration
    /// snapshot stays in effect.
    #[error("invalid parameter {parameter}: {value}")]
    InvalidParameter {
        parameter: &'static str,
        value: String,
    },

    /// The GPU backend failed. Recoverable per-frame; the node keeps its
    /// CPU path.
    #[error("gpu backend: {0}")]
    Gpu(#[from] GpuError),
}

impl EqualizeError {
    /// Shorthand for a [`EqualizeError::Processing`] error.
    pub fn processing(operation: &'static str, message: impl Into<String>) -> Self {
        EqualizeError::Processing {
            operation,
            message: message.into(),
        }
    }

    /// The name of the operation that produced this error, for logging.
    pub fn operation(&self) -> &'static str {
        match self {
            EqualizeError::UnsupportedEncoding { .. } => "decode",
            EqualizeError::MalformedFrame { .. } => "decode",
            EqualizeError::Processing { operation, .. } => operation,
            EqualizeError::InvalidParameter { .. } => "reconfigure",
            EqualizeError::Gpu(_) => "gpu",
        }
    }
}
