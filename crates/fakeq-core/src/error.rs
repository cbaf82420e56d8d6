use crate::shape::Shape;

/// All errors that can occur within fakeq.
///
/// The element kernels themselves never fail; these variants come from the
/// layers around them: shape and layout handling, dtype dispatch, per-channel
/// orchestration, opt-in parameter validation and configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shape mismatch between two tensors (e.g. an input that does not
    /// broadcast to the output it is written into).
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// DType mismatch between tensors taking part in one kernel call.
    #[error("dtype mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch {
        expected: crate::DType,
        got: crate::DType,
    },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Narrow/slice operation out of bounds.
    #[error("narrow out of bounds: dim {dim}, start {start}, len {len}, dim_size {dim_size}")]
    NarrowOutOfBounds {
        dim: usize,
        start: usize,
        len: usize,
        dim_size: usize,
    },

    /// Element count mismatch when creating from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Per-channel parameters do not match the size of the channel axis.
    #[error("channel count mismatch on axis {axis}: tensor has {expected} channels, got {got} {what}")]
    ChannelCountMismatch {
        axis: usize,
        expected: usize,
        got: usize,
        what: &'static str,
    },

    /// Scale is not a finite positive number.
    #[error("invalid scale {scale}: must be finite and > 0")]
    InvalidScale { scale: f32 },

    /// Empty integer range.
    #[error("invalid quantization range: quant_min {quant_min} > quant_max {quant_max}")]
    InvalidQuantRange { quant_min: i64, quant_max: i64 },

    /// Malformed configuration (bad JSON, unknown rounding name, ...).
    #[error("config error: {0}")]
    Config(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout fakeq.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fails() -> Result<()> {
        bail!("bad selector {}", 7)
    }

    #[test]
    fn test_bail_formats_message() {
        let err = fails().unwrap_err();
        assert_eq!(err.to_string(), "bad selector 7");
    }

    #[test]
    fn test_display_shape_mismatch() {
        let err = Error::ShapeMismatch {
            expected: Shape::from((2, 3)),
            got: Shape::from(4),
        };
        assert_eq!(err.to_string(), "shape mismatch: expected [2, 3], got [4]");
    }
}
