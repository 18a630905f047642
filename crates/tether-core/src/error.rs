//! Error types for tether-core

use crate::variant::VariantType;
use thiserror::Error;

/// A variant's tag does not match the shape a conversion asked for
///
/// Always recoverable: the caller decides whether to fall back, report or
/// propagate.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot convert {got} to {expected}{}", element_suffix(.index))]
pub struct ConversionError {
    /// The tag the target type requires
    pub expected: VariantType,
    /// The tag that was actually found
    pub got: VariantType,
    /// Element position when the mismatch happened inside an array
    pub index: Option<usize>,
}

impl ConversionError {
    /// Create a mismatch between two tags
    pub fn new(expected: VariantType, got: VariantType) -> Self {
        Self {
            expected,
            got,
            index: None,
        }
    }

    /// Attach the array position at which the mismatch occurred
    pub fn at_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

fn element_suffix(index: &Option<usize>) -> String {
    index.map(|i| format!(" (array element {i})")).unwrap_or_default()
}

/// Core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("identifier received from native code is not valid UTF-8")]
    InvalidIdentifier,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_error_message() {
        let err = ConversionError::new(VariantType::Float, VariantType::String);
        assert_eq!(err.to_string(), "cannot convert String to float");

        let err = err.at_index(3);
        assert_eq!(err.to_string(), "cannot convert String to float (array element 3)");
    }

    #[test]
    fn test_conversion_error_wraps_into_core_error() {
        let err: Error = ConversionError::new(VariantType::Int, VariantType::Nil).into();
        assert_eq!(err.to_string(), "conversion error: cannot convert nil to int");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("cannot convert nil to int"));
    }
}
