//! SESWrapper error handling
//!
//! Every `WRP_*` entry point returns an `int` status where `0` means success.
//! [`SesError::check`] turns that convention into a `Result`.

use std::ffi::NulError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the SES bindings
#[derive(Error, Debug)]
pub enum SesError {
    /// Non-zero status returned by a vendor entry point
    #[error("SES error code {code} in {function}")]
    Call { function: &'static str, code: i32 },

    /// The shared library could not be opened
    #[error("Failed to load SES library {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// The shared library does not export a required entry point
    #[error("SES library {path} is missing symbol {symbol}: {source}")]
    MissingSymbol {
        path: PathBuf,
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    /// A string argument cannot be passed as a C string
    #[error("String argument contains null byte: {0}")]
    InvalidString(#[from] NulError),

    /// A string returned by the library is not valid UTF-8
    #[error("{function} returned a non UTF-8 string")]
    InvalidUtf8 { function: &'static str },

    /// The library reported a size that cannot be used as a buffer length
    #[error("{function} reported invalid size {size}")]
    InvalidSize { function: &'static str, size: i32 },

    /// Region parameters rejected before reaching the library
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// Request that cannot be honored in the current state
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SesError {
    /// Check a vendor status code and convert to Result
    pub fn check(function: &'static str, code: i32) -> SesResult<()> {
        if code == codes::SUCCESS {
            Ok(())
        } else {
            Err(Self::Call { function, code })
        }
    }

    /// Vendor status code, if this error came from the library
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Call { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Create an invalid region error
    pub fn invalid_region(msg: impl Into<String>) -> Self {
        Self::InvalidRegion(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}

/// Result type alias using SesError
pub type SesResult<T> = Result<T, SesError>;

/// Status codes with a fixed meaning across wrapper versions
pub mod codes {
    pub const SUCCESS: i32 = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_success() {
        assert!(SesError::check("WRP_Initialize", codes::SUCCESS).is_ok());
    }

    #[test]
    fn test_check_error_keeps_function_and_code() {
        let err = SesError::check("WRP_StartAcquisition", 7).unwrap_err();
        assert_eq!(err.code(), Some(7));
        match err {
            SesError::Call { function, code } => {
                assert_eq!(function, "WRP_StartAcquisition");
                assert_eq!(code, 7);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_negative_codes_are_errors() {
        assert!(SesError::check("WRP_TestHW", -1).is_err());
    }

    #[test]
    fn test_error_display() {
        let err = SesError::Call {
            function: "WRP_LoadInstrument",
            code: 3,
        };
        let display = err.to_string();
        assert!(display.contains("SES error code 3"));
        assert!(display.contains("WRP_LoadInstrument"));
    }

    #[test]
    fn test_nul_error_from() {
        let nul = std::ffi::CString::new("pass\0energy").unwrap_err();
        let err: SesError = nul.into();
        assert!(err.to_string().contains("null byte"));
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_invalid_region_error() {
        let err = SesError::invalid_region("low energy above high energy");
        assert!(err.to_string().contains("Invalid region"));
        assert!(err.to_string().contains("low energy above high energy"));
    }
}
