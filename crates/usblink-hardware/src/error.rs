//! Error types for device discovery and communication.
//!
//! Callers are expected to branch on [`HardwareError::kind`] rather than on
//! raw platform codes: an [`ErrorKind::InvalidArgument`] is a caller bug, an
//! [`ErrorKind::DeviceUnavailable`] means the handle was never usable, and an
//! [`ErrorKind::Platform`] is a fatal malfunction to propagate. Timeouts are
//! not errors at all; they surface as `false` or an empty read.

use std::io;

use crate::manager::HandleState;

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Coarse classification of a [`HardwareError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller passed something unusable. Not retryable.
    InvalidArgument,

    /// The handle is invalid or already closed.
    DeviceUnavailable,

    /// The platform reported a failure.
    Platform,
}

/// Errors that can occur during hardware operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Caller supplied an invalid argument; no I/O was attempted.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// I/O requested on a manager whose handle is not open.
    #[error("Device handle is not open (state: {state})")]
    NotOpen { state: HandleState },

    /// Cancelling outstanding I/O before a write failed.
    #[error("Failed to cancel pending I/O: {source}")]
    Cancellation {
        #[source]
        source: io::Error,
    },

    /// The interface walk failed for a reason other than exhaustion.
    #[error("Device enumeration failed at interface {index}: {source}")]
    Enumeration {
        index: u32,
        #[source]
        source: io::Error,
    },

    /// A raw record returned by the platform could not be decoded.
    #[error("Malformed record at interface {index}: {source}")]
    Record {
        index: u32,
        #[source]
        source: usblink_core::Error,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Core data model error.
    #[error(transparent)]
    Core(#[from] usblink_core::Error),
}

impl HardwareError {
    /// Create a new invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a new not-open error.
    pub fn not_open(state: HandleState) -> Self {
        Self::NotOpen { state }
    }

    /// Create a new cancellation failure error.
    pub fn cancellation(source: io::Error) -> Self {
        Self::Cancellation { source }
    }

    /// Create a new enumeration failure error.
    pub fn enumeration(index: u32, source: io::Error) -> Self {
        Self::Enumeration { index, source }
    }

    /// Create a new record decoding error.
    pub fn record(index: u32, source: usblink_core::Error) -> Self {
        Self::Record { index, source }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::NotOpen { .. } => ErrorKind::DeviceUnavailable,
            Self::Core(usblink_core::Error::Config(_)) => ErrorKind::InvalidArgument,
            Self::Cancellation { .. }
            | Self::Enumeration { .. }
            | Self::Record { .. }
            | Self::Io(_)
            | Self::Core(_) => ErrorKind::Platform,
        }
    }

    /// Underlying platform error code, if one was reported.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Cancellation { source } | Self::Enumeration { source, .. } | Self::Io(source) => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_error() {
        let error = HardwareError::invalid_argument("write buffer is empty");
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
        assert_eq!(error.to_string(), "Invalid argument: write buffer is empty");
        assert_eq!(error.raw_os_error(), None);
    }

    #[test]
    fn test_not_open_error() {
        let error = HardwareError::not_open(HandleState::Closed);
        assert_eq!(error.kind(), ErrorKind::DeviceUnavailable);
        assert_eq!(error.to_string(), "Device handle is not open (state: closed)");
    }

    #[test]
    fn test_cancellation_error_keeps_os_code() {
        let error = HardwareError::cancellation(io::Error::from_raw_os_error(6));
        assert_eq!(error.kind(), ErrorKind::Platform);
        assert_eq!(error.raw_os_error(), Some(6));
    }

    #[test]
    fn test_enumeration_error_display() {
        let error = HardwareError::enumeration(3, io::Error::from_raw_os_error(13));
        assert_eq!(error.kind(), ErrorKind::Platform);
        assert_eq!(error.raw_os_error(), Some(13));
        assert!(error.to_string().starts_with("Device enumeration failed at interface 3"));
    }

    #[test]
    fn test_config_error_is_caller_bug() {
        let error = HardwareError::from(usblink_core::Error::Config("zero timeout".into()));
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_record_error_is_platform() {
        let error = HardwareError::record(
            0,
            usblink_core::Error::invalid_record("interface detail", "empty device path"),
        );
        assert_eq!(error.kind(), ErrorKind::Platform);
        assert_eq!(error.raw_os_error(), None);
    }
}
