//! Core constants for device discovery and communication.
//!
//! This module collects the fixed values shared by the enumerator, the
//! communication manager and the platform backends: transfer sizing,
//! timeouts, the structure of device interface paths and the pieces used to
//! rebuild configuration-store keys from those paths.
//!
//! # Device Path Structure
//!
//! Device interface paths reported by the platform look like:
//!
//! ```text
//! \\?\usb#vid_0519&pid_2013#a00000123#{28d78fad-5a12-11d1-ae5b-0000f803a8c2}
//! ```
//!
//! | Segment | Meaning | Example |
//! |---------|---------|---------|
//! | 0 | Namespace prefix + bus type | `\\?\usb` |
//! | 1 | Hardware instance identifier | `vid_0519&pid_2013` |
//! | 2 | Unique (serial-derived) identifier | `a00000123` |
//! | 3 | Interface class | `{28d78fad-...}` |
//!
//! # Usage
//!
//! ```
//! use usblink_core::constants::*;
//!
//! let path = r"\\?\usb#vid_0519&pid_2013#a00000123#{28d78fad-5a12-11d1-ae5b-0000f803a8c2}";
//! let segments: Vec<&str> = path.split(PATH_DELIMITER).collect();
//! assert!(segments.len() >= MIN_PATH_SEGMENTS);
//! ```

// ============================================================================
// Transfer Configuration
// ============================================================================

/// Default bounded wait for a single write or read, in milliseconds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use usblink_core::constants::DEFAULT_TIMEOUT_MS;
///
/// let timeout = Duration::from_millis(DEFAULT_TIMEOUT_MS);
/// assert_eq!(timeout.as_secs(), 10);
/// ```
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Size of one maximal device transfer unit in bytes.
///
/// USB 1.1 write blocks top out at 4096 bytes; reads arrive in 64-byte
/// (full speed) or 512-byte (high speed) chunks, so a single read never
/// exceeds this size either.
pub const TRANSFER_BUFFER_SIZE: usize = 1 << 12;

// ============================================================================
// Device Path Structure
// ============================================================================

/// Separator between the segments of a device interface path.
pub const PATH_DELIMITER: char = '#';

/// Minimum number of segments a device interface path must split into.
///
/// Paths with fewer segments cannot yield a bus type, instance identifier
/// and unique identifier, and are skipped during enumeration.
pub const MIN_PATH_SEGMENTS: usize = 4;

/// Win32 device namespace prefix carried by interface paths.
pub const DEVICE_NAMESPACE_PREFIX: &str = r"\\?\";

// ============================================================================
// Configuration Store Keys
// ============================================================================

/// Root of the per-class device interface subtree in the configuration store.
pub const DEVICE_CLASSES_ROOT: &str = r"SYSTEM\CurrentControlSet\Control\DeviceClasses";

/// Prefix replacing the namespace prefix when a path is turned into a key.
///
/// `\\?\usb#...` becomes `##?#usb#...`.
pub const INTERFACE_KEY_PREFIX: &str = "##?#";

/// Leaf below an interface key holding the port parameters.
pub const DEVICE_PARAMETERS_LEAF: &str = r"#\Device Parameters";

/// Value name for the port base name (e.g. `USB`).
pub const VALUE_BASE_NAME: &str = "Base Name";

/// Value name for the numeric port index.
pub const VALUE_PORT_NUMBER: &str = "Port Number";

/// Value name for the human-readable port description.
pub const VALUE_PORT_DESCRIPTION: &str = "Port Description";

/// Minimum digits used when rendering a port number into a port name.
///
/// # Examples
///
/// ```
/// use usblink_core::constants::PORT_NUMBER_WIDTH;
///
/// assert_eq!(format!("USB{:0width$}", 1, width = PORT_NUMBER_WIDTH), "USB001");
/// ```
pub const PORT_NUMBER_WIDTH: usize = 3;
