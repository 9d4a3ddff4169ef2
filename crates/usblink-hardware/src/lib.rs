//! Device discovery and communication for USB-class peripherals.
//!
//! This crate enumerates the devices registered under a device class,
//! resolves each one's identity and port parameters, and talks to a selected
//! device through bounded, blocking write/read transfers.
//!
//! # Layers
//!
//! - [`enumerator`]: walks a device interface set and builds
//!   [`DeviceIdentity`](usblink_core::DeviceIdentity) values.
//! - [`selection`]: picks one device by product token.
//! - [`manager`]: [`CommunicationManager`] owns an open handle and performs
//!   transfers with a timeout.
//! - [`traits`]: the platform boundary. Enumeration, configuration lookup and
//!   raw device I/O sit behind narrow traits.
//! - [`backend`]: platform implementations of those traits; native overlapped
//!   I/O on Windows and a threaded emulation elsewhere.
//! - [`mock`]: scriptable doubles for tests and development.
//!
//! # Example
//!
//! ```no_run
//! use usblink_core::{DeviceClassId, EnumerationFlags};
//! use usblink_hardware::{CommunicationManager, enumerate_devices, select_device};
//!
//! # fn main() -> usblink_hardware::Result<()> {
//! let devices = enumerate_devices(&DeviceClassId::USB_PRINTER, EnumerationFlags::default())?;
//! if let Some(device) = select_device(&devices, "3A21") {
//!     let mut manager = CommunicationManager::open(device);
//!     if manager.is_open() && manager.write(&[0x1d, 0x49, 0x02])? {
//!         println!("{:02x?}", manager.read()?);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Operations return [`Result<T>`][error::Result] with [`HardwareError`].
//! Branch on [`HardwareError::kind`]; timeouts are reported as `false` or an
//! empty read, never as errors.

pub mod backend;
pub mod devices;
pub mod enumerator;
pub mod error;
pub mod manager;
pub mod mock;
pub mod selection;
pub mod traits;

// Re-export commonly used types for convenience
pub use devices::AnyChannel;
pub use enumerator::{DeviceEnumerator, EnumerationReport, enumerate_devices, port_parameters_key};
pub use error::{ErrorKind, HardwareError, Result};
pub use manager::{CommunicationManager, HandleState, ManagerConfig, WriteStatus};
pub use selection::select_device;
pub use traits::{
    DeviceChannel, DeviceInterfaceSet, DeviceInterfaceSource, DeviceOpener, DeviceProperty,
    IoDirection, IssueStatus, PortConfigStore, WaitStatus,
};
