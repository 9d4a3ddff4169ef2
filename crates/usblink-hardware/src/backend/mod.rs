//! Platform backends.
//!
//! - [`threaded`]: portable channel emulating overlapped I/O with an I/O thread.
//! - `windows`: SetupAPI enumeration, registry port parameters and native
//!   overlapped handles (Windows only).
//! - [`portable`]: stand-ins for targets without a device-class subsystem.
//!
//! The `Platform*` aliases pick the right implementation for the target.

pub mod portable;
pub mod threaded;
#[cfg(windows)]
pub mod windows;

#[cfg(windows)]
pub use self::windows::{
    RegistryStore as PlatformStore, SetupApiSource as PlatformSource,
    WindowsOpener as PlatformOpener,
};

#[cfg(not(windows))]
pub use self::portable::{NoConfigStore as PlatformStore, UnsupportedSource as PlatformSource};
#[cfg(not(windows))]
pub use self::threaded::FileOpener as PlatformOpener;
