//! Backends for targets without a device-class subsystem.
//!
//! Enumeration on such targets is always empty and port parameters are
//! never found. Devices can still be opened by path through
//! [`FileOpener`](super::threaded::FileOpener).

use std::io;

use usblink_core::{DevInfoRecord, DeviceClassId, EnumerationFlags, PortMetadata};

use crate::traits::{
    DeviceInterfaceSet, DeviceInterfaceSource, DeviceProperty, PortConfigStore,
    RawInterfaceDetail,
};

fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "device interface enumeration is not available on this platform",
    )
}

/// Source whose acquisition always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedSource;

/// Set type of [`UnsupportedSource`]; never constructed.
#[derive(Debug)]
pub enum NoInterfaces {}

impl DeviceInterfaceSource for UnsupportedSource {
    type Set = NoInterfaces;

    fn acquire(&self, _class: &DeviceClassId, _flags: EnumerationFlags) -> io::Result<NoInterfaces> {
        Err(unsupported())
    }
}

impl DeviceInterfaceSet for NoInterfaces {
    type Interface = ();

    fn interface(&self, _index: u32) -> io::Result<Option<()>> {
        match *self {}
    }

    fn detail_size(&self, _interface: &()) -> io::Result<usize> {
        match *self {}
    }

    fn detail(&self, _interface: &(), _size: usize) -> io::Result<RawInterfaceDetail> {
        match *self {}
    }

    fn property(&self, _devinfo: &DevInfoRecord, _property: DeviceProperty) -> Option<String> {
        match *self {}
    }
}

/// Configuration store with no entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConfigStore;

impl PortConfigStore for NoConfigStore {
    fn port_parameters(&self, key: &str) -> io::Result<PortMetadata> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no configuration store entry for {key}"),
        ))
    }
}
