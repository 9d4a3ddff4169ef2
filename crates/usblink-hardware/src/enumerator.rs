//! Device enumeration.
//!
//! [`DeviceEnumerator`] walks the device interfaces of one class and rebuilds
//! a [`DeviceIdentity`] for each from its interface path, enriched with
//! device properties and, when the configuration store has them, port
//! parameters.
//!
//! # Contract
//!
//! - A class with no devices, or a subsystem that cannot hand out an
//!   interface set at all, yields an empty list. That is not an error.
//! - Results keep the platform's order. Two interface records with the same
//!   path produce two entries; nothing is collapsed.
//! - Entries whose detail size is zero, and entries whose path has fewer
//!   than four `#`-separated segments, are skipped.
//! - A failed port-parameter lookup leaves the device in the results with
//!   no port metadata.
//! - A failure of the interface walk itself, or of the detail fetch after a
//!   non-zero size was reported, is a hard error. [`DeviceEnumerator::enumerate`]
//!   stops at the first one; [`DeviceEnumerator::scan`] records it and
//!   carries on where it can.
//! - The interface set is released on every exit path.
//!
//! # Examples
//!
//! ```no_run
//! use usblink_core::{DeviceClassId, EnumerationFlags};
//! use usblink_hardware::enumerator::enumerate_devices;
//!
//! # fn main() -> usblink_hardware::Result<()> {
//! for device in enumerate_devices(&DeviceClassId::USB_PRINTER, EnumerationFlags::default())? {
//!     println!("{device} -> {:?}", device.port_name());
//! }
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info, warn};
use usblink_core::constants::{
    DEVICE_CLASSES_ROOT, DEVICE_NAMESPACE_PREFIX, DEVICE_PARAMETERS_LEAF, INTERFACE_KEY_PREFIX,
};
use usblink_core::{
    DevInfoRecord, DeviceClassId, DeviceIdentity, EnumerationFlags, InterfaceDetailRecord,
    PortMetadata,
};

use crate::backend::{PlatformSource, PlatformStore};
use crate::error::{HardwareError, Result};
use crate::traits::{DeviceInterfaceSet, DeviceInterfaceSource, DeviceProperty, PortConfigStore};

/// Outcome of a lenient [`DeviceEnumerator::scan`].
#[derive(Debug, Default)]
pub struct EnumerationReport {
    /// Devices resolved, in platform order.
    pub devices: Vec<DeviceIdentity>,

    /// Failures encountered along the way.
    pub failures: Vec<HardwareError>,
}

impl EnumerationReport {
    /// Whether every interface was resolved or deliberately skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePolicy {
    FailFast,
    Continue,
}

/// Rebuild the configuration-store key holding the port parameters of the
/// interface at `path`.
///
/// Returns `None` for paths outside the device namespace.
///
/// # Examples
///
/// ```
/// use usblink_core::DeviceClassId;
/// use usblink_hardware::enumerator::port_parameters_key;
///
/// let key = port_parameters_key(&DeviceClassId::USB_PRINTER, r"\\?\usb#vid_0519&pid_2013#a1#{x}");
/// assert_eq!(
///     key.as_deref(),
///     Some(r"SYSTEM\CurrentControlSet\Control\DeviceClasses\{28d78fad-5a12-11d1-ae5b-0000f803a8c2}\##?#usb#vid_0519&pid_2013#a1#{x}\#\Device Parameters")
/// );
/// assert_eq!(port_parameters_key(&DeviceClassId::USB_PRINTER, "usb#a#b#c"), None);
/// ```
#[must_use]
pub fn port_parameters_key(class: &DeviceClassId, path: &str) -> Option<String> {
    let prefix = path.get(..DEVICE_NAMESPACE_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(DEVICE_NAMESPACE_PREFIX) {
        return None;
    }
    let rest = &path[DEVICE_NAMESPACE_PREFIX.len()..];
    Some(format!(
        "{DEVICE_CLASSES_ROOT}\\{class}\\{INTERFACE_KEY_PREFIX}{rest}\\{DEVICE_PARAMETERS_LEAF}"
    ))
}

/// Enumerates devices of a class through an interface source, resolving
/// port parameters through a configuration store.
#[derive(Debug, Clone)]
pub struct DeviceEnumerator<S, C> {
    source: S,
    store: C,
}

impl DeviceEnumerator<PlatformSource, PlatformStore> {
    /// Enumerator over the running platform's device subsystem.
    #[must_use]
    pub fn platform() -> Self {
        Self::new(PlatformSource::default(), PlatformStore::default())
    }
}

impl<S, C> DeviceEnumerator<S, C>
where
    S: DeviceInterfaceSource,
    C: PortConfigStore,
{
    pub fn new(source: S, store: C) -> Self {
        Self { source, store }
    }

    /// Enumerate the devices of `class`.
    ///
    /// # Errors
    /// Returns `HardwareError::Enumeration` if the interface walk or a detail
    /// fetch fails, and `HardwareError::Record` if the platform returns a
    /// record that cannot be decoded. Devices collected before the failure
    /// are discarded.
    pub fn enumerate(
        &self,
        class: &DeviceClassId,
        flags: EnumerationFlags,
    ) -> Result<Vec<DeviceIdentity>> {
        self.walk(class, flags, FailurePolicy::FailFast)
            .map(|report| report.devices)
    }

    /// Enumerate the devices of `class`, collecting failures instead of
    /// stopping at the first one.
    ///
    /// A failed detail fetch skips that interface. A failed interface walk
    /// ends the scan, keeping what was collected so far.
    pub fn scan(&self, class: &DeviceClassId, flags: EnumerationFlags) -> EnumerationReport {
        match self.walk(class, flags, FailurePolicy::Continue) {
            Ok(report) => report,
            Err(error) => EnumerationReport {
                devices: Vec::new(),
                failures: vec![error],
            },
        }
    }

    fn walk(
        &self,
        class: &DeviceClassId,
        flags: EnumerationFlags,
        policy: FailurePolicy,
    ) -> Result<EnumerationReport> {
        let mut report = EnumerationReport::default();

        let set = match self.source.acquire(class, flags) {
            Ok(set) => set,
            Err(e) => {
                debug!("No device information set for class {}: {}", class, e);
                return Ok(report);
            }
        };

        let mut index = 0u32;
        loop {
            let interface = match set.interface(index) {
                Ok(Some(interface)) => interface,
                Ok(None) => break,
                Err(e) => {
                    let error = HardwareError::enumeration(index, e);
                    if policy == FailurePolicy::FailFast {
                        return Err(error);
                    }
                    warn!("Stopping device scan: {}", error);
                    report.failures.push(error);
                    break;
                }
            };

            match self.resolve(&set, class, index, &interface) {
                Ok(Some(identity)) => report.devices.push(identity),
                Ok(None) => {}
                Err(error) => {
                    if policy == FailurePolicy::FailFast {
                        return Err(error);
                    }
                    warn!("Skipping interface {}: {}", index, error);
                    report.failures.push(error);
                }
            }

            index += 1;
        }

        info!(
            "Enumerated {} device(s) of class {} from {} interface(s)",
            report.devices.len(),
            class,
            index
        );
        Ok(report)
    }

    fn resolve(
        &self,
        set: &S::Set,
        class: &DeviceClassId,
        index: u32,
        interface: &<S::Set as DeviceInterfaceSet>::Interface,
    ) -> Result<Option<DeviceIdentity>> {
        let size = set
            .detail_size(interface)
            .map_err(|e| HardwareError::enumeration(index, e))?;
        if size == 0 {
            debug!("Skipping interface {}: empty detail record", index);
            return Ok(None);
        }

        let raw = set
            .detail(interface, size)
            .map_err(|e| HardwareError::enumeration(index, e))?;
        let detail =
            InterfaceDetailRecord::decode(&raw.detail).map_err(|e| HardwareError::record(index, e))?;
        let devinfo = DevInfoRecord::decode(&raw.devinfo, set.layout())
            .map_err(|e| HardwareError::record(index, e))?;

        let mut identity = match DeviceIdentity::from_path(detail.path) {
            Ok(identity) => identity,
            Err(e) => {
                debug!("Skipping interface {}: {}", index, e);
                return Ok(None);
            }
        };

        if let Some(description) = set.property(&devinfo, DeviceProperty::Description) {
            identity = identity.with_description(description);
        }
        if let Some(service) = set.property(&devinfo, DeviceProperty::Service) {
            identity = identity.with_service(service);
        }
        if let Some(location) = set.property(&devinfo, DeviceProperty::Location) {
            identity = identity.with_location(location);
        }
        if let Some(port) = self.port_metadata(class, identity.path()) {
            identity = identity.with_port(port);
        }

        debug!("Found device {} at {}", identity, identity.path());
        Ok(Some(identity))
    }

    fn port_metadata(&self, class: &DeviceClassId, path: &str) -> Option<PortMetadata> {
        let key = port_parameters_key(class, path)?;
        match self.store.port_parameters(&key) {
            Ok(port) => Some(port),
            Err(e) => {
                debug!("No port parameters for {}: {}", path, e);
                None
            }
        }
    }
}

/// Enumerate devices of `class` on the running platform.
///
/// # Errors
/// See [`DeviceEnumerator::enumerate`].
pub fn enumerate_devices(
    class: &DeviceClassId,
    flags: EnumerationFlags,
) -> Result<Vec<DeviceIdentity>> {
    DeviceEnumerator::platform().enumerate(class, flags)
}
