//! Mock device interface source and configuration store.
//!
//! The source produces raw detail and device info buffers through the same
//! record codec a real backend uses, so the enumerator's decoding path is
//! exercised end to end.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use usblink_core::{
    DevInfoRecord, DeviceClassId, EnumerationFlags, InterfaceDetailRecord, PortMetadata,
    RecordLayout,
};

use crate::traits::{
    DeviceInterfaceSet, DeviceInterfaceSource, DeviceProperty, PortConfigStore,
    RawInterfaceDetail,
};

const ERROR_INSUFFICIENT_BUFFER: i32 = 122;

/// One scripted device interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockInterface {
    pub path: String,
    pub description: Option<String>,
    pub service: Option<String>,
    pub location: Option<String>,
    raw_detail: Option<Vec<u8>>,
    zero_size: bool,
}

impl MockInterface {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// An interface whose detail query reports a zero size.
    pub fn zero_sized() -> Self {
        Self {
            zero_size: true,
            ..Self::default()
        }
    }

    /// An interface returning `detail` verbatim instead of an encoded path.
    pub fn raw(detail: Vec<u8>) -> Self {
        Self {
            raw_detail: Some(detail),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    fn detail_bytes(&self, layout: RecordLayout) -> Vec<u8> {
        self.raw_detail
            .clone()
            .unwrap_or_else(|| InterfaceDetailRecord::encode(&self.path, layout))
    }
}

#[derive(Debug)]
struct SourceState {
    interfaces: Vec<MockInterface>,
    acquire_error: Option<io::ErrorKind>,
    enumeration_errors: HashMap<u32, i32>,
    detail_errors: HashMap<u32, i32>,
    layout: RecordLayout,
    acquire_calls: Vec<(DeviceClassId, EnumerationFlags)>,
    sets_acquired: usize,
    sets_released: usize,
}

impl Default for SourceState {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            acquire_error: None,
            enumeration_errors: HashMap::new(),
            detail_errors: HashMap::new(),
            layout: RecordLayout::native(),
            acquire_calls: Vec::new(),
            sets_acquired: 0,
            sets_released: 0,
        }
    }
}

type SharedSource = Arc<Mutex<SourceState>>;

fn lock(state: &SharedSource) -> MutexGuard<'_, SourceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted device interface source.
///
/// # Examples
///
/// ```
/// use usblink_core::{DeviceClassId, EnumerationFlags};
/// use usblink_hardware::enumerator::DeviceEnumerator;
/// use usblink_hardware::mock::{MockConfigStore, MockDeviceSource};
///
/// let (source, handle) = MockDeviceSource::new();
/// handle.add_path(r"\\?\usb#vid_0519&pid_2013#a00000123#{28d78fad-5a12-11d1-ae5b-0000f803a8c2}");
///
/// let enumerator = DeviceEnumerator::new(source, MockConfigStore::new());
/// let devices = enumerator
///     .enumerate(&DeviceClassId::USB_PRINTER, EnumerationFlags::default())
///     .unwrap();
/// assert_eq!(devices.len(), 1);
/// assert_eq!(handle.sets_released(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockDeviceSource {
    state: SharedSource,
}

impl MockDeviceSource {
    pub fn new() -> (Self, MockSourceHandle) {
        let state = SharedSource::default();
        (
            Self {
                state: Arc::clone(&state),
            },
            MockSourceHandle { state },
        )
    }
}

impl DeviceInterfaceSource for MockDeviceSource {
    type Set = MockInterfaceSet;

    fn acquire(&self, class: &DeviceClassId, flags: EnumerationFlags) -> io::Result<Self::Set> {
        let mut state = lock(&self.state);
        state.acquire_calls.push((*class, flags));
        if let Some(kind) = state.acquire_error {
            return Err(io::Error::new(kind, "device information set unavailable"));
        }
        state.sets_acquired += 1;

        Ok(MockInterfaceSet {
            source: Arc::clone(&self.state),
            class: *class,
            interfaces: state.interfaces.clone(),
            enumeration_errors: state.enumeration_errors.clone(),
            detail_errors: state.detail_errors.clone(),
            layout: state.layout,
        })
    }
}

/// Snapshot of the scripted interfaces taken at acquisition.
#[derive(Debug)]
pub struct MockInterfaceSet {
    source: SharedSource,
    class: DeviceClassId,
    interfaces: Vec<MockInterface>,
    enumeration_errors: HashMap<u32, i32>,
    detail_errors: HashMap<u32, i32>,
    layout: RecordLayout,
}

impl MockInterfaceSet {
    fn get(&self, index: u32) -> io::Result<&MockInterface> {
        self.interfaces
            .get(index as usize)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unknown interface"))
    }
}

impl DeviceInterfaceSet for MockInterfaceSet {
    type Interface = u32;

    fn interface(&self, index: u32) -> io::Result<Option<u32>> {
        if let Some(&code) = self.enumeration_errors.get(&index) {
            return Err(io::Error::from_raw_os_error(code));
        }
        Ok(((index as usize) < self.interfaces.len()).then_some(index))
    }

    fn detail_size(&self, index: &u32) -> io::Result<usize> {
        let interface = self.get(*index)?;
        if interface.zero_size {
            return Ok(0);
        }
        Ok(interface.detail_bytes(self.layout).len())
    }

    fn detail(&self, index: &u32, size: usize) -> io::Result<RawInterfaceDetail> {
        if let Some(&code) = self.detail_errors.get(index) {
            return Err(io::Error::from_raw_os_error(code));
        }

        let interface = self.get(*index)?;
        let mut detail = interface.detail_bytes(self.layout);
        if size < detail.len() {
            return Err(io::Error::from_raw_os_error(ERROR_INSUFFICIENT_BUFFER));
        }
        detail.resize(size, 0);

        let devinfo = DevInfoRecord {
            class_id: self.class,
            dev_inst: index + 1,
            reserved: 0,
        };

        Ok(RawInterfaceDetail {
            detail,
            devinfo: devinfo.encode(self.layout),
        })
    }

    fn property(&self, devinfo: &DevInfoRecord, property: DeviceProperty) -> Option<String> {
        let index = devinfo.dev_inst.checked_sub(1)?;
        let interface = self.interfaces.get(index as usize)?;
        match property {
            DeviceProperty::Description => interface.description.clone(),
            DeviceProperty::Service => interface.service.clone(),
            DeviceProperty::Location => interface.location.clone(),
        }
    }

    fn layout(&self) -> RecordLayout {
        self.layout
    }
}

impl Drop for MockInterfaceSet {
    fn drop(&mut self) {
        lock(&self.source).sets_released += 1;
    }
}

/// Test-side control of a [`MockDeviceSource`].
#[derive(Debug, Clone)]
pub struct MockSourceHandle {
    state: SharedSource,
}

impl MockSourceHandle {
    pub fn add(&self, interface: MockInterface) {
        lock(&self.state).interfaces.push(interface);
    }

    pub fn add_path(&self, path: impl Into<String>) {
        self.add(MockInterface::new(path));
    }

    /// Make acquisition fail with `kind`.
    pub fn fail_acquire(&self, kind: Option<io::ErrorKind>) {
        lock(&self.state).acquire_error = kind;
    }

    /// Make the interface walk fail at `index` with an OS error code.
    pub fn fail_enumeration_at(&self, index: u32, code: i32) {
        lock(&self.state).enumeration_errors.insert(index, code);
    }

    /// Make the detail fetch fail at `index` with an OS error code.
    pub fn fail_detail_at(&self, index: u32, code: i32) {
        lock(&self.state).detail_errors.insert(index, code);
    }

    pub fn set_layout(&self, layout: RecordLayout) {
        lock(&self.state).layout = layout;
    }

    /// Class and flags of every acquisition attempt.
    pub fn acquire_calls(&self) -> Vec<(DeviceClassId, EnumerationFlags)> {
        lock(&self.state).acquire_calls.clone()
    }

    pub fn sets_acquired(&self) -> usize {
        lock(&self.state).sets_acquired
    }

    pub fn sets_released(&self) -> usize {
        lock(&self.state).sets_released
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<String, PortMetadata>,
    denied: HashSet<String>,
    lookups: Vec<String>,
}

/// In-memory configuration store keyed by full key path.
#[derive(Debug, Clone, Default)]
pub struct MockConfigStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_entry(self, key: impl Into<String>, port: PortMetadata) -> Self {
        self.insert(key, port);
        self
    }

    pub fn insert(&self, key: impl Into<String>, port: PortMetadata) {
        self.lock().entries.insert(key.into(), port);
    }

    /// Make lookups of `key` fail with an access error.
    pub fn deny(&self, key: impl Into<String>) {
        self.lock().denied.insert(key.into());
    }

    /// Every key looked up, in order.
    pub fn lookups(&self) -> Vec<String> {
        self.lock().lookups.clone()
    }
}

impl PortConfigStore for MockConfigStore {
    fn port_parameters(&self, key: &str) -> io::Result<PortMetadata> {
        let mut state = self.lock();
        state.lookups.push(key.to_string());
        if state.denied.contains(key) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, key.to_string()));
        }
        state
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, key.to_string()))
    }
}
