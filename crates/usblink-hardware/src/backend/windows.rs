//! Native Windows backend.
//!
//! - [`SetupApiSource`] / [`SetupApiSet`]: device interface enumeration
//!   through SetupAPI.
//! - [`RegistryStore`]: port parameters from the `DeviceClasses` registry
//!   subtree.
//! - [`OverlappedChannel`]: a `CreateFileW` handle opened for overlapped
//!   I/O, with a manual-reset event for writes and an auto-reset event for
//!   reads.

use std::io;
use std::iter;
use std::mem;
use std::time::Duration;

use tracing::{debug, trace};
use usblink_core::constants::{VALUE_BASE_NAME, VALUE_PORT_DESCRIPTION, VALUE_PORT_NUMBER};
use usblink_core::{
    CreationPolicy, DevInfoRecord, DeviceClassId, EnumerationFlags, InterfaceDetailRecord,
    OpenOptions, PortMetadata, RecordLayout,
};
use windows::Win32::Devices::DeviceAndDriverInstallation::{
    HDEVINFO, SETUP_DI_GET_CLASS_DEVS_FLAGS, SETUP_DI_REGISTRY_PROPERTY, SP_DEVICE_INTERFACE_DATA,
    SP_DEVICE_INTERFACE_DETAIL_DATA_W, SP_DEVINFO_DATA, SPDRP_DEVICEDESC,
    SPDRP_LOCATION_INFORMATION, SPDRP_SERVICE, SetupDiDestroyDeviceInfoList,
    SetupDiEnumDeviceInterfaces, SetupDiGetClassDevsW, SetupDiGetDeviceInterfaceDetailW,
    SetupDiGetDeviceRegistryPropertyW,
};
use windows::Win32::Foundation::{
    CloseHandle, ERROR_IO_INCOMPLETE, ERROR_IO_PENDING, ERROR_NO_MORE_ITEMS, GENERIC_READ,
    GENERIC_WRITE, HANDLE, WAIT_OBJECT_0,
};
use windows::Win32::Storage::FileSystem::{
    CREATE_ALWAYS, CREATE_NEW, CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_CREATION_DISPOSITION,
    FILE_FLAG_OVERLAPPED, FILE_FLAG_SEQUENTIAL_SCAN, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_MODE,
    FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_ALWAYS, OPEN_EXISTING, ReadFile, WriteFile,
};
use windows::Win32::System::IO::{CancelIo, CancelIoEx, GetOverlappedResult, OVERLAPPED};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
use windows::core::{GUID, PCWSTR};
use winreg::RegKey;
use winreg::enums::HKEY_LOCAL_MACHINE;

use super::threaded::FileOpener;
use crate::devices::AnyChannel;
use crate::traits::{
    DeviceChannel, DeviceInterfaceSet, DeviceInterfaceSource, DeviceOpener, DeviceProperty,
    IoDirection, IssueStatus, PortConfigStore, RawInterfaceDetail, WaitStatus, incomplete,
};

/// Convert a `windows` error into an I/O error carrying the Win32 code.
fn os_error(error: windows::core::Error) -> io::Error {
    let hresult = error.code().0 as u32;
    if hresult & 0xFFFF_0000 == 0x8007_0000 {
        io::Error::from_raw_os_error((hresult & 0xFFFF) as i32)
    } else {
        io::Error::from_raw_os_error(hresult as i32)
    }
}

fn to_guid(class: &DeviceClassId) -> GUID {
    GUID::from_u128(class.as_u128())
}

fn utf16_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

// ============================================================================
// Enumeration
// ============================================================================

/// SetupAPI device interface source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupApiSource;

impl DeviceInterfaceSource for SetupApiSource {
    type Set = SetupApiSet;

    fn acquire(&self, class: &DeviceClassId, flags: EnumerationFlags) -> io::Result<SetupApiSet> {
        let guid = to_guid(class);
        // SAFETY: guid outlives the call; no enumerator string or parent window.
        let handle = unsafe {
            SetupDiGetClassDevsW(
                Some(&guid),
                PCWSTR::null(),
                None,
                SETUP_DI_GET_CLASS_DEVS_FLAGS(flags.bits()),
            )
        }
        .map_err(os_error)?;

        trace!("Acquired device information set for {}", class);
        Ok(SetupApiSet { handle, guid })
    }
}

/// Device information set, destroyed on drop.
#[derive(Debug)]
pub struct SetupApiSet {
    handle: HDEVINFO,
    guid: GUID,
}

impl SetupApiSet {
    fn registry_property(
        &self,
        devinfo: &SP_DEVINFO_DATA,
        property: SETUP_DI_REGISTRY_PROPERTY,
    ) -> Option<String> {
        let mut required = 0u32;
        // SAFETY: sizing call with no buffer.
        let _ = unsafe {
            SetupDiGetDeviceRegistryPropertyW(
                self.handle,
                devinfo,
                property,
                None,
                None,
                Some(&mut required),
            )
        };
        if required == 0 {
            return None;
        }

        let mut buffer = vec![0u8; required as usize];
        // SAFETY: buffer is `required` bytes long.
        unsafe {
            SetupDiGetDeviceRegistryPropertyW(
                self.handle,
                devinfo,
                property,
                None,
                Some(&mut buffer),
                None,
            )
        }
        .ok()?;

        let value = utf16_string(&buffer);
        (!value.is_empty()).then_some(value)
    }
}

impl DeviceInterfaceSet for SetupApiSet {
    type Interface = SP_DEVICE_INTERFACE_DATA;

    fn interface(&self, index: u32) -> io::Result<Option<SP_DEVICE_INTERFACE_DATA>> {
        let mut data = SP_DEVICE_INTERFACE_DATA {
            cbSize: mem::size_of::<SP_DEVICE_INTERFACE_DATA>() as u32,
            ..Default::default()
        };
        // SAFETY: handle is a live device information set; data is sized above.
        match unsafe { SetupDiEnumDeviceInterfaces(self.handle, None, &self.guid, index, &mut data) } {
            Ok(()) => Ok(Some(data)),
            Err(e) if e.code() == ERROR_NO_MORE_ITEMS.to_hresult() => Ok(None),
            Err(e) => Err(os_error(e)),
        }
    }

    fn detail_size(&self, interface: &SP_DEVICE_INTERFACE_DATA) -> io::Result<usize> {
        let mut required = 0u32;
        // SAFETY: first call of the sizing idiom, no output buffer. The call
        // always reports an insufficient buffer; only `required` matters.
        let _ = unsafe {
            SetupDiGetDeviceInterfaceDetailW(
                self.handle,
                interface,
                None,
                0,
                Some(&mut required),
                None,
            )
        };
        Ok(required as usize)
    }

    fn detail(
        &self,
        interface: &SP_DEVICE_INTERFACE_DATA,
        size: usize,
    ) -> io::Result<RawInterfaceDetail> {
        // u32 words keep the detail structure aligned.
        let mut words = vec![0u32; size.div_ceil(4).max(1)];
        words[0] = InterfaceDetailRecord::header_size(RecordLayout::native());

        let mut devinfo = SP_DEVINFO_DATA {
            cbSize: mem::size_of::<SP_DEVINFO_DATA>() as u32,
            ..Default::default()
        };

        // SAFETY: words spans at least `size` bytes with the size header set;
        // devinfo is sized above.
        unsafe {
            SetupDiGetDeviceInterfaceDetailW(
                self.handle,
                interface,
                Some(words.as_mut_ptr() as *mut SP_DEVICE_INTERFACE_DETAIL_DATA_W),
                size as u32,
                None,
                Some(&mut devinfo as *mut SP_DEVINFO_DATA),
            )
        }
        .map_err(os_error)?;

        let detail: Vec<u8> = words
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .take(size)
            .collect();

        // SAFETY: SP_DEVINFO_DATA is plain data; view it as bytes for the codec.
        let devinfo_bytes = unsafe {
            std::slice::from_raw_parts(
                (&devinfo as *const SP_DEVINFO_DATA).cast::<u8>(),
                mem::size_of::<SP_DEVINFO_DATA>(),
            )
        }
        .to_vec();

        Ok(RawInterfaceDetail {
            detail,
            devinfo: devinfo_bytes,
        })
    }

    fn property(&self, record: &DevInfoRecord, property: DeviceProperty) -> Option<String> {
        let devinfo = SP_DEVINFO_DATA {
            cbSize: mem::size_of::<SP_DEVINFO_DATA>() as u32,
            ClassGuid: to_guid(&record.class_id),
            DevInst: record.dev_inst,
            Reserved: record.reserved as usize,
        };
        let property = match property {
            DeviceProperty::Description => SPDRP_DEVICEDESC,
            DeviceProperty::Service => SPDRP_SERVICE,
            DeviceProperty::Location => SPDRP_LOCATION_INFORMATION,
        };
        self.registry_property(&devinfo, property)
    }
}

impl Drop for SetupApiSet {
    fn drop(&mut self) {
        // SAFETY: handle came from SetupDiGetClassDevsW and is destroyed once.
        if let Err(e) = unsafe { SetupDiDestroyDeviceInfoList(self.handle) } {
            debug!("Failed to destroy device information set: {}", e);
        }
    }
}

// ============================================================================
// Configuration store
// ============================================================================

/// Reads port parameters below `HKEY_LOCAL_MACHINE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStore;

impl PortConfigStore for RegistryStore {
    fn port_parameters(&self, key: &str) -> io::Result<PortMetadata> {
        let params = RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey(key)?;
        let base_name: String = params.get_value(VALUE_BASE_NAME)?;
        let port_number: u32 = params.get_value(VALUE_PORT_NUMBER)?;
        let port_description: String = params.get_value(VALUE_PORT_DESCRIPTION)?;
        Ok(PortMetadata::new(base_name, port_number, port_description))
    }
}

// ============================================================================
// Overlapped channel
// ============================================================================

#[derive(Debug)]
struct OwnedHandle(HANDLE);

impl OwnedHandle {
    fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            // SAFETY: the handle is owned and closed exactly once.
            let _ = unsafe { CloseHandle(self.0) };
        }
    }
}

fn create_event(manual_reset: bool) -> io::Result<OwnedHandle> {
    // SAFETY: unnamed event with default security.
    unsafe { CreateEventW(None, manual_reset, false, PCWSTR::null()) }
        .map(OwnedHandle)
        .map_err(os_error)
}

fn desired_access(options: &OpenOptions) -> u32 {
    let mut access = 0;
    if options.read {
        access |= GENERIC_READ.0;
    }
    if options.write {
        access |= GENERIC_WRITE.0;
    }
    access
}

fn share_mode(options: &OpenOptions) -> FILE_SHARE_MODE {
    let mut share = FILE_SHARE_MODE(0);
    if options.share_read {
        share |= FILE_SHARE_READ;
    }
    if options.share_write {
        share |= FILE_SHARE_WRITE;
    }
    share
}

fn creation_disposition(policy: CreationPolicy) -> FILE_CREATION_DISPOSITION {
    match policy {
        CreationPolicy::CreateNew => CREATE_NEW,
        CreationPolicy::CreateAlways => CREATE_ALWAYS,
        CreationPolicy::OpenExisting => OPEN_EXISTING,
        CreationPolicy::OpenAlways => OPEN_ALWAYS,
    }
}

fn flags_and_attributes(options: &OpenOptions) -> FILE_FLAGS_AND_ATTRIBUTES {
    let mut flags = FILE_ATTRIBUTE_NORMAL;
    if options.sequential_scan {
        flags |= FILE_FLAG_SEQUENTIAL_SCAN;
    }
    if options.overlapped {
        flags |= FILE_FLAG_OVERLAPPED;
    }
    flags
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "channel is closed")
}

/// Device handle opened for overlapped I/O.
///
/// The `OVERLAPPED` blocks and transfer buffers are owned by the channel and
/// stay in place while a transfer is in flight. A read issued while the
/// previous one is still outstanding reuses it rather than starting a new
/// one. A write issued while the previous one is outstanding first waits for
/// it to settle, which the cancellation preceding every write makes prompt.
#[derive(Debug)]
pub struct OverlappedChannel {
    handle: Option<OwnedHandle>,
    write_event: OwnedHandle,
    read_event: OwnedHandle,
    write_overlapped: Box<OVERLAPPED>,
    read_overlapped: Box<OVERLAPPED>,
    write_buffer: Vec<u8>,
    read_buffer: Vec<u8>,
    write_in_flight: bool,
    read_in_flight: bool,
}

// SAFETY: the raw handles and OVERLAPPED pointers are owned exclusively by
// the channel and only used through `&mut self`.
unsafe impl Send for OverlappedChannel {}

impl OverlappedChannel {
    /// Open `path` with the given options.
    ///
    /// # Errors
    /// Returns the platform error if the device or the completion events
    /// cannot be created.
    pub fn open(path: &str, options: &OpenOptions) -> io::Result<Self> {
        let wide: Vec<u16> = path.encode_utf16().chain(iter::once(0)).collect();

        // SAFETY: wide is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                desired_access(options),
                share_mode(options),
                None,
                creation_disposition(options.creation),
                flags_and_attributes(options),
                None,
            )
        }
        .map(OwnedHandle)
        .map_err(os_error)?;

        let write_event = create_event(true)?;
        let read_event = create_event(false)?;

        debug!("Opened {} for overlapped I/O", path);

        Ok(Self {
            handle: Some(handle),
            write_event,
            read_event,
            write_overlapped: Box::default(),
            read_overlapped: Box::default(),
            write_buffer: Vec::new(),
            read_buffer: Vec::new(),
            write_in_flight: false,
            read_in_flight: false,
        })
    }

    fn raw_handle(&self) -> io::Result<HANDLE> {
        self.handle.as_ref().map(OwnedHandle::raw).ok_or_else(closed_error)
    }

    fn overlapped(&mut self, direction: IoDirection) -> *mut OVERLAPPED {
        match direction {
            IoDirection::Write => self.write_overlapped.as_mut() as *mut OVERLAPPED,
            IoDirection::Read => self.read_overlapped.as_mut() as *mut OVERLAPPED,
        }
    }

    fn in_flight(&mut self, direction: IoDirection) -> &mut bool {
        match direction {
            IoDirection::Write => &mut self.write_in_flight,
            IoDirection::Read => &mut self.read_in_flight,
        }
    }

    /// Block until an outstanding transfer has settled.
    fn drain(&mut self, handle: HANDLE, direction: IoDirection) {
        if !*self.in_flight(direction) {
            return;
        }
        let overlapped = self.overlapped(direction);
        let mut transferred = 0u32;
        // SAFETY: the OVERLAPPED block belongs to a transfer issued on handle.
        let _ = unsafe { GetOverlappedResult(handle, overlapped, &mut transferred, true) };
        *self.in_flight(direction) = false;
    }
}

impl DeviceChannel for OverlappedChannel {
    fn cancel_pending(&mut self) -> io::Result<()> {
        let handle = self.raw_handle()?;
        // SAFETY: handle is open.
        unsafe { CancelIo(handle) }.map_err(os_error)
    }

    fn issue_write(&mut self, data: Vec<u8>) -> io::Result<IssueStatus> {
        let handle = self.raw_handle()?;
        self.drain(handle, IoDirection::Write);

        self.write_buffer = data;
        *self.write_overlapped = OVERLAPPED {
            hEvent: self.write_event.raw(),
            ..Default::default()
        };
        self.write_in_flight = true;

        // SAFETY: buffer and OVERLAPPED are owned by self and left untouched
        // until the transfer settles.
        let issued = unsafe {
            WriteFile(
                handle,
                Some(self.write_buffer.as_slice()),
                None,
                Some(self.write_overlapped.as_mut() as *mut OVERLAPPED),
            )
        };
        match issued {
            Ok(()) => Ok(IssueStatus::Completed),
            Err(e) if e.code() == ERROR_IO_PENDING.to_hresult() => Ok(IssueStatus::Pending),
            Err(e) => {
                self.write_in_flight = false;
                Err(os_error(e))
            }
        }
    }

    fn issue_read(&mut self, capacity: usize) -> io::Result<IssueStatus> {
        let handle = self.raw_handle()?;
        if self.read_in_flight {
            trace!("Read still outstanding, waiting on it again");
            return Ok(IssueStatus::Pending);
        }

        self.read_buffer = vec![0u8; capacity];
        *self.read_overlapped = OVERLAPPED {
            hEvent: self.read_event.raw(),
            ..Default::default()
        };
        self.read_in_flight = true;

        // SAFETY: as for writes.
        let issued = unsafe {
            ReadFile(
                handle,
                Some(self.read_buffer.as_mut_slice()),
                None,
                Some(self.read_overlapped.as_mut() as *mut OVERLAPPED),
            )
        };
        match issued {
            Ok(()) => Ok(IssueStatus::Completed),
            Err(e) if e.code() == ERROR_IO_PENDING.to_hresult() => Ok(IssueStatus::Pending),
            Err(e) => {
                self.read_in_flight = false;
                Err(os_error(e))
            }
        }
    }

    fn wait(&mut self, direction: IoDirection, timeout: Duration) -> WaitStatus {
        let event = match direction {
            IoDirection::Write => self.write_event.raw(),
            IoDirection::Read => self.read_event.raw(),
        };
        // u32::MAX would mean INFINITE.
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);

        // SAFETY: event is a live event handle.
        if unsafe { WaitForSingleObject(event, millis) } == WAIT_OBJECT_0 {
            WaitStatus::Signaled
        } else {
            WaitStatus::TimedOut
        }
    }

    fn query_result(&mut self, direction: IoDirection) -> io::Result<usize> {
        let handle = self.raw_handle()?;
        if !*self.in_flight(direction) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no {direction} transfer has been issued"),
            ));
        }

        let overlapped = self.overlapped(direction);
        let mut transferred = 0u32;
        // SAFETY: non-blocking query of a transfer issued on handle.
        match unsafe { GetOverlappedResult(handle, overlapped, &mut transferred, false) } {
            Ok(()) => {
                *self.in_flight(direction) = false;
                Ok(transferred as usize)
            }
            Err(e) if e.code() == ERROR_IO_INCOMPLETE.to_hresult() => Err(incomplete(direction)),
            Err(e) => {
                *self.in_flight(direction) = false;
                Err(os_error(e))
            }
        }
    }

    fn read_buffer(&self) -> &[u8] {
        &self.read_buffer
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        // SAFETY: handle is open; cancels every transfer issued on it.
        let _ = unsafe { CancelIoEx(handle.raw(), None) };
        self.drain(handle.raw(), IoDirection::Write);
        self.drain(handle.raw(), IoDirection::Read);

        drop(handle);
        debug!("Overlapped channel closed");
        Ok(())
    }
}

impl Drop for OverlappedChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Opens device paths as overlapped channels.
///
/// Falls back to [`FileOpener`] when overlapped mode is not requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsOpener;

impl DeviceOpener for WindowsOpener {
    fn open(&self, path: &str, options: &OpenOptions) -> io::Result<AnyChannel> {
        if options.overlapped {
            Ok(AnyChannel::Overlapped(OverlappedChannel::open(path, options)?))
        } else {
            FileOpener.open(path, options)
        }
    }
}
