//! Common test utilities for integration tests.
//!
//! Builders for device paths, port parameters and mock-backed enumerators
//! and managers, shared by every test binary in this directory.

#![allow(dead_code)]

use std::time::Duration;

use usblink_core::{DeviceClassId, PortMetadata};
use usblink_hardware::mock::{
    MockConfigStore, MockDeviceHandle, MockDeviceSource, MockOpener, MockSourceHandle,
};
use usblink_hardware::{CommunicationManager, DeviceEnumerator, ManagerConfig, port_parameters_key};

/// Product token of the receipt printer used throughout the tests.
pub const PRODUCT_TOKEN: &str = "3A21";

/// Status request understood by the test printer.
pub const STATUS_COMMAND: [u8; 3] = [0x1d, 0x49, 0x02];

/// Interface path of a USB printer.
pub fn printer_path(vid: u16, pid: u16, serial: &str) -> String {
    format!(
        r"\\?\usb#vid_{vid:04x}&pid_{pid:04x}#{serial}#{}",
        DeviceClassId::USB_PRINTER
    )
}

/// Path of the device selected by [`PRODUCT_TOKEN`].
pub fn target_path() -> String {
    printer_path(0x0dd4, 0x0205, "3a21")
}

/// Path of an unrelated printer.
pub fn other_path() -> String {
    printer_path(0x04b8, 0x0202, "b00000456")
}

pub fn usb_port(number: u32) -> PortMetadata {
    PortMetadata::new("USB", number, "Virtual printer port for USB")
}

pub type MockEnumerator = DeviceEnumerator<MockDeviceSource, MockConfigStore>;

/// Enumerator over scripted interfaces, with its control handle and store.
pub fn mock_enumerator() -> (MockEnumerator, MockSourceHandle, MockConfigStore) {
    let (source, handle) = MockDeviceSource::new();
    let store = MockConfigStore::new();
    (DeviceEnumerator::new(source, store.clone()), handle, store)
}

/// Register port parameters for the printer at `path`.
pub fn register_port(store: &MockConfigStore, path: &str, port: PortMetadata) {
    let key = port_parameters_key(&DeviceClassId::USB_PRINTER, path)
        .expect("test paths are in the device namespace");
    store.insert(key, port);
}

/// Config with a short timeout for tests that expect to time out.
pub fn short_config() -> ManagerConfig {
    ManagerConfig::default().with_timeout(Duration::from_millis(50))
}

/// Manager opened on a fresh echoing mock device.
pub fn mock_manager(config: ManagerConfig) -> (CommunicationManager, MockDeviceHandle) {
    let (opener, device) = MockOpener::new();
    let manager = CommunicationManager::open_with(&opener, &target_path(), config)
        .expect("valid configuration");
    assert!(manager.is_open());
    (manager, device)
}
