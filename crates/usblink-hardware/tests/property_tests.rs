//! Property-based tests for enumeration and transfers.
//!
//! These tests use proptest to generate device paths and replies and verify
//! that the enumeration and read contracts hold for all of them.

mod common;

use proptest::prelude::*;
use usblink_core::{DeviceClassId, DeviceIdentity, EnumerationFlags};
use usblink_hardware::ManagerConfig;
use usblink_hardware::mock::MockInterface;

/// Strategy for path segments without the `#` delimiter.
fn segment() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9a-z&_{}-]{1,16}").expect("Failed to create segment strategy")
}

/// Strategy for well-formed interface paths.
fn device_path() -> impl Strategy<Value = String> {
    (segment(), segment(), segment()).prop_map(|(instance, unique, suffix)| {
        format!(r"\\?\usb#{instance}#{unique}#{suffix}")
    })
}

/// Strategy for paths with fewer than four segments.
fn short_path() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 0..3).prop_map(|segments| segments.join("#"))
}

proptest! {
    /// Property: a read returns exactly the device's chunk, capped at capacity.
    #[test]
    fn prop_read_length_is_reply_length_capped(
        reply in prop::collection::vec(any::<u8>(), 1..512),
        capacity in 1usize..256,
    ) {
        let config = ManagerConfig::default().with_buffer_size(capacity);
        let (mut manager, device) = common::mock_manager(config);
        device.set_echo(false);
        device.push_reply(reply.clone());

        let data = manager.read().unwrap();

        let expected = reply.len().min(capacity);
        prop_assert_eq!(data.len(), expected);
        prop_assert_eq!(&data[..], &reply[..expected]);
    }

    /// Property: writes succeed exactly when every byte is accepted.
    #[test]
    fn prop_write_success_requires_full_transfer(
        payload in prop::collection::vec(any::<u8>(), 1..64),
        limit in 0usize..80,
    ) {
        let (mut manager, device) = common::mock_manager(ManagerConfig::default());
        device.set_write_behavior(usblink_hardware::mock::WriteBehavior::Partial(limit));

        let ok = manager.write(&payload).unwrap();

        prop_assert_eq!(ok, limit >= payload.len());
    }

    /// Property: paths with fewer than four segments never yield an identity.
    #[test]
    fn prop_short_paths_are_rejected(path in short_path()) {
        prop_assert!(DeviceIdentity::from_path(path).is_err());
    }

    /// Property: well-formed paths survive identity parsing unchanged.
    #[test]
    fn prop_identity_keeps_path(path in device_path()) {
        let identity = DeviceIdentity::from_path(path.clone()).unwrap();
        prop_assert_eq!(identity.path(), path.as_str());
        prop_assert_eq!(identity.device_type(), "usb");
    }

    /// Property: enumeration yields one entry per usable interface, in order.
    #[test]
    fn prop_enumeration_preserves_count_and_order(
        paths in prop::collection::vec(device_path(), 0..12),
        zero_sized in prop::collection::vec(any::<bool>(), 12),
    ) {
        let (enumerator, handle, _store) = common::mock_enumerator();
        let mut expected = Vec::new();
        for (path, skip) in paths.iter().zip(&zero_sized) {
            if *skip {
                handle.add(MockInterface::zero_sized());
            }
            handle.add_path(path.clone());
            expected.push(path.clone());
        }

        let devices = enumerator
            .enumerate(&DeviceClassId::USB_PRINTER, EnumerationFlags::default())
            .unwrap();

        let actual: Vec<String> = devices.iter().map(|d| d.path().to_string()).collect();
        prop_assert_eq!(actual, expected);
        prop_assert_eq!(handle.sets_released(), 1);
    }
}
