//! Integration tests for the communication manager.
//!
//! Most tests drive the manager over the scripted mock channel. The
//! loopback tests run it over the threaded backend with a real I/O thread.

mod common;

use std::io;
use std::sync::Mutex;
use std::time::Duration;

use rstest::rstest;
use usblink_core::{DeviceIdentity, OpenOptions};
use usblink_hardware::mock::{LoopbackStream, MockOpener, WriteBehavior};
use usblink_hardware::{
    AnyChannel, CommunicationManager, ErrorKind, HandleState, HardwareError, ManagerConfig,
    WriteStatus,
};

#[rstest]
#[case("")]
#[case("  ")]
fn test_open_blank_path_is_invalid(#[case] path: &str) {
    let manager = CommunicationManager::open_path(path);
    assert_eq!(manager.state(), HandleState::Invalid);
    assert!(!manager.is_open());
}

#[test]
fn test_open_missing_device_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("device");

    let manager = CommunicationManager::open_path(path.to_str().unwrap());

    assert!(manager.is_invalid());
}

#[test]
fn test_open_failure_is_single_attempt() {
    let (opener, _device) = MockOpener::new();
    opener.fail_opens(Some(io::ErrorKind::NotFound));

    let manager =
        CommunicationManager::open_with(&opener, &common::target_path(), ManagerConfig::default())
            .unwrap();

    assert!(manager.is_invalid());
    assert_eq!(opener.open_calls(), 1);
}

#[test]
fn test_open_by_identity_uses_path() {
    let identity = DeviceIdentity::from_path(common::target_path()).unwrap();
    let (opener, _device) = MockOpener::new();

    let manager =
        CommunicationManager::open_with(&opener, identity.path(), ManagerConfig::default())
            .unwrap();

    assert_eq!(manager.path(), identity.path());
    assert_eq!(opener.opened()[0].1, OpenOptions::default());
}

#[test]
fn test_empty_write_performs_no_io() {
    let (mut manager, device) = common::mock_manager(ManagerConfig::default());

    let error = manager.write(&[]).unwrap_err();

    assert!(matches!(error, HardwareError::InvalidArgument { .. }));
    assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    assert_eq!(device.calls().io(), 0);
}

#[test]
fn test_echo_round_trip() {
    let (mut manager, device) = common::mock_manager(ManagerConfig::default());

    assert!(manager.write(&common::STATUS_COMMAND).unwrap());
    assert_eq!(manager.read().unwrap(), common::STATUS_COMMAND.to_vec());
    assert_eq!(device.written(), vec![common::STATUS_COMMAND.to_vec()]);
}

#[test]
fn test_short_reply_is_not_padded() {
    let (mut manager, device) = common::mock_manager(ManagerConfig::default());
    device.set_echo(false);
    device.push_reply(vec![0x10; 10]);

    let reply = manager.read().unwrap();

    assert_eq!(reply.len(), 10);
    assert!(reply.len() < manager.config().buffer_size);
}

#[test]
fn test_long_reply_is_delivered_in_chunks() {
    let config = ManagerConfig::default().with_buffer_size(8);
    let (mut manager, device) = common::mock_manager(config);
    device.set_echo(false);
    device.push_reply((0u8..20).collect::<Vec<_>>());

    assert_eq!(manager.read().unwrap(), (0u8..8).collect::<Vec<_>>());
    assert_eq!(manager.read().unwrap(), (8u8..16).collect::<Vec<_>>());
    assert_eq!(manager.read().unwrap(), (16u8..20).collect::<Vec<_>>());
    assert!(manager.read().unwrap().is_empty());
}

#[test]
fn test_partial_write_is_failure() {
    let (mut manager, device) = common::mock_manager(ManagerConfig::default());
    device.set_write_behavior(WriteBehavior::Partial(1));

    assert!(!manager.write(&common::STATUS_COMMAND).unwrap());
    assert_eq!(
        manager.write_with_status(&common::STATUS_COMMAND).unwrap(),
        WriteStatus::Partial {
            written: 1,
            requested: 3
        }
    );
}

#[test]
fn test_timeouts_are_soft() {
    let config = common::short_config();
    let (mut manager, device) = common::mock_manager(config.clone());
    device.set_echo(false);
    device.set_write_behavior(WriteBehavior::Stalled);

    assert!(!manager.write(&common::STATUS_COMMAND).unwrap());
    assert!(manager.read().unwrap().is_empty());
    assert_eq!(device.wait_timeouts(), vec![config.timeout; 2]);
    assert!(manager.is_open());
}

#[test]
fn test_only_write_cancels_outstanding_io() {
    let (mut manager, device) = common::mock_manager(common::short_config());
    device.set_echo(false);

    assert!(manager.read().unwrap().is_empty());
    device.push_reply(vec![0x12]);
    assert_eq!(manager.read().unwrap(), vec![0x12]);
    assert_eq!(device.calls().cancel, 0);

    assert!(manager.write(&common::STATUS_COMMAND).unwrap());
    assert_eq!(device.calls().cancel, 1);
}

#[test]
fn test_next_write_cancels_stalled_one() {
    let (mut manager, device) = common::mock_manager(common::short_config());
    device.set_write_behavior(WriteBehavior::Stalled);
    assert_eq!(
        manager.write_with_status(&[1]).unwrap(),
        WriteStatus::TimedOut
    );

    device.set_write_behavior(WriteBehavior::Immediate);
    assert!(manager.write(&[2]).unwrap());
    assert_eq!(device.calls().cancel, 2);
}

#[test]
fn test_cancellation_failure_is_fatal() {
    let (mut manager, device) = common::mock_manager(ManagerConfig::default());
    device.fail_cancel(Some(6));

    let error = manager.write(&common::STATUS_COMMAND).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Platform);
    assert_eq!(error.raw_os_error(), Some(6));
    assert!(device.written().is_empty());
}

#[test]
fn test_close_twice_releases_once() {
    let (mut manager, device) = common::mock_manager(ManagerConfig::default());

    manager.close();
    manager.close();
    drop(manager);

    assert_eq!(device.close_calls(), 1);
}

#[test]
fn test_close_unopened_is_noop() {
    let (opener, device) = MockOpener::new();
    opener.fail_opens(Some(io::ErrorKind::PermissionDenied));
    let mut manager =
        CommunicationManager::open_with(&opener, &common::target_path(), ManagerConfig::default())
            .unwrap();

    manager.close();
    manager.close();

    assert_eq!(manager.state(), HandleState::Invalid);
    assert_eq!(device.close_calls(), 0);
}

#[test]
fn test_io_after_close_is_rejected() {
    let (mut manager, device) = common::mock_manager(ManagerConfig::default());
    manager.close();

    let error = manager.write(&common::STATUS_COMMAND).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::DeviceUnavailable);
    assert_eq!(device.calls().io(), 0);
}

// ============================================================================
// Threaded backend
// ============================================================================

fn loopback_manager(
    stream: LoopbackStream,
    config: ManagerConfig,
) -> CommunicationManager {
    let stream = Mutex::new(Some(stream));
    let opener = move |_path: &str, _options: &OpenOptions| -> io::Result<AnyChannel> {
        let stream = stream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "already opened"))?;
        AnyChannel::threaded(stream)
    };
    CommunicationManager::open_with(&opener, &common::target_path(), config).unwrap()
}

#[test]
fn test_threaded_echo_round_trip() {
    let (stream, handle) = LoopbackStream::echo();
    let mut manager = loopback_manager(stream, ManagerConfig::default());
    assert!(manager.is_open());

    assert!(manager.write(&common::STATUS_COMMAND).unwrap());
    assert_eq!(manager.read().unwrap(), common::STATUS_COMMAND.to_vec());
    assert_eq!(handle.written(), common::STATUS_COMMAND.to_vec());

    manager.close();
    assert_eq!(manager.state(), HandleState::Closed);
}

#[test]
fn test_threaded_read_timeout_is_empty() {
    let (stream, _handle) = LoopbackStream::silent();
    let mut manager = loopback_manager(stream, common::short_config());

    assert!(manager.read().unwrap().is_empty());
}

#[test]
fn test_threaded_partial_write_is_failure() {
    let (stream, handle) = LoopbackStream::silent();
    handle.set_write_limit(Some(2));
    let mut manager = loopback_manager(stream, ManagerConfig::default());

    assert!(!manager.write(&common::STATUS_COMMAND).unwrap());
}

#[test]
fn test_threaded_reply_respects_capacity() {
    let (stream, handle) = LoopbackStream::silent();
    handle.push_reply(&[0xAA; 32]);
    let config = ManagerConfig::default()
        .with_buffer_size(16)
        .with_timeout(Duration::from_secs(5));
    let mut manager = loopback_manager(stream, config);

    let reply = manager.read().unwrap();
    assert!(!reply.is_empty());
    assert!(reply.len() <= 16);
}

#[test]
fn test_threaded_write_after_timed_out_read() {
    let (stream, handle) = LoopbackStream::echo();
    let config = ManagerConfig::default().with_timeout(Duration::from_millis(200));
    let mut manager = loopback_manager(stream, config);

    assert!(manager.read().unwrap().is_empty());

    assert!(manager.write(&common::STATUS_COMMAND).unwrap());
    assert_eq!(handle.written(), common::STATUS_COMMAND.to_vec());
    assert_eq!(manager.read().unwrap(), common::STATUS_COMMAND.to_vec());
}

#[test]
fn test_threaded_late_reply_reaches_next_read() {
    let (stream, handle) = LoopbackStream::silent();
    let config = ManagerConfig::default().with_timeout(Duration::from_millis(200));
    let mut manager = loopback_manager(stream, config);

    assert!(manager.read().unwrap().is_empty());

    handle.push_reply(b"late");
    assert_eq!(manager.read().unwrap(), b"late".to_vec());
}

#[test]
fn test_threaded_close_releases_stream_with_read_pending() {
    let (stream, handle) = LoopbackStream::silent();
    let mut manager = loopback_manager(stream, common::short_config());

    assert!(manager.read().unwrap().is_empty());
    assert!(!handle.is_released());

    manager.close();
    assert_eq!(manager.state(), HandleState::Closed);
    assert!(handle.is_released());
}
