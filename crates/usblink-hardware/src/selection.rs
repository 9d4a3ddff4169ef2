//! Picking a device out of an enumeration.

use usblink_core::DeviceIdentity;

/// First device whose path contains `token`, ignoring case.
///
/// Enumeration order is whatever the platform yields, so when several paths
/// contain the token the winner may differ between runs. An empty token
/// matches nothing.
///
/// # Examples
///
/// ```
/// use usblink_core::DeviceIdentity;
/// use usblink_hardware::select_device;
///
/// let devices = vec![
///     DeviceIdentity::from_path(r"\\?\usb#vid_0dd4&pid_0205#3a21#{28d78fad-5a12-11d1-ae5b-0000f803a8c2}")?,
/// ];
/// assert!(select_device(&devices, "3A21").is_some());
/// assert!(select_device(&devices, "ffff").is_none());
/// # Ok::<(), usblink_core::Error>(())
/// ```
pub fn select_device<'a>(devices: &'a [DeviceIdentity], token: &str) -> Option<&'a DeviceIdentity> {
    if token.is_empty() {
        return None;
    }
    let token = token.to_lowercase();
    devices
        .iter()
        .find(|device| device.path().to_lowercase().contains(&token))
}
