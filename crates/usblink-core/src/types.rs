use crate::{
    Result,
    constants::{DEVICE_NAMESPACE_PREFIX, MIN_PATH_SEGMENTS, PATH_DELIMITER, PORT_NUMBER_WIDTH},
    error::Error,
};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Device interface class identifier (128-bit).
///
/// Groups device interfaces by category, e.g. every USB printer exposes the
/// [`DeviceClassId::USB_PRINTER`] interface class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceClassId(Uuid);

impl DeviceClassId {
    /// USB printer interface class (usbprint.sys).
    pub const USB_PRINTER: Self = Self(Uuid::from_u128(0x28d78fad_5a12_11d1_ae5b_0000f803a8c2));

    /// Generic USB device interface class.
    pub const USB_DEVICE: Self = Self(Uuid::from_u128(0xa5dcbf10_6530_11d2_901f_00c04fb951ed));

    /// Serial (COM) port interface class.
    pub const COM_PORT: Self = Self(Uuid::from_u128(0x86e0d1e0_8089_11d0_9ce4_08003e301f73));

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Build from the raw 128-bit value.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Get the raw 128-bit value.
    #[must_use]
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl fmt::Display for DeviceClassId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.braced())
    }
}

impl std::str::FromStr for DeviceClassId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::InvalidClassId(s.to_string()))
    }
}

bitflags! {
    /// Scope filter for device interface enumeration.
    ///
    /// Bit values match the platform's `DIGCF_*` flags so backends can pass
    /// them through unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EnumerationFlags: u32 {
        /// Only the default interface of each class.
        const DEFAULT = 0x0000_0001;
        /// Only devices currently attached.
        const PRESENT = 0x0000_0002;
        /// Every installed class, including devices not attached.
        const ALL_CLASSES = 0x0000_0004;
        /// Only devices in the current hardware profile.
        const PROFILE = 0x0000_0008;
        /// Enumerate device interfaces rather than setup classes.
        const DEVICE_INTERFACE = 0x0000_0010;
    }
}

impl Default for EnumerationFlags {
    fn default() -> Self {
        Self::DEVICE_INTERFACE | Self::PRESENT
    }
}

/// Port metadata resolved from the configuration store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMetadata {
    /// Port base name (e.g. "USB").
    pub base_name: String,

    /// Numeric port index.
    pub port_number: u32,

    /// Human-readable port description.
    pub port_description: String,
}

impl PortMetadata {
    /// Create new port metadata.
    pub fn new(
        base_name: impl Into<String>,
        port_number: u32,
        port_description: impl Into<String>,
    ) -> Self {
        Self {
            base_name: base_name.into(),
            port_number,
            port_description: port_description.into(),
        }
    }

    /// Port name as shown by the spooler, e.g. `USB001`.
    #[must_use]
    pub fn port_name(&self) -> String {
        format!(
            "{}{:0width$}",
            self.base_name,
            self.port_number,
            width = PORT_NUMBER_WIDTH
        )
    }
}

/// Snapshot of one discovered device.
///
/// Built from the device interface path; auxiliary properties are attached
/// with the `with_*` setters while the enumerator assembles the record.
/// Never refreshed after construction. Deserialization goes through
/// [`DeviceIdentity::from_path`], so the path-derived fields are recomputed
/// and a malformed path is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "IdentityRecord")]
pub struct DeviceIdentity {
    path: String,
    device_type: String,
    instance_id: String,
    unique_id: String,
    description: Option<String>,
    service: Option<String>,
    location: Option<String>,
    port: Option<PortMetadata>,
}

/// Serialized form of a [`DeviceIdentity`] accepted on input.
#[derive(Deserialize)]
struct IdentityRecord {
    path: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    port: Option<PortMetadata>,
}

impl TryFrom<IdentityRecord> for DeviceIdentity {
    type Error = Error;

    fn try_from(record: IdentityRecord) -> Result<Self> {
        let mut identity = Self::from_path(record.path)?;
        identity.description = record.description;
        identity.service = record.service;
        identity.location = record.location;
        identity.port = record.port;
        Ok(identity)
    }
}

impl DeviceIdentity {
    /// Build an identity from a device interface path.
    ///
    /// # Errors
    /// Returns `Error::InvalidDevicePath` if the path splits into fewer than
    /// four `#`-separated segments.
    ///
    /// # Examples
    ///
    /// ```
    /// use usblink_core::DeviceIdentity;
    ///
    /// let id = DeviceIdentity::from_path(
    ///     r"\\?\usb#vid_0519&pid_2013#a00000123#{28d78fad-5a12-11d1-ae5b-0000f803a8c2}",
    /// )
    /// .unwrap();
    /// assert_eq!(id.device_type(), "usb");
    /// assert_eq!(id.instance_id(), "vid_0519&pid_2013");
    /// assert_eq!(id.unique_id(), "a00000123");
    ///
    /// assert!(DeviceIdentity::from_path(r"\\?\usb#vid_0519").is_err());
    /// ```
    pub fn from_path(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let segments: Vec<&str> = path.split(PATH_DELIMITER).collect();

        if segments.len() < MIN_PATH_SEGMENTS {
            return Err(Error::InvalidDevicePath(path));
        }

        let device_type = segments[0]
            .strip_prefix(DEVICE_NAMESPACE_PREFIX)
            .unwrap_or(segments[0])
            .to_string();
        let instance_id = segments[1].to_string();
        let unique_id = segments[2].to_string();

        Ok(Self {
            path,
            device_type,
            instance_id,
            unique_id,
            description: None,
            service: None,
            location: None,
            port: None,
        })
    }

    /// Set the device description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the driver service name.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Set the location information.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the port metadata.
    pub fn with_port(mut self, port: PortMetadata) -> Self {
        self.port = Some(port);
        self
    }

    /// Full device interface path, used to open the device.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Bus type (first path segment without namespace prefix).
    #[must_use]
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Hardware instance identifier (e.g. `vid_0519&pid_2013`).
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Unique identifier, typically derived from the serial number.
    #[must_use]
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    #[must_use]
    pub fn port(&self) -> Option<&PortMetadata> {
        self.port.as_ref()
    }

    /// Port name if port metadata was resolved.
    #[must_use]
    pub fn port_name(&self) -> Option<String> {
        self.port.as_ref().map(PortMetadata::port_name)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}\\{}\\{}", self.device_type, self.instance_id, self.unique_id)
    }
}

/// Creation policy requested when opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreationPolicy {
    CreateNew,
    CreateAlways,
    OpenExisting,
    OpenAlways,
}

/// Access, sharing and attribute options for opening a device channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Request read access.
    pub read: bool,

    /// Request write access.
    pub write: bool,

    /// Allow other openers to read.
    pub share_read: bool,

    /// Allow other openers to write.
    pub share_write: bool,

    /// What to do when the target does or does not exist.
    pub creation: CreationPolicy,

    /// Hint that access is sequential.
    pub sequential_scan: bool,

    /// Request asynchronous (overlapped) operation mode.
    pub overlapped: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
            share_read: true,
            share_write: false,
            creation: CreationPolicy::OpenAlways,
            sequential_scan: true,
            overlapped: true,
        }
    }
}
