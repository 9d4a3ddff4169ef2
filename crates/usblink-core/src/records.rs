//! Fixed-layout record codec for device subsystem structures.
//!
//! The device subsystem exchanges C-layout structures with callers. Rather
//! than overlaying Rust structs on foreign memory, backends copy the raw
//! bytes out and decode them here from an explicit offset/size table.
//!
//! # Interface detail record
//!
//! ```text
//! offset  size  field
//! 0       4     size header (8 on 64-bit, 6 on 32-bit)
//! 4       ..    device path, UTF-16LE, NUL-terminated
//! ```
//!
//! # Device info record
//!
//! ```text
//! offset  size  field
//! 0       4     size header (32 on 64-bit, 28 on 32-bit)
//! 4       16    class GUID (mixed-endian)
//! 20      4     device instance handle
//! 24      ptr   reserved (opaque to callers, needed by the platform)
//! ```

use crate::{DeviceClassId, Result, error::Error};
use uuid::Uuid;

/// Offset and size of one field inside a fixed-layout record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: usize,
    pub size: usize,
}

impl Field {
    const fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    const fn end(&self) -> usize {
        self.offset + self.size
    }

    fn slice<'a>(&self, buffer: &'a [u8], record: &'static str) -> Result<&'a [u8]> {
        buffer.get(self.offset..self.end()).ok_or_else(|| {
            Error::invalid_record(
                record,
                format!(
                    "buffer of {} bytes too short for field at {}..{}",
                    buffer.len(),
                    self.offset,
                    self.end()
                ),
            )
        })
    }
}

const DETAIL_RECORD: &str = "interface detail";
const DEVINFO_RECORD: &str = "device info";

const DETAIL_SIZE_HEADER: Field = Field::new(0, 4);
const DETAIL_PATH_OFFSET: usize = 4;

const DEVINFO_SIZE_HEADER: Field = Field::new(0, 4);
const DEVINFO_CLASS_GUID: Field = Field::new(4, 16);
const DEVINFO_DEV_INST: Field = Field::new(20, 4);
const DEVINFO_RESERVED_OFFSET: usize = 24;

/// Pointer width of the platform that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub pointer_width: usize,
}

impl RecordLayout {
    pub const X64: Self = Self { pointer_width: 8 };
    pub const X86: Self = Self { pointer_width: 4 };

    /// Layout of the running process.
    #[must_use]
    pub const fn native() -> Self {
        Self {
            pointer_width: std::mem::size_of::<usize>(),
        }
    }

    /// Size header the platform expects in an interface detail record.
    ///
    /// This is the size of the fixed part of the structure including
    /// alignment padding, not the size of the whole buffer.
    #[must_use]
    pub const fn detail_header_size(&self) -> u32 {
        if self.pointer_width == 8 { 8 } else { 6 }
    }

    /// Total size of a device info record.
    #[must_use]
    pub const fn devinfo_size(&self) -> usize {
        DEVINFO_RESERVED_OFFSET + self.pointer_width
    }

    const fn devinfo_reserved(&self) -> Field {
        Field::new(DEVINFO_RESERVED_OFFSET, self.pointer_width)
    }
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self::native()
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

/// Decoded device interface detail record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDetailRecord {
    pub path: String,
}

impl InterfaceDetailRecord {
    /// Decode a raw interface detail buffer.
    ///
    /// # Errors
    /// Returns `Error::InvalidRecord` if the buffer is shorter than the size
    /// header or carries no path characters.
    ///
    /// # Examples
    ///
    /// ```
    /// use usblink_core::records::{InterfaceDetailRecord, RecordLayout};
    ///
    /// let raw = InterfaceDetailRecord::encode(r"\\?\usb#a#b#c", RecordLayout::X64);
    /// let record = InterfaceDetailRecord::decode(&raw).unwrap();
    /// assert_eq!(record.path, r"\\?\usb#a#b#c");
    /// ```
    pub fn decode(buffer: &[u8]) -> Result<Self> {
        DETAIL_SIZE_HEADER.slice(buffer, DETAIL_RECORD)?;

        let units: Vec<u16> = buffer[DETAIL_PATH_OFFSET..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();

        if units.is_empty() {
            return Err(Error::invalid_record(DETAIL_RECORD, "empty device path"));
        }

        Ok(Self {
            path: String::from_utf16_lossy(&units),
        })
    }

    /// Size header a caller must stamp into the detail buffer before the
    /// platform fills it.
    #[must_use]
    pub const fn header_size(layout: RecordLayout) -> u32 {
        layout.detail_header_size()
    }

    /// Buffer size the platform reports for `path`.
    #[must_use]
    pub fn required_size(path: &str) -> usize {
        DETAIL_PATH_OFFSET + 2 * (path.encode_utf16().count() + 1)
    }

    /// Produce the raw layout for `path`.
    #[must_use]
    pub fn encode(path: &str, layout: RecordLayout) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(Self::required_size(path));
        buffer.extend_from_slice(&layout.detail_header_size().to_le_bytes());
        for unit in path.encode_utf16().chain(std::iter::once(0)) {
            buffer.extend_from_slice(&unit.to_le_bytes());
        }
        buffer
    }
}

/// Decoded device info record.
///
/// Kept lossless so a backend can rebuild the native structure for
/// follow-up property queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevInfoRecord {
    pub class_id: DeviceClassId,
    pub dev_inst: u32,
    pub reserved: u64,
}

impl DevInfoRecord {
    /// Decode a raw device info buffer produced with `layout`.
    ///
    /// # Errors
    /// Returns `Error::InvalidRecord` if the buffer is shorter than the
    /// record size for `layout`.
    pub fn decode(buffer: &[u8], layout: RecordLayout) -> Result<Self> {
        DEVINFO_SIZE_HEADER.slice(buffer, DEVINFO_RECORD)?;

        let mut guid = [0u8; 16];
        guid.copy_from_slice(DEVINFO_CLASS_GUID.slice(buffer, DEVINFO_RECORD)?);
        let dev_inst = read_u32(DEVINFO_DEV_INST.slice(buffer, DEVINFO_RECORD)?);

        let reserved_bytes = layout.devinfo_reserved().slice(buffer, DEVINFO_RECORD)?;
        let reserved = match layout.pointer_width {
            8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(reserved_bytes);
                u64::from_le_bytes(raw)
            }
            4 => u64::from(read_u32(reserved_bytes)),
            width => {
                return Err(Error::invalid_record(
                    DEVINFO_RECORD,
                    format!("unsupported pointer width {width}"),
                ));
            }
        };

        Ok(Self {
            class_id: DeviceClassId::from_uuid(Uuid::from_bytes_le(guid)),
            dev_inst,
            reserved,
        })
    }

    /// Produce the raw layout for this record.
    #[must_use]
    pub fn encode(&self, layout: RecordLayout) -> Vec<u8> {
        let size = layout.devinfo_size();
        let mut buffer = vec![0u8; size];
        buffer[DEVINFO_SIZE_HEADER.offset..DEVINFO_SIZE_HEADER.end()]
            .copy_from_slice(&(size as u32).to_le_bytes());
        buffer[DEVINFO_CLASS_GUID.offset..DEVINFO_CLASS_GUID.end()]
            .copy_from_slice(&self.class_id.as_uuid().to_bytes_le());
        buffer[DEVINFO_DEV_INST.offset..DEVINFO_DEV_INST.end()]
            .copy_from_slice(&self.dev_inst.to_le_bytes());
        let reserved = layout.devinfo_reserved();
        buffer[reserved.offset..reserved.end()]
            .copy_from_slice(&self.reserved.to_le_bytes()[..layout.pointer_width]);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const PATH: &str = r"\\?\usb#vid_0519&pid_2013#a00000123#{28d78fad-5a12-11d1-ae5b-0000f803a8c2}";

    #[test]
    fn test_detail_decode_hand_built_buffer() {
        // size header 8, then "ab" and terminator, then trailing slack
        let raw = [8, 0, 0, 0, b'a', 0, b'b', 0, 0, 0, 0xAA, 0xBB];
        let record = InterfaceDetailRecord::decode(&raw).unwrap();
        assert_eq!(record.path, "ab");
    }

    #[test]
    fn test_detail_decode_without_terminator_uses_whole_buffer() {
        let raw = [6, 0, 0, 0, b'x', 0, b'y', 0];
        let record = InterfaceDetailRecord::decode(&raw).unwrap();
        assert_eq!(record.path, "xy");
    }

    #[test]
    fn test_detail_decode_ignores_odd_trailing_byte() {
        let raw = [8, 0, 0, 0, b'x', 0, b'y'];
        let record = InterfaceDetailRecord::decode(&raw).unwrap();
        assert_eq!(record.path, "x");
    }

    #[rstest]
    #[case(&[])]
    #[case(&[8, 0, 0])]
    #[case(&[8, 0, 0, 0])]
    #[case(&[8, 0, 0, 0, 0, 0, b'a', 0])]
    fn test_detail_decode_invalid(#[case] raw: &[u8]) {
        let result = InterfaceDetailRecord::decode(raw);
        assert!(matches!(result, Err(Error::InvalidRecord { .. })));
    }

    #[rstest]
    #[case(RecordLayout::X64, 8)]
    #[case(RecordLayout::X86, 6)]
    fn test_detail_header_size(#[case] layout: RecordLayout, #[case] expected: u32) {
        let raw = InterfaceDetailRecord::encode(PATH, layout);
        assert_eq!(read_u32(&raw), expected);
        assert_eq!(raw.len(), InterfaceDetailRecord::required_size(PATH));
    }

    #[test]
    fn test_detail_decode_non_ascii_path() {
        let raw = InterfaceDetailRecord::encode(r"\\?\usb#vid_1#prn-é#x", RecordLayout::X64);
        let record = InterfaceDetailRecord::decode(&raw).unwrap();
        assert_eq!(record.path, r"\\?\usb#vid_1#prn-é#x");
    }

    #[test]
    fn test_devinfo_guid_is_mixed_endian() {
        let record = DevInfoRecord {
            class_id: DeviceClassId::USB_PRINTER,
            dev_inst: 0x0102_0304,
            reserved: 0,
        };
        let raw = record.encode(RecordLayout::X64);

        // Data1 0x28d78fad little-endian at offset 4
        assert_eq!(&raw[4..8], &[0xad, 0x8f, 0xd7, 0x28]);
        // Data4 bytes keep their order
        assert_eq!(&raw[12..20], &[0xae, 0x5b, 0x00, 0x00, 0xf8, 0x03, 0xa8, 0xc2]);
        assert_eq!(&raw[20..24], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[rstest]
    #[case(RecordLayout::X64, 32, 0x1122_3344_5566_7788)]
    #[case(RecordLayout::X86, 28, 0x5566_7788)]
    fn test_devinfo_layouts(
        #[case] layout: RecordLayout,
        #[case] size: usize,
        #[case] reserved: u64,
    ) {
        let record = DevInfoRecord {
            class_id: DeviceClassId::USB_DEVICE,
            dev_inst: 7,
            reserved,
        };
        let raw = record.encode(layout);
        assert_eq!(raw.len(), size);
        assert_eq!(read_u32(&raw) as usize, size);
        assert_eq!(DevInfoRecord::decode(&raw, layout).unwrap(), record);
    }

    #[test]
    fn test_devinfo_decode_short_buffer() {
        let raw = vec![0u8; 27];
        let result = DevInfoRecord::decode(&raw, RecordLayout::X64);
        assert!(matches!(result, Err(Error::InvalidRecord { .. })));
    }
}
