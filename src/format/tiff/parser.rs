//! TIFF header and IFD parsing.
//!
//! # TIFF Header Structure
//!
//! ## Classic TIFF (8 bytes)
//! ```text
//! Bytes 0-1: Byte order ("II" little-endian, "MM" big-endian)
//! Bytes 2-3: Version (42)
//! Bytes 4-7: Offset to first IFD
//! ```
//!
//! ## BigTIFF (16 bytes)
//! ```text
//! Bytes 0-1:  Byte order
//! Bytes 2-3:  Version (43)
//! Bytes 4-5:  Offset byte size (8)
//! Bytes 6-7:  Reserved
//! Bytes 8-15: Offset to first IFD
//! ```
//!
//! # IFD Layout
//!
//! ```text
//! count | entry 0 | entry 1 | ... | entry n-1 | next IFD offset
//!
//! entry = tag (2) | type (2) | count (4 or 8) | value or offset (4 or 8)
//! ```
//!
//! Values that fit in the last field are stored there, left-justified.

use crate::error::TiffError;
use crate::io::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le};

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

const BYTE_ORDER_LITTLE_ENDIAN: [u8; 2] = *b"II";
const BYTE_ORDER_BIG_ENDIAN: [u8; 2] = *b"MM";

const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Upper bound on entries in one IFD; real slides use a few dozen.
pub const MAX_IFD_ENTRIES: u64 = 4096;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets and counts)
    pub is_bigtiff: bool,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Whether `bytes` starts with a TIFF or BigTIFF signature.
    pub fn has_signature(bytes: &[u8]) -> bool {
        if bytes.len() < 4 {
            return false;
        }
        let order = match [bytes[0], bytes[1]] {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return false,
        };
        matches!(order.read_u16(&bytes[2..4]), VERSION_TIFF | VERSION_BIGTIFF)
    }

    /// Parse a TIFF header from the first bytes of a file.
    ///
    /// # Arguments
    /// * `bytes` - At least 8 bytes; 16 for BigTIFF
    /// * `file_size` - Total file size, used to validate the first IFD offset
    ///
    /// # Errors
    /// - `FileTooSmall` if there aren't enough bytes for the header
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `InvalidVersion` if version is not 42 or 43
    /// - `InvalidBigTiffOffsetSize` if BigTIFF offset size is not 8
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let byte_order = match [bytes[0], bytes[1]] {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(u16::from_le_bytes([bytes[0], bytes[1]]))),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        let (is_bigtiff, first_ifd_offset) = match version {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            _ => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// 12 bytes for classic TIFF, 20 for BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count at the start of an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of an offset field (next IFD pointer, entry value field).
    #[inline]
    pub const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// One 12-byte (or 20-byte BigTIFF) directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    /// Raw tag number
    pub tag: u16,

    /// Decoded field type, `None` for types this parser does not handle
    pub field_type: Option<FieldType>,

    /// Field type number as stored
    pub field_type_raw: u16,

    /// Number of values
    pub count: u64,

    /// Raw value/offset field; only the first 4 bytes are meaningful in classic TIFF
    pub value_offset_bytes: [u8; 8],

    /// Whether the value is stored in `value_offset_bytes` rather than at an offset
    pub is_inline: bool,

    is_bigtiff: bool,
}

impl IfdEntry {
    /// Total size in bytes of the entry's values, `None` for unknown types.
    pub fn value_byte_size(&self) -> Option<u64> {
        let size = self.field_type?.size_in_bytes() as u64;
        size.checked_mul(self.count)
    }

    /// File offset of the values, meaningful only when `!is_inline`.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        if self.is_bigtiff {
            byte_order.read_u64(&self.value_offset_bytes)
        } else {
            byte_order.read_u32(&self.value_offset_bytes) as u64
        }
    }

    /// Single inline SHORT, LONG or LONG8 value.
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Short => Some(byte_order.read_u16(&self.value_offset_bytes) as u64),
            FieldType::Long => Some(byte_order.read_u32(&self.value_offset_bytes) as u64),
            FieldType::Long8 => Some(byte_order.read_u64(&self.value_offset_bytes)),
            _ => None,
        }
    }

    /// Single inline value that fits in a `u32`.
    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u64(byte_order)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// The inline value bytes (empty when the value lives at an offset).
    pub fn inline_bytes(&self) -> &[u8] {
        match self.value_byte_size() {
            Some(size) if self.is_inline => &self.value_offset_bytes[..size as usize],
            _ => &[],
        }
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    /// Entries in file order
    pub entries: Vec<IfdEntry>,

    /// Offset of the next IFD, 0 at the end of the chain
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Byte size of an IFD with `entry_count` entries.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> usize {
        header.ifd_count_size()
            + entry_count as usize * header.ifd_entry_size()
            + header.offset_size()
    }

    /// Parse an IFD from bytes starting at its entry count.
    ///
    /// # Errors
    /// `FileTooSmall` if `bytes` is shorter than the IFD it announces.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let byte_order = header.byte_order;
        let count_size = header.ifd_count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_count = if header.is_bigtiff {
            byte_order.read_u64(bytes)
        } else {
            byte_order.read_u16(bytes) as u64
        };
        if entry_count > MAX_IFD_ENTRIES {
            return Err(TiffError::InvalidTagValue {
                tag: "IFD",
                message: format!("{} entries exceeds limit of {}", entry_count, MAX_IFD_ENTRIES),
            });
        }

        let required = Self::calculate_size(entry_count, header);
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.ifd_entry_size();
        let value_size = header.offset_size();
        let mut entries = Vec::with_capacity(entry_count as usize);
        for i in 0..entry_count as usize {
            let raw = &bytes[count_size + i * entry_size..count_size + (i + 1) * entry_size];
            let tag = byte_order.read_u16(&raw[0..2]);
            let field_type_raw = byte_order.read_u16(&raw[2..4]);
            let field_type = FieldType::from_u16(field_type_raw);
            let count = if header.is_bigtiff {
                byte_order.read_u64(&raw[4..12])
            } else {
                byte_order.read_u32(&raw[4..8]) as u64
            };

            let value_start = entry_size - value_size;
            let mut value_offset_bytes = [0u8; 8];
            value_offset_bytes[..value_size].copy_from_slice(&raw[value_start..]);

            let is_inline = field_type
                .map(|t| t.fits_inline(count, header.is_bigtiff))
                .unwrap_or(false);

            entries.push(IfdEntry {
                tag,
                field_type,
                field_type_raw,
                count,
                value_offset_bytes,
                is_inline,
                is_bigtiff: header.is_bigtiff,
            });
        }

        let next_start = count_size + entry_count as usize * entry_size;
        let next_ifd_offset = if header.is_bigtiff {
            byte_order.read_u64(&bytes[next_start..])
        } else {
            byte_order.read_u32(&bytes[next_start..]) as u64
        };

        Ok(Ifd {
            entries,
            next_ifd_offset,
        })
    }

    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        let id = tag.as_u16();
        self.entries.iter().find(|e| e.tag == id)
    }

    /// Single inline numeric value of a tag.
    pub fn get_u32(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(tag)?.inline_u32(byte_order)
    }

    pub fn image_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::ImageWidth, byte_order)
    }

    pub fn image_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::ImageLength, byte_order)
    }

    pub fn tile_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::TileWidth, byte_order)
    }

    pub fn tile_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::TileLength, byte_order)
    }

    pub fn is_tiled(&self) -> bool {
        self.get_entry_by_tag(TiffTag::TileWidth).is_some()
            && self.get_entry_by_tag(TiffTag::TileOffsets).is_some()
    }

    pub fn is_stripped(&self) -> bool {
        self.get_entry_by_tag(TiffTag::StripOffsets).is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn header(byte_order: ByteOrder, is_bigtiff: bool) -> TiffHeader {
        TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset: 8,
        }
    }

    // -------------------------------------------------------------------------
    // TiffHeader
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_tiff_little_endian() {
        let bytes = [0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        let parsed = TiffHeader::parse(&bytes, 1000).unwrap();
        assert_eq!(parsed.byte_order, ByteOrder::LittleEndian);
        assert!(!parsed.is_bigtiff);
        assert_eq!(parsed.first_ifd_offset, 8);
    }

    #[test]
    fn test_parse_tiff_big_endian() {
        let bytes = [0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x03, 0xE8];
        let parsed = TiffHeader::parse(&bytes, 2000).unwrap();
        assert_eq!(parsed.byte_order, ByteOrder::BigEndian);
        assert_eq!(parsed.first_ifd_offset, 1000);
    }

    #[test]
    fn test_parse_bigtiff() {
        let bytes = [
            0x49, 0x49, 0x2B, 0x00, // II, 43
            0x08, 0x00, 0x00, 0x00, // offset size 8, reserved
            0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, // 4 GiB
        ];
        let parsed = TiffHeader::parse(&bytes, 10_000_000_000).unwrap();
        assert!(parsed.is_bigtiff);
        assert_eq!(parsed.first_ifd_offset, 1 << 32);
        assert_eq!(parsed.ifd_entry_size(), 20);
        assert_eq!(parsed.ifd_count_size(), 8);
        assert_eq!(parsed.offset_size(), 8);
    }

    #[test]
    fn test_parse_header_errors() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert!(matches!(TiffHeader::parse(&png, 100), Err(TiffError::InvalidMagic(_))));

        let bad_version = [0x49, 0x49, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&bad_version, 100),
            Err(TiffError::InvalidVersion(0))
        ));

        let short_bigtiff = [0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&short_bigtiff, 100),
            Err(TiffError::FileTooSmall { required: 16, actual: 8 })
        ));

        let bad_offset_size = [
            0x49, 0x49, 0x2B, 0x00, 0x04, 0x00, 0x00, 0x00, 0x10, 0, 0, 0, 0, 0, 0, 0,
        ];
        assert!(matches!(
            TiffHeader::parse(&bad_offset_size, 100),
            Err(TiffError::InvalidBigTiffOffsetSize(4))
        ));

        let past_end = [0x49, 0x49, 0x2A, 0x00, 0xE8, 0x03, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&past_end, 500),
            Err(TiffError::InvalidIfdOffset(1000))
        ));

        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49], 100),
            Err(TiffError::FileTooSmall { required: 8, actual: 2 })
        ));
    }

    #[test]
    fn test_signature() {
        assert!(TiffHeader::has_signature(b"II*\0rest"));
        assert!(TiffHeader::has_signature(b"MM\0*"));
        assert!(TiffHeader::has_signature(b"II+\0"));
        assert!(!TiffHeader::has_signature(b"\x89PNG"));
        assert!(!TiffHeader::has_signature(b"II"));
    }

    // -------------------------------------------------------------------------
    // Ifd
    // -------------------------------------------------------------------------

    fn classic_entry(tag: u16, field_type: u16, count: u32, value: [u8; 4]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(12);
        raw.extend_from_slice(&tag.to_le_bytes());
        raw.extend_from_slice(&field_type.to_le_bytes());
        raw.extend_from_slice(&count.to_le_bytes());
        raw.extend_from_slice(&value);
        raw
    }

    #[test]
    fn test_parse_classic_ifd() {
        let mut bytes = 4u16.to_le_bytes().to_vec();
        bytes.extend(classic_entry(256, 4, 1, 2048u32.to_le_bytes()));
        // SHORT values are left-justified in the value field.
        bytes.extend(classic_entry(322, 3, 1, [0x00, 0x01, 0xFF, 0xFF]));
        bytes.extend(classic_entry(324, 4, 12, 500u32.to_le_bytes()));
        bytes.extend(classic_entry(999, 12, 1, [0; 4]));
        bytes.extend(1234u32.to_le_bytes());

        let hdr = header(ByteOrder::LittleEndian, false);
        assert_eq!(Ifd::calculate_size(4, &hdr), bytes.len());
        let ifd = Ifd::parse(&bytes, &hdr).unwrap();

        assert_eq!(ifd.entries.len(), 4);
        assert_eq!(ifd.next_ifd_offset, 1234);
        assert_eq!(ifd.image_width(hdr.byte_order), Some(2048));
        assert_eq!(ifd.tile_width(hdr.byte_order), Some(256));
        assert_eq!(ifd.image_height(hdr.byte_order), None);

        let offsets = ifd.get_entry_by_tag(TiffTag::TileOffsets).unwrap();
        assert!(!offsets.is_inline);
        assert_eq!(offsets.value_offset(hdr.byte_order), 500);
        assert_eq!(offsets.value_byte_size(), Some(48));
        assert_eq!(offsets.inline_u32(hdr.byte_order), None);

        let unknown = &ifd.entries[3];
        assert_eq!(unknown.field_type, None);
        assert_eq!(unknown.field_type_raw, 12);
        assert!(!unknown.is_inline);
        assert!(ifd.is_tiled());
        assert!(!ifd.is_stripped());
    }

    #[test]
    fn test_parse_big_endian_short() {
        let mut bytes = 1u16.to_be_bytes().to_vec();
        bytes.extend_from_slice(&259u16.to_be_bytes());
        bytes.extend_from_slice(&3u16.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0x07, 0x00, 0x00]);
        bytes.extend_from_slice(&0u32.to_be_bytes());

        let hdr = header(ByteOrder::BigEndian, false);
        let ifd = Ifd::parse(&bytes, &hdr).unwrap();
        assert_eq!(ifd.get_u32(TiffTag::Compression, hdr.byte_order), Some(7));
        assert_eq!(ifd.next_ifd_offset, 0);
    }

    #[test]
    fn test_parse_bigtiff_ifd() {
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&325u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&(5u64 << 32).to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());

        let hdr = header(ByteOrder::LittleEndian, true);
        let ifd = Ifd::parse(&bytes, &hdr).unwrap();
        let entry = ifd.get_entry_by_tag(TiffTag::TileByteCounts).unwrap();
        assert!(entry.is_inline);
        assert_eq!(entry.inline_u64(hdr.byte_order), Some(5u64 << 32));
        assert_eq!(entry.inline_u32(hdr.byte_order), None);
        assert_eq!(entry.inline_bytes().len(), 8);
    }

    #[test]
    fn test_parse_truncated_ifd() {
        let mut bytes = 3u16.to_le_bytes().to_vec();
        bytes.extend(classic_entry(256, 4, 1, 64u32.to_le_bytes()));
        let hdr = header(ByteOrder::LittleEndian, false);
        assert!(matches!(
            Ifd::parse(&bytes, &hdr),
            Err(TiffError::FileTooSmall { required: 42, .. })
        ));
    }
}
