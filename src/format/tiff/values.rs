//! TIFF tag value reading.
//!
//! Values are either stored inline in the IFD entry or at an offset in the
//! file. Arrays such as TileOffsets are fetched with a single range read.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{IfdEntry, TiffHeader};
use super::tags::FieldType;

/// Reads tag values from a TIFF file, respecting its byte order.
pub struct ValueReader<'a, R: RangeReader + ?Sized> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader + ?Sized> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    /// Raw bytes of an entry's value, from the entry itself or from the file.
    pub fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(entry.inline_bytes()));
        }

        let size = usize::try_from(size).map_err(|_| TiffError::InvalidTagValue {
            tag: "value",
            message: format!("{} bytes does not fit in memory", size),
        })?;
        let offset = entry.value_offset(self.header.byte_order);
        Ok(self.reader.read_exact_at(offset, size)?)
    }

    /// Read a SHORT, LONG or LONG8 array as `u64` values.
    ///
    /// This is how TileOffsets and TileByteCounts are loaded.
    pub fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        let width = match field_type {
            FieldType::Short | FieldType::Long | FieldType::Long8 => field_type.size_in_bytes(),
            other => {
                return Err(TiffError::InvalidTagValue {
                    tag: "array",
                    message: format!("expected Short, Long, or Long8, got {:?}", other),
                })
            }
        };

        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry)?;
        let byte_order = self.header.byte_order;
        let values = bytes
            .chunks_exact(width)
            .map(|chunk| match field_type {
                FieldType::Short => byte_order.read_u16(chunk) as u64,
                FieldType::Long => byte_order.read_u32(chunk) as u64,
                _ => byte_order.read_u64(chunk),
            })
            .collect();
        Ok(values)
    }

    /// Read an ASCII value, dropping the NUL terminator.
    pub fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        if entry.field_type != Some(FieldType::Ascii) {
            return Err(TiffError::InvalidTagValue {
                tag: "string",
                message: format!("expected Ascii, got type {}", entry.field_type_raw),
            });
        }

        let bytes = self.read_bytes(entry)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::tiff::parser::{ByteOrder, Ifd};
    use crate::io::MemoryReader;

    fn header() -> TiffHeader {
        TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            is_bigtiff: false,
            first_ifd_offset: 8,
        }
    }

    /// One-entry IFD followed by `payload` at offset 18.
    fn single_entry(field_type: u16, count: u32, value: [u8; 4]) -> IfdEntry {
        let mut bytes = 1u16.to_le_bytes().to_vec();
        bytes.extend_from_slice(&324u16.to_le_bytes());
        bytes.extend_from_slice(&field_type.to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
        bytes.extend_from_slice(&value);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        Ifd::parse(&bytes, &header()).unwrap().entries.remove(0)
    }

    #[test]
    fn test_read_long_array_at_offset() {
        let mut file = vec![0u8; 16];
        for v in [100u32, 200, 300] {
            file.extend_from_slice(&v.to_le_bytes());
        }
        let reader = MemoryReader::new(file);
        let hdr = header();
        let entry = single_entry(4, 3, 16u32.to_le_bytes());

        let values = ValueReader::new(&reader, &hdr).read_u64_array(&entry).unwrap();
        assert_eq!(values, vec![100, 200, 300]);
    }

    #[test]
    fn test_read_inline_short_array() {
        let reader = MemoryReader::new(vec![0u8; 8]);
        let hdr = header();
        let entry = single_entry(3, 2, [0x10, 0x00, 0x20, 0x00]);

        let values = ValueReader::new(&reader, &hdr).read_u64_array(&entry).unwrap();
        assert_eq!(values, vec![16, 32]);
    }

    #[test]
    fn test_read_string_strips_nul() {
        let mut file = vec![0u8; 8];
        file.extend_from_slice(b"Aperio|MPP = 0.25\0");
        let reader = MemoryReader::new(file);
        let hdr = header();
        let entry = single_entry(2, 18, 8u32.to_le_bytes());

        let text = ValueReader::new(&reader, &hdr).read_string(&entry).unwrap();
        assert_eq!(text, "Aperio|MPP = 0.25");
    }

    #[test]
    fn test_read_errors() {
        let reader = MemoryReader::new(vec![0u8; 8]);
        let hdr = header();
        let values = ValueReader::new(&reader, &hdr);

        let past_end = single_entry(4, 4, 100u32.to_le_bytes());
        assert!(matches!(values.read_u64_array(&past_end), Err(TiffError::Io(_))));

        let ascii = single_entry(2, 2, [b'a', 0, 0, 0]);
        assert!(matches!(values.read_u64_array(&ascii), Err(TiffError::InvalidTagValue { .. })));

        let long = single_entry(4, 1, [1, 0, 0, 0]);
        assert!(matches!(values.read_string(&long), Err(TiffError::InvalidTagValue { .. })));

        let unknown = single_entry(12, 1, [0; 4]);
        assert!(matches!(values.read_bytes(&unknown), Err(TiffError::UnknownFieldType(12))));
    }
}
