use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from a slide file.
///
/// The TIFF parser and the pyramid reader only ever touch the header, the
/// IFD chain, the tile index arrays and the tiles a region overlaps, so a
/// gigapixel slide is never loaded whole. Implementations must be thread-safe.
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get an identifier for this resource (for logging).
    fn identifier(&self) -> &str;
}

/// Check that `[offset, offset + len)` lies inside a resource of `size` bytes.
fn check_range(offset: u64, len: usize, size: u64) -> Result<(), IoError> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        }),
    }
}

// =============================================================================
// LocalFileReader
// =============================================================================

/// Positional reads from a file on local disk.
///
/// The handle is shared behind a mutex; every read is a seek followed by a
/// `read_exact`, so concurrent readers never observe each other's cursor.
#[derive(Debug)]
pub struct LocalFileReader {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl LocalFileReader {
    /// Open a file for range reads.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Open`] if the file cannot be opened or stat'ed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let identifier = path.display().to_string();
        let open_error = |e: std::io::Error| IoError::Open {
            path: identifier.clone(),
            message: e.to_string(),
        };

        let file = File::open(path).map_err(open_error)?;
        let size = file.metadata().map_err(open_error)?.len();

        Ok(Self {
            file: Mutex::new(file),
            size,
            identifier,
        })
    }
}

impl RangeReader for LocalFileReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;

        let read_error = |e: std::io::Error| IoError::Read {
            identifier: self.identifier.clone(),
            offset,
            message: e.to_string(),
        };

        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.seek(SeekFrom::Start(offset)).map_err(read_error)?;
        file.read_exact(&mut buf).map_err(read_error)?;
        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// In-memory reader (tests)
// =============================================================================

#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct MemoryReader {
    data: Bytes,
}

#[cfg(test)]
impl MemoryReader {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
        }
    }
}

#[cfg(test)]
impl RangeReader for MemoryReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size())?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        "<memory>"
    }
}

// =============================================================================
// Endian Helper Functions
// =============================================================================
//
// Callers guarantee the slice is long enough; IFD parsing checks lengths
// before decoding entries.

/// Read a little-endian u16 from the start of a byte slice.
#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Read a big-endian u16 from the start of a byte slice.
#[inline]
pub fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// Read a little-endian u32 from the start of a byte slice.
#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a big-endian u32 from the start of a byte slice.
#[inline]
pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian u64 from the start of a byte slice.
#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

/// Read a big-endian u64 from the start of a byte slice.
#[inline]
pub fn read_u64_be(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(raw)
}
