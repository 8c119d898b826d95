//! JPEG stream handling for tiled TIFF slides.
//!
//! # Abbreviated JPEG Streams
//!
//! Aperio SVS and most JPEG-compressed pyramidal TIFFs store each tile as an
//! abbreviated stream without quantization (DQT) or Huffman (DHT) tables.
//! The tables live once per level in the `JPEGTables` tag and are merged with
//! each tile before decoding:
//!
//! ```text
//! tables: SOI | DQT | DHT | EOI
//! tile:   SOI | SOF | SOS | scan | EOI
//! merged: SOI | DQT | DHT | SOF | SOS | scan | EOI
//! ```
//!
//! # Colour Transform
//!
//! A 3-component stream without an Adobe marker is assumed to be YCbCr by
//! decoders. Tiles tagged as RGB in the TIFF get an APP14 segment with
//! transform 0 inserted after SOI so their samples are taken as-is.

use bytes::{Bytes, BytesMut};

// =============================================================================
// JPEG Markers
// =============================================================================

/// Start Of Image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Define Huffman Table marker
pub const DHT: [u8; 2] = [0xFF, 0xC4];

/// Define Quantization Table marker
pub const DQT: [u8; 2] = [0xFF, 0xDB];

/// Start Of Scan marker
pub const SOS: [u8; 2] = [0xFF, 0xDA];

/// Application segment 14 (Adobe) marker
pub const APP14: [u8; 2] = [0xFF, 0xEE];

/// Adobe APP14 segment declaring untransformed (RGB) components.
const ADOBE_RGB_SEGMENT: [u8; 16] = [
    0xFF, 0xEE, 0x00, 0x0E, b'A', b'd', b'o', b'b', b'e', 0x00, 0x64, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

// =============================================================================
// JPEG Stream Analysis
// =============================================================================

/// Markers that precede the first SOS, in order.
fn header_markers(data: &[u8]) -> Vec<[u8; 2]> {
    let mut markers = Vec::new();
    if data.len() < 4 || data[0..2] != SOI {
        return markers;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = [data[pos], data[pos + 1]];
        markers.push(marker);
        if marker == SOS {
            break;
        }

        // Standalone markers carry no length field.
        let standalone = matches!(marker[1], 0x00 | 0x01 | 0xD0..=0xD9 | 0xFF);
        if !standalone && pos + 3 < data.len() {
            let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 2 + length;
        } else {
            pos += 2;
        }
    }
    markers
}

/// Whether the stream reaches SOS without defining DQT or DHT tables.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    let markers = header_markers(data);
    markers.last() == Some(&SOS) && !markers.iter().any(|m| *m == DQT || *m == DHT)
}

/// Whether the stream carries its own quantization tables.
pub fn is_complete_stream(data: &[u8]) -> bool {
    header_markers(data).contains(&DQT)
}

// =============================================================================
// JPEG Tables Merging
// =============================================================================

/// Merge `JPEGTables` with an abbreviated tile.
///
/// The EOI of the tables and the SOI of the tile are dropped, giving
/// SOI + tables + tile content + EOI.
pub fn merge_jpeg_tables(tables: &[u8], tile_data: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile_data);
    }
    if tile_data.is_empty() {
        return Bytes::new();
    }

    let tables_end = if tables.len() >= 2 && tables[tables.len() - 2..] == EOI {
        tables.len() - 2
    } else {
        tables.len()
    };
    let tile_start = if tile_data.len() >= 2 && tile_data[0..2] == SOI {
        2
    } else {
        0
    };

    let mut result = BytesMut::with_capacity(tables_end + tile_data.len() - tile_start);
    result.extend_from_slice(&tables[..tables_end]);
    result.extend_from_slice(&tile_data[tile_start..]);
    result.freeze()
}

/// Insert an Adobe RGB marker after SOI unless one is already present.
fn mark_as_rgb(data: Bytes) -> Bytes {
    if data.len() < 2 || data[0..2] != SOI || header_markers(&data).contains(&APP14) {
        return data;
    }
    let mut result = BytesMut::with_capacity(data.len() + ADOBE_RGB_SEGMENT.len());
    result.extend_from_slice(&SOI);
    result.extend_from_slice(&ADOBE_RGB_SEGMENT);
    result.extend_from_slice(&data[2..]);
    result.freeze()
}

/// Turn a stored tile into a standalone JPEG stream.
///
/// # Arguments
/// * `tables` - The level's `JPEGTables`, if any
/// * `tile_data` - Raw tile bytes as stored
/// * `is_rgb` - The level's photometric interpretation is RGB rather than YCbCr
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile_data: &[u8], is_rgb: bool) -> Bytes {
    let stream = match tables {
        Some(tables) if !is_complete_stream(tile_data) && is_abbreviated_stream(tile_data) => {
            merge_jpeg_tables(tables, tile_data)
        }
        _ => Bytes::copy_from_slice(tile_data),
    };

    if is_rgb {
        mark_as_rgb(stream)
    } else {
        stream
    }
}

// =============================================================================
// Tests
// =============================================================================
