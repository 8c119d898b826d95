//! TIFF and BigTIFF structure parsing for pyramidal slides.
//!
//! # Key Concepts
//!
//! - **Byte order**: declared in the header (II = little-endian, MM = big-endian).
//!   Every multi-byte value is read through it.
//!
//! - **Classic TIFF vs BigTIFF**: 32-bit versus 64-bit offsets and counts.
//!   Both are handled transparently.
//!
//! - **IFD (Image File Directory)**: one per stored image. Slides have one per
//!   pyramid level plus label, macro and thumbnail images.
//!
//! - **Inline vs offset values**: small values sit in the IFD entry, larger
//!   ones at an offset it points to.

mod parser;
mod pyramid;
mod tags;
mod values;

pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use pyramid::{PyramidLevel, TiffPyramid, TileData};
pub use tags::{Compression, FieldType, Photometric, TiffTag};
pub use values::ValueReader;

#[cfg(test)]
pub(crate) use pyramid::tests::{build_tiff, LevelSpec};
