//! Container formats for tiled whole slide images.
//!
//! - [`tiff`]: TIFF/BigTIFF header, IFD and pyramid parsing
//! - [`jpeg`]: abbreviated JPEG tile streams and `JPEGTables` merging
//! - [`svs`]: Aperio ImageDescription metadata

pub mod jpeg;
pub mod svs;
pub mod tiff;

pub use svs::SvsMetadata;
