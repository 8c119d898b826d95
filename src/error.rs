use std::time::Duration;

use thiserror::Error;

/// I/O errors raised while reading byte ranges from a slide file
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// The file could not be opened or its metadata read
    #[error("Failed to open {path}: {message}")]
    Open { path: String, message: String },

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// A positional read failed
    #[error("Read failed on {identifier} at offset {offset}: {message}")]
    Read {
        identifier: String,
        offset: u64,
        message: String,
    },
}

/// Errors that can occur when parsing tiled TIFF pyramids
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain the requested structure
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// IFD offset points outside the file
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from an IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type, count or value
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Compression scheme this reader cannot decode
    #[error("Unsupported compression: {0} (only JPEG and uncompressed tiles are supported)")]
    UnsupportedCompression(String),

    /// The image is stored in strips, so there are no tiles to read
    #[error("Unsupported organization: file uses strips instead of tiles")]
    StripOrganization,

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors raised by region reading backends.
#[derive(Debug, Clone, Error)]
pub enum ReaderError {
    /// The requested backend could not be initialized in this build or environment
    #[error("Backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// Backend identifier is not known at all
    #[error("Unknown reader backend: {0}")]
    UnknownBackend(String),

    /// The slide file could not be opened or decoded
    #[error("Failed to open slide {path}: {message}")]
    Open { path: String, message: String },

    /// Requested pyramid level does not exist
    #[error("Invalid level {level}: slide has {level_count} levels")]
    InvalidLevel { level: usize, level_count: usize },

    /// Reading pixels failed mid-extraction
    #[error("Region read failed: {message}")]
    RegionRead { message: String },

    /// Stored tile bytes could not be decoded into pixels
    #[error("Failed to decode tile ({tile_x}, {tile_y}) of stored level {level}: {message}")]
    TileDecode {
        level: usize,
        tile_x: u32,
        tile_y: u32,
        message: String,
    },
}

/// Errors raised while loading an annotation into a boolean raster.
#[derive(Debug, Clone, Error)]
pub enum AnnotationError {
    /// Annotation file extension is neither `.png` nor `.json`
    #[error("Unsupported annotation format: {extension}")]
    UnsupportedFormat { extension: String },

    /// I/O error while reading the annotation file
    #[error("I/O error reading annotation {path}: {message}")]
    Io { path: String, message: String },

    /// The raster annotation could not be decoded
    #[error("Failed to decode annotation image: {message}")]
    Decode { message: String },

    /// The polygon document is malformed
    #[error("Invalid annotation document: {message}")]
    Json { message: String },

    /// A polygon has fewer than three vertices
    #[error("Polygon {index} has {points} points, need at least 3")]
    InvalidPolygon { index: usize, points: usize },
}

/// Errors raised by the Macenko stain normalizer.
#[derive(Debug, Clone, Error)]
pub enum StainError {
    /// Too few pixels survived background filtering to estimate stain vectors
    #[error("Insufficient tissue in reference tile: {pixels} optical density pixels above threshold")]
    InsufficientTissue { pixels: usize },

    /// Linear algebra on the reference produced no usable solution
    #[error("Degenerate stain estimate: {reason}")]
    Degenerate { reason: String },

    /// I/O error while persisting or loading a model
    #[error("I/O error on stain model {path}: {message}")]
    Io { path: String, message: String },

    /// Model file is not a valid stain model document
    #[error("Invalid stain model document: {message}")]
    Json { message: String },
}

/// Errors raised by patch saving backends.
#[derive(Debug, Clone, Error)]
pub enum SaveError {
    /// Writing to the destination failed
    #[error("I/O error writing {path}: {message}")]
    Io { path: String, message: String },

    /// Encoding the tile into the output format failed
    #[error("Failed to encode patch: {message}")]
    Encode { message: String },

    /// An appended tile does not match the container's tile shape
    #[error("Patch shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

impl SaveError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        SaveError::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors that abort extraction of one slide.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// Region read failure
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    /// Annotation setup failure
    #[error("Annotation error: {0}")]
    Annotation(#[from] AnnotationError),

    /// Stain normalization failure
    #[error("Stain error: {0}")]
    Stain(#[from] StainError),

    /// Saving a patch failed
    #[error("Save error: {0}")]
    Save(#[from] SaveError),

    /// The optional tissue classifier failed
    #[error("Tissue classifier error: {message}")]
    Classifier { message: String },

    /// Patch size, stride or level cannot drive a traversal
    #[error("Invalid extraction parameters: {message}")]
    InvalidParams { message: String },

    /// Extraction was cancelled between tiles (deadline expired)
    #[error("Extraction cancelled after {tiles_visited} candidate tiles")]
    Cancelled { tiles_visited: u64 },
}

impl ExtractError {
    /// Whether a fresh attempt at the same job might succeed.
    ///
    /// Only transient I/O qualifies; setup and data errors repeat deterministically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExtractError::Reader(ReaderError::RegionRead { .. })
                | ExtractError::Save(SaveError::Io { .. })
        )
    }
}

/// Configuration and batch setup errors. Always fatal before any job starts.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path}: {message}")]
    Read { path: String, message: String },

    /// Config file is not a valid pipeline document
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// Required field is absent or empty
    #[error("Missing required configuration field: {0}")]
    MissingField(&'static str),

    /// Field value is out of range or inconsistent
    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },

    /// Per-slide lists have different lengths
    #[error("{field} has {actual} entries but wsi_paths has {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Reader backend unavailable during setup
    #[error("Reader setup failed: {0}")]
    Reader(#[from] ReaderError),

    /// Annotation source rejected during setup
    #[error("Annotation setup failed: {0}")]
    Annotation(#[from] AnnotationError),

    /// Stain model could not be prepared during setup
    #[error("Stain setup failed: {0}")]
    Stain(#[from] StainError),
}

/// Terminal outcome of a job the scheduler gave up on.
#[derive(Debug, Clone, Error)]
pub enum JobFailure {
    /// The job returned a non-retryable error
    #[error("{0}")]
    Failed(ExtractError),

    /// The job exceeded its deadline
    #[error("Timed out after {after:?}")]
    TimedOut { after: Duration },

    /// The job panicked on its worker thread
    #[error("Panicked: {message}")]
    Panicked { message: String },

    /// Every allowed attempt failed with a retryable error
    #[error("Gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: ExtractError },
}
