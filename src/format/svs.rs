//! Aperio SVS metadata.
//!
//! SVS files are tiled TIFFs whose base ImageDescription carries scanner
//! metadata as pipe-separated `key = value` pairs:
//!
//! ```text
//! Aperio Image Library v12.0.15
//! 46920x33600 (256x256) JPEG/RGB Q=70|AppMag = 20|MPP = 0.499
//! ```
//!
//! Pixel access goes through the generic TIFF pyramid; only the resolution
//! fields are read here.

/// Resolution metadata from an SVS ImageDescription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvsMetadata {
    /// Microns per pixel at level 0
    pub mpp: Option<f64>,

    /// Objective magnification (e.g. 20, 40)
    pub magnification: Option<f64>,

    /// Scanner vendor, when recognised
    pub vendor: Option<String>,
}

impl SvsMetadata {
    /// Parse an ImageDescription. Unknown keys and unparsable values are ignored.
    pub fn parse(description: &str) -> Self {
        let mut metadata = SvsMetadata::default();
        if description.contains("Aperio") {
            metadata.vendor = Some("Aperio".to_string());
        }

        for part in description.split('|') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0);
            match key.trim() {
                "MPP" => metadata.mpp = value,
                "AppMag" => metadata.magnification = value,
                _ => {}
            }
        }

        metadata
    }
}
