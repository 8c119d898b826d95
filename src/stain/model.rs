//! Fitted Macenko parameters and their JSON persistence.

use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::StainError;

/// Fitted stain basis and saturation reference.
///
/// `stain_vectors` is the 3x2 stain matrix in optical-density space: row `c`
/// holds channel `c` (R, G, B), column 0 is hematoxylin and column 1 eosin.
/// `max_sat` holds the 99th-percentile concentration of each stain in the
/// reference tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StainModel {
    pub stain_vectors: [[f64; 2]; 3],

    #[serde(deserialize_with = "deserialize_max_sat")]
    pub max_sat: [f64; 2],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaxSatRepr {
    Flat([f64; 2]),
    Column([[f64; 1]; 2]),
}

fn deserialize_max_sat<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[f64; 2], D::Error> {
    Ok(match MaxSatRepr::deserialize(deserializer)? {
        MaxSatRepr::Flat(values) => values,
        MaxSatRepr::Column([[a], [b]]) => [a, b],
    })
}

impl StainModel {
    /// Build a model from two OD-space stain vectors.
    pub fn from_vectors(hematoxylin: [f64; 3], eosin: [f64; 3], max_sat: [f64; 2]) -> Self {
        let mut stain_vectors = [[0.0; 2]; 3];
        for c in 0..3 {
            stain_vectors[c] = [hematoxylin[c], eosin[c]];
        }
        Self {
            stain_vectors,
            max_sat,
        }
    }

    /// Column `k` of the stain matrix.
    pub fn stain(&self, k: usize) -> [f64; 3] {
        [
            self.stain_vectors[0][k],
            self.stain_vectors[1][k],
            self.stain_vectors[2][k],
        ]
    }

    /// The stain matrix as a 3x2 array.
    pub fn matrix(&self) -> Array2<f64> {
        Array2::from_shape_fn((3, 2), |(c, k)| self.stain_vectors[c][k])
    }

    pub fn to_json(&self) -> Result<String, StainError> {
        serde_json::to_string_pretty(self).map_err(|e| StainError::Json {
            message: e.to_string(),
        })
    }

    pub fn from_json(text: &str) -> Result<Self, StainError> {
        serde_json::from_str(text).map_err(|e| StainError::Json {
            message: e.to_string(),
        })
    }

    /// Write the model as a small JSON document.
    pub fn save(&self, path: &Path) -> Result<(), StainError> {
        std::fs::write(path, self.to_json()?).map_err(|e| StainError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, StainError> {
        let text = std::fs::read_to_string(path).map_err(|e| StainError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&text)
    }
}
