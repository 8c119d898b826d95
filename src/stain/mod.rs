//! Macenko stain normalization.
//!
//! A [`StainNormalizer`] is fitted once on a reference tile (or restored from a
//! saved [`StainModel`]) and then applied to every extracted tile. The fitted
//! model is a small JSON document so a reference can be reused across runs.

mod color;
mod linalg;
mod macenko;
mod model;

pub use color::{od_matrix, od_to_rgb, rgb_to_od, standardize_brightness, MID_LIGHTNESS};
pub use macenko::{
    MacenkoParams, StainNormalizer, DEFAULT_ALPHA, DEFAULT_BETA, DEFAULT_LIGHT_INTENSITY,
};
pub use model::StainModel;
