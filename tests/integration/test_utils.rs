//! Test utilities for integration tests.
//!
//! Synthetic slides, recording savers and scripted batch jobs.

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use wsi_patcher::error::{ExtractError, ReaderError, SaveError};
use wsi_patcher::extract::{ExtractionSummary, PatchSaver};
use wsi_patcher::slide::Tile;
use wsi_patcher::stain::od_to_rgb;
use wsi_patcher::BatchJob;

// =============================================================================
// Synthetic Images
// =============================================================================

/// Blank glass colour.
pub const GLASS: Rgb<u8> = Rgb([240, 240, 240]);

/// Stained tissue colour (not a pen signature).
pub const TISSUE: Rgb<u8> = Rgb([150, 80, 170]);

/// Blue marker ink.
pub const BLUE_INK: Rgb<u8> = Rgb([30, 60, 200]);

/// A slide of blank glass with `TISSUE` filling `[x0, x1) x [y0, y1)`.
pub fn slide_with_tissue(width: u32, height: u32, tissue: (u32, u32, u32, u32)) -> RgbImage {
    let (x0, y0, x1, y1) = tissue;
    RgbImage::from_fn(width, height, |x, y| {
        if x >= x0 && x < x1 && y >= y0 && y < y1 {
            TISSUE
        } else {
            GLASS
        }
    })
}

/// A varied, non-uniform slide where every tile has intensity structure.
pub fn textured_slide(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 200) as u8 + 40, (y % 180) as u8 + 50, ((x + y) % 150) as u8 + 80])
    })
}

fn unit(v: [f64; 3]) -> [f64; 3] {
    let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    v.map(|x| x / n)
}

/// Tile whose optical density is an exact mixture of hematoxylin and eosin.
pub fn synthetic_he(width: u32, height: u32) -> Tile {
    let h = unit([0.65, 0.70, 0.29]);
    let e = unit([0.07, 0.99, 0.11]);
    Tile::from_fn(width, height, |x, y| {
        let ch = 0.1 + 1.2 * x as f64 / width as f64;
        let ce = 0.1 + 0.9 * y as f64 / height as f64;
        let od = [
            h[0] * ch + e[0] * ce,
            h[1] * ch + e[1] * ce,
            h[2] * ch + e[2] * ce,
        ];
        od_to_rgb(&od, 255.0)
    })
}

/// Save an image as PNG under `dir` and return its path.
pub fn write_png(dir: &Path, name: &str, image: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    image.save(&path).expect("write test image");
    path
}

// =============================================================================
// Tiled TIFF Files
// =============================================================================

/// One tiled, uncompressed RGB level of a test TIFF.
///
/// Distinct tile blobs are stored once; `layout` maps each grid tile (row
/// major) to a blob, so huge levels of repeated content stay small on disk.
pub struct TiledLevel {
    pub width: u32,
    pub height: u32,
    pub tile: u32,
    pub blobs: Vec<Vec<u8>>,
    pub layout: Vec<usize>,
}

impl TiledLevel {
    /// Every tile holds `fill`.
    pub fn uniform(width: u32, height: u32, tile: u32, fill: Rgb<u8>) -> Self {
        let count = width.div_ceil(tile) * height.div_ceil(tile);
        let blob = fill.0.iter().copied().cycle().take((tile * tile * 3) as usize).collect();
        Self {
            width,
            height,
            tile,
            blobs: vec![blob],
            layout: vec![0; count as usize],
        }
    }

    /// Cut `image` into tiles, padding edge tiles with black.
    pub fn from_image(image: &RgbImage, tile: u32) -> Self {
        let (width, height) = image.dimensions();
        let mut blobs = Vec::new();
        for ty in 0..height.div_ceil(tile) {
            for tx in 0..width.div_ceil(tile) {
                let mut padded = RgbImage::new(tile, tile);
                image::imageops::replace(
                    &mut padded,
                    image,
                    -i64::from(tx * tile),
                    -i64::from(ty * tile),
                );
                blobs.push(padded.into_raw());
            }
        }
        let layout = (0..blobs.len()).collect();
        Self {
            width,
            height,
            tile,
            blobs,
            layout,
        }
    }
}

/// Write a little-endian classic TIFF with one IFD per level.
///
/// `description` becomes the first level's ImageDescription.
pub fn write_tiled_tiff(
    dir: &Path,
    name: &str,
    levels: &[TiledLevel],
    description: Option<&str>,
) -> PathBuf {
    fn entry(out: &mut Vec<u8>, tag: u16, field_type: u16, count: u32, value: u32) {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&field_type.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }
    fn push_u32s(out: &mut Vec<u8>, values: impl Iterator<Item = u32>) -> u32 {
        let at = out.len() as u32;
        values.for_each(|v| out.extend_from_slice(&v.to_le_bytes()));
        at
    }

    let mut out = b"II*\0\0\0\0\0".to_vec();
    let mut next_pointer = 4usize;

    for (index, level) in levels.iter().enumerate() {
        let blob_at: Vec<u32> = level
            .blobs
            .iter()
            .map(|blob| {
                let at = out.len() as u32;
                out.extend_from_slice(blob);
                at
            })
            .collect();
        let offsets_at = push_u32s(&mut out, level.layout.iter().map(|&b| blob_at[b]));
        let counts_at = push_u32s(
            &mut out,
            level.layout.iter().map(|&b| level.blobs[b].len() as u32),
        );
        let description = description.filter(|_| index == 0).map(|text| {
            let at = out.len() as u32;
            out.extend_from_slice(text.as_bytes());
            out.push(0);
            (at, text.len() as u32 + 1)
        });
        if out.len() % 2 == 1 {
            out.push(0);
        }

        let ifd_at = out.len() as u32;
        out[next_pointer..next_pointer + 4].copy_from_slice(&ifd_at.to_le_bytes());

        let tiles = level.layout.len() as u32;
        assert!(tiles > 1, "single-tile levels need inline arrays");
        let mut ifd = Vec::new();
        entry(&mut ifd, 256, 4, 1, level.width);
        entry(&mut ifd, 257, 4, 1, level.height);
        entry(&mut ifd, 258, 3, 1, 8);
        entry(&mut ifd, 259, 3, 1, 1);
        entry(&mut ifd, 262, 3, 1, 2);
        if let Some((at, len)) = description {
            entry(&mut ifd, 270, 2, len, at);
        }
        entry(&mut ifd, 277, 3, 1, 3);
        entry(&mut ifd, 284, 3, 1, 1);
        entry(&mut ifd, 322, 3, 1, level.tile);
        entry(&mut ifd, 323, 3, 1, level.tile);
        entry(&mut ifd, 324, 4, tiles, offsets_at);
        entry(&mut ifd, 325, 4, tiles, counts_at);

        out.extend_from_slice(&((ifd.len() / 12) as u16).to_le_bytes());
        out.extend_from_slice(&ifd);
        next_pointer = out.len();
        out.extend_from_slice(&0u32.to_le_bytes());
    }

    let path = dir.join(name);
    std::fs::write(&path, out).expect("write test tiff");
    path
}

// =============================================================================
// Recording Saver
// =============================================================================

/// Saver keeping every committed tile in memory.
#[derive(Clone, Default)]
pub struct RecordingSaver {
    pub saved: Arc<Mutex<Vec<(String, Tile)>>>,
    pub finished: Arc<AtomicBool>,
}

impl RecordingSaver {
    pub fn names(&self) -> Vec<String> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn tiles(&self) -> Vec<Tile> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .map(|(_, tile)| tile.clone())
            .collect()
    }
}

impl PatchSaver for RecordingSaver {
    fn save(&mut self, tile: &Tile, name: &str) -> Result<(), SaveError> {
        self.saved
            .lock()
            .unwrap()
            .push((name.to_string(), tile.clone()));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SaveError> {
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Scripted Batch Jobs
// =============================================================================

/// What a [`ScriptedJob`] does when run.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    /// Fail the first `n` attempts with the given error, then succeed
    FailFirst(usize, ExtractError),
    FailAlways(ExtractError),
    Panic,
    /// Block until cancelled
    Hang,
}

/// A batch job counting its executions.
pub struct ScriptedJob {
    pub name: String,
    pub behavior: Behavior,
    pub runs: Arc<AtomicUsize>,
    pub saw_cancel: Arc<AtomicBool>,
}

impl ScriptedJob {
    pub fn new(name: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            runs: Arc::new(AtomicUsize::new(0)),
            saw_cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl BatchJob for ScriptedJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, cancel: Arc<AtomicBool>) -> Result<ExtractionSummary, ExtractError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        let done = ExtractionSummary {
            candidates: 1,
            saved: 1,
            ..Default::default()
        };

        match &self.behavior {
            Behavior::Succeed => Ok(done),
            Behavior::FailFirst(n, error) if run < *n => Err(error.clone()),
            Behavior::FailFirst(..) => Ok(done),
            Behavior::FailAlways(error) => Err(error.clone()),
            Behavior::Panic => panic!("scripted panic in {}", self.name),
            Behavior::Hang => {
                let started = Instant::now();
                while started.elapsed() < Duration::from_secs(10) {
                    if cancel.load(Ordering::Relaxed) {
                        self.saw_cancel.store(true, Ordering::SeqCst);
                        return Err(ExtractError::Cancelled { tiles_visited: 0 });
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(done)
            }
        }
    }
}

/// A retryable read failure.
pub fn transient_error() -> ExtractError {
    ReaderError::RegionRead {
        message: "connection reset by peer".to_string(),
    }
    .into()
}

/// A failure that no retry can fix.
pub fn permanent_error() -> ExtractError {
    ReaderError::Open {
        path: "missing.svs".to_string(),
        message: "No such file or directory".to_string(),
    }
    .into()
}
