//! Grid difference signature.
//!
//! The perceptual signature overlays a 9x9 grid of sample points on the
//! luma channel, takes the difference of each point to its eight
//! neighbours, and quantizes every difference to five levels. The result
//! is tolerant of resizing and recompression while distinguishing
//! structurally different images. Small subsequences of the vector
//! ("words") serve as coarse bucketing terms for index-side search.

use image::{DynamicImage, GrayImage};

use super::FingerprintError;

pub const GRID_SIZE: usize = 9;

/// Neighbour offsets in fixed order; out-of-grid neighbours contribute 0.
const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

pub const VECTOR_LEN: usize = GRID_SIZE * GRID_SIZE * NEIGHBOR_OFFSETS.len();
/// Three base-5 entries per packed byte.
pub const PACKED_LEN: usize = VECTOR_LEN / 3;
pub const WORD_COUNT: usize = 100;
pub const WORD_LENGTH: usize = 10;

/// Differences closer to zero than this (8-bit luma units) count as flat.
const FLAT_THRESHOLD: f64 = 2.0;

/// Computes perceptual signatures from decoded images.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureGenerator;

impl SignatureGenerator {
    pub fn generate(&self, img: &DynamicImage) -> Result<ImageSignature, FingerprintError> {
        let luma = img.to_luma8();
        let (width, height) = luma.dimensions();
        if width == 0 || height == 0 {
            return Err(FingerprintError::Compute("image has no pixels".to_string()));
        }

        let levels = grid_levels(&luma);
        let diffs = neighbor_diffs(&levels);
        Ok(ImageSignature {
            vector: quantize(&diffs),
        })
    }
}

/// A quantized signature vector. Entries are in `{-2, -1, 0, 1, 2}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSignature {
    vector: Vec<i8>,
}

impl ImageSignature {
    pub fn vector(&self) -> &[i8] {
        &self.vector
    }

    /// Packs the vector three entries per byte (base-5 digits).
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector
            .chunks(3)
            .map(|chunk| {
                chunk
                    .iter()
                    .fold(0u8, |acc, &v| acc * 5 + (v + 2) as u8)
            })
            .collect()
    }

    /// Unpacks a wire signature produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FingerprintError> {
        if bytes.len() != PACKED_LEN {
            return Err(FingerprintError::Encoding(format!(
                "packed signature must be {} bytes, got {}",
                PACKED_LEN,
                bytes.len()
            )));
        }

        let mut vector = Vec::with_capacity(VECTOR_LEN);
        for &byte in bytes {
            if byte >= 125 {
                return Err(FingerprintError::Encoding(format!(
                    "packed byte {} out of range",
                    byte
                )));
            }
            vector.push((byte / 25) as i8 - 2);
            vector.push((byte / 5 % 5) as i8 - 2);
            vector.push((byte % 5) as i8 - 2);
        }
        Ok(Self { vector })
    }

    /// Derives the coarse bucketing words: overlapping subsequences of the
    /// vector at evenly spaced offsets, each packed into one integer.
    pub fn words(&self) -> Vec<u64> {
        let stride = (VECTOR_LEN - WORD_LENGTH) / (WORD_COUNT - 1);
        (0..WORD_COUNT)
            .map(|i| {
                let start = i * stride;
                self.vector[start..start + WORD_LENGTH]
                    .iter()
                    .fold(0u64, |acc, &v| acc * 5 + (v + 2) as u64)
            })
            .collect()
    }
}

fn grid_levels(luma: &GrayImage) -> [[f64; GRID_SIZE]; GRID_SIZE] {
    let (width, height) = luma.dimensions();
    let patch = (width.min(height) / 20).max(2);

    let mut levels = [[0.0; GRID_SIZE]; GRID_SIZE];
    for (gy, row) in levels.iter_mut().enumerate() {
        for (gx, level) in row.iter_mut().enumerate() {
            let cx = (gx as u32 + 1) * width / (GRID_SIZE as u32 + 1);
            let cy = (gy as u32 + 1) * height / (GRID_SIZE as u32 + 1);
            *level = patch_average(luma, cx, cy, patch);
        }
    }
    levels
}

fn patch_average(luma: &GrayImage, cx: u32, cy: u32, patch: u32) -> f64 {
    let (width, height) = luma.dimensions();
    let half = patch / 2;
    let x0 = cx.saturating_sub(half);
    let y0 = cy.saturating_sub(half);
    let x1 = (cx + half + 1).min(width);
    let y1 = (cy + half + 1).min(height);

    let mut sum = 0u64;
    for y in y0..y1 {
        for x in x0..x1 {
            sum += u64::from(luma.get_pixel(x, y).0[0]);
        }
    }
    let count = u64::from(x1 - x0) * u64::from(y1 - y0);
    sum as f64 / count as f64
}

fn neighbor_diffs(levels: &[[f64; GRID_SIZE]; GRID_SIZE]) -> Vec<f64> {
    let mut diffs = Vec::with_capacity(VECTOR_LEN);
    for gy in 0..GRID_SIZE as i32 {
        for gx in 0..GRID_SIZE as i32 {
            for (dx, dy) in NEIGHBOR_OFFSETS {
                let (nx, ny) = (gx + dx, gy + dy);
                let in_grid =
                    (0..GRID_SIZE as i32).contains(&nx) && (0..GRID_SIZE as i32).contains(&ny);
                if in_grid {
                    diffs.push(
                        levels[ny as usize][nx as usize] - levels[gy as usize][gx as usize],
                    );
                } else {
                    diffs.push(0.0);
                }
            }
        }
    }
    diffs
}

/// Quantizes differences to five levels. Flat differences become 0; the
/// rest split at the median of their polarity, so the cutoffs adapt to
/// the image's own contrast.
fn quantize(diffs: &[f64]) -> Vec<i8> {
    let lights: Vec<f64> = diffs.iter().copied().filter(|d| *d > FLAT_THRESHOLD).collect();
    let darks: Vec<f64> = diffs.iter().copied().filter(|d| *d < -FLAT_THRESHOLD).collect();
    let light_cut = median(lights);
    let dark_cut = median(darks);

    diffs
        .iter()
        .map(|&d| {
            if d > FLAT_THRESHOLD {
                if d >= light_cut {
                    2
                } else {
                    1
                }
            } else if d < -FLAT_THRESHOLD {
                if d <= dark_cut {
                    -2
                } else {
                    -1
                }
            } else {
                0
            }
        })
        .collect()
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values[values.len() / 2]
}
