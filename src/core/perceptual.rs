//! Difference hashing ("dHash") over a 9x8 luma grid.
//!
//! Each asset carries three hashes, one per bounding-box resolution, so an
//! image that was resized before ingestion still lines up with its original
//! at one of the scales.

use image::imageops::FilterType;
use image::DynamicImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const HASH_GRID_WIDTH: u32 = 9;
pub const HASH_GRID_HEIGHT: u32 = 8;

/// Hex form of the all-zero hash, stored when hashing is off or failed.
pub const SENTINEL_HASH: &str = "0000000000000000";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHashes {
    pub small: String,
    pub medium: String,
    pub large: String,
}

impl PerceptualHashes {
    pub fn sentinel() -> Self {
        Self {
            small: SENTINEL_HASH.to_string(),
            medium: SENTINEL_HASH.to_string(),
            large: SENTINEL_HASH.to_string(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.values().iter().all(|value| *value == SENTINEL_HASH)
    }

    pub fn values(&self) -> [&str; 3] {
        [&self.small, &self.medium, &self.large]
    }

    /// Hash values usable for matching; the sentinel matches nothing.
    pub fn matchable(&self) -> Vec<&str> {
        let mut values: Vec<&str> = self
            .values()
            .into_iter()
            .filter(|value| *value != SENTINEL_HASH)
            .collect();
        values.dedup();
        values
    }

    /// True when any of the three hashes equals any of `other`'s three.
    pub fn matches(&self, other: &PerceptualHashes) -> bool {
        let theirs = other.matchable();
        self.matchable().iter().any(|value| theirs.contains(value))
    }
}

/// Compute the 64-bit difference hash of `img`.
///
/// Bit `k = row * 8 + col` is set when the pixel at `col` is strictly darker
/// than its right-hand neighbour.
pub fn dhash(img: &DynamicImage) -> u64 {
    let gray = img.to_luma8();
    let grid = image::imageops::resize(
        &gray,
        HASH_GRID_WIDTH,
        HASH_GRID_HEIGHT,
        FilterType::Triangle,
    );

    let mut hash = 0u64;
    for y in 0..HASH_GRID_HEIGHT {
        for x in 0..HASH_GRID_WIDTH - 1 {
            let left = grid.get_pixel(x, y)[0];
            let right = grid.get_pixel(x + 1, y)[0];
            if left < right {
                hash |= 1 << (y * (HASH_GRID_WIDTH - 1) + x);
            }
        }
    }
    hash
}

pub fn to_hex(hash: u64) -> String {
    format!("{:016x}", hash)
}

/// Shrink `img` to fit a `bound`x`bound` box, keeping aspect, never upscaling.
pub fn fit_within(img: &DynamicImage, bound: u32) -> DynamicImage {
    if img.width() <= bound && img.height() <= bound {
        return img.clone();
    }
    img.resize(bound, bound, FilterType::Triangle)
}

/// Hash `img` at each of the three bounding-box resolutions in parallel.
pub fn hash_at_resolutions(img: &DynamicImage, resolutions: [u32; 3]) -> PerceptualHashes {
    let hashes: Vec<String> = resolutions
        .par_iter()
        .map(|bound| to_hex(dhash(&fit_within(img, *bound))))
        .collect();

    PerceptualHashes {
        small: hashes[0].clone(),
        medium: hashes[1].clone(),
        large: hashes[2].clone(),
    }
}
