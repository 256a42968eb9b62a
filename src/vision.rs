//! Frame comparison: "did the last action actually change anything on
//! screen". A cheap perceptual hash gate first, then a stricter pixel diff
//! when the hashes agree. Comparison failures assume "changed" so a
//! measurement bug can never block progress.

use anyhow::Result;
use colored::*;
use image::imageops::FilterType;
use image::DynamicImage;
use sha2::{Digest, Sha256};

use crate::perception::Frame;

pub struct VisionVerifier {
    threshold: f64,
    stuck_count: u32,
    max_stuck: u32,
}

impl Default for VisionVerifier {
    fn default() -> Self {
        Self::new(0.02, 3)
    }
}

impl VisionVerifier {
    pub fn new(threshold: f64, max_stuck: u32) -> Self {
        Self { threshold, stuck_count: 0, max_stuck }
    }

    /// Perceptual hash: 16x16 grayscale, each pixel thresholded against the
    /// image mean, the bit string hashed.
    pub fn compute_hash(image: &DynamicImage) -> String {
        let small = image.resize_exact(16, 16, FilterType::Lanczos3).to_luma8();
        let pixels: Vec<u8> = small.pixels().map(|p| p.0[0]).collect();
        let avg = pixels.iter().map(|&p| p as u32).sum::<u32>() / pixels.len() as u32;
        let bits: String = pixels
            .iter()
            .map(|&p| if p as u32 > avg { '1' } else { '0' })
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(bits.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// True if the screen meaningfully changed between the two frames.
    /// Counts consecutive "unchanged" verdicts toward the stuck state.
    pub fn changed(&mut self, before: &Frame, after: &Frame) -> bool {
        match self.compare(&before.image, &after.image) {
            Ok(true) => {
                self.stuck_count = 0;
                true
            }
            Ok(false) => {
                self.stuck_count += 1;
                false
            }
            Err(e) => {
                eprintln!("{} Vision comparison error: {}", "⚠️".yellow(), e);
                self.stuck_count = 0;
                true
            }
        }
    }

    fn compare(&self, before: &DynamicImage, after: &DynamicImage) -> Result<bool> {
        if Self::compute_hash(before) != Self::compute_hash(after) {
            return Ok(true);
        }

        // Hashes matched; run the stricter pixel diff before declaring the
        // screen frozen.
        let b = before.resize_exact(256, 256, FilterType::Lanczos3).to_rgb8();
        let a = after.resize_exact(256, 256, FilterType::Lanczos3).to_rgb8();

        let mut changed_pixels = 0usize;
        for (pb, pa) in b.pixels().zip(a.pixels()) {
            let delta: u32 = pb
                .0
                .iter()
                .zip(pa.0.iter())
                .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs())
                .sum();
            if delta > 30 {
                changed_pixels += 1;
            }
        }

        let ratio = changed_pixels as f64 / (256.0 * 256.0);
        Ok(ratio >= self.threshold)
    }

    /// Stuck once `max_stuck` consecutive comparisons saw no change.
    pub fn is_stuck(&self) -> bool {
        self.stuck_count >= self.max_stuck
    }

    pub fn stuck_count(&self) -> u32 {
        self.stuck_count
    }

    pub fn reset(&mut self) {
        self.stuck_count = 0;
    }
}
