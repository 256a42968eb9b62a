//! Perception seam: screen capture and element detection live outside this
//! crate (an external object-detection + captioning service). The loop only
//! sees this trait.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;

/// One captured screen frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: DynamicImage) -> Self {
        Self { image, captured_at: Utc::now() }
    }

    /// Encode as base64 JPEG for the oracle payload.
    pub fn to_jpeg_base64(&self) -> Result<String> {
        let mut buffer = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buffer, image::ImageFormat::Jpeg)
            .context("Failed to encode frame as JPEG")?;
        Ok(general_purpose::STANDARD.encode(buffer.into_inner()))
    }
}

/// A detected on-screen element. `bbox` is [x, y, width, height] in pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub kind: String,
    pub text: String,
    pub bbox: [i32; 4],
    pub confidence: f64,
    pub interactable: bool,
}

impl Element {
    /// Center point, the natural click target.
    pub fn center(&self) -> (i32, i32) {
        (self.bbox[0] + self.bbox[2] / 2, self.bbox[1] + self.bbox[3] / 2)
    }
}

/// Fingerprint of the detected element list, used as the state key for
/// learned experience. Only the first 20 elements contribute; order is
/// canonicalized so detector jitter does not change the hash.
pub fn ui_context_hash(elements: &[Element]) -> String {
    if elements.is_empty() {
        return "empty".to_string();
    }
    let mut features: Vec<String> = elements
        .iter()
        .take(20)
        .map(|e| {
            let text: String = e.text.chars().take(30).collect();
            format!("{}:{}", e.kind, text)
        })
        .collect();
    features.sort();

    let mut hasher = Sha256::new();
    hasher.update(features.join("|").as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

/// External screen observer. Implementations must enforce their own
/// timeouts; an empty element list is a valid answer, not an error.
#[async_trait]
pub trait PerceptionProvider: Send + Sync {
    async fn capture(&self) -> Result<Frame>;
    async fn detect_elements(&self, frame: &Frame) -> Result<Vec<Element>>;
}
