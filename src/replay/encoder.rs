// src/replay/encoder.rs
//! Snapshot image processing
//!
//! Decodes incoming frame bytes, optionally downscales so neither dimension
//! exceeds the configured bound (aspect ratio preserved), re-encodes as JPEG
//! at the configured quality, and base64-encodes the result. Frames that
//! cannot be decoded pass through as-is rather than blocking delivery.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tracing::debug;

/// A processed snapshot ready for batch assembly
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// Base64 of the compressed frame
    pub base64: String,

    /// Final pixel width after any downscale
    pub width: u32,

    /// Final pixel height after any downscale
    pub height: u32,
}

/// Resize + JPEG + base64 stage of the replay pipeline
pub struct SnapshotEncoder {
    quality: u8,
    max_dimension: Option<u32>,
}

impl SnapshotEncoder {
    /// `quality` is JPEG quality 0-100; `max_dimension` bounds both axes
    pub fn new(quality: u8, max_dimension: Option<u32>) -> Self {
        Self {
            quality: quality.min(100),
            max_dimension,
        }
    }

    /// Process one raw frame.
    ///
    /// Infallible by design: undecodable input is base64-encoded untouched
    /// with the caller-supplied dimensions, so a bad frame degrades quality
    /// instead of dropping data.
    pub fn encode(&self, raw: &[u8], fallback_width: u32, fallback_height: u32) -> EncodedImage {
        let decoded = match image::load_from_memory(raw) {
            Ok(img) => img,
            Err(e) => {
                debug!("Frame not decodable ({}), passing through raw bytes", e);
                return EncodedImage {
                    base64: BASE64.encode(raw),
                    width: fallback_width,
                    height: fallback_height,
                };
            }
        };

        let img = match self.max_dimension {
            Some(max) if decoded.width() > max || decoded.height() > max => {
                let (w, h) = scaled_dimensions(decoded.width(), decoded.height(), max);
                debug!(
                    "Downscaling {}x{} -> {}x{}",
                    decoded.width(),
                    decoded.height(),
                    w,
                    h
                );
                decoded.resize_exact(w, h, FilterType::Nearest)
            }
            _ => decoded,
        };

        let (width, height) = (img.width(), img.height());
        let rgb = img.to_rgb8();

        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        match rgb.write_with_encoder(encoder) {
            Ok(()) => {
                debug!(
                    "Compressed frame {} bytes -> {} bytes (quality {})",
                    raw.len(),
                    jpeg.len(),
                    self.quality
                );
                EncodedImage {
                    base64: BASE64.encode(&jpeg),
                    width,
                    height,
                }
            }
            Err(e) => {
                debug!("JPEG encode failed ({}), passing through raw bytes", e);
                EncodedImage {
                    base64: BASE64.encode(raw),
                    width: fallback_width,
                    height: fallback_height,
                }
            }
        }
    }
}

/// Uniform scale so that max(new_width, new_height) <= max_dimension,
/// preserving aspect ratio. Dimensions never round down to zero.
fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let scale = f64::min(
        max_dimension as f64 / width as f64,
        max_dimension as f64 / height as f64,
    );
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    (new_width, new_height)
}
