// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image to 1-bit raster conversion for thermal printers.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, GenericImageView, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image is empty")]
    Empty,

    #[error("image of {width}x{height} dots exceeds the printer's 65535-row raster limit")]
    TooLarge { width: u32, height: u32 },
}

/// `GS v 0` carries width (in bytes) and height as 16-bit values.
const MAX_RASTER_ROWS: u32 = u16::MAX as u32;
const MAX_RASTER_WIDTH_DOTS: u32 = u16::MAX as u32 * 8;

/// Packed monochrome bitmap, MSB first, 1 = black dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    /// Bytes per row (width in dots rounded up to a multiple of 8).
    pub width_bytes: usize,
    /// Rows.
    pub height: usize,
    pub data: Vec<u8>,
}

impl RasterImage {
    /// Decode base64 image data (PNG, JPEG, ...), optionally prefixed with a
    /// `data:` URL header.
    #[instrument(skip(encoded), fields(len = encoded.len()))]
    pub fn from_base64(encoded: &str, max_width: u32, threshold: u8) -> Result<Self, RasterError> {
        let body = match encoded.split_once(";base64,") {
            Some((_, body)) => body,
            None => encoded,
        };
        let cleaned: String = body.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = STANDARD.decode(cleaned)?;
        let img = image::load_from_memory(&bytes)?;
        Self::from_image(&img, max_width, threshold)
    }

    /// Scale down to `max_width` dots if wider, then threshold.
    ///
    /// Transparent pixels count as paper (white).
    pub fn from_image(img: &DynamicImage, max_width: u32, threshold: u8) -> Result<Self, RasterError> {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return Err(RasterError::Empty);
        }

        let scaled;
        let img = if max_width > 0 && w > max_width {
            scaled = img.resize(max_width, u32::MAX, FilterType::Triangle);
            debug!(from_w = w, to_w = scaled.width(), "Scaling image to paper width");
            &scaled
        } else {
            img
        };

        let (width, height) = img.dimensions();
        if height > MAX_RASTER_ROWS || width > MAX_RASTER_WIDTH_DOTS {
            return Err(RasterError::TooLarge { width, height });
        }

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let width_bytes = (width as usize).div_ceil(8);
        let mut data = vec![0u8; width_bytes * height as usize];

        for (x, y, pixel) in rgba.enumerate_pixels() {
            let [r, g, b, a] = pixel.0;
            if a < 128 {
                continue;
            }
            let luma = (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000;
            if luma < u32::from(threshold) {
                let idx = y as usize * width_bytes + x as usize / 8;
                data[idx] |= 0x80 >> (x % 8);
            }
        }

        Ok(Self {
            width_bytes,
            height: height as usize,
            data,
        })
    }
}
