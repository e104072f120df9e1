//! Lookup texture decoding.
use std::path::Path;

use image::imageops::flip_vertical_in_place;
use preset::Size;

/// Tightly packed RGBA8 pixels, bottom row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LutImage {
    pub size: Size,
    pub pixels: Vec<u8>,
}

impl LutImage {
    pub fn solid(size: Size, rgba: [u8; 4]) -> Self {
        let count = size.width as usize * size.height as usize;
        Self {
            size,
            pixels: rgba.repeat(count),
        }
    }

    /// Colour of the texel at the given row-major index, bottom row first.
    pub fn texel(&self, index: usize) -> Option<[u8; 4]> {
        let start = index.checked_mul(4)?;
        let bytes = self.pixels.get(start..start + 4)?;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Decodes an image file and flips it so row 0 is the bottom, as GL expects.
pub fn load(path: &Path) -> Result<LutImage, image::ImageError> {
    let mut rgba = image::open(path)?.into_rgba8();
    flip_vertical_in_place(&mut rgba);
    let (width, height) = rgba.dimensions();
    Ok(LutImage {
        size: Size::new(width, height),
        pixels: rgba.into_raw(),
    })
}
