//! Image source collaborator: content key path resolution happens in
//! [`crate::config::Config`]; this module only decodes files into RGBA8.

use std::path::Path;

use anyhow::Context;

use crate::render::SourceImage;

/// A decoded image, tightly packed RGBA8, owned.
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn as_source(&self) -> SourceImage<'_> {
        SourceImage {
            pixels: &self.pixels,
            width: self.width,
            height: self.height,
        }
    }
}

/// Decode an image file into RGBA8. Format is sniffed from the contents;
/// marquees are PNGs in practice but anything `image` understands works.
pub fn load(path: &Path) -> anyhow::Result<DecodedImage> {
    let img = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    anyhow::ensure!(width > 0 && height > 0, "empty image {}", path.display());
    Ok(DecodedImage {
        width,
        height,
        pixels: img.into_raw(),
    })
}
