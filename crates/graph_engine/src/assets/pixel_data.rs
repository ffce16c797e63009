//! Decoded pixel data and the texture-loader contract

use std::path::Path;
use thiserror::Error;

/// Texture decoding failures
#[derive(Debug, Error)]
pub enum PixelDataError {
    /// The file could not be read
    #[error("failed to read texture file: {0}")]
    Io(#[from] std::io::Error),
    /// The file content could not be decoded
    #[error("failed to decode texture: {0}")]
    Decode(String),
    /// No registered loader handles the extension
    #[error("unsupported texture format: {extension}")]
    UnsupportedFormat {
        /// The unrecognized file extension
        extension: String,
    },
}

/// Decoded image data ready for upload
///
/// Pixels are tightly packed RGBA8 unless a compressed loader says otherwise.
/// Callers upload and then drop the value; the engine never retains pixels.
#[derive(Debug, Clone)]
pub struct PixelData {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Number of mip levels present in `pixels`
    pub mip_levels: u32,
    /// Total byte size of `pixels`
    pub size_bytes: u64,
    /// The texel data
    pub pixels: Vec<u8>,
}

impl PixelData {
    /// Consume the value, returning the pixel storage
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// A texture file decoder
pub trait TextureLoader {
    /// Whether this loader handles the given lowercase file extension
    fn supports(&self, extension: &str) -> bool;

    /// Decode a file into pixel data
    fn load(&self, path: &Path) -> Result<PixelData, PixelDataError>;
}

/// Loader for common image files (PNG, JPG, BMP, TGA), decoded to RGBA8
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileLoader;

impl TextureLoader for ImageFileLoader {
    fn supports(&self, extension: &str) -> bool {
        matches!(extension, "png" | "jpg" | "jpeg" | "bmp" | "tga")
    }

    fn load(&self, path: &Path) -> Result<PixelData, PixelDataError> {
        let decoded = image::open(path)
            .map_err(|error| PixelDataError::Decode(error.to_string()))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        let pixels = decoded.into_raw();
        Ok(PixelData {
            width,
            height,
            mip_levels: 1,
            size_bytes: pixels.len() as u64,
            pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_advertises_supported_extensions() {
        let loader = ImageFileLoader;
        assert!(loader.supports("png"));
        assert!(loader.supports("tga"));
        assert!(!loader.supports("dds"));
    }

    #[test]
    fn test_missing_file_reports_decode_failure() {
        let loader = ImageFileLoader;
        let result = loader.load(Path::new("definitely/not/here.png"));
        assert!(result.is_err());
    }
}
