//! Asset loading interfaces
//!
//! Only the texture-loader contract lives in the engine: loaders decode a
//! file into [`PixelData`] and the caller frees the pixels after upload.

pub mod pixel_data;

pub use pixel_data::{ImageFileLoader, PixelData, PixelDataError, TextureLoader};
