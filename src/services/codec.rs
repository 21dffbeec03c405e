//! Decode/encode facade over the `image` crate.
//!
//! WebP is decode-only: no caller needs webp output, and keeping the encode
//! set narrow avoids carrying an encoder.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbaImage};

/// Recognised image format tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Jpg,
    Jpeg,
    Png,
    Webp,
}

impl Format {
    /// Parse a format token such as the job's `imageExtension`.
    pub fn parse(token: &str) -> Result<Self, CodecError> {
        match token {
            "jpg" => Ok(Format::Jpg),
            "jpeg" => Ok(Format::Jpeg),
            "png" => Ok(Format::Png),
            "webp" => Ok(Format::Webp),
            other => Err(CodecError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Format::Jpg => "jpg",
            Format::Jpeg => "jpeg",
            Format::Png => "png",
            Format::Webp => "webp",
        }
    }

    /// MIME type reported to the blob store.
    pub fn content_type(self) -> &'static str {
        match self {
            Format::Jpg | Format::Jpeg => "image/jpeg",
            Format::Png => "image/png",
            Format::Webp => "image/webp",
        }
    }
}

/// Sniff the format from raw bytes.
pub fn detect(bytes: &[u8]) -> Result<Format, CodecError> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => Ok(Format::Jpg),
        Ok(ImageFormat::Png) => Ok(Format::Png),
        Ok(ImageFormat::WebP) => Ok(Format::Webp),
        Ok(other) => Err(CodecError::UnsupportedFormat(format!("{other:?}"))),
        Err(_) => Err(CodecError::UnsupportedFormat("unknown".to_string())),
    }
}

pub fn decode(bytes: &[u8], format: Format) -> Result<DynamicImage, CodecError> {
    let format = match format {
        Format::Jpg | Format::Jpeg => ImageFormat::Jpeg,
        Format::Png => ImageFormat::Png,
        Format::Webp => ImageFormat::WebP,
    };
    image::load_from_memory_with_format(bytes, format).map_err(CodecError::Image)
}

/// Encode a raster as jpg/jpeg/png.
pub fn encode(raster: &RgbaImage, format: Format) -> Result<Vec<u8>, CodecError> {
    let mut out = Cursor::new(Vec::new());
    match format {
        Format::Jpg | Format::Jpeg => {
            // JPEG carries no alpha channel.
            DynamicImage::ImageRgba8(raster.clone())
                .into_rgb8()
                .write_to(&mut out, ImageFormat::Jpeg)
                .map_err(CodecError::Image)?;
        }
        Format::Png => {
            raster
                .write_to(&mut out, ImageFormat::Png)
                .map_err(CodecError::Image)?;
        }
        Format::Webp => return Err(CodecError::UnsupportedFormat("webp".to_string())),
    }
    Ok(out.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}
