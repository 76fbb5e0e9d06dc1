//! Presentation decoding for completed image streams.
//!
//! Pure functions over a descriptor's reassembled bytes; the ingest path
//! never calls these, the read-side consumers do.
use crate::cache::{StreamEntry, StreamKind};
use crate::types::PixelFormat;

/// Displayable pixel data recovered from a completed stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub format: &'static str,
    pub width: u16,
    pub height: u16,
    pub data: Vec<u8>,
}

/// Convert an image stream's reassembled bytes into presentation form.
/// Callers should check `done` first; bytes of a stream still in flight
/// decode too, but the result is provisional. Returns `None` for non-image
/// descriptors and formats with no presentation mapping.
pub fn decode_image(entry: &StreamEntry) -> Option<DecodedImage> {
    let StreamKind::Image { format, width, height } = &entry.kind else {
        return None;
    };
    let bytes = entry.buffer.full_bytes();
    match format {
        PixelFormat::Rgb565 => Some(DecodedImage {
            format: "RGB",
            width: *width,
            height: *height,
            data: rgb565_to_rgb888(&bytes),
        }),
        PixelFormat::Rgb888 => Some(DecodedImage {
            format: "RGB888",
            width: *width,
            height: *height,
            data: bytes,
        }),
        PixelFormat::Grayscale8 => Some(DecodedImage {
            format: "grayscale",
            width: *width,
            height: *height,
            data: bytes,
        }),
        _ => None,
    }
}

/// Expand big-endian packed 16-bit pixels to 24-bit RGB. An odd trailing
/// byte is ignored.
fn rgb565_to_rgb888(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() / 2 * 3);
    for px in bytes.chunks_exact(2) {
        let pixel = u16::from_be_bytes([px[0], px[1]]);
        let r = ((pixel >> 11) & 0x1f) as u8;
        let g = ((pixel >> 5) & 0x3f) as u8;
        let b = (pixel & 0x1f) as u8;
        out.push((r << 3) | (r >> 2));
        out.push((g << 2) | (g >> 4));
        out.push((b << 3) | (b >> 2));
    }
    out
}
