//! Screen fingerprints.
//!
//! A fingerprint is a SHA-256 over a 16x16 grayscale thumbnail of the frame,
//! quantized to 16 levels, with the bottom ad-banner band cropped off. Two
//! frames that differ only in sensor noise, a blinking caret or a rotating
//! banner ad hash the same.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use sha2::{Digest, Sha256};
use std::io::Cursor;

use droidloop_core::ScreenFingerprint;

const THUMB_SIZE: u32 = 16;

/// Fingerprint an encoded frame.
///
/// Bytes that do not decode as an image are hashed verbatim.
pub fn fingerprint(data: &[u8], ignore_bottom_fraction: f32) -> ScreenFingerprint {
    match image::load_from_memory(data) {
        Ok(img) => fingerprint_image(&img, ignore_bottom_fraction),
        Err(e) => {
            tracing::trace!(error = %e, bytes = data.len(), "Frame not decodable, hashing raw bytes");
            ScreenFingerprint(Sha256::digest(data).into())
        }
    }
}

fn fingerprint_image(img: &DynamicImage, ignore_bottom_fraction: f32) -> ScreenFingerprint {
    let (width, height) = img.dimensions();
    let keep = ((height as f32) * (1.0 - ignore_bottom_fraction.clamp(0.0, 0.9))) as u32;
    let cropped = img.crop_imm(0, 0, width, keep.max(1));

    let thumb = cropped
        .resize_exact(THUMB_SIZE, THUMB_SIZE, FilterType::Triangle)
        .to_luma8();

    let mut hasher = Sha256::new();
    hasher.update(width.to_le_bytes());
    hasher.update(height.to_le_bytes());
    for px in thumb.pixels() {
        hasher.update([px.0[0] >> 4]);
    }
    ScreenFingerprint(hasher.finalize().into())
}

/// Width and height of an encoded image, read from its header.
pub fn dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb, RgbImage};

    fn png(width: u32, height: u32, paint: impl Fn(u32, u32) -> [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb(paint(x, y)));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn identical_frames_match() {
        let a = png(90, 160, |x, _| [x as u8, 0, 0]);
        let b = png(90, 160, |x, _| [x as u8, 0, 0]);
        assert_eq!(fingerprint(&a, 0.1), fingerprint(&b, 0.1));
    }

    #[test]
    fn different_frames_differ() {
        let black = png(90, 160, |_, _| [0, 0, 0]);
        let white = png(90, 160, |_, _| [255, 255, 255]);
        assert_ne!(fingerprint(&black, 0.1), fingerprint(&white, 0.1));
    }

    #[test]
    fn bottom_band_ignored() {
        // Only the bottom 5% differs: an ad banner rotating
        let a = png(90, 200, |_, y| if y >= 190 { [255, 0, 0] } else { [10, 10, 10] });
        let b = png(90, 200, |_, y| if y >= 190 { [0, 0, 255] } else { [10, 10, 10] });
        assert_eq!(fingerprint(&a, 0.1), fingerprint(&b, 0.1));
        assert_ne!(fingerprint(&a, 0.0), fingerprint(&b, 0.0));
    }

    #[test]
    fn undecodable_bytes_hash_verbatim() {
        assert_eq!(fingerprint(b"frame-1", 0.1), fingerprint(b"frame-1", 0.1));
        assert_ne!(fingerprint(b"frame-1", 0.1), fingerprint(b"frame-2", 0.1));
    }

    #[test]
    fn dimensions_from_header() {
        let data = png(108, 240, |_, _| [0, 0, 0]);
        assert_eq!(dimensions(&data), Some((108, 240)));
        assert_eq!(dimensions(b"not an image"), None);
    }
}
