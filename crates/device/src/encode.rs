//! Re-encoding screenshots for upload.
//!
//! Frames come off the device as full-resolution PNG. Before they reach the
//! model they can be downscaled and turned into JPEG, which cuts request size
//! several times over. Detection and fingerprints always run on the original.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use std::io::Cursor;
use tracing::{debug, warn};

use droidloop_config::{ConversationConfig, UploadFormat};
use droidloop_core::Screenshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageEncoder {
    /// 0 disables resizing
    resize_width: u32,
    format: UploadFormat,
    jpeg_quality: u8,
}

impl Default for ImageEncoder {
    /// Full-resolution PNG, i.e. frames pass through untouched.
    fn default() -> Self {
        Self {
            resize_width: 0,
            format: UploadFormat::Png,
            jpeg_quality: 85,
        }
    }
}

impl ImageEncoder {
    pub fn from_config(config: &ConversationConfig) -> Self {
        Self {
            resize_width: config.screenshot_resize_width,
            format: config.image_format,
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    /// True when `encode` can never change a PNG frame.
    pub fn is_passthrough(&self) -> bool {
        self.resize_width == 0 && self.format == UploadFormat::Png
    }

    pub fn resizes(&self) -> bool {
        self.resize_width > 0
    }

    /// Downscale and re-encode `shot`.
    ///
    /// Frames that do not decode, or that are already in the target format
    /// and size, are returned unchanged.
    pub fn encode(&self, shot: Screenshot) -> Screenshot {
        if self.is_passthrough() && shot.media_type == "image/png" {
            return shot;
        }

        let img = match image::load_from_memory(&shot.data) {
            Ok(img) => img,
            Err(e) => {
                debug!(error = %e, bytes = shot.len(), "Frame not decodable, sending as captured");
                return shot;
            }
        };

        let img = self.resize(img);
        let (width, height) = img.dimensions();
        let (output, media_type) = match self.format {
            UploadFormat::Png => (ImageOutputFormat::Png, "image/png"),
            UploadFormat::Jpeg => (ImageOutputFormat::Jpeg(self.jpeg_quality), "image/jpeg"),
        };
        if media_type == shot.media_type && (width, height) == (shot.width, shot.height) {
            return shot;
        }

        // JPEG has no alpha channel.
        let img = match self.format {
            UploadFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
            UploadFormat::Png => img,
        };

        let mut buf = Cursor::new(Vec::new());
        if let Err(e) = img.write_to(&mut buf, output) {
            warn!(error = %e, "Could not re-encode frame, sending as captured");
            return shot;
        }

        let data = buf.into_inner();
        debug!(
            from = shot.len(),
            to = data.len(),
            width,
            height,
            media_type,
            "Encoded frame for upload"
        );
        Screenshot {
            data,
            media_type: media_type.into(),
            width,
            height,
        }
    }

    fn resize(&self, img: DynamicImage) -> DynamicImage {
        let (width, height) = img.dimensions();
        if self.resize_width == 0 || width <= self.resize_width {
            return img;
        }
        let target_height = ((height as u64 * self.resize_width as u64) / width as u64).max(1) as u32;
        img.resize_exact(self.resize_width, target_height, FilterType::Lanczos3)
    }
}
