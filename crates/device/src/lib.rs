//! Device-side collaborators for droidloop.
//!
//! - [`AdbDevice`]: the `Device` implementation for Android over `adb`
//! - [`OmniParserClient`]: the `ElementDetector` implementation over HTTP
//! - [`fingerprint`]: perceptual screen digests used for settle detection
//! - [`ImageEncoder`]: downscaling and JPEG encoding before upload

pub mod adb;
pub mod encode;
pub mod fingerprint;
pub mod omniparser;

pub use adb::AdbDevice;
pub use encode::ImageEncoder;
pub use fingerprint::fingerprint;
pub use omniparser::OmniParserClient;
