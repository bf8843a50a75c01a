//! Configuration loading, validation, and management for droidloop.
//!
//! Loads configuration from `--config <path>`, `./droidloop.toml` or
//! `~/.droidloop/config.toml` (first that exists) with environment variable
//! overrides. Validates all settings at startup.

pub mod profile;

pub use profile::GameProfile;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use droidloop_core::SessionLimits;

/// The root configuration structure.
///
/// Maps directly to `droidloop.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Game profile name (file stem under `profiles_dir`)
    #[serde(default = "default_profile")]
    pub profile: String,

    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,

    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: PathBuf,

    #[serde(default = "default_true")]
    pub save_screenshots: bool,

    /// Also save detector-annotated frames (debugging)
    #[serde(default)]
    pub save_annotated: bool,

    /// Reasoning service settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Step and error budgets, delays and timeouts
    #[serde(default)]
    pub session: SessionConfig,

    /// History window
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Post-action screen stabilization
    #[serde(default)]
    pub settle: SettleConfig,

    /// adb connection
    #[serde(default)]
    pub device: DeviceConfig,

    /// Element-detection service
    #[serde(default)]
    pub detection: DetectionConfig,
}

fn default_profile() -> String {
    "default".into()
}
fn default_profiles_dir() -> PathBuf {
    PathBuf::from("profiles")
}
fn default_screenshot_dir() -> PathBuf {
    PathBuf::from("screenshots")
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("session", &self.session)
            .field("conversation", &self.conversation)
            .field("settle", &self.settle)
            .field("device", &self.device)
            .field("detection", &self.detection)
            .field("profile", &self.profile)
            .field("profiles_dir", &self.profiles_dir)
            .field("screenshot_dir", &self.screenshot_dir)
            .field("save_screenshots", &self.save_screenshots)
            .field("save_annotated", &self.save_annotated)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP timeout for one request
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_provider_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            base_url: default_base_url(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Pause between steps
    #[serde(default = "default_step_delay")]
    pub step_delay_ms: u64,

    /// Pause before retrying a failed step
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_secs: u64,

    #[serde(default = "default_decision_timeout")]
    pub decision_timeout_secs: u64,

    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
}

fn default_max_steps() -> u64 {
    100
}
fn default_max_consecutive_errors() -> u32 {
    5
}
fn default_step_delay() -> u64 {
    1000
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_capture_timeout() -> u64 {
    30
}
fn default_decision_timeout() -> u64 {
    120
}
fn default_action_timeout() -> u64 {
    30
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_consecutive_errors: default_max_consecutive_errors(),
            step_delay_ms: default_step_delay(),
            retry_delay_ms: default_retry_delay(),
            capture_timeout_secs: default_capture_timeout(),
            decision_timeout_secs: default_decision_timeout(),
            action_timeout_secs: default_action_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_secs)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Observations that keep their screenshot in the history
    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// Downscale screenshots wider than this before upload; 0 keeps full
    /// resolution. Coordinates stay in device pixels either way.
    #[serde(default)]
    pub screenshot_resize_width: u32,

    /// Encoding of screenshots sent to the model
    #[serde(default)]
    pub image_format: UploadFormat,

    /// JPEG quality, 1 to 100
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// Image encoding for uploaded screenshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadFormat {
    Png,
    #[default]
    Jpeg,
}

fn default_max_images() -> usize {
    8
}

fn default_jpeg_quality() -> u8 {
    85
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_images: default_max_images(),
            screenshot_resize_width: 0,
            image_format: UploadFormat::default(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
    /// Give up waiting for a stable screen after this long
    #[serde(default = "default_settle_timeout")]
    pub timeout_ms: u64,

    /// Poll interval between screenshots
    #[serde(default = "default_settle_interval")]
    pub interval_ms: u64,

    /// Consecutive identical fingerprints that count as settled
    #[serde(default = "default_stable_frames")]
    pub stable_frames: u32,

    /// Run detection on the settled frame and use it as the next observation
    #[serde(default = "default_true")]
    pub capture_after_action: bool,
}

fn default_settle_timeout() -> u64 {
    2000
}
fn default_settle_interval() -> u64 {
    300
}
fn default_stable_frames() -> u32 {
    2
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_settle_timeout(),
            interval_ms: default_settle_interval(),
            stable_frames: default_stable_frames(),
            capture_after_action: true,
        }
    }
}

impl SettleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// adb serial; required when more than one device is attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    #[serde(default = "default_adb_path")]
    pub adb_path: String,

    /// adb server host (`adb -H`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adb_host: Option<String>,

    /// adb server port (`adb -P`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adb_port: Option<u16>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_adb_path() -> String {
    "adb".into()
}
fn default_command_timeout() -> u64 {
    30
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: None,
            adb_path: default_adb_path(),
            adb_host: None,
            adb_port: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// OmniParser-style parse endpoint
    #[serde(default = "default_detection_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_detection_timeout")]
    pub timeout_secs: u64,

    /// Fail the observation when detection fails instead of running without elements
    #[serde(default)]
    pub required: bool,

    /// Bottom band (fraction of screen height) treated as an ad banner
    #[serde(default = "default_ignore_bottom")]
    pub ignore_bottom_fraction: f32,
}

fn default_detection_endpoint() -> String {
    "http://127.0.0.1:8000/parse/".into()
}
fn default_detection_timeout() -> u64 {
    60
}
fn default_ignore_bottom() -> f32 {
    0.1
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_detection_endpoint(),
            timeout_secs: default_detection_timeout(),
            required: false,
            ignore_bottom_fraction: default_ignore_bottom(),
        }
    }
}

impl AppConfig {
    /// File name looked up in the working directory.
    pub const LOCAL_FILE: &'static str = "droidloop.toml";

    /// Load configuration.
    ///
    /// Uses `explicit` when given, else the first existing of
    /// `./droidloop.toml` and `~/.droidloop/config.toml`, else defaults.
    /// Then applies environment overrides:
    /// - `DROIDLOOP_API_KEY` (highest priority), `ANTHROPIC_API_KEY`
    /// - `DROIDLOOP_MODEL`
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::ReadError {
                        path: path.to_path_buf(),
                        reason: "file does not exist".into(),
                    });
                }
                Self::load_from(path)?
            }
            None => match Self::search_paths().into_iter().find(|p| p.exists()) {
                Some(path) => Self::load_from(&path)?,
                None => {
                    tracing::info!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Candidate config files, in lookup order.
    pub fn search_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from(Self::LOCAL_FILE),
            Self::config_dir().join("config.toml"),
        ]
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".droidloop")
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("DROIDLOOP_API_KEY").or_else(|| non_empty("ANTHROPIC_API_KEY")) {
            self.provider.api_key = Some(key);
        }

        if let Some(model) = non_empty("DROIDLOOP_MODEL") {
            self.provider.model = model;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 1.0".into(),
            ));
        }

        if self.provider.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "provider.max_tokens must be > 0".into(),
            ));
        }

        if self.session.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "session.max_steps must be > 0".into(),
            ));
        }

        if self.session.max_consecutive_errors == 0 {
            return Err(ConfigError::ValidationError(
                "session.max_consecutive_errors must be > 0".into(),
            ));
        }

        if self.conversation.max_images == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.max_images must be at least 1".into(),
            ));
        }

        if !(1..=100).contains(&self.conversation.jpeg_quality) {
            return Err(ConfigError::ValidationError(
                "conversation.jpeg_quality must be between 1 and 100".into(),
            ));
        }

        if self.settle.stable_frames == 0 || self.settle.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "settle.stable_frames and settle.interval_ms must be > 0".into(),
            ));
        }

        if !(0.0..0.5).contains(&self.detection.ignore_bottom_fraction) {
            return Err(ConfigError::ValidationError(
                "detection.ignore_bottom_fraction must be in [0.0, 0.5)".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Budgets for the control loop.
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_steps: self.session.max_steps,
            max_consecutive_errors: self.session.max_consecutive_errors,
            max_retained_observations: self.conversation.max_images,
        }
    }

    /// Load the configured game profile from `profiles_dir`.
    pub fn game_profile(&self) -> Result<GameProfile, ConfigError> {
        GameProfile::load(&self.profiles_dir, &self.profile)
    }

    /// Generate a default config TOML string (for `config --init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            session: SessionConfig::default(),
            conversation: ConversationConfig::default(),
            settle: SettleConfig::default(),
            device: DeviceConfig::default(),
            detection: DetectionConfig::default(),
            profile: default_profile(),
            profiles_dir: default_profiles_dir(),
            screenshot_dir: default_screenshot_dir(),
            save_screenshots: true,
            save_annotated: false,
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Game profile '{name}' not found in {dir}")]
    ProfileNotFound { name: String, dir: PathBuf },
}
