//! `droidloop play`: run one automation session.

use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use droidloop_agent::{AgentLoop, SessionSummary, stop_channel};
use droidloop_config::{AppConfig, DetectionConfig};
use droidloop_core::{ElementDetector, EventBus, SessionState};
use droidloop_device::{AdbDevice, OmniParserClient};

use super::sink::{self, SinkOptions};

/// Per-run overrides of the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct PlayArgs {
    /// Game profile to load from the profiles directory
    #[arg(short, long)]
    pub profile: Option<String>,

    /// adb serial of the device to use
    #[arg(short, long)]
    pub device: Option<String>,

    /// Maximum number of steps
    #[arg(short, long)]
    pub steps: Option<u64>,

    /// Pause between steps in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Extra context appended to the system prompt
    #[arg(long)]
    pub context: Option<String>,

    /// Screenshots kept in the conversation history
    #[arg(long)]
    pub max_images: Option<usize>,

    /// Skip element detection and estimate coordinates from the image
    #[arg(long)]
    pub no_detect: bool,

    /// Also save the detector's annotated screenshots
    #[arg(long)]
    pub save_annotated: bool,
}

impl PlayArgs {
    /// Fold the flags into `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(profile) = &self.profile {
            config.profile = profile.clone();
        }
        if let Some(serial) = &self.device {
            config.device.serial = Some(serial.clone());
        }
        if let Some(steps) = self.steps {
            config.session.max_steps = steps;
        }
        if let Some(delay) = self.delay_ms {
            config.session.step_delay_ms = delay;
        }
        if let Some(max_images) = self.max_images {
            config.conversation.max_images = max_images;
        }
        if self.no_detect {
            config.detection.enabled = false;
        }
        if self.save_annotated {
            config.save_annotated = true;
        }
    }
}

/// Directory that receives `session.log`, if the config can be resolved.
///
/// Config errors are left for [`run`] to report.
pub fn session_log_dir(config_path: Option<&Path>, args: &PlayArgs) -> Option<PathBuf> {
    let mut config = AppConfig::load(config_path).ok()?;
    args.apply(&mut config);
    Some(config.screenshot_dir)
}

pub async fn run(config_path: Option<&Path>, args: PlayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    args.apply(&mut config);
    config.validate().map_err(|e| {
        eprintln!("❌ {e}");
        e
    })?;

    let Some(provider) = droidloop_providers::from_config(&config.provider) else {
        eprintln!("❌ No API key configured.");
        eprintln!();
        eprintln!("   Set one of:");
        eprintln!("     export ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!("     export DROIDLOOP_API_KEY=sk-ant-...");
        eprintln!("   Or add `api_key` under [provider] in droidloop.toml");
        return Err("No API key configured".into());
    };

    let profile = config.game_profile().map_err(|e| {
        eprintln!("❌ {e}");
        e
    })?;

    let device = AdbDevice::connect(&config.device).await.map_err(|e| {
        eprintln!("❌ {e}");
        super::print_device_help();
        e
    })?;

    let detector = build_detector(&config.detection).await?;

    let (stop_handle, stop_signal) = stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!();
            println!("🛑 Stopping after the current step...");
            stop_handle.stop();
        }
    });

    let bus = Arc::new(EventBus::default());
    let sink_task = sink::spawn(
        bus.subscribe(),
        SinkOptions {
            dir: config.screenshot_dir.clone(),
            save_screenshots: config.save_screenshots,
            save_annotated: config.save_annotated,
        },
        true,
    );

    println!("🤖 Profile: {}  Model: {}", profile.name, config.provider.model);
    if detector.is_none() {
        println!("   Element detection off, coordinates will be estimated from the image");
    }

    let mut agent = AgentLoop::new(Arc::new(device), Arc::new(provider), config.clone(), profile)
        .with_event_bus(bus)
        .with_stop_signal(stop_signal);
    if let Some(detector) = detector {
        agent = agent.with_detector(detector);
    }
    if let Some(context) = args.context {
        agent = agent.with_extra_context(context);
    }

    let summary = agent.run().await;
    let saved = sink_task.await.unwrap_or_else(|e| {
        warn!(error = %e, "Event sink task failed");
        0
    });

    println!();
    println!("{}", format_summary(&summary));
    if saved > 0 {
        println!("   Saved {saved} screenshots to {}", config.screenshot_dir.display());
    }

    if summary.state == SessionState::Failed {
        return Err(format!("Session failed: {}", summary.reason).into());
    }
    Ok(())
}

/// The OmniParser client if detection is enabled and reachable.
///
/// An unreachable service falls back to coordinate estimation unless
/// detection is required.
async fn build_detector(config: &DetectionConfig) -> Result<Option<Arc<dyn ElementDetector>>, Box<dyn std::error::Error>> {
    if !config.enabled {
        return Ok(None);
    }

    let client = OmniParserClient::from_config(config);
    let problem = match client.health_check().await {
        Ok(true) => {
            info!(endpoint = %config.endpoint, "Element detection available");
            let detector: Arc<dyn ElementDetector> = Arc::new(client);
            return Ok(Some(detector));
        }
        Ok(false) => "service failed its health check".to_string(),
        Err(e) => e.to_string(),
    };

    if config.required {
        eprintln!("❌ Element detection at {} is unavailable: {problem}", config.endpoint);
        eprintln!("   Start the detection server or set detection.required = false");
        return Err(format!("Element detection unavailable: {problem}").into());
    }

    println!("⚠️  Element detection at {} is unavailable ({problem}), continuing without it", config.endpoint);
    Ok(None)
}

/// Exit summary printed when the session ends.
pub fn format_summary(summary: &SessionSummary) -> String {
    let icon = match summary.state {
        SessionState::Completed => "🏁",
        SessionState::StoppedByLimit | SessionState::StoppedBySignal => "⏹️ ",
        SessionState::Failed => "❌",
        SessionState::Init | SessionState::Running => "❔",
    };
    format!(
        "{icon} Session {}: {}\n   Reason:    {}\n   Steps:     {}\n   Decisions: {}\n   Tokens:    {} in / {} out",
        summary.session_id,
        summary.state,
        summary.reason,
        summary.steps,
        summary.decisions,
        summary.input_tokens,
        summary.output_tokens,
    )
}
