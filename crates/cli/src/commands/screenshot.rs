//! `droidloop screenshot`: capture a single frame and have the model describe it.

use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use droidloop_config::AppConfig;
use droidloop_core::{ConversationEntry, DecisionError, DecisionRequest, Device, Observation, Provider, Screenshot};
use droidloop_device::{AdbDevice, ImageEncoder};

/// Question asked about the captured frame.
pub const DESCRIBE_PROMPT: &str = "Describe what you see on this Android phone screen in detail.";

const DESCRIBE_SYSTEM: &str = "You look at Android phone screenshots and describe them for the person operating the device.";

#[derive(Debug, Clone, Args)]
pub struct ScreenshotArgs {
    /// Where to write the PNG
    #[arg(short, long, default_value = "screenshot.png")]
    pub output: PathBuf,

    /// adb serial of the device to use
    #[arg(short, long)]
    pub device: Option<String>,

    /// Only save the frame, skip the description
    #[arg(long)]
    pub no_describe: bool,
}

pub async fn run(config_path: Option<&Path>, args: ScreenshotArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    if args.device.is_some() {
        config.device.serial = args.device.clone();
    }

    let device = AdbDevice::connect(&config.device).await.map_err(|e| {
        eprintln!("❌ {e}");
        super::print_device_help();
        e
    })?;

    let shot = device.screenshot().await?;
    tokio::fs::write(&args.output, &shot.data)
        .await
        .map_err(|e| format!("Failed to write {}: {e}", args.output.display()))?;

    println!(
        "📸 Saved {}x{} screenshot from {} to {}",
        shot.width,
        shot.height,
        device.serial(),
        args.output.display()
    );

    if args.no_describe {
        return Ok(());
    }
    let Some(provider) = droidloop_providers::from_config(&config.provider) else {
        println!("ℹ️  No API key set. Screenshot saved but cannot describe it without one.");
        return Ok(());
    };

    println!("🔍 Asking {} to describe the screen...", config.provider.model);
    let description = describe(&provider, shot, &config).await.map_err(|e| {
        eprintln!("❌ {e}");
        e
    })?;
    println!();
    println!("{description}");
    Ok(())
}

/// One-off request: the frame plus [`DESCRIBE_PROMPT`], no tools.
pub fn describe_request(shot: Screenshot, config: &AppConfig) -> DecisionRequest {
    let fingerprint = droidloop_device::fingerprint(&shot.data, config.detection.ignore_bottom_fraction);
    let observation = Observation {
        step: 0,
        captured_at: chrono::Utc::now(),
        image: ImageEncoder::from_config(&config.conversation).encode(shot),
        annotated: None,
        elements: None,
        fingerprint,
    };

    DecisionRequest {
        model: config.provider.model.clone(),
        system_prompt: DESCRIBE_SYSTEM.into(),
        extra_context: None,
        history: vec![ConversationEntry::observation(0, DESCRIBE_PROMPT, Arc::new(observation))],
        tools: Vec::new(),
        max_tokens: config.provider.max_tokens,
        temperature: 0.0,
    }
}

/// Ask `provider` what the frame shows.
pub async fn describe(provider: &dyn Provider, shot: Screenshot, config: &AppConfig) -> Result<String, DecisionError> {
    let decision = provider.decide(describe_request(shot, config)).await?;
    decision
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or(DecisionError::EmptyDecision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        screenshot: ScreenshotArgs,
    }

    #[test]
    fn device_flag_parses() {
        let args = TestCli::parse_from(["screenshot", "-d", "emulator-5554", "-o", "home.png"]).screenshot;
        assert_eq!(args.device.as_deref(), Some("emulator-5554"));
        assert_eq!(args.output, PathBuf::from("home.png"));
        assert!(!args.no_describe);

        let args = TestCli::parse_from(["screenshot", "--no-describe"]).screenshot;
        assert!(args.device.is_none());
        assert_eq!(args.output, PathBuf::from("screenshot.png"));
        assert!(args.no_describe);
    }

    #[test]
    fn request_has_frame_and_question_but_no_tools() {
        let config = AppConfig::default();
        let request = describe_request(Screenshot::png(b"frame".to_vec(), 1080, 2400), &config);

        assert!(request.tools.is_empty());
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.history.len(), 1);
        match &request.history[0] {
            ConversationEntry::WithImage { text, observation, .. } => {
                assert_eq!(text, DESCRIBE_PROMPT);
                assert_eq!(observation.image.data, b"frame");
            }
            other => panic!("expected an image entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn description_comes_from_the_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "model": "claude-sonnet-4-20250514",
                "content": [{"type": "text", "text": "A solitaire table with a Deal button."}],
                "usage": {"input_tokens": 900, "output_tokens": 12},
                "stop_reason": "end_turn"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-ant-test".into());
        config.provider.base_url = server.uri();
        let provider = droidloop_providers::from_config(&config.provider).unwrap();

        let text = describe(&provider, Screenshot::png(b"frame".to_vec(), 1080, 2400), &config)
            .await
            .unwrap();
        assert_eq!(text, "A solitaire table with a Deal button.");

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert!(body.get("tools").is_none());
        assert_eq!(body["messages"][0]["content"][1]["text"], DESCRIBE_PROMPT);
    }
}
