//! Event sink for `play`: prints step progress and persists screenshots.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use droidloop_core::{Screenshot, SessionEvent, StepReport};

/// Where and what the sink writes.
#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub dir: PathBuf,
    pub save_screenshots: bool,
    pub save_annotated: bool,
}

impl SinkOptions {
    fn writes_anything(&self) -> bool {
        self.save_screenshots || self.save_annotated
    }
}

/// File name for a step's frame: `step_0007.png`, `step_0007_annotated.png`.
pub fn frame_file_name(step: u64, annotated: bool, shot: &Screenshot) -> String {
    let ext = match shot.media_type.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    };
    if annotated {
        format!("step_{step:04}_annotated.{ext}")
    } else {
        format!("step_{step:04}.{ext}")
    }
}

/// One-line progress report for a completed step.
pub fn step_line(report: &StepReport) -> String {
    let actions: Vec<String> = report
        .results
        .iter()
        .map(|r| {
            let mark = if r.success { "✓" } else { "✗" };
            format!("{mark} {}", r.tool)
        })
        .collect();

    let actions = if actions.is_empty() {
        "no actions".to_string()
    } else {
        actions.join(", ")
    };

    let mut line = format!("   Step {:>3}: {actions}", report.step);
    if report.consecutive_errors > 0 {
        line.push_str(&format!("  (consecutive errors: {})", report.consecutive_errors));
    }
    line
}

/// Write the frames of one step. Returns how many files were written.
pub async fn persist_step(options: &SinkOptions, report: &StepReport) -> usize {
    let observation = &report.observation;
    let mut written = 0;

    if options.save_screenshots {
        let name = frame_file_name(report.step, false, &observation.image);
        if write_frame(&options.dir.join(name), &observation.image).await {
            written += 1;
        }
    }
    if options.save_annotated
        && let Some(annotated) = &observation.annotated
    {
        let name = frame_file_name(report.step, true, annotated);
        if write_frame(&options.dir.join(name), annotated).await {
            written += 1;
        }
    }
    written
}

async fn write_frame(path: &Path, shot: &Screenshot) -> bool {
    match tokio::fs::write(path, &shot.data).await {
        Ok(()) => {
            debug!(path = %path.display(), bytes = shot.len(), "Saved frame");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not save frame");
            false
        }
    }
}

/// Consume session events until the session ends.
///
/// The task resolves to the number of files written.
pub fn spawn(
    mut events: broadcast::Receiver<Arc<SessionEvent>>,
    options: SinkOptions,
    print_progress: bool,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        if options.writes_anything()
            && let Err(e) = tokio::fs::create_dir_all(&options.dir).await
        {
            warn!(dir = %options.dir.display(), error = %e, "Could not create screenshot directory");
        }

        let mut written = 0;
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event sink lagged, some steps were not saved");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match event.as_ref() {
                SessionEvent::SessionStarted { device, max_steps, .. } => {
                    if print_progress {
                        println!("🎮 Playing on {device} (up to {max_steps} steps)");
                    }
                }
                SessionEvent::StepCompleted(report) => {
                    if print_progress {
                        println!("{}", step_line(report));
                    }
                    written += persist_step(&options, report).await;
                }
                SessionEvent::StepFailed {
                    step,
                    error,
                    consecutive_errors,
                    ..
                } => {
                    if print_progress {
                        println!("   Step {step:>3}: ⚠️  {error} (consecutive errors: {consecutive_errors})");
                    }
                }
                SessionEvent::SessionEnded { .. } => break,
            }
        }
        written
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use droidloop_core::{Decision, EventBus, Observation, ScreenFingerprint, SessionState, ToolErrorKind, ToolResult};

    fn report(step: u64, annotated: bool) -> StepReport {
        let image = Screenshot::png(b"raw".to_vec(), 1080, 2400);
        let observation = Observation {
            step,
            captured_at: Utc::now(),
            annotated: annotated.then(|| Screenshot::png(b"boxes".to_vec(), 1080, 2400)),
            image,
            elements: None,
            fingerprint: ScreenFingerprint([0; 32]),
        };
        StepReport {
            step,
            observation: Arc::new(observation),
            decision: Decision::text("tapping"),
            results: vec![
                ToolResult::success("toolu_1", "tap", "Tapped (10, 20)."),
                ToolResult::failure("toolu_2", "tap_element", ToolErrorKind::UnknownElement, "Element 9 not found."),
            ],
            consecutive_errors: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn file_names_are_zero_padded() {
        let png = Screenshot::png(vec![], 1, 1);
        assert_eq!(frame_file_name(7, false, &png), "step_0007.png");
        assert_eq!(frame_file_name(123, true, &png), "step_0123_annotated.png");

        let jpeg = Screenshot {
            media_type: "image/jpeg".into(),
            ..png
        };
        assert_eq!(frame_file_name(12345, false, &jpeg), "step_12345.jpg");
    }

    #[test]
    fn step_line_marks_results() {
        let line = step_line(&report(3, false));
        assert!(line.contains("Step   3"));
        assert!(line.contains("✓ tap"));
        assert!(line.contains("✗ tap_element"));
        assert!(!line.contains("consecutive"));
    }

    #[tokio::test]
    async fn persists_raw_and_annotated_frames() {
        let dir = tempfile::tempdir().unwrap();
        let options = SinkOptions {
            dir: dir.path().to_path_buf(),
            save_screenshots: true,
            save_annotated: true,
        };

        assert_eq!(persist_step(&options, &report(1, true)).await, 2);
        assert_eq!(std::fs::read(dir.path().join("step_0001.png")).unwrap(), b"raw");
        assert_eq!(std::fs::read(dir.path().join("step_0001_annotated.png")).unwrap(), b"boxes");

        // No annotation available: only the raw frame.
        assert_eq!(persist_step(&options, &report(2, false)).await, 1);
        assert!(!dir.path().join("step_0002_annotated.png").exists());
    }

    #[tokio::test]
    async fn disabled_saving_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let options = SinkOptions {
            dir: dir.path().join("shots"),
            save_screenshots: false,
            save_annotated: false,
        };

        let bus = EventBus::default();
        let task = spawn(bus.subscribe(), options, false);
        bus.publish(SessionEvent::StepCompleted(report(1, true)));
        bus.publish(SessionEvent::SessionEnded {
            session_id: "s".into(),
            state: SessionState::Completed,
            reason: "done".into(),
            steps: 1,
            input_tokens: 0,
            output_tokens: 0,
            timestamp: Utc::now(),
        });

        assert_eq!(task.await.unwrap(), 0);
        assert!(!dir.path().join("shots").exists());
    }

    #[tokio::test]
    async fn sink_stops_at_session_end() {
        let dir = tempfile::tempdir().unwrap();
        let options = SinkOptions {
            dir: dir.path().to_path_buf(),
            save_screenshots: true,
            save_annotated: false,
        };

        let bus = EventBus::default();
        let task = spawn(bus.subscribe(), options, false);
        bus.publish(SessionEvent::StepCompleted(report(1, false)));
        bus.publish(SessionEvent::StepCompleted(report(2, false)));
        bus.publish(SessionEvent::SessionEnded {
            session_id: "s".into(),
            state: SessionState::StoppedByLimit,
            reason: "step limit of 2 reached".into(),
            steps: 2,
            input_tokens: 0,
            output_tokens: 0,
            timestamp: Utc::now(),
        });
        // Published after the end: never written.
        bus.publish(SessionEvent::StepCompleted(report(3, false)));

        assert_eq!(task.await.unwrap(), 2);
        assert!(dir.path().join("step_0002.png").exists());
        assert!(!dir.path().join("step_0003.png").exists());
    }
}
