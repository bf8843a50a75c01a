//! `droidloop tap`: send one tap, handy for checking coordinates by hand.

use std::path::Path;

use droidloop_core::{Device, Point};
use droidloop_device::AdbDevice;

pub async fn run(config_path: Option<&Path>, x: u32, y: u32, serial: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    if serial.is_some() {
        config.device.serial = serial;
    }

    let device = AdbDevice::connect(&config.device).await.map_err(|e| {
        eprintln!("❌ {e}");
        super::print_device_help();
        e
    })?;

    tap_within_screen(&device, Point::new(x, y)).await.map_err(|e| {
        eprintln!("❌ {e}");
        e
    })?;
    println!("👆 Tapped at ({x}, {y}) on {}", device.serial());
    Ok(())
}

/// Tap `at` after checking it lies on the screen.
pub async fn tap_within_screen(device: &dyn Device, at: Point) -> Result<(), Box<dyn std::error::Error>> {
    let screen = device.screen_info().await?;
    if !screen.contains(at) {
        return Err(format!(
            "({}, {}) is outside the {}x{} screen",
            at.x, at.y, screen.width, screen.height
        )
        .into());
    }
    device.tap(at).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use droidloop_core::{DeviceError, ScreenInfo, Screenshot, SystemKey};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct TapRecorder {
        taps: Mutex<Vec<Point>>,
    }

    #[async_trait]
    impl Device for TapRecorder {
        fn id(&self) -> &str {
            "recorder"
        }
        async fn screen_info(&self) -> Result<ScreenInfo, DeviceError> {
            Ok(ScreenInfo::new(1080, 2400))
        }
        async fn screenshot(&self) -> Result<Screenshot, DeviceError> {
            Ok(Screenshot::png(Vec::new(), 1080, 2400))
        }
        async fn tap(&self, at: Point) -> Result<(), DeviceError> {
            self.taps.lock().unwrap().push(at);
            Ok(())
        }
        async fn swipe(&self, _: Point, _: Point, _: Duration) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn long_press(&self, _: Point, _: Duration) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn press_key(&self, _: SystemKey) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn type_text(&self, _: &str) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn taps_inside_the_screen() {
        let device = TapRecorder::default();
        tap_within_screen(&device, Point::new(540, 1200)).await.unwrap();
        assert_eq!(*device.taps.lock().unwrap(), vec![Point::new(540, 1200)]);
    }

    #[tokio::test]
    async fn refuses_points_off_screen() {
        let device = TapRecorder::default();
        let err = tap_within_screen(&device, Point::new(1080, 10)).await.unwrap_err();
        assert!(err.to_string().contains("outside the 1080x2400 screen"));
        assert!(device.taps.lock().unwrap().is_empty());
    }
}
