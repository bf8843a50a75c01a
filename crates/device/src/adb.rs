//! Device control over the `adb` binary.
//!
//! Every operation is one `adb` invocation run under the configured command
//! timeout. Output parsing lives in small pure functions so it can be tested
//! without a device.

use async_trait::async_trait;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use droidloop_config::DeviceConfig;
use droidloop_core::device::Device;
use droidloop_core::error::DeviceError;
use droidloop_core::observation::{Point, ScreenInfo, Screenshot};
use droidloop_core::tool::SystemKey;

use crate::fingerprint;

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G'];

/// Connection settings shared by all `adb` invocations.
#[derive(Debug, Clone)]
struct AdbCommand {
    adb_path: String,
    host: Option<String>,
    port: Option<u16>,
    timeout: Duration,
}

impl AdbCommand {
    fn from_config(config: &DeviceConfig) -> Self {
        Self {
            adb_path: config.adb_path.clone(),
            host: config.adb_host.clone(),
            port: config.adb_port,
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    fn args(&self, serial: Option<&str>, args: &[&str]) -> Vec<String> {
        let mut full = Vec::new();
        if let Some(host) = &self.host {
            full.push("-H".to_string());
            full.push(host.clone());
        }
        if let Some(port) = self.port {
            full.push("-P".to_string());
            full.push(port.to_string());
        }
        if let Some(serial) = serial {
            full.push("-s".to_string());
            full.push(serial.to_string());
        }
        full.extend(args.iter().map(|a| a.to_string()));
        full
    }

    async fn run(&self, serial: Option<&str>, args: &[&str]) -> Result<Vec<u8>, DeviceError> {
        let full = self.args(serial, args);
        let label = args.join(" ");
        debug!(command = %label, "adb");

        let mut cmd = Command::new(&self.adb_path);
        cmd.args(&full).kill_on_drop(true);

        let output: Output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| DeviceError::Timeout {
                command: label.clone(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| DeviceError::CommandFailed {
                command: label.clone(),
                reason: format!("could not run {}: {e}", self.adb_path),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %label, exit_code = code, stderr = %stderr, "adb command failed");
            return Err(DeviceError::CommandFailed {
                command: label,
                reason: if stderr.is_empty() {
                    format!("exit code {code}")
                } else {
                    stderr
                },
            });
        }

        Ok(output.stdout)
    }
}

/// An Android device reached through `adb`.
#[derive(Debug, Clone)]
pub struct AdbDevice {
    serial: String,
    adb: AdbCommand,
}

impl AdbDevice {
    /// Resolve the device to use.
    ///
    /// With a configured serial the device must be attached; without one
    /// exactly one device must be attached.
    pub async fn connect(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let adb = AdbCommand::from_config(config);
        let attached = Self::list_with(&adb).await?;
        let serial = select_serial(config.serial.as_deref(), &attached)?;
        info!(serial = %serial, "Connected to device");
        Ok(Self { serial, adb })
    }

    /// Serials of all attached devices in the `device` state.
    pub async fn list_devices(config: &DeviceConfig) -> Result<Vec<String>, DeviceError> {
        Self::list_with(&AdbCommand::from_config(config)).await
    }

    async fn list_with(adb: &AdbCommand) -> Result<Vec<String>, DeviceError> {
        let out = adb.run(None, &["devices"]).await?;
        Ok(parse_devices(&String::from_utf8_lossy(&out)))
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    async fn shell(&self, args: &[&str]) -> Result<String, DeviceError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        let out = self.adb.run(Some(&self.serial), &full).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn input(&self, args: &[&str]) -> Result<(), DeviceError> {
        let mut full = vec!["input"];
        full.extend_from_slice(args);
        let out = self.shell(&full).await?;
        // `adb shell` exits 0 on older devices even when input fails
        if let Some(line) = out.lines().find(|l| l.contains("Exception") || l.starts_with("Error")) {
            return Err(DeviceError::CommandFailed {
                command: full.join(" "),
                reason: line.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Device for AdbDevice {
    fn id(&self) -> &str {
        &self.serial
    }

    /// Screen geometry as `screencap` and `input` see it, i.e. with the
    /// current rotation applied. `wm size` always reports portrait.
    async fn screen_info(&self) -> Result<ScreenInfo, DeviceError> {
        let natural = parse_wm_size(&self.shell(&["wm", "size"]).await?)?;
        let rotation = match self.shell(&["dumpsys", "input"]).await {
            Ok(out) => parse_surface_orientation(&out).unwrap_or_else(|| {
                debug!("No SurfaceOrientation in dumpsys input, assuming portrait");
                0
            }),
            Err(e) => {
                warn!(error = %e, "Could not read display rotation, assuming portrait");
                0
            }
        };
        let info = rotate(natural, rotation);
        debug!(rotation, width = info.width, height = info.height, "Screen geometry");
        Ok(info)
    }

    async fn screenshot(&self) -> Result<Screenshot, DeviceError> {
        let data = self
            .adb
            .run(Some(&self.serial), &["exec-out", "screencap", "-p"])
            .await?;
        if !data.starts_with(PNG_SIGNATURE) {
            return Err(DeviceError::InvalidOutput(format!(
                "screencap returned {} bytes that are not a PNG",
                data.len()
            )));
        }
        let (width, height) = fingerprint::dimensions(&data).ok_or_else(|| {
            DeviceError::InvalidOutput("screencap PNG header could not be read".into())
        })?;
        Ok(Screenshot::png(data, width, height))
    }

    async fn tap(&self, at: Point) -> Result<(), DeviceError> {
        self.input(&["tap", &at.x.to_string(), &at.y.to_string()]).await
    }

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<(), DeviceError> {
        self.input(&[
            "swipe",
            &from.x.to_string(),
            &from.y.to_string(),
            &to.x.to_string(),
            &to.y.to_string(),
            &duration.as_millis().to_string(),
        ])
        .await
    }

    async fn long_press(&self, at: Point, duration: Duration) -> Result<(), DeviceError> {
        // A swipe that does not move is a long press.
        self.swipe(at, at, duration).await
    }

    async fn press_key(&self, key: SystemKey) -> Result<(), DeviceError> {
        self.input(&["keyevent", key.keycode()]).await
    }

    async fn type_text(&self, text: &str) -> Result<(), DeviceError> {
        let escaped = escape_input_text(text);
        self.input(&["text", &escaped]).await
    }

    async fn foreground_package(&self) -> Result<Option<String>, DeviceError> {
        let out = self.shell(&["dumpsys", "activity", "activities"]).await?;
        Ok(parse_resumed_package(&out))
    }

    async fn launch_app(&self, package: &str) -> Result<(), DeviceError> {
        info!(package, "Launching app");
        let out = self
            .shell(&[
                "monkey",
                "-p",
                package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ])
            .await?;
        if out.contains("No activities found") {
            return Err(DeviceError::AppNotFound(package.to_string()));
        }
        Ok(())
    }
}

/// Pick the serial to use from the attached devices.
fn select_serial(configured: Option<&str>, attached: &[String]) -> Result<String, DeviceError> {
    match configured {
        Some(serial) if attached.iter().any(|s| s == serial) => Ok(serial.to_string()),
        Some(serial) => Err(DeviceError::CommandFailed {
            command: "devices".into(),
            reason: format!("device {serial} is not attached (attached: {attached:?})"),
        }),
        None => match attached {
            [] => Err(DeviceError::NoDevices),
            [only] => Ok(only.clone()),
            many => Err(DeviceError::MultipleDevices(many.to_vec())),
        },
    }
}

/// Parse `adb devices` output, keeping only devices in the `device` state.
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| !l.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            (parts.next()? == "device").then(|| serial.to_string())
        })
        .collect()
}

/// Parse `wm size` output. An override size wins over the physical size.
pub fn parse_wm_size(output: &str) -> Result<ScreenInfo, DeviceError> {
    let parse_line = |prefix: &str| {
        output.lines().find_map(|line| {
            let rest = line.trim().strip_prefix(prefix)?;
            let (w, h) = rest.trim().split_once('x')?;
            Some(ScreenInfo::new(w.trim().parse().ok()?, h.trim().parse().ok()?))
        })
    };

    parse_line("Override size:")
        .or_else(|| parse_line("Physical size:"))
        .filter(|s| s.width > 0 && s.height > 0)
        .ok_or_else(|| DeviceError::InvalidOutput(format!("unexpected `wm size` output: {}", output.trim())))
}

/// Display rotation (0-3, quarter turns) from `dumpsys input` output.
pub fn parse_surface_orientation(output: &str) -> Option<u8> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("SurfaceOrientation:")?;
        rest.trim().parse::<u8>().ok().filter(|r| *r < 4)
    })
}

/// Apply a rotation to the natural (portrait) geometry.
pub fn rotate(natural: ScreenInfo, rotation: u8) -> ScreenInfo {
    match rotation % 4 {
        1 | 3 => ScreenInfo::new(natural.height, natural.width),
        _ => natural,
    }
}

/// Package of the resumed activity in `dumpsys activity activities` output.
pub fn parse_resumed_package(output: &str) -> Option<String> {
    let line = output
        .lines()
        .find(|l| l.contains("mResumedActivity") || l.contains("topResumedActivity"))?;
    line.split_whitespace()
        .find(|part| part.contains('/') && part.contains('.'))
        .and_then(|part| part.trim_start_matches('{').split('/').next())
        .filter(|pkg| !pkg.is_empty())
        .map(str::to_string)
}

/// Escape text for `input text`: spaces become `%s`, shell metacharacters
/// are backslash-escaped.
pub fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        match c {
            ' ' => out.push_str("%s"),
            '\\' | '"' | '\'' | '(' | ')' | '<' | '>' | '|' | ';' | '&' | '*' | '~' | '$' | '`'
            | '!' | '?' | '#' | '%' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' | '\t' => out.push_str("%s"),
            _ => out.push(c),
        }
    }
    out
}
