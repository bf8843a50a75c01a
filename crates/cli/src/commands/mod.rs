pub mod config_cmd;
pub mod devices;
pub mod play;
pub mod screenshot;
pub mod sink;
pub mod tap;

use droidloop_config::AppConfig;
use std::path::Path;

/// Load the config, printing the failure the way every command reports it.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    AppConfig::load(path).map_err(|e| {
        eprintln!("❌ {e}");
        e.into()
    })
}

/// Help printed when `adb` finds nothing usable.
pub fn print_device_help() {
    eprintln!();
    eprintln!("   Connect a device with USB debugging enabled (or start an emulator),");
    eprintln!("   then check it shows up with:  droidloop devices");
    eprintln!("   With several devices attached, pick one with --device <serial>.");
}
