//! `droidloop devices`: list attached devices.

use std::path::Path;

use droidloop_device::AdbDevice;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;

    let serials = AdbDevice::list_devices(&config.device).await.map_err(|e| {
        eprintln!("❌ {e}");
        eprintln!("   Is adb installed? Set device.adb_path if it is not on PATH.");
        e
    })?;

    if serials.is_empty() {
        println!("⚠️  No devices attached");
        super::print_device_help();
        return Ok(());
    }

    println!("📱 Attached devices:");
    for serial in &serials {
        let marker = match config.device.serial.as_deref() {
            Some(configured) if configured == serial => "  (configured)",
            _ => "",
        };
        println!("   {serial}{marker}");
    }
    Ok(())
}
