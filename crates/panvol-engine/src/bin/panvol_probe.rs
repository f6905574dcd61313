//! Backend probing tool
//!
//! Lists the controllable devices of each backend and reports the current
//! volume/mute state of the device the engine would bind. Useful for
//! checking what a host system actually exposes.
//!
//! Usage: panvol-probe [alsa|pulseaudio|oss]

use anyhow::{bail, Result};

use panvol_backends::{list_devices, open_backend, BackendKind};

fn main() -> Result<()> {
    env_logger::init();

    let kinds = match std::env::args().nth(1).as_deref() {
        None => vec![
            BackendKind::PulseAudio,
            BackendKind::Alsa,
            BackendKind::Oss,
        ],
        Some("alsa") => vec![BackendKind::Alsa],
        Some("pulseaudio") => vec![BackendKind::PulseAudio],
        Some("oss") => vec![BackendKind::Oss],
        Some(other) => bail!("unknown backend '{}' (expected alsa|pulseaudio|oss)", other),
    };

    for kind in kinds {
        println!("=== {} ===", kind);

        match list_devices(kind) {
            Ok(devices) => {
                for device in &devices {
                    println!(
                        "  {} {} ({})",
                        if device.is_default { "*" } else { " " },
                        device.label,
                        device.id
                    );
                }
            }
            Err(e) => {
                println!("  devices: {}", e);
                continue;
            }
        }

        match open_backend(kind, None) {
            Ok(mut adapter) => {
                let volume = adapter.volume();
                let muted = adapter.muted();
                match (volume, muted) {
                    (Ok(percent), Ok(muted)) => println!(
                        "  state: {}%{}",
                        percent,
                        if muted { " (muted)" } else { "" }
                    ),
                    (volume, muted) => {
                        println!("  state: volume {:?}, mute {:?}", volume, muted)
                    }
                }
                adapter.release();
            }
            Err(e) => println!("  probe: {}", e),
        }
    }

    Ok(())
}
