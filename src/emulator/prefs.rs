//! BasiliskII preferences file generation and parsing
//!
//! The browser edits a small JSON settings document; the gateway renders it
//! into the prefs file the emulator actually reads, and parses it back for
//! the settings dialog. Only the keys the web UI exposes are parsed; the
//! rest of the file is fixed boilerplate.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Emulator settings exchanged with the browser as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmulatorSettings {
    pub rom: String,
    pub disks: Vec<String>,
    pub ram: u32,
    pub screen: String,
    pub cpu: u32,
    pub model: u32,
    pub fpu: bool,
    pub jit: bool,
    pub sound: bool,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            rom: String::new(),
            disks: vec![],
            ram: 32,
            screen: "800x600".to_string(),
            cpu: 4,
            model: 14,
            fpu: true,
            jit: true,
            sound: true,
        }
    }
}

impl EmulatorSettings {
    /// Parse the "800x600" screen string, falling back to the default.
    pub fn screen_dimensions(&self) -> (u32, u32) {
        let mut parts = self.screen.splitn(2, 'x');
        let w = parts.next().and_then(|s| s.parse().ok());
        let h = parts.next().and_then(|s| s.parse().ok());
        match (w, h) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => (800, 600),
        }
    }
}

/// Render settings into a prefs file the emulator can consume. ROM and disk
/// entries are written with absolute paths; the screen uses the IPC driver
/// so the framebuffer lands in shared memory.
pub fn write_prefs(
    settings: &EmulatorSettings,
    prefs_path: &Path,
    roms_dir: &Path,
    images_dir: &Path,
) -> Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());
    let roms_dir = cwd.join(roms_dir);
    let images_dir = cwd.join(images_dir);
    let (width, height) = settings.screen_dimensions();

    let mut prefs = String::new();
    let _ = writeln!(prefs, "# Basilisk II preferences - generated by web UI\n");

    if !settings.rom.is_empty() {
        let _ = writeln!(prefs, "rom {}", roms_dir.join(&settings.rom).display());
    }
    if settings.disks.is_empty() {
        tracing::warn!("No disk images selected in settings");
    }
    for disk in &settings.disks {
        let _ = writeln!(prefs, "disk {}", images_dir.join(disk).display());
    }

    let _ = writeln!(prefs, "\n# Hardware settings");
    let _ = writeln!(prefs, "ramsize {}", settings.ram * 1024 * 1024);
    let _ = writeln!(prefs, "screen ipc/{}/{}", width, height);
    let _ = writeln!(prefs, "cpu {}", settings.cpu);
    let _ = writeln!(prefs, "modelid {}", settings.model);
    let _ = writeln!(prefs, "fpu {}", settings.fpu);
    let _ = writeln!(prefs, "jit {}", settings.jit);
    let _ = writeln!(prefs, "nosound {}", !settings.sound);

    let _ = writeln!(prefs, "\n# JIT settings");
    let _ = writeln!(prefs, "jitfpu true");
    let _ = writeln!(prefs, "jitcachesize 8192");
    let _ = writeln!(prefs, "jitlazyflush true");
    let _ = writeln!(prefs, "jitinline true");

    let _ = writeln!(prefs, "\n# Display settings");
    let _ = writeln!(prefs, "displaycolordepth 0");
    let _ = writeln!(prefs, "frameskip 0");

    let _ = writeln!(prefs, "\n# Input settings");
    let _ = writeln!(prefs, "keyboardtype 5");
    let _ = writeln!(prefs, "keycodes false");
    let _ = writeln!(prefs, "mousewheelmode 1");
    let _ = writeln!(prefs, "mousewheellines 3");
    let _ = writeln!(prefs, "swap_opt_cmd true");
    let _ = writeln!(prefs, "hotkey 0");

    let _ = writeln!(prefs, "\n# Serial/Network");
    let _ = writeln!(prefs, "seriala /dev/null");
    let _ = writeln!(prefs, "serialb /dev/null");
    let _ = writeln!(prefs, "udptunnel false");

    let _ = writeln!(prefs, "\n# Boot settings");
    let _ = writeln!(prefs, "bootdrive 0");
    let _ = writeln!(prefs, "bootdriver 0");
    let _ = writeln!(prefs, "nocdrom false");

    let _ = writeln!(prefs, "\n# System settings");
    let _ = writeln!(prefs, "ignoresegv true");
    let _ = writeln!(prefs, "idlewait true");
    let _ = writeln!(prefs, "nogui true");

    std::fs::write(prefs_path, prefs)?;
    tracing::info!("Wrote prefs file {}", prefs_path.display());
    Ok(())
}

/// Read the settings the web UI cares about back out of a prefs file.
/// A missing file yields the defaults.
pub fn read_prefs(prefs_path: &Path) -> EmulatorSettings {
    let mut settings = EmulatorSettings {
        disks: vec![],
        ..Default::default()
    };

    let content = match std::fs::read_to_string(prefs_path) {
        Ok(c) => c,
        Err(_) => return settings,
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once(char::is_whitespace) {
            Some((k, v)) => (k, v.trim()),
            None => continue,
        };

        match key {
            "rom" => settings.rom = file_name(value),
            "disk" => settings.disks.push(file_name(value)),
            "ramsize" => {
                if let Ok(bytes) = value.parse::<u64>() {
                    settings.ram = (bytes / (1024 * 1024)) as u32;
                }
            }
            "screen" => {
                // "ipc/800/600" or "win/800/600"
                let mut parts = value.split('/');
                let _driver = parts.next();
                if let (Some(w), Some(h)) = (parts.next(), parts.next()) {
                    if w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok() {
                        settings.screen = format!("{}x{}", w, h);
                    }
                }
            }
            "cpu" => settings.cpu = value.parse().unwrap_or(settings.cpu),
            "modelid" => settings.model = value.parse().unwrap_or(settings.model),
            "fpu" => settings.fpu = value == "true",
            "jit" => settings.jit = value == "true",
            "nosound" => settings.sound = value != "true",
            _ => {}
        }
    }

    settings
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_roundtrip_through_prefs_file() {
        let dir = tempfile::tempdir().unwrap();
        let prefs_path = dir.path().join("test.prefs");

        let settings = EmulatorSettings {
            rom: "quadra900.rom".to_string(),
            disks: vec!["system753.dsk".to_string(), "apps.img".to_string()],
            ram: 64,
            screen: "1024x768".to_string(),
            cpu: 4,
            model: 14,
            fpu: true,
            jit: false,
            sound: false,
        };

        write_prefs(&settings, &prefs_path, Path::new("roms"), Path::new("images")).unwrap();
        let parsed = read_prefs(&prefs_path);
        assert_eq!(parsed, settings);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let parsed = read_prefs(Path::new("/nonexistent/prefs"));
        assert_eq!(parsed, EmulatorSettings::default());
        assert_eq!(parsed.ram, 32);
    }

    #[test]
    fn screen_dimensions_fall_back_on_garbage() {
        let mut settings = EmulatorSettings::default();
        settings.screen = "garbage".to_string();
        assert_eq!(settings.screen_dimensions(), (800, 600));
        settings.screen = "640x480".to_string();
        assert_eq!(settings.screen_dimensions(), (640, 480));
    }

    #[test]
    fn prefs_use_ipc_screen_driver() {
        let dir = tempfile::tempdir().unwrap();
        let prefs_path = dir.path().join("test.prefs");
        write_prefs(
            &EmulatorSettings::default(),
            &prefs_path,
            Path::new("roms"),
            Path::new("images"),
        )
        .unwrap();
        let content = std::fs::read_to_string(&prefs_path).unwrap();
        assert!(content.contains("screen ipc/800/600"));
        assert!(content.contains("nogui true"));
    }
}
