//! Host configuration – reads/writes `~/.beacon/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Collector receiving one CSV line per guidance sample.
    #[serde(default = "default_telemetry_host")]
    pub telemetry_host: String,

    #[serde(default = "default_telemetry_port")]
    pub telemetry_port: u16,

    /// Off by default: every sample would otherwise try to reach the
    /// collector.
    #[serde(default)]
    pub telemetry_enabled: bool,

    #[serde(default = "default_connect_timeout_ms")]
    pub telemetry_connect_timeout_ms: u64,

    /// Flat TOML file holding the calibration limits.
    #[serde(default = "default_calibration_path")]
    pub calibration_path: PathBuf,

    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_telemetry_host() -> String {
    "127.0.0.1".to_string()
}
fn default_telemetry_port() -> u16 {
    6666
}
fn default_connect_timeout_ms() -> u64 {
    500
}
fn default_calibration_path() -> PathBuf {
    beacon_dir_for_home(&home_dir()).join("calibration.toml")
}
fn default_bus_capacity() -> usize {
    beacon_middleware::bus::DEFAULT_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telemetry_host: default_telemetry_host(),
            telemetry_port: default_telemetry_port(),
            telemetry_enabled: false,
            telemetry_connect_timeout_ms: default_connect_timeout_ms(),
            calibration_path: default_calibration_path(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl Config {
    pub fn telemetry_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_connect_timeout_ms)
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn beacon_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".beacon")
}

/// Return the path to `~/.beacon/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    beacon_dir_for_home(home).join("config.toml")
}

/// Load the config, falling back to defaults when the file is absent.
/// Environment overrides apply either way.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `BEACON_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `BEACON_TELEMETRY_HOST` | `telemetry_host` |
/// | `BEACON_TELEMETRY_PORT` | `telemetry_port` |
/// | `BEACON_TELEMETRY_ENABLED` | `telemetry_enabled` (`true`/`false`/`1`/`0`) |
/// | `BEACON_CALIBRATION_PATH` | `calibration_path` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("BEACON_TELEMETRY_HOST") {
        cfg.telemetry_host = v;
    }
    if let Ok(v) = std::env::var("BEACON_TELEMETRY_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.telemetry_port = port;
    }
    if let Ok(v) = std::env::var("BEACON_TELEMETRY_ENABLED")
        && let Some(enabled) = parse_flag(&v)
    {
        cfg.telemetry_enabled = enabled;
    }
    if let Ok(v) = std::env::var("BEACON_CALIBRATION_PATH") {
        cfg.calibration_path = PathBuf::from(v);
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to disk, creating `~/.beacon/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
