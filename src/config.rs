//! Warden configuration.
//!
//! Loaded once from a TOML file at startup and passed by reference into
//! each component's constructor; no component reads ambient global state.
//! A missing or malformed file is fatal — everything past startup treats
//! the [`Config`] as immutable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors raised while loading or validating configuration. All fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("missing pin assignment for required device '{0}'")]
    MissingPinAssignment(String),

    #[error("unsupported pin spec '{0}'")]
    InvalidPin(String),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// A GPIO pin reference as written in config.
///
/// Accepts the forms the fleet's existing config files use:
/// a bare BCM number (`13`), `"GPIO13"`, `"D13"`, or `"BCM:13"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PinSpec {
    Number(u8),
    Name(String),
}

impl PinSpec {
    /// Resolve to a BCM line number.
    pub fn resolve(&self) -> Result<u8, ConfigError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Name(s) => {
                let upper = s.trim().to_uppercase();
                let digits = if let Some(rest) = upper.strip_prefix("BCM:") {
                    rest
                } else if let Some(rest) = upper.strip_prefix("GPIO") {
                    rest
                } else if let Some(rest) = upper.strip_prefix('D') {
                    rest
                } else {
                    return Err(ConfigError::InvalidPin(s.clone()));
                };
                digits
                    .parse::<u8>()
                    .map_err(|_| ConfigError::InvalidPin(s.clone()))
            }
        }
    }
}

/// Telemetry feed keys, all optional. A missing feed simply suppresses
/// that publish path.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    /// Environment sample field name → feed key (e.g. `temperature = "home.temp"`).
    pub environment: BTreeMap<String, String>,
    /// Security summary field name → feed key.
    pub security: BTreeMap<String, String>,
    /// Feed the current mode is published to on change.
    pub mode: Option<String>,
    /// Liveness feed; heartbeats are skipped when unset.
    pub heartbeat: Option<String>,
}

/// Cloud synchronization settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Identifier stamped on every remote row from this device.
    pub device_id: String,
    /// Maximum records pushed per kind per cycle.
    pub batch_size: usize,
    /// Seconds between sync cycles when a remote is configured.
    pub period_secs: u64,
    /// Seconds to sleep when no remote destination is configured.
    pub backoff_secs: u64,
    /// Path of the remote row store. Unset disables sync pushes.
    pub remote_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: "pi_01".to_string(),
            batch_size: 50,
            period_secs: 10,
            backoff_secs: 60,
            remote_path: None,
        }
    }
}

/// One step of the party animation as written in config.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameConfig {
    /// Indicator LEDs lit during this frame; the rest are switched off.
    pub leds: Vec<String>,
    /// How long the frame holds before the next one, in milliseconds.
    pub hold_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PartyConfig {
    pub frames: Vec<FrameConfig>,
}

impl Default for PartyConfig {
    fn default() -> Self {
        // The classic sequence: singles, pairs, all on, blackout.
        let frames = [
            (&["red_led"][..], 300),
            (&["green_led"][..], 300),
            (&["blue_led"][..], 300),
            (&["red_led", "green_led"][..], 250),
            (&["green_led", "blue_led"][..], 250),
            (&["red_led", "blue_led"][..], 250),
            (&["red_led", "green_led", "blue_led"][..], 500),
            (&[][..], 200),
        ];
        Self {
            frames: frames
                .iter()
                .map(|(leds, hold_ms)| FrameConfig {
                    leds: leds.iter().map(ToString::to_string).collect(),
                    hold_ms: *hold_ms,
                })
                .collect(),
        }
    }
}

/// Warden configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the local buffer DB and daily logs live. Default `~/.warden`.
    pub data_dir: Option<PathBuf>,
    /// Use in-memory output drivers instead of sysfs GPIO.
    pub simulate: bool,
    /// Orchestrator polling tick, seconds.
    pub tick_interval: u64,
    /// Seconds between environment samples.
    pub env_interval: u64,
    /// Seconds between security sensor checks.
    pub security_check_interval: u64,
    /// Seconds between published security summaries.
    pub security_send_interval: u64,
    /// Seconds between durable log flushes.
    pub flush_interval: u64,
    /// Seconds between heartbeat publishes.
    pub heartbeat_interval: u64,
    /// Default buzzer pulse length, seconds.
    pub buzzer_pulse_secs: f64,
    /// Required device name → pin assignment.
    pub pins: BTreeMap<String, PinSpec>,
    pub feeds: FeedsConfig,
    pub sync: SyncConfig,
    pub party: PartyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            simulate: true,
            tick_interval: 1,
            env_interval: 60,
            security_check_interval: 5,
            security_send_interval: 60,
            flush_interval: 10,
            heartbeat_interval: 30,
            buzzer_pulse_secs: 0.5,
            pins: BTreeMap::new(),
            feeds: FeedsConfig::default(),
            sync: SyncConfig::default(),
            party: PartyConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The default config file path: `~/.warden/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".warden").join("config.toml"))
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".warden")))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_interval)
    }

    pub fn buzzer_pulse(&self) -> Duration {
        Duration::from_secs_f64(self.buzzer_pulse_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("tick_interval", self.tick_interval),
            ("env_interval", self.env_interval),
            ("security_check_interval", self.security_check_interval),
            ("security_send_interval", self.security_send_interval),
            ("flush_interval", self.flush_interval),
            ("heartbeat_interval", self.heartbeat_interval),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        if self.sync.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "sync.batch_size must be at least 1".to_string(),
            ));
        }
        if self.party.frames.is_empty() {
            return Err(ConfigError::Invalid(
                "party.frames must not be empty".to_string(),
            ));
        }
        // Resolve every declared pin now so a typo fails at startup, not
        // at first use.
        for (device, spec) in &self.pins {
            spec.resolve()
                .map_err(|_| ConfigError::Invalid(format!("bad pin spec for {device}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn pin_spec_forms_resolve() {
        assert_eq!(PinSpec::Number(13).resolve().unwrap(), 13);
        assert_eq!(PinSpec::Name("GPIO13".into()).resolve().unwrap(), 13);
        assert_eq!(PinSpec::Name("D21".into()).resolve().unwrap(), 21);
        assert_eq!(PinSpec::Name("BCM:5".into()).resolve().unwrap(), 5);
        assert_eq!(PinSpec::Name(" gpio7 ".into()).resolve().unwrap(), 7);
    }

    #[test]
    fn pin_spec_garbage_rejected() {
        let err = PinSpec::Name("pin thirteen".into()).resolve().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPin(_)));
    }

    #[test]
    fn defaults_apply_for_sparse_file() {
        let (_dir, path) = write_config(
            r#"
            env_interval = 120

            [pins]
            red_led = 17
            "#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.env_interval, 120);
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.sync.device_id, "pi_01");
        assert_eq!(config.party.frames.len(), 8);
        assert!(config.simulate);
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn zero_interval_rejected() {
        let (_dir, path) = write_config("env_interval = 0");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let (_dir, path) = write_config("[sync]\nbatch_size = 0");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
