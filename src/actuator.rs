//! Cached actuator state for the fixed device set.
//!
//! One registry-scoped lock serializes every mutation: the remote command
//! path and the party-mode task may interleave set and pulse calls on the
//! same devices. State transitions are idempotent — requesting the current
//! state is a no-op that never reaches the underlying driver.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use jiff::Timestamp;
use log::{debug, info, warn};

use crate::config::{Config, ConfigError};
use crate::gpio::Output;

pub const RED_LED: &str = "red_led";
pub const GREEN_LED: &str = "green_led";
pub const BLUE_LED: &str = "blue_led";
pub const FAN: &str = "fan";
pub const BUZZER: &str = "buzzer";

/// Every device that must resolve to an output at startup, in report order.
pub const REQUIRED_DEVICES: [&str; 5] = [RED_LED, GREEN_LED, BLUE_LED, FAN, BUZZER];

/// Devices with persistent on/off control. The buzzer is momentary-only.
pub const CONTROLLABLE_DEVICES: [&str; 4] = [RED_LED, GREEN_LED, BLUE_LED, FAN];

/// The indicator LEDs the party animation drives.
pub const INDICATOR_LEDS: [&str; 3] = [RED_LED, GREEN_LED, BLUE_LED];

/// Shortest pulse the buzzer will produce, whatever the caller asked for.
const MIN_PULSE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Device {
    output: Output,
    on: bool,
}

impl Device {
    fn apply(&mut self, on: bool) {
        if let Err(e) = self.output.write(on) {
            warn!("driver write failed for {}: {e}", self.output.name);
        }
        self.on = on;
    }
}

/// Cached state of one device at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorStatus {
    pub name: String,
    pub on: bool,
}

/// Read-only report of every device, timestamped at capture.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub taken_at: Timestamp,
    pub devices: Vec<ActuatorStatus>,
}

impl Snapshot {
    pub fn is_on(&self, name: &str) -> bool {
        self.devices.iter().any(|d| d.name == name && d.on)
    }

    /// Name → state map for log entry composition.
    pub fn as_map(&self) -> BTreeMap<String, bool> {
        self.devices
            .iter()
            .map(|d| (d.name.clone(), d.on))
            .collect()
    }
}

/// Serialized on/off cache over the fixed device set.
#[derive(Debug)]
pub struct ActuatorRegistry {
    devices: Mutex<Vec<Device>>,
    pulse_default: Duration,
}

impl ActuatorRegistry {
    /// Resolve every required device to an output driver.
    ///
    /// A required name missing from `[pins]` is fatal.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let mut devices = Vec::with_capacity(REQUIRED_DEVICES.len());
        for name in REQUIRED_DEVICES {
            let spec = config
                .pins
                .get(name)
                .ok_or_else(|| ConfigError::MissingPinAssignment(name.to_string()))?;
            let pin = spec.resolve()?;
            let mut output = Output::open(name, pin, config.simulate);
            if let Err(e) = output.write(false) {
                warn!("could not drive {name} low at startup: {e}");
            }
            devices.push(Device { output, on: false });
        }
        Ok(Self {
            devices: Mutex::new(devices),
            pulse_default: config.buzzer_pulse(),
        })
    }

    /// Driver-level writes a device has seen.
    #[cfg(test)]
    pub(crate) fn write_count(&self, name: &str) -> u64 {
        let devices = self.devices.lock().expect("actuator lock poisoned");
        devices
            .iter()
            .find(|d| d.output.name == name)
            .map_or(0, |d| d.output.write_count())
    }

    #[cfg(test)]
    pub(crate) fn for_tests(pulse_default: Duration) -> Self {
        let devices = REQUIRED_DEVICES
            .iter()
            .map(|name| Device {
                output: Output::memory(name),
                on: false,
            })
            .collect();
        Self {
            devices: Mutex::new(devices),
            pulse_default,
        }
    }

    /// Toggle a controllable device; returns whether a state change occurred.
    ///
    /// Unknown names and the buzzer are rejected with no side effect.
    pub fn set_state(&self, name: &str, on: bool) -> bool {
        let device = name.trim().to_lowercase();
        if !CONTROLLABLE_DEVICES.contains(&device.as_str()) {
            debug!("ignoring unsupported device toggle for {name}");
            return false;
        }

        let mut devices = self.devices.lock().expect("actuator lock poisoned");
        let Some(entry) = devices.iter_mut().find(|d| d.output.name == device) else {
            return false;
        };
        if entry.on == on {
            return false;
        }
        entry.apply(on);
        // Individual LED toggles are too chatty for info.
        if INDICATOR_LEDS.contains(&device.as_str()) {
            debug!("set {device} to {}", if on { "on" } else { "off" });
        } else {
            info!("set {device} to {}", if on { "on" } else { "off" });
        }
        true
    }

    /// Momentarily activate the buzzer.
    ///
    /// The hold is clamped to at least [`MIN_PULSE`]; the trailing off
    /// write runs unconditionally, on every exit path, via a drop guard.
    pub fn pulse(&self, duration: Option<Duration>) {
        let hold = duration.unwrap_or(self.pulse_default).max(MIN_PULSE);
        info!("pulsing buzzer for {:.2}s", hold.as_secs_f64());

        let mut devices = self.devices.lock().expect("actuator lock poisoned");
        let Some(buzzer) = devices.iter_mut().find(|d| d.output.name == BUZZER) else {
            warn!("buzzer not configured; pulse ignored");
            return;
        };

        struct OffGuard<'a>(&'a mut Device);
        impl Drop for OffGuard<'_> {
            fn drop(&mut self) {
                self.0.apply(false);
            }
        }

        let guard = OffGuard(buzzer);
        guard.0.apply(true);
        thread::sleep(hold);
        drop(guard);
    }

    /// Cached state of every required device, in declaration order.
    pub fn snapshot(&self) -> Snapshot {
        let devices = self.devices.lock().expect("actuator lock poisoned");
        Snapshot {
            taken_at: Timestamp::now(),
            devices: devices
                .iter()
                .map(|d| ActuatorStatus {
                    name: d.output.name.clone(),
                    on: d.on,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ActuatorRegistry {
        ActuatorRegistry::for_tests(Duration::from_millis(100))
    }

    #[test]
    fn missing_pin_is_fatal() {
        let mut config = Config::default();
        config
            .pins
            .insert(RED_LED.to_string(), crate::config::PinSpec::Number(17));
        let err = ActuatorRegistry::new(&config).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPinAssignment(_)));
    }

    #[test]
    fn set_state_changes_and_reports() {
        let registry = registry();
        assert!(registry.set_state(FAN, true));
        assert!(registry.snapshot().is_on(FAN));
        assert!(registry.set_state(FAN, false));
        assert!(!registry.snapshot().is_on(FAN));
    }

    #[test]
    fn repeated_state_is_a_no_op() {
        let registry = registry();
        assert!(registry.set_state(RED_LED, true));
        let writes = registry.write_count(RED_LED);
        // The repeat never reaches the underlying driver.
        assert!(!registry.set_state(RED_LED, true));
        assert_eq!(registry.write_count(RED_LED), writes);
        assert!(registry.snapshot().is_on(RED_LED));
    }

    #[test]
    fn buzzer_rejected_from_direct_control() {
        let registry = registry();
        assert!(!registry.set_state(BUZZER, true));
        assert!(!registry.snapshot().is_on(BUZZER));
    }

    #[test]
    fn unknown_device_rejected() {
        let registry = registry();
        assert!(!registry.set_state("disco_ball", true));
    }

    #[test]
    fn names_are_normalized() {
        let registry = registry();
        assert!(registry.set_state(" FAN ", true));
        assert!(registry.snapshot().is_on(FAN));
    }

    #[test]
    fn pulse_always_ends_off() {
        let registry = registry();
        registry.pulse(Some(Duration::from_millis(120)));
        assert!(!registry.snapshot().is_on(BUZZER));
    }

    #[test]
    fn pulse_clamps_zero_duration() {
        let registry = registry();
        let start = std::time::Instant::now();
        registry.pulse(Some(Duration::ZERO));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(!registry.snapshot().is_on(BUZZER));
    }

    #[test]
    fn snapshot_preserves_declaration_order() {
        let registry = registry();
        let names: Vec<_> = registry
            .snapshot()
            .devices
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, REQUIRED_DEVICES);
    }
}
