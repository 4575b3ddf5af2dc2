//! Sensor collaborator seams.
//!
//! The orchestrator pulls samples through these traits; the real
//! DHT22/PIR/camera wrappers live outside the core. The simulated
//! implementations here keep a device off the bench fully operational
//! and give tests deterministic inputs.

use std::sync::Arc;

use jiff::Timestamp;

use crate::actuator::ActuatorRegistry;
use crate::mode::{Mode, ModeState};
use crate::model::{EnvironmentSample, SampleSource, SecuritySample};

/// Produces one temperature/humidity reading per call. May block.
pub trait EnvironmentSensor: Send {
    fn sample(&mut self) -> EnvironmentSample;
}

/// Produces one motion check per call. May block.
pub trait SecuritySensor: Send {
    fn sample(&mut self) -> SecuritySample;
}

/// Smooth plausible readings: a daily temperature cycle with a little
/// deterministic jitter, humidity loosely inverse to temperature.
pub struct SimulatedEnvironment {
    jitter_state: u64,
}

impl SimulatedEnvironment {
    pub fn new() -> Self {
        Self { jitter_state: 0x9e37_79b9 }
    }

    /// Cheap xorshift in [-1, 1]; repeatable, no RNG dependency.
    fn jitter(&mut self) -> f64 {
        let mut x = self.jitter_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.jitter_state = x;
        (x % 2000) as f64 / 1000.0 - 1.0
    }
}

impl Default for SimulatedEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentSensor for SimulatedEnvironment {
    fn sample(&mut self) -> EnvironmentSample {
        let now = Timestamp::now();
        let day_phase = (now.as_second() % 86_400) as f64 / 86_400.0;
        let temperature = 22.0 + 5.0 * (day_phase * std::f64::consts::TAU).sin() + self.jitter();
        let humidity = (60.0 - (temperature - 20.0) * 2.0 + 5.0 * self.jitter()).clamp(30.0, 90.0);
        EnvironmentSample {
            timestamp: now,
            temperature: Some((temperature * 10.0).round() / 10.0),
            humidity: Some((humidity * 10.0).round() / 10.0),
            source: SampleSource::Simulated,
        }
    }
}

/// Stand-in PIR sensor.
///
/// Reports motion on every `motion_every`-th check when configured.
/// On motion outside Home mode it pulses the buzzer, mirroring what the
/// hardware security wrapper does, and reports the pulse in the sample.
pub struct SimulatedSecurity {
    modes: Arc<ModeState>,
    registry: Arc<ActuatorRegistry>,
    motion_every: Option<u64>,
    checks: u64,
}

impl SimulatedSecurity {
    pub fn new(
        modes: Arc<ModeState>,
        registry: Arc<ActuatorRegistry>,
        motion_every: Option<u64>,
    ) -> Self {
        Self {
            modes,
            registry,
            motion_every,
            checks: 0,
        }
    }
}

impl SecuritySensor for SimulatedSecurity {
    fn sample(&mut self) -> SecuritySample {
        self.checks += 1;
        let motion_detected = self
            .motion_every
            .is_some_and(|every| every > 0 && self.checks % every == 0);
        let mode = self.modes.get();

        let buzzer_triggered = motion_detected && mode != Mode::Home;
        if buzzer_triggered {
            self.registry.pulse(None);
        }

        SecuritySample {
            timestamp: Timestamp::now(),
            motion_detected,
            image_path: None,
            mode,
            buzzer_triggered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    fn fixtures() -> (Arc<ModeState>, Arc<ActuatorRegistry>) {
        (
            Arc::new(ModeState::new(Mode::Home)),
            Arc::new(ActuatorRegistry::for_tests(Duration::from_millis(100))),
        )
    }

    #[test]
    fn simulated_environment_stays_plausible() {
        let mut sensor = SimulatedEnvironment::new();
        for _ in 0..10 {
            let sample = sensor.sample();
            assert_eq!(sample.source, SampleSource::Simulated);
            let temperature = sample.temperature.unwrap();
            let humidity = sample.humidity.unwrap();
            assert!((10.0..35.0).contains(&temperature), "{temperature}");
            assert!((30.0..=90.0).contains(&humidity), "{humidity}");
        }
    }

    #[test]
    fn quiet_sensor_never_reports_motion() {
        let (modes, registry) = fixtures();
        let mut sensor = SimulatedSecurity::new(modes, registry, None);
        for _ in 0..5 {
            assert!(!sensor.sample().motion_detected);
        }
    }

    #[test]
    fn motion_at_home_skips_the_buzzer() {
        let (modes, registry) = fixtures();
        let mut sensor = SimulatedSecurity::new(modes, registry, Some(1));
        let sample = sensor.sample();
        assert!(sample.motion_detected);
        assert!(!sample.buzzer_triggered);
        assert_eq!(sample.mode, Mode::Home);
    }

    #[test]
    fn motion_while_away_pulses_the_buzzer() {
        let (modes, registry) = fixtures();
        modes.set("away").unwrap();
        let mut sensor = SimulatedSecurity::new(modes, Arc::clone(&registry), Some(1));
        let sample = sensor.sample();
        assert!(sample.buzzer_triggered);
        // The pulse guard has already forced the buzzer back off.
        assert!(!registry.snapshot().is_on(crate::actuator::BUZZER));
    }
}
