//! Party mode: a transient animation over the indicator LEDs.
//!
//! At most one animation task exists at a time. It starts only when every
//! indicator is off, observes a [`CancelToken`] between frames, and forces
//! every indicator off on every exit path — normal cancellation, a stop
//! timeout, or a panic inside the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::actuator::{ActuatorRegistry, INDICATOR_LEDS};
use crate::config::FrameConfig;

/// Cooperative cancellation flag shared with the animation task.
///
/// The task checks the token between frames, so worst-case cancellation
/// latency is one frame's hold duration.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One step of the animation.
#[derive(Debug, Clone)]
pub struct PartyFrame {
    /// Indicator LEDs lit during the frame; the rest are forced off.
    pub leds: Vec<String>,
    pub hold: Duration,
}

impl From<&FrameConfig> for PartyFrame {
    fn from(frame: &FrameConfig) -> Self {
        Self {
            leds: frame.leds.clone(),
            hold: Duration::from_millis(frame.hold_ms),
        }
    }
}

struct Running {
    token: CancelToken,
    handle: JoinHandle<()>,
}

/// Singleton controller for the animation task.
pub struct PartyMode {
    registry: Arc<ActuatorRegistry>,
    frames: Vec<PartyFrame>,
    running: Mutex<Option<Running>>,
    stop_timeout: Duration,
}

impl PartyMode {
    pub fn new(registry: Arc<ActuatorRegistry>, frames: Vec<PartyFrame>) -> Self {
        Self {
            registry,
            frames,
            running: Mutex::new(None),
            stop_timeout: Duration::from_secs(5),
        }
    }

    /// Launch the animation task.
    ///
    /// No-op while a task is already alive. Refuses (logged) unless every
    /// indicator LED is currently off. Returns whether a task was launched.
    pub fn start(&self) -> bool {
        let mut slot = self.running.lock().expect("party lock poisoned");
        if let Some(running) = slot.as_ref()
            && !running.handle.is_finished()
        {
            debug!("party mode already running");
            return false;
        }

        let snapshot = self.registry.snapshot();
        for led in INDICATOR_LEDS {
            if snapshot.is_on(led) {
                info!("cannot start party mode: {led} is not off");
                return false;
            }
        }

        let token = CancelToken::new();
        let task_token = token.clone();
        let registry = Arc::clone(&self.registry);
        let frames = self.frames.clone();
        let spawned = thread::Builder::new()
            .name("party-mode".to_string())
            .spawn(move || run_animation(&registry, &frames, &task_token));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                warn!("could not spawn party task: {e}");
                return false;
            }
        };

        *slot = Some(Running { token, handle });
        info!("party mode started");
        true
    }

    /// Cancel the animation and wait (bounded) for the task to finish.
    ///
    /// A timeout is logged and the task is left to finish on its own —
    /// its cleanup path still forces the LEDs off. Returns whether a
    /// running task was signalled.
    pub fn stop(&self) -> bool {
        let mut slot = self.running.lock().expect("party lock poisoned");
        let Some(running) = slot.take() else {
            return false;
        };
        if running.handle.is_finished() {
            let _ = running.handle.join();
            return false;
        }

        running.token.cancel();
        let deadline = Instant::now() + self.stop_timeout;
        while !running.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if running.handle.is_finished() {
            if running.handle.join().is_err() {
                warn!("party task panicked; LEDs were forced off by its cleanup path");
            }
            info!("party mode stopped");
        } else {
            warn!(
                "party task did not stop within {:.1}s; proceeding with shutdown",
                self.stop_timeout.as_secs_f64()
            );
        }
        true
    }

    pub fn is_running(&self) -> bool {
        let slot = self.running.lock().expect("party lock poisoned");
        slot.as_ref().is_some_and(|r| !r.handle.is_finished())
    }
}

/// The animation loop, run on the dedicated task thread.
fn run_animation(registry: &ActuatorRegistry, frames: &[PartyFrame], token: &CancelToken) {
    // Forces every indicator off on all exit paths, including panics.
    struct LightsOut<'a>(&'a ActuatorRegistry);
    impl Drop for LightsOut<'_> {
        fn drop(&mut self) {
            for led in INDICATOR_LEDS {
                self.0.set_state(led, false);
            }
        }
    }
    let _lights_out = LightsOut(registry);

    'animation: loop {
        for frame in frames {
            for led in INDICATOR_LEDS {
                let lit = frame.leds.iter().any(|l| l == led);
                registry.set_state(led, lit);
            }
            thread::sleep(frame.hold);
            if token.is_cancelled() {
                break 'animation;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::actuator::{BLUE_LED, GREEN_LED, RED_LED};

    fn fast_frames() -> Vec<PartyFrame> {
        vec![
            PartyFrame {
                leds: vec![RED_LED.to_string()],
                hold: Duration::from_millis(5),
            },
            PartyFrame {
                leds: vec![GREEN_LED.to_string(), BLUE_LED.to_string()],
                hold: Duration::from_millis(5),
            },
        ]
    }

    fn party() -> PartyMode {
        let registry = Arc::new(ActuatorRegistry::for_tests(Duration::from_millis(100)));
        PartyMode::new(registry, fast_frames())
    }

    #[test]
    fn start_then_stop_leaves_all_indicators_off() {
        let party = party();
        assert!(party.start());
        thread::sleep(Duration::from_millis(20));
        assert!(party.stop());

        let snapshot = party.registry.snapshot();
        for led in INDICATOR_LEDS {
            assert!(!snapshot.is_on(led), "{led} left on");
        }
        assert!(!party.is_running());
    }

    #[test]
    fn second_start_is_a_no_op() {
        let party = party();
        assert!(party.start());
        assert!(!party.start());
        party.stop();
    }

    #[test]
    fn refuses_when_an_indicator_is_on() {
        let party = party();
        party.registry.set_state(RED_LED, true);
        assert!(!party.start());
        assert!(!party.is_running());
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let party = party();
        assert!(!party.stop());
    }

    #[test]
    fn restart_after_stop_works() {
        let party = party();
        assert!(party.start());
        thread::sleep(Duration::from_millis(10));
        assert!(party.stop());
        assert!(party.start());
        assert!(party.stop());
    }

    #[test]
    fn frames_convert_from_config() {
        let frame = FrameConfig {
            leds: vec![RED_LED.to_string()],
            hold_ms: 300,
        };
        let converted = PartyFrame::from(&frame);
        assert_eq!(converted.hold, Duration::from_millis(300));
        assert_eq!(converted.leds, vec![RED_LED.to_string()]);
    }
}
