//! The orchestrator: a fixed-tick polling loop tying everything together.
//!
//! Each tick checks independent per-activity timers (environment,
//! security, summary, heartbeat, log flush); each fires on its own
//! schedule and resets to the tick time on fire. Inbound remote commands
//! arrive on the transport's thread and are routed synchronously into
//! the registry, mode state, and party controller — every failure is
//! caught and logged at that boundary.
//!
//! Lifecycle: `Stopped → Running → Draining → Stopped`, with no way out
//! of `Draining` except `Stopped`.

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use jiff::Timestamp;
use log::{debug, info, warn};

use crate::actuator::{ActuatorRegistry, BUZZER, INDICATOR_LEDS};
use crate::config::{Config, FeedsConfig};
use crate::journal::DailyJournal;
use crate::mode::{Mode, ModeListener, ModeState};
use crate::model::{EnvironmentSample, LogEntry, SecuritySample};
use crate::party::PartyMode;
use crate::sensors::{EnvironmentSensor, SecuritySensor};
use crate::sync::SyncEngine;
use crate::transport::Transport;

/// Virtual device name routing to the party controller.
pub const PARTY_MODE_DEVICE: &str = "party_mode";

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Stopped,
    Running,
    Draining,
}

/// Per-activity fire times. Every timer fires on the first tick.
#[derive(Debug, Default)]
pub struct Timers {
    last_env: Option<Instant>,
    last_security: Option<Instant>,
    last_summary: Option<Instant>,
    last_heartbeat: Option<Instant>,
    last_flush: Option<Instant>,
}

/// Checks a timer against elapsed wall time, resetting it on fire.
fn due(last: &mut Option<Instant>, now: Instant, interval: Duration) -> bool {
    let fire = last.is_none_or(|at| now.duration_since(at) >= interval);
    if fire {
        *last = Some(now);
    }
    fire
}

/// Everything the orchestrator coordinates.
pub struct Collaborators {
    pub modes: Arc<ModeState>,
    pub registry: Arc<ActuatorRegistry>,
    pub party: Arc<PartyMode>,
    pub sync: Arc<SyncEngine>,
    pub journal: Arc<DailyJournal>,
    pub transport: Arc<dyn Transport>,
    pub environment: Box<dyn EnvironmentSensor>,
    pub security: Box<dyn SecuritySensor>,
}

struct LastSamples {
    environment: Option<EnvironmentSample>,
    security: Option<SecuritySample>,
}

pub struct Controller {
    modes: Arc<ModeState>,
    registry: Arc<ActuatorRegistry>,
    party: Arc<PartyMode>,
    sync: Arc<SyncEngine>,
    journal: Arc<DailyJournal>,
    transport: Arc<dyn Transport>,
    environment: Mutex<Box<dyn EnvironmentSensor>>,
    security: Mutex<Box<dyn SecuritySensor>>,

    feeds: FeedsConfig,
    tick_interval: Duration,
    env_interval: Duration,
    security_interval: Duration,
    summary_interval: Duration,
    heartbeat_interval: Duration,
    flush_interval: Duration,

    state: Mutex<Lifecycle>,
    running: AtomicBool,
    motion_count: AtomicU64,
    last: Mutex<LastSamples>,
}

/// Publishes mode changes and journals them; registered as a listener so
/// remote and local mode changes behave identically.
struct ModeChangeFanout {
    controller: Weak<Controller>,
}

impl ModeListener for ModeChangeFanout {
    fn mode_changed(&self, mode: Mode) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(controller) = self.controller.upgrade() {
            controller.announce_mode(mode);
        }
        Ok(())
    }
}

impl Controller {
    pub fn new(config: &Config, parts: Collaborators) -> Arc<Self> {
        let controller = Arc::new(Self {
            modes: parts.modes,
            registry: parts.registry,
            party: parts.party,
            sync: parts.sync,
            journal: parts.journal,
            transport: parts.transport,
            environment: Mutex::new(parts.environment),
            security: Mutex::new(parts.security),
            feeds: config.feeds.clone(),
            tick_interval: config.tick(),
            env_interval: Duration::from_secs(config.env_interval),
            security_interval: Duration::from_secs(config.security_check_interval),
            summary_interval: Duration::from_secs(config.security_send_interval),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval),
            flush_interval: Duration::from_secs(config.flush_interval),
            state: Mutex::new(Lifecycle::Stopped),
            running: AtomicBool::new(false),
            motion_count: AtomicU64::new(0),
            last: Mutex::new(LastSamples {
                environment: None,
                security: None,
            }),
        });
        controller.modes.register(Arc::new(ModeChangeFanout {
            controller: Arc::downgrade(&controller),
        }));
        controller
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.state.lock().expect("lifecycle lock poisoned")
    }

    /// Drive the polling loop on the calling thread until [`shutdown`]
    /// is observed, then drain.
    ///
    /// [`shutdown`]: Controller::shutdown
    pub fn run(&self) {
        {
            let mut state = self.state.lock().expect("lifecycle lock poisoned");
            if *state != Lifecycle::Stopped {
                warn!("controller already started; ignoring run()");
                return;
            }
            *state = Lifecycle::Running;
        }
        self.running.store(true, Ordering::Release);
        info!("controller started");

        // Publish the startup mode so dashboards see a value immediately.
        self.announce_mode(self.modes.get());

        let mut timers = Timers::default();
        while self.running.load(Ordering::Acquire) {
            self.tick(Instant::now(), &mut timers);
            thread::sleep(self.tick_interval);
        }
        self.drain();
    }

    /// Request shutdown; the loop observes the flag on its next tick.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// One polling cycle. Takes the tick time explicitly so tests can
    /// drive the timers without sleeping.
    pub fn tick(&self, now: Instant, timers: &mut Timers) {
        if due(&mut timers.last_env, now, self.env_interval) {
            self.collect_environment();
        }
        if due(&mut timers.last_security, now, self.security_interval) {
            self.collect_security();
        }
        if due(&mut timers.last_summary, now, self.summary_interval) {
            self.publish_security_summary();
        }
        if due(&mut timers.last_heartbeat, now, self.heartbeat_interval) {
            self.publish_heartbeat();
        }
        if due(&mut timers.last_flush, now, self.flush_interval)
            && let Err(e) = self.journal.flush()
        {
            warn!("log flush failed: {e}");
        }
    }

    fn drain(&self) {
        {
            let mut state = self.state.lock().expect("lifecycle lock poisoned");
            *state = Lifecycle::Draining;
        }
        info!("controller draining");
        if let Err(e) = self.journal.flush() {
            warn!("final log flush failed: {e}");
        }
        if let Err(e) = self.journal.close() {
            warn!("log close failed: {e}");
        }
        self.sync.close();
        self.party.stop();
        self.transport.close();
        {
            let mut state = self.state.lock().expect("lifecycle lock poisoned");
            *state = Lifecycle::Stopped;
        }
        info!("controller stopped");
    }

    // ── Per-activity collection ──

    fn collect_environment(&self) {
        let sample = {
            let mut sensor = self.environment.lock().expect("sensor lock poisoned");
            sensor.sample()
        };
        self.last.lock().expect("samples lock poisoned").environment = Some(sample.clone());

        self.journal_event(Some("environmental"), Some(&sample), None);
        self.sync.append_measurement(&sample);

        if self.publish_environment(&sample) {
            info!("environmental data published ({:?})", sample.source);
        } else {
            warn!("failed to publish environmental data");
        }
    }

    fn collect_security(&self) {
        let sample = {
            let mut sensor = self.security.lock().expect("sensor lock poisoned");
            sensor.sample()
        };
        self.last.lock().expect("samples lock poisoned").security = Some(sample.clone());

        if sample.motion_detected {
            let total = self.motion_count.fetch_add(1, Ordering::AcqRel) + 1;
            warn!("motion detected! total this period: {total}");
            self.journal_event(Some("motion"), None, Some(&sample));
            self.sync.append_security(&sample, "motion");
        }
    }

    fn publish_security_summary(&self) {
        // The counter resets every period even when nothing is published.
        let count = self.motion_count.swap(0, Ordering::AcqRel);
        if self.feeds.security.is_empty() {
            debug!("no security feeds configured; summary skipped (motion={count})");
            return;
        }
        let mut ok = true;
        for (field, feed) in &self.feeds.security {
            let value = match field.as_str() {
                "motion_count" => Some(count.to_string()),
                "timestamp" => Some(Timestamp::now().to_string()),
                _ => None,
            };
            if let Some(value) = value {
                ok &= self.transport.publish(feed, &value);
            }
        }
        if ok {
            info!("security summary sent (motion={count})");
        } else {
            warn!("failed to publish security summary");
        }
    }

    fn publish_heartbeat(&self) {
        let Some(feed) = &self.feeds.heartbeat else {
            return;
        };
        if self.transport.publish(feed, &Timestamp::now().to_string()) {
            debug!("heartbeat published");
        }
    }

    fn publish_environment(&self, sample: &EnvironmentSample) -> bool {
        let mut ok = true;
        for (field, feed) in &self.feeds.environment {
            let value = match field.as_str() {
                "temperature" => sample.temperature.map(|v| v.to_string()),
                "humidity" => sample.humidity.map(|v| v.to_string()),
                _ => None,
            };
            if let Some(value) = value {
                ok &= self.transport.publish(feed, &value);
            }
        }
        ok
    }

    fn announce_mode(&self, mode: Mode) {
        if let Some(feed) = &self.feeds.mode {
            self.transport.publish(feed, mode.as_str());
        }
        self.journal_event(Some("mode_change"), None, None);
    }

    // ── Inbound command routing (called on the transport's thread) ──

    /// Route a remote device command. Never propagates a failure.
    pub fn handle_set_device_state(&self, name: &str, on: bool) {
        let device = name.trim().to_lowercase();
        match device.as_str() {
            PARTY_MODE_DEVICE => {
                if on {
                    if self.party.start() {
                        self.journal_event(Some("party_mode_on"), None, None);
                    }
                } else if self.party.stop() {
                    self.journal_event(Some("party_mode_off"), None, None);
                }
            }
            BUZZER => {
                if on {
                    self.registry.pulse(None);
                    self.journal_event(Some("device_buzzer"), None, None);
                }
            }
            _ => {
                let changed = self.registry.set_state(&device, on);
                if changed && !INDICATOR_LEDS.contains(&device.as_str()) {
                    self.journal_event(Some(&format!("device_{device}")), None, None);
                }
            }
        }
    }

    /// Route a remote mode-change request. An invalid mode is rejected
    /// and logged; the transport thread never sees the error.
    pub fn handle_set_mode(&self, requested: &str) {
        if let Err(e) = self.modes.set(requested) {
            warn!("rejected mode command '{requested}': {e}");
        }
    }

    // ── Log entry composition ──

    /// Compose and append one log entry from the triggering sample plus
    /// the last known state of everything else. Append failures are
    /// logged here; callers don't care.
    fn journal_event(
        &self,
        event: Option<&str>,
        env: Option<&EnvironmentSample>,
        security: Option<&SecuritySample>,
    ) {
        let last = self.last.lock().expect("samples lock poisoned");
        let env = env.or(last.environment.as_ref());
        let security = security.or(last.security.as_ref());

        let timestamp = match (event, env, security) {
            // The triggering sample's own timestamp keys rotation.
            (Some("motion"), _, Some(sec)) => sec.timestamp,
            (_, Some(env), _) => env.timestamp,
            (_, None, Some(sec)) => sec.timestamp,
            _ => Timestamp::now(),
        };

        let entry = LogEntry {
            timestamp,
            temperature: env.and_then(|e| e.temperature),
            humidity: env.and_then(|e| e.humidity),
            motion_detected: security.is_some_and(|s| s.motion_detected),
            image_path: security.and_then(|s| s.image_path.clone()),
            mode: self.modes.get(),
            actuators: self.registry.snapshot().as_map(),
            buzzer_triggered: security.is_some_and(|s| s.buzzer_triggered),
            environment_source: env.map(|e| e.source),
            event: event.map(ToString::to_string),
        };
        drop(last);

        if let Err(e) = self.journal.append(&entry) {
            warn!("failed to append log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::actuator::{FAN, RED_LED};
    use crate::buffer::SqliteBuffer;
    use crate::config::SyncConfig;
    use crate::model::{RecordKind, SampleSource};
    use crate::party::PartyFrame;
    use crate::transport::MemoryTransport;

    struct ScriptedEnvironment;

    impl EnvironmentSensor for ScriptedEnvironment {
        fn sample(&mut self) -> EnvironmentSample {
            EnvironmentSample {
                timestamp: Timestamp::now(),
                temperature: Some(21.5),
                humidity: Some(45.0),
                source: SampleSource::Sensor,
            }
        }
    }

    struct ScriptedSecurity {
        motions: Vec<bool>,
        index: usize,
    }

    impl SecuritySensor for ScriptedSecurity {
        fn sample(&mut self) -> SecuritySample {
            let motion = self.motions.get(self.index).copied().unwrap_or(false);
            self.index += 1;
            SecuritySample {
                timestamp: Timestamp::now(),
                motion_detected: motion,
                image_path: None,
                mode: Mode::Home,
                buzzer_triggered: false,
            }
        }
    }

    struct Fixture {
        controller: Arc<Controller>,
        buffer: Arc<SqliteBuffer>,
        transport: Arc<MemoryTransport>,
        _dir: TempDir,
    }

    fn standard_feeds() -> FeedsConfig {
        let environment = [("temperature".to_string(), "home.temperature".to_string())];
        let security = [("motion_count".to_string(), "home.motion".to_string())];
        FeedsConfig {
            environment: environment.into_iter().collect(),
            security: security.into_iter().collect(),
            mode: Some("home.mode".to_string()),
            heartbeat: Some("home.heartbeat".to_string()),
        }
    }

    fn fixture(motions: Vec<bool>) -> Fixture {
        fixture_with_feeds(motions, standard_feeds())
    }

    fn fixture_with_feeds(motions: Vec<bool>, feeds: FeedsConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = Config {
            env_interval: 60,
            security_check_interval: 1,
            security_send_interval: 60,
            heartbeat_interval: 30,
            feeds,
            ..Config::default()
        };

        let modes = Arc::new(ModeState::new(Mode::Home));
        let registry = Arc::new(ActuatorRegistry::for_tests(Duration::from_millis(100)));
        let party = Arc::new(PartyMode::new(
            Arc::clone(&registry),
            vec![PartyFrame {
                leds: vec![RED_LED.to_string()],
                hold: Duration::from_millis(5),
            }],
        ));
        let buffer = Arc::new(SqliteBuffer::in_memory().unwrap());
        let sync = Arc::new(SyncEngine::start(
            Arc::clone(&buffer),
            None,
            &SyncConfig::default(),
        ));
        let journal = Arc::new(DailyJournal::new(dir.path().join("logs")).unwrap());
        let transport = Arc::new(MemoryTransport::new());

        let controller = Controller::new(
            &config,
            Collaborators {
                modes,
                registry,
                party,
                sync,
                journal,
                transport: Arc::clone(&transport) as Arc<dyn Transport>,
                environment: Box::new(ScriptedEnvironment),
                security: Box::new(ScriptedSecurity { motions, index: 0 }),
            },
        );
        Fixture {
            controller,
            buffer,
            transport,
            _dir: dir,
        }
    }

    #[test]
    fn first_tick_fires_every_timer() {
        let f = fixture(vec![false]);
        let mut timers = Timers::default();
        f.controller.tick(Instant::now(), &mut timers);

        assert_eq!(f.buffer.unsynced_count(RecordKind::Measurement).unwrap(), 1);
        assert_eq!(f.transport.values_for("home.temperature"), vec!["21.5"]);
        assert_eq!(f.transport.values_for("home.motion"), vec!["0"]);
        assert_eq!(f.transport.values_for("home.heartbeat").len(), 1);
    }

    #[test]
    fn timers_fire_independently() {
        let f = fixture(vec![true, true, false]);
        let mut timers = Timers::default();
        let t0 = Instant::now();
        f.controller.tick(t0, &mut timers);
        // Two seconds later only the 1s security timer is due.
        f.controller.tick(t0 + Duration::from_secs(2), &mut timers);
        f.controller.tick(t0 + Duration::from_secs(4), &mut timers);

        assert_eq!(f.buffer.unsynced_count(RecordKind::Measurement).unwrap(), 1);
        assert_eq!(
            f.buffer.unsynced_count(RecordKind::SecurityEvent).unwrap(),
            2
        );
    }

    #[test]
    fn summary_publishes_and_resets_the_counter() {
        let f = fixture(vec![true, true, false, false]);
        let mut timers = Timers::default();
        let t0 = Instant::now();
        f.controller.tick(t0, &mut timers);
        f.controller.tick(t0 + Duration::from_secs(2), &mut timers);
        f.controller.tick(t0 + Duration::from_secs(61), &mut timers);
        f.controller.tick(t0 + Duration::from_secs(122), &mut timers);

        // Security runs before the summary within a tick, so the first
        // summary already sees that tick's motion; each reset starts the
        // next period from zero.
        assert_eq!(f.transport.values_for("home.motion"), vec!["1", "1", "0"]);
    }

    #[test]
    fn summary_without_feeds_publishes_nothing_but_still_resets() {
        let feeds = FeedsConfig {
            security: std::collections::BTreeMap::new(),
            ..standard_feeds()
        };
        let f = fixture_with_feeds(vec![true, false], feeds);
        let mut timers = Timers::default();
        let t0 = Instant::now();
        f.controller.tick(t0, &mut timers);
        f.controller.tick(t0 + Duration::from_secs(61), &mut timers);

        assert!(f.transport.values_for("home.motion").is_empty());
        // The first period's motion was discarded at its summary, not
        // carried into the next one.
        assert_eq!(f.controller.motion_count.load(Ordering::Acquire), 0);
    }

    #[test]
    fn remote_mode_command_publishes_and_journals() {
        let f = fixture(vec![]);
        f.controller.handle_set_mode(" away ");
        assert_eq!(f.controller.modes.get(), Mode::Away);
        assert_eq!(f.transport.values_for("home.mode"), vec!["AWAY"]);

        // Invalid requests are swallowed at the boundary.
        f.controller.handle_set_mode("disco");
        assert_eq!(f.controller.modes.get(), Mode::Away);
    }

    #[test]
    fn remote_device_commands_route_correctly() {
        let f = fixture(vec![]);
        f.controller.handle_set_device_state(FAN, true);
        assert!(f.controller.registry.snapshot().is_on(FAN));

        f.controller.handle_set_device_state(PARTY_MODE_DEVICE, true);
        assert!(f.controller.party.is_running());
        f.controller.handle_set_device_state(PARTY_MODE_DEVICE, false);
        assert!(!f.controller.party.is_running());

        // Unknown devices are rejected without effect.
        f.controller.handle_set_device_state("disco_ball", true);
    }

    #[test]
    fn run_drains_to_stopped_on_shutdown() {
        let f = fixture(vec![false; 32]);
        let controller = Arc::clone(&f.controller);
        let handle = thread::spawn(move || controller.run());

        thread::sleep(Duration::from_millis(50));
        assert_eq!(f.controller.lifecycle(), Lifecycle::Running);

        f.controller.shutdown();
        handle.join().unwrap();
        assert_eq!(f.controller.lifecycle(), Lifecycle::Stopped);
        assert!(!f.controller.party.is_running());
    }
}
