//! Centralised Home/Away/Night mode management.
//!
//! [`ModeState`] is the single source of truth for the operating mode.
//! Listeners are notified synchronously in registration order, after the
//! new value has already been committed — a concurrent [`ModeState::get`]
//! during listener execution observes the new mode.

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// The rejected input of a mode-change request that didn't name a valid mode.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported mode '{0}'")]
pub struct InvalidModeError(pub String);

/// The system's operating posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Home,
    Away,
    Night,
}

impl Mode {
    /// Parse a requested mode, trimming whitespace and folding case.
    pub fn parse(candidate: &str) -> Result<Self, InvalidModeError> {
        match candidate.trim().to_uppercase().as_str() {
            "HOME" => Ok(Self::Home),
            "AWAY" => Ok(Self::Away),
            "NIGHT" => Ok(Self::Night),
            _ => Err(InvalidModeError(candidate.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Home => "HOME",
            Self::Away => "AWAY",
            Self::Night => "NIGHT",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives mode changes. A failure is logged and never rolls the change back.
pub trait ModeListener: Send + Sync {
    fn mode_changed(&self, mode: Mode) -> Result<(), Box<dyn Error + Send + Sync>>;
}

struct Inner {
    mode: Mode,
    listeners: Vec<Arc<dyn ModeListener>>,
}

/// Tracks the active mode and notifies listeners on change.
pub struct ModeState {
    inner: Mutex<Inner>,
}

impl ModeState {
    pub fn new(initial: Mode) -> Self {
        Self {
            inner: Mutex::new(Inner {
                mode: initial,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn get(&self) -> Mode {
        self.inner.lock().expect("mode lock poisoned").mode
    }

    /// Validate and commit a requested mode.
    ///
    /// Returns `Ok(false)` when the normalized candidate equals the current
    /// mode; no listener runs. On an actual change the lock is released
    /// before listeners are invoked, in registration order.
    pub fn set(&self, candidate: &str) -> Result<bool, InvalidModeError> {
        let requested = Mode::parse(candidate)?;
        let listeners = {
            let mut inner = self.inner.lock().expect("mode lock poisoned");
            if inner.mode == requested {
                debug!("mode unchanged ({requested})");
                return Ok(false);
            }
            inner.mode = requested;
            inner.listeners.clone()
        };

        info!("system mode changed to {requested}");
        for listener in listeners {
            if let Err(e) = listener.mode_changed(requested) {
                warn!("mode change listener failed: {e}");
            }
        }
        Ok(true)
    }

    /// Register a listener, ignoring a second registration of the same one.
    pub fn register(&self, listener: Arc<dyn ModeListener>) {
        let mut inner = self.inner.lock().expect("mode lock poisoned");
        if !inner.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            inner.listeners.push(listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        last: Mutex<Option<Mode>>,
    }

    impl Counting {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            })
        }
    }

    impl ModeListener for Counting {
        fn mode_changed(&self, mode: Mode) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(mode);
            Ok(())
        }
    }

    struct Failing;

    impl ModeListener for Failing {
        fn mode_changed(&self, _mode: Mode) -> Result<(), Box<dyn Error + Send + Sync>> {
            Err("listener exploded".into())
        }
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        let state = ModeState::new(Mode::Home);
        for candidate in ["away", "AWAY", " Away ", "\taway\n", "aWaY"] {
            assert!(state.set(candidate).unwrap());
            assert_eq!(state.get(), Mode::Away);
            state.set("home").unwrap();
        }
    }

    #[test]
    fn invalid_mode_leaves_state_unchanged() {
        let state = ModeState::new(Mode::Night);
        let err = state.set("party").unwrap_err();
        assert_eq!(err.0, "party");
        assert_eq!(state.get(), Mode::Night);
    }

    #[test]
    fn no_change_skips_listeners() {
        let state = ModeState::new(Mode::Home);
        let listener = Counting::new();
        state.register(listener.clone());

        assert!(!state.set("home").unwrap());
        assert_eq!(listener.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn change_notifies_listener_exactly_once() {
        let state = ModeState::new(Mode::Home);
        let listener = Counting::new();
        state.register(listener.clone());

        assert!(state.set("away").unwrap());
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*listener.last.lock().unwrap(), Some(Mode::Away));
        assert_eq!(state.get(), Mode::Away);
    }

    #[test]
    fn duplicate_registration_ignored() {
        let state = ModeState::new(Mode::Home);
        let listener = Counting::new();
        state.register(listener.clone());
        state.register(listener.clone());

        state.set("night").unwrap();
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_listener_does_not_abort_the_rest() {
        let state = ModeState::new(Mode::Home);
        let counting = Counting::new();
        state.register(Arc::new(Failing));
        state.register(counting.clone());

        assert!(state.set("away").unwrap());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.get(), Mode::Away);
    }
}
