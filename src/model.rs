//! Core data model for Warden.
//!
//! Sample shapes handed over by the sensor collaborators, and the
//! composite entry written to the daily JSONL log.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::mode::Mode;

/// Where an environment reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    Sensor,
    Simulated,
}

/// One temperature/humidity reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSample {
    pub timestamp: Timestamp,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub source: SampleSource,
}

/// One security sensor check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySample {
    pub timestamp: Timestamp,
    pub motion_detected: bool,
    /// Reference to a captured image, when the camera collaborator took one.
    pub image_path: Option<String>,
    /// Mode in effect when the sample was taken.
    pub mode: Mode,
    pub buzzer_triggered: bool,
}

/// The two locally buffered record kinds pending cloud delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Measurement,
    SecurityEvent,
}

impl RecordKind {
    /// The local (and remote) table this kind lives in.
    pub fn table(self) -> &'static str {
        match self {
            Self::Measurement => "measurements",
            Self::SecurityEvent => "security_events",
        }
    }
}

/// A single entry in the daily log, serialized as one line of JSONL.
///
/// Sampled fields are nullable: a security-triggered entry carries the
/// last known environment reading, and vice versa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub motion_detected: bool,
    pub image_path: Option<String>,
    pub mode: Mode,
    /// Actuator name → on, snapshotted at entry composition time.
    pub actuators: BTreeMap<String, bool>,
    pub buzzer_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_source: Option<SampleSource>,
    /// Event tag (`"motion"`, `"mode_change"`, `"device_fan"`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}
