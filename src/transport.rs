//! Outbound telemetry seam.
//!
//! The wire-level publish/subscribe client lives outside the core; the
//! orchestrator only sees [`Transport`]. Publishing is best-effort — a
//! `false` return is the whole failure story, and retry is the sync
//! engine's concern, not telemetry's.

use log::debug;

/// Best-effort outbound publisher.
///
/// Implementations deliver inbound commands on their own network thread
/// by calling the orchestrator's handler methods; those handlers never
/// let a failure propagate back into that thread.
pub trait Transport: Send + Sync {
    /// Publish `value` to `feed`. Returns `false` on any failure.
    fn publish(&self, feed: &str, value: &str) -> bool;

    /// Disconnect during drain. Default no-op.
    fn close(&self) {}
}

/// Transport-less operation: every publish is dropped (and reported as
/// failed, matching a disconnected client).
pub struct NullTransport;

impl Transport for NullTransport {
    fn publish(&self, feed: &str, value: &str) -> bool {
        debug!("no transport; dropping publish of {value:?} to {feed}");
        false
    }
}

/// Records publishes for assertions.
#[cfg(test)]
pub struct MemoryTransport {
    pub published: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            published: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn values_for(&self, feed: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| f == feed)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

#[cfg(test)]
impl Transport for MemoryTransport {
    fn publish(&self, feed: &str, value: &str) -> bool {
        self.published
            .lock()
            .unwrap()
            .push((feed.to_string(), value.to_string()));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_transport_reports_failure() {
        assert!(!NullTransport.publish("home.temp", "21.5"));
    }

    #[test]
    fn memory_transport_records_in_order() {
        let transport = MemoryTransport::new();
        assert!(transport.publish("feed.a", "1"));
        assert!(transport.publish("feed.a", "2"));
        assert_eq!(transport.values_for("feed.a"), vec!["1", "2"]);
    }
}
