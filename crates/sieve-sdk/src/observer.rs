//! Optional hook into the SDK's own failure surface.
//!
//! The capture facade never surfaces its own errors to the application, but
//! that silence makes the SDK itself hard to debug. An application can
//! install an observer to be told about dropped events and transport
//! failures; without one, the default is a noop and the silent contract
//! holds.

/// Callbacks for SDK-internal failures. All methods default to noop.
pub trait CaptureObserver: Send + Sync {
    /// Called when the event buffer drops events to stay bounded.
    fn on_events_dropped(&self, _count: u64) {}

    /// Called when a transport dispatch exhausts its retries.
    fn on_transport_failure(&self, _detail: &str) {}
}

/// The default observer: ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CaptureObserver for NoopObserver {}
