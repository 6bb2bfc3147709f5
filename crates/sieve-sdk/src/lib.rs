//! Non-blocking in-process capture for multi-step data pipelines.
//!
//! Applications wrap their step functions with [`CaptureClient::step`] and
//! get, per item, a record of whether that item was kept, eliminated or
//! scored and why. Everything is emitted to a remote collector in the
//! background without ever affecting application latency or correctness.
//!
//! ## Architecture
//!
//! ```text
//! Application                        Background
//! ───────────                        ──────────
//! [CaptureClient::step]              [Flush task]      [Transport]
//!     │ derive decisions                  │                 │
//!     ▼                                   │ batches         │ retry/backoff
//! [EventBuffer] ──────────────────────────┴────────────────►│ POST /ingest
//!   (bounded, drop-oldest)
//! ```
//!
//! ## Capture levels
//!
//! - `metrics_only`: counts only, no decision events
//! - `sampled`: boundary items plus a deterministic uniform sample
//! - `full`: every item

pub mod buffer;
pub mod capture;
pub mod config;
pub mod derive;
pub mod observer;
pub mod sampler;
pub mod transport;

pub use buffer::{BufferStats, BufferStatsSnapshot, EventBuffer};
pub use capture::{CaptureClient, CaptureStats, CaptureStatsSnapshot};
pub use config::{BufferConfig, CaptureLevel, SdkConfig, TransportConfig};
pub use derive::{derive_decisions, DecisionFn, DecisionOverride};
pub use observer::{CaptureObserver, NoopObserver};
pub use sampler::{should_sample, target_size};
pub use transport::{Transport, TransportStats, TransportStatsSnapshot};
