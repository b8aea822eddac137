//! SSE consumer for the Sitewright run event stream.
//!
//! Subscribes to the backend's per-run event feed, folds frames through the
//! reducer in `sitewright-events`, and exposes the result as read-only
//! snapshots plus observer callbacks. Reconnection is identity-driven: the
//! terminal-state latch, not a retry policy, keeps dead runs dead.

pub mod config;
pub mod consumer;
pub mod error;
pub mod observer;
pub mod sse;

pub use config::RunStreamConfig;
pub use consumer::RunStream;
pub use error::{Result, StreamError};
pub use observer::{NoopObserver, RunObserver};

pub use sitewright_events as events;
