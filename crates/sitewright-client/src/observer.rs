use sitewright_events::Frame;

use crate::error::StreamError;

/// Callbacks fired by the dispatcher. Injected at construction; all methods
/// default to no-ops so implementors pick what they care about.
///
/// Invocations happen synchronously on the dispatcher task, in stream order.
pub trait RunObserver: Send + Sync {
    /// Every successfully parsed frame, before type-specific handling.
    fn on_event(&self, _frame: &Frame) {}

    /// Genuine transport errors only. Never fired for the closure that
    /// follows a terminal event, and never for run-level failure.
    fn on_error(&self, _error: &StreamError) {}

    /// Exactly once per run, when it reaches `completed` or `failed`.
    fn on_complete(&self, _success: bool) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}
