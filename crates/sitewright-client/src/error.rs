use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

/// Transport-level failures of a run subscription.
///
/// Run-level failure (`run_failed`) is not represented here: it is a valid
/// business event and surfaces through the reduced state and the completion
/// callback instead.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("run stream endpoint returned status {status}")]
    Endpoint { status: u16 },

    #[error("SSE decode error: {details}")]
    Sse { details: String },

    #[error("stream closed while run was still active")]
    Closed,

    #[error("no frame received for {0:?}")]
    IdleTimeout(Duration),
}
