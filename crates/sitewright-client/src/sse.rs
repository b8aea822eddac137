//! The SSE subscription transport: one long-lived GET per tracked run,
//! decoded into raw events whose data payloads are JSON frames.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures_core::Stream;
use futures_util::StreamExt;

use crate::config::RunStreamConfig;
use crate::error::{Result, StreamError};

/// One event off the wire. The frame lives entirely in the data payload;
/// the SSE event name and id fields are unused by this protocol.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub data: String,
}

pub type RawEventStream = Pin<Box<dyn Stream<Item = Result<RawEvent>> + Send>>;

/// Open the event stream for a run. The caller owns reconnection policy;
/// this function makes exactly one attempt.
pub(crate) async fn subscribe(
    http: &reqwest::Client,
    config: &RunStreamConfig,
    run_id: &str,
) -> Result<RawEventStream> {
    let url = format!(
        "{}/api/runs/{run_id}/events/stream",
        config.base_url.trim_end_matches('/')
    );

    let mut request = http
        .get(&url)
        .header(reqwest::header::ACCEPT, "text/event-stream");
    if let Some(token) = &config.auth_token {
        request = request.bearer_auth(token);
    }
    if let Some(tenant) = &config.tenant_id {
        request = request.header("x-tenant-id", tenant);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(StreamError::Endpoint {
            status: status.as_u16(),
        });
    }

    let stream = response.bytes_stream().eventsource().map(|result| {
        result
            .map(|event| RawEvent { data: event.data })
            .map_err(|e| StreamError::Sse {
                details: e.to_string(),
            })
    });

    Ok(Box::pin(stream))
}
