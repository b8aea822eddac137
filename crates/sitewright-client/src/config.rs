use std::time::Duration;

/// Connection settings for the run stream consumer.
///
/// Auth token and tenant id are passive inputs: the consumer attaches them to
/// the subscription request verbatim and never refreshes or validates them.
#[derive(Debug, Clone)]
pub struct RunStreamConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub tenant_id: Option<String>,
    /// When set, a tracked run that emits no frame for this long is treated
    /// as stalled: the subscription closes and the error callback fires.
    /// Unset by default, matching the backend's own lack of a deadline.
    pub idle_timeout: Option<Duration>,
}

impl RunStreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            tenant_id: None,
            idle_timeout: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}
