/// Request-level failures that cross the gateway boundary.
///
/// Credential-state bookkeeping never leaks here: the pool and dispatcher
/// resolve per-credential errors internally and only surface one of these
/// per request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown model: {0}")]
    InvalidModel(String),

    #[error("no eligible credential available")]
    NoEligibleCredential,

    /// Upstream returned a status in the configured retryable set. Drives
    /// credential rotation; only visible to callers via `UpstreamExhausted`.
    #[error("transient upstream failure (status {status})")]
    TransientUpstream { status: u16 },

    /// Upstream definitively rejected the credential itself.
    #[error("credential rejected by upstream (status {status})")]
    FatalCredential { status: u16 },

    /// Any other upstream HTTP failure; not attributed to the credential
    /// and surfaced immediately without rotation.
    #[error("upstream request failed (status {status})")]
    NonRetryableUpstream { status: u16, body: String },

    /// Transport-level failure before any HTTP status was observed.
    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("retry budget exhausted after {attempts} attempts")]
    UpstreamExhausted {
        attempts: u32,
        #[source]
        last: Box<GatewayError>,
    },
}

impl GatewayError {
    /// HTTP status the router maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::InvalidModel(_) => 400,
            GatewayError::NoEligibleCredential => 429,
            GatewayError::NonRetryableUpstream { status, .. } if *status >= 400 => *status,
            GatewayError::NonRetryableUpstream { .. } => 502,
            GatewayError::Transport(_) => 502,
            GatewayError::TransientUpstream { .. }
            | GatewayError::FatalCredential { .. }
            | GatewayError::UpstreamExhausted { .. } => 502,
        }
    }

    /// Machine-readable error code for the caller-facing error payload.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidModel(_) => "model_not_found",
            GatewayError::NoEligibleCredential => "rate_limit_exceeded",
            GatewayError::TransientUpstream { .. } => "upstream_error",
            GatewayError::FatalCredential { .. } => "upstream_error",
            GatewayError::NonRetryableUpstream { .. } => "upstream_error",
            GatewayError::Transport(_) => "connection_error",
            GatewayError::UpstreamExhausted { .. } => "upstream_exhausted",
        }
    }
}
