use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use wreq::Client;

use grokgate_pool::{Credential, PoolClass, ProbeError, QuotaProbe, QuotaReading};

use crate::client::{UpstreamConfig, apply_headers, build_client};
use crate::headers::RATE_LIMITS_ENDPOINT;

/// Model the upstream reports ordinary quota against.
const PROBE_MODEL: &str = "grok-4-1-thinking-1129";
/// Model whose heavy mode draws on the elevated quota.
const HEAVY_PROBE_MODEL: &str = "grok-4";

/// Usage probe against the upstream rate-limits endpoint.
pub struct WreqQuotaProbe {
    config: UpstreamConfig,
    client: Client,
}

impl WreqQuotaProbe {
    pub fn new(config: UpstreamConfig) -> Result<Self, wreq::Error> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    async fn rate_limits(
        &self,
        token: &str,
        request_kind: &str,
        model_name: &str,
    ) -> Result<i64, ProbeError> {
        let url = format!("{}{RATE_LIMITS_ENDPOINT}", self.config.base_url);
        let payload = json!({
            "requestKind": request_kind,
            "modelName": model_name,
        });
        let body = serde_json::to_vec(&payload)
            .map_err(|err| ProbeError::Failed(err.to_string()))?;

        let builder = apply_headers(self.client.post(&url), &self.config, token);
        let response = builder
            .body(body)
            .send()
            .await
            .map_err(|err| ProbeError::Failed(err.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(ProbeError::Failed(format!("rate-limits returned {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| ProbeError::Failed(err.to_string()))?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|err| ProbeError::Failed(err.to_string()))?;
        value
            .get("remainingTokens")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProbeError::Failed("response missing remainingTokens".to_string()))
    }
}

#[async_trait]
impl QuotaProbe for WreqQuotaProbe {
    async fn probe(&self, credential: &Credential) -> Result<QuotaReading, ProbeError> {
        let remaining = self
            .rate_limits(&credential.value, "DEFAULT", PROBE_MODEL)
            .await?;

        // Heavy quota is tracked separately and only exists for elevated
        // sessions; a failed heavy probe does not invalidate the default one.
        let elevated = if credential.pool_class == PoolClass::Elevated {
            match self
                .rate_limits(&credential.value, "HEAVY", HEAVY_PROBE_MODEL)
                .await
            {
                Ok(value) => Some(value),
                Err(err) => {
                    debug!(error = %err, "heavy quota probe failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(QuotaReading { remaining, elevated })
    }
}
