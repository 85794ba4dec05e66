use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use grokgate_common::{GatewayError, Settings};
use grokgate_pool::{CredentialPool, Outcome, QuotaProbe};
use grokgate_protocol::chat::{ChatCompletion, ChatCompletionRequest, VideoOptions};
use grokgate_upstream::{
    ConversationClient, ConversationRequest, PayloadSpec, TranslateOptions, UpstreamCallError,
    build_payload, collect, flatten_messages, translate_stream,
};

use crate::catalog;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Retries after the first attempt; `max_retry + 1` attempts total.
    pub max_retry: u32,
    pub retry_status_codes: Vec<u16>,
    pub fatal_status_codes: Vec<u16>,
    pub translate: TranslateOptions,
}

impl DispatchOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retry: settings.max_retry,
            retry_status_codes: settings.retry_status_codes.clone(),
            fatal_status_codes: settings.fatal_status_codes.clone(),
            translate: TranslateOptions::from_settings(settings),
        }
    }
}

pub enum DispatchOutput {
    /// Caller-facing SSE lines including the end-of-stream sentinel.
    Stream(mpsc::Receiver<String>),
    Complete(ChatCompletion),
}

/// Single entry point for satisfying one completion request: credential
/// selection, upstream call, rotation on credential failures, translation.
pub struct Dispatcher {
    pool: Arc<CredentialPool>,
    client: Arc<dyn ConversationClient>,
    /// Post-success quota sync; skipped when absent.
    probe: Option<Arc<dyn QuotaProbe>>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<CredentialPool>,
        client: Arc<dyn ConversationClient>,
        probe: Option<Arc<dyn QuotaProbe>>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            pool,
            client,
            probe,
            options,
        }
    }

    pub async fn dispatch(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<DispatchOutput, GatewayError> {
        let Some(model) = catalog::get(&request.model) else {
            return Err(GatewayError::InvalidModel(request.model.clone()));
        };

        let default_video = VideoOptions::default();
        let video = model
            .video
            .then(|| request.video.as_ref().unwrap_or(&default_video));
        let message = flatten_messages(&request.messages);
        let payload = build_payload(
            &message,
            &PayloadSpec {
                upstream_model: model.upstream_model,
                model_mode: model.model_mode,
                video,
            },
        );

        let attempts = self.options.max_retry + 1;
        let mut last_error: Option<GatewayError> = None;

        for attempt in 0..attempts {
            // A drained pool cannot be retried around. The lease keeps the
            // credential out of rotation for exactly this attempt; dropping
            // it, including a caller disconnect mid-call, puts it back.
            let lease = self
                .pool
                .select(model.heavy)
                .await
                .map_err(|_| GatewayError::NoEligibleCredential)?;

            let call = self.client.converse(ConversationRequest {
                token: lease.value().to_string(),
                payload: payload.clone(),
            });

            match call.await {
                Ok(stream) => {
                    info!(model = %model.id, attempt, "upstream conversation accepted");
                    self.pool.report(lease.value(), Outcome::Success).await;
                    self.sync_quota(lease.value().to_string());
                    drop(lease);
                    return self.translate(request, stream).await;
                }
                Err(UpstreamCallError::Status { status, body }) => {
                    if self.options.fatal_status_codes.contains(&status) {
                        warn!(status, attempt, "credential rejected, expiring");
                        self.pool
                            .report(lease.value(), Outcome::FatalFailure(status))
                            .await;
                        last_error = Some(GatewayError::FatalCredential { status });
                        continue;
                    }
                    if self.options.retry_status_codes.contains(&status) {
                        debug!(status, attempt, "transient upstream failure, rotating");
                        self.pool
                            .report(lease.value(), Outcome::TransientFailure(status))
                            .await;
                        last_error = Some(GatewayError::TransientUpstream { status });
                        continue;
                    }
                    // Not a credential problem; the credential keeps its
                    // state and the error goes straight to the caller.
                    return Err(GatewayError::NonRetryableUpstream { status, body });
                }
                Err(UpstreamCallError::Transport(message)) => {
                    return Err(GatewayError::Transport(message));
                }
            }
        }

        let last = last_error.unwrap_or(GatewayError::NoEligibleCredential);
        Err(GatewayError::UpstreamExhausted {
            attempts,
            last: Box::new(last),
        })
    }

    async fn translate(
        &self,
        request: &ChatCompletionRequest,
        stream: grokgate_upstream::UpstreamStream,
    ) -> Result<DispatchOutput, GatewayError> {
        if request.stream.unwrap_or(false) {
            let lines = translate_stream(
                request.model.clone(),
                stream.body,
                self.options.translate.clone(),
            );
            return Ok(DispatchOutput::Stream(lines));
        }

        let content = collect(stream.body, &self.options.translate)
            .await
            .map_err(|err| GatewayError::NonRetryableUpstream {
                status: 502,
                body: err.to_string(),
            })?;
        let hex = Uuid::new_v4().simple().to_string();
        let completion = ChatCompletion::assistant(
            &format!("chatcmpl-{}", &hex[..24]),
            OffsetDateTime::now_utc().unix_timestamp(),
            &request.model,
            "",
            content,
        );
        Ok(DispatchOutput::Complete(completion))
    }

    /// Best-effort background probe after a successful call; brings the
    /// known quota back in line with the upstream's own accounting.
    fn sync_quota(&self, credential_value: String) {
        let Some(probe) = self.probe.clone() else {
            return;
        };
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let Some(credential) = pool.get(&credential_value).await else {
                return;
            };
            match probe.probe(&credential).await {
                Ok(reading) => {
                    pool.report(
                        &credential_value,
                        Outcome::QuotaUpdate {
                            remaining: reading.remaining,
                            elevated: reading.elevated,
                        },
                    )
                    .await;
                }
                Err(err) => debug!(error = %err, "post-success quota sync failed"),
            }
        });
    }
}
