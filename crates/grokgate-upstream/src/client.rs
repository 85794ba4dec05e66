use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use wreq::{Client, Proxy};

use grokgate_common::Settings;

use crate::headers::{CHAT_ENDPOINT, browser_headers};

const BODY_TRUNCATE: usize = 1000;

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub proxy: Option<String>,
    pub cf_clearance: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl UpstreamConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            proxy: settings.proxy.clone(),
            cf_clearance: settings.cf_clearance.clone(),
            // The body stream outlives the request; idle enforcement is the
            // translator's job, this is the transport backstop.
            stream_idle_timeout: Duration::from_secs(
                settings.stream_chunk_timeout_secs.max(1),
            ),
            ..Self::default()
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://grok.com".to_string(),
            proxy: None,
            cf_clearance: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
            stream_idle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationRequest {
    /// Credential value; sent as the session cookie.
    pub token: String,
    pub payload: serde_json::Value,
}

/// A successfully opened upstream response body.
pub struct UpstreamStream {
    pub body: mpsc::Receiver<Bytes>,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamCallError {
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream returned status {status}")]
    Status { status: u16, body: String },
}

pub trait ConversationClient: Send + Sync {
    fn converse<'a>(
        &'a self,
        req: ConversationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamStream, UpstreamCallError>> + Send + 'a>>;
}

#[derive(Clone)]
pub struct WreqConversationClient {
    config: UpstreamConfig,
    client: Client,
}

impl WreqConversationClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, wreq::Error> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    pub(crate) fn config(&self) -> &UpstreamConfig {
        &self.config
    }
}

pub(crate) fn build_client(config: &UpstreamConfig) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.stream_idle_timeout);
    if let Some(proxy) = config.proxy.as_deref() {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    builder.build()
}

pub(crate) fn apply_headers(
    mut builder: wreq::RequestBuilder,
    config: &UpstreamConfig,
    token: &str,
) -> wreq::RequestBuilder {
    for (name, value) in browser_headers(&config.base_url, token, config.cf_clearance.as_deref())
    {
        builder = builder.header(name, value);
    }
    builder
}

impl ConversationClient for WreqConversationClient {
    fn converse<'a>(
        &'a self,
        req: ConversationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamStream, UpstreamCallError>> + Send + 'a>>
    {
        Box::pin(async move {
            let url = format!("{}{CHAT_ENDPOINT}", self.config.base_url);
            let body = serde_json::to_vec(&req.payload)
                .map_err(|err| UpstreamCallError::Transport(err.to_string()))?;

            let builder = apply_headers(self.client.post(&url), &self.config, &req.token);
            let response = builder
                .body(body)
                .send()
                .await
                .map_err(|err| UpstreamCallError::Transport(err.to_string()))?;

            let status = response.status().as_u16();
            if !(200..300).contains(&status) {
                let body = match response.bytes().await {
                    Ok(bytes) => truncate_body(&bytes),
                    Err(_) => "unable to read response body".to_string(),
                };
                warn!(status, body = %body, "conversation request rejected");
                return Err(UpstreamCallError::Status { status, body });
            }
            info!(status, "conversation stream opened");

            let idle = self.config.stream_idle_timeout;
            let (tx, rx) = mpsc::channel::<Bytes>(16);
            tokio::spawn(async move {
                let mut stream = response.bytes_stream();
                loop {
                    let next = tokio::time::timeout(idle, stream.next()).await;
                    let Ok(item) = next else { break };
                    let Some(item) = item else { break };
                    let Ok(chunk) = item else { break };
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            });

            Ok(UpstreamStream { body: rx })
        })
    }
}

fn truncate_body(bytes: &Bytes) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut text = text.into_owned();
    if text.len() > BODY_TRUNCATE {
        let mut cut = BODY_TRUNCATE;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
