use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use grokgate_common::GatewayError;
use grokgate_core::{DispatchOptions, DispatchOutput, Dispatcher};
use grokgate_pool::{Credential, CredentialPool, PoolClass, PoolConfig};
use grokgate_protocol::chat::ChatCompletionRequest;
use grokgate_upstream::{
    ConversationClient, ConversationRequest, TranslateOptions, UpstreamCallError, UpstreamStream,
};

type ScriptStep = Result<Vec<String>, UpstreamCallError>;

/// Replays a fixed sequence of upstream responses, one per converse call.
struct ScriptedClient {
    script: Mutex<VecDeque<ScriptStep>>,
    calls: AtomicU32,
}

impl ScriptedClient {
    fn new(script: Vec<ScriptStep>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ConversationClient for ScriptedClient {
    fn converse<'a>(
        &'a self,
        _req: ConversationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamStream, UpstreamCallError>> + Send + 'a>>
    {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(UpstreamCallError::Transport("script exhausted".into())));
        Box::pin(async move {
            let lines = step?;
            let (tx, rx) = mpsc::channel(64);
            for line in lines {
                tx.send(Bytes::from(format!("{line}\n"))).await.unwrap();
            }
            Ok(UpstreamStream { body: rx })
        })
    }
}

/// Never resolves; stands in for an upstream that hangs mid-connect.
struct StalledClient;

impl ConversationClient for StalledClient {
    fn converse<'a>(
        &'a self,
        _req: ConversationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamStream, UpstreamCallError>> + Send + 'a>>
    {
        Box::pin(std::future::pending())
    }
}

fn token_line(token: &str) -> String {
    format!(
        r#"{{"result":{{"response":{{"token":{},"isThinking":false}}}}}}"#,
        serde_json::to_string(token).unwrap()
    )
}

fn options() -> DispatchOptions {
    DispatchOptions {
        max_retry: 1,
        retry_status_codes: vec![401, 429, 403],
        fatal_status_codes: vec![418],
        translate: TranslateOptions {
            show_thinking: false,
            filtered_tags: Vec::new(),
            video_poster_preview: false,
            first_frame_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(5),
            total_timeout: Duration::from_secs(10),
        },
    }
}

async fn pool_with(values: &[&str]) -> Arc<CredentialPool> {
    let pool = Arc::new(CredentialPool::new(
        PoolConfig {
            fail_threshold: 5,
            cooldown: Duration::from_secs(300),
        },
        None,
    ));
    for value in values {
        pool.insert(Credential::new(*value, PoolClass::Basic)).await;
    }
    pool
}

fn request(model: &str, stream: bool) -> ChatCompletionRequest {
    serde_json::from_value(serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": "hello"}],
        "stream": stream,
    }))
    .unwrap()
}

fn status(code: u16) -> UpstreamCallError {
    UpstreamCallError::Status {
        status: code,
        body: format!("status {code}"),
    }
}

async fn drain(mut rx: mpsc::Receiver<String>) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(line) = rx.recv().await {
        out.push(line);
    }
    out
}

#[tokio::test]
async fn unknown_model_is_rejected_without_touching_upstream() {
    let pool = pool_with(&["sso-a"]).await;
    let client = ScriptedClient::new(vec![Ok(vec![token_line("hi")])]);
    let dispatcher = Dispatcher::new(pool, client.clone(), None, options());

    let err = dispatcher
        .dispatch(&request("gpt-4", true))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, GatewayError::InvalidModel(ref m) if m == "gpt-4"));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn empty_pool_reports_no_eligible_credential() {
    let pool = pool_with(&[]).await;
    let client = ScriptedClient::new(vec![]);
    let dispatcher = Dispatcher::new(pool, client.clone(), None, options());

    let err = dispatcher
        .dispatch(&request("grok-4", true))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, GatewayError::NoEligibleCredential));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn first_attempt_success_streams_and_counts_use() {
    let pool = pool_with(&["sso-a"]).await;
    let client = ScriptedClient::new(vec![Ok(vec![token_line("hello there")])]);
    let dispatcher = Dispatcher::new(pool.clone(), client.clone(), None, options());

    let output = dispatcher.dispatch(&request("grok-4", true)).await.unwrap();
    let DispatchOutput::Stream(rx) = output else {
        panic!("expected a stream");
    };
    let lines = drain(rx).await;
    assert_eq!(lines.last().map(String::as_str), Some("data: [DONE]\n\n"));
    assert!(lines.iter().any(|l| l.contains("hello there")));

    assert_eq!(client.calls(), 1);
    let cred = pool.get("sso-a").await.unwrap();
    assert_eq!(cred.use_count, 1);
    assert_eq!(cred.fail_count, 0);
}

#[tokio::test]
async fn retryable_status_rotates_to_next_credential() {
    let pool = pool_with(&["sso-a", "sso-b"]).await;
    let client = ScriptedClient::new(vec![
        Err(status(429)),
        Ok(vec![token_line("second try")]),
    ]);
    let dispatcher = Dispatcher::new(pool.clone(), client.clone(), None, options());

    let output = dispatcher.dispatch(&request("grok-4", true)).await.unwrap();
    let DispatchOutput::Stream(rx) = output else {
        panic!("expected a stream");
    };
    let lines = drain(rx).await;
    assert!(lines.iter().any(|l| l.contains("second try")));

    assert_eq!(client.calls(), 2);
    // One of the two took the penalty, the other served the request.
    let a = pool.get("sso-a").await.unwrap();
    let b = pool.get("sso-b").await.unwrap();
    let (failed, served) = if a.fail_count == 1 { (a, b) } else { (b, a) };
    assert_eq!(failed.fail_count, 1);
    assert!(failed.cooldown_until.is_some());
    assert_eq!(served.use_count, 1);
}

#[tokio::test]
async fn fatal_status_expires_the_credential() {
    let pool = pool_with(&["sso-a", "sso-b"]).await;
    let client = ScriptedClient::new(vec![
        Err(status(418)),
        Ok(vec![token_line("ok")]),
    ]);
    let dispatcher = Dispatcher::new(pool.clone(), client.clone(), None, options());

    dispatcher.dispatch(&request("grok-4", true)).await.unwrap();

    let a = pool.get("sso-a").await.unwrap();
    let b = pool.get("sso-b").await.unwrap();
    assert_eq!(
        [a.expired, b.expired].iter().filter(|e| **e).count(),
        1,
        "exactly one credential expired"
    );
}

#[tokio::test]
async fn non_retryable_status_surfaces_immediately_without_penalty() {
    let pool = pool_with(&["sso-a"]).await;
    let client = ScriptedClient::new(vec![Err(status(500))]);
    let dispatcher = Dispatcher::new(pool.clone(), client.clone(), None, options());

    let err = dispatcher
        .dispatch(&request("grok-4", true))
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        GatewayError::NonRetryableUpstream { status: 500, .. }
    ));
    assert_eq!(client.calls(), 1);

    let cred = pool.get("sso-a").await.unwrap();
    assert_eq!(cred.fail_count, 0);
    assert!(cred.cooldown_until.is_none());
    // The in-flight mark is released: the credential is selectable again.
    assert!(pool.select(false).await.is_ok());
}

#[tokio::test]
async fn transport_error_surfaces_immediately_without_penalty() {
    let pool = pool_with(&["sso-a"]).await;
    let client = ScriptedClient::new(vec![Err(UpstreamCallError::Transport(
        "connection refused".into(),
    ))]);
    let dispatcher = Dispatcher::new(pool.clone(), client.clone(), None, options());

    let err = dispatcher
        .dispatch(&request("grok-4", true))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, GatewayError::Transport(_)));
    assert_eq!(client.calls(), 1);
    assert_eq!(pool.get("sso-a").await.unwrap().fail_count, 0);
    assert!(pool.select(false).await.is_ok());
}

#[tokio::test]
async fn cancelled_dispatch_returns_the_credential_to_rotation() {
    let pool = pool_with(&["sso-a"]).await;
    let dispatcher = Dispatcher::new(pool.clone(), Arc::new(StalledClient), None, options());

    // The caller goes away while the upstream call is still pending; the
    // timeout drops the dispatch future between select and report.
    let request = request("grok-4", true);
    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), dispatcher.dispatch(&request)).await;
    assert!(cancelled.is_err());

    assert!(pool.select(false).await.is_ok());
    assert_eq!(pool.get("sso-a").await.unwrap().fail_count, 0);
}

#[tokio::test]
async fn exhausted_retries_report_last_error_and_cap_attempts() {
    let pool = pool_with(&["sso-a", "sso-b", "sso-c"]).await;
    let client = ScriptedClient::new(vec![
        Err(status(429)),
        Err(status(401)),
        Ok(vec![token_line("never reached")]),
    ]);
    let dispatcher = Dispatcher::new(pool.clone(), client.clone(), None, options());

    let err = dispatcher
        .dispatch(&request("grok-4", true))
        .await
        .err()
        .unwrap();
    let GatewayError::UpstreamExhausted { attempts, last } = err else {
        panic!("expected exhaustion");
    };
    assert_eq!(attempts, 2);
    assert!(matches!(
        *last,
        GatewayError::TransientUpstream { status: 401 }
    ));
    // max_retry = 1 caps the loop at two attempts even with a third
    // credential still eligible.
    assert_eq!(client.calls(), 2);

    let cooled = [
        pool.get("sso-a").await.unwrap(),
        pool.get("sso-b").await.unwrap(),
        pool.get("sso-c").await.unwrap(),
    ]
    .iter()
    .filter(|c| c.fail_count == 1)
    .count();
    assert_eq!(cooled, 2);
}

#[tokio::test]
async fn heavy_model_with_basic_only_pool_is_rejected() {
    let pool = pool_with(&["sso-a"]).await;
    let client = ScriptedClient::new(vec![Ok(vec![token_line("hi")])]);
    let dispatcher = Dispatcher::new(pool, client.clone(), None, options());

    let err = dispatcher
        .dispatch(&request("grok-4-heavy", true))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, GatewayError::NoEligibleCredential));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn non_streaming_request_returns_a_completion() {
    let pool = pool_with(&["sso-a"]).await;
    let client = ScriptedClient::new(vec![Ok(vec![
        token_line("final "),
        token_line("answer"),
        r#"{"result":{"response":{"modelResponse":{"message":"final answer","generatedImageUrls":[]}}}}"#
            .to_string(),
    ])]);
    let dispatcher = Dispatcher::new(pool, client, None, options());

    let output = dispatcher
        .dispatch(&request("grok-4", false))
        .await
        .unwrap();
    let DispatchOutput::Complete(completion) = output else {
        panic!("expected a completion");
    };
    assert!(completion.id.starts_with("chatcmpl-"));
    assert_eq!(completion.model, "grok-4");
    assert_eq!(completion.choices[0].message.content, "final answer");
    assert_eq!(completion.choices[0].finish_reason, "stop");
}
