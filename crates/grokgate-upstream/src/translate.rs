//! Upstream stream translation.
//!
//! Consumes the raw NDJSON body of one successful conversation call and
//! produces chat-completions SSE lines (streaming) or one assembled content
//! string (non-streaming). Timeouts never surface as errors: exhausting any
//! budget ends translation with a synthesized stop, indistinguishable from
//! a clean upstream finish.

use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use grokgate_common::Settings;
use grokgate_protocol::chat::{ChatCompletionChunk, DONE_LINE, Delta};
use grokgate_protocol::frame::{Frame, FramePayload, TokenFrame};
use grokgate_protocol::lines::LineDecoder;

use crate::assets;

const THINK_OPEN: &str = "<think>\n";
const THINK_CLOSE: &str = "</think>\n";

#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub show_thinking: bool,
    pub filtered_tags: Vec<String>,
    pub video_poster_preview: bool,
    pub first_frame_timeout: Duration,
    pub idle_timeout: Duration,
    pub total_timeout: Duration,
}

impl TranslateOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            show_thinking: settings.show_thinking,
            filtered_tags: settings.filtered_tags.clone(),
            video_poster_preview: settings.video_poster_preview,
            first_frame_timeout: Duration::from_secs(settings.stream_first_response_timeout_secs),
            idle_timeout: Duration::from_secs(settings.stream_chunk_timeout_secs),
            total_timeout: Duration::from_secs(settings.stream_total_timeout_secs),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("upstream stream error: {0}")]
    Upstream(String),
}

/// Wall-clock discipline over the body reads. Three independent budgets;
/// any of them running out ends translation gracefully.
struct Budgets {
    started: Instant,
    last_read: Instant,
    first_seen: bool,
    first: Duration,
    idle: Duration,
    total: Duration,
}

impl Budgets {
    fn new(opts: &TranslateOptions) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_read: now,
            first_seen: false,
            first: opts.first_frame_timeout,
            idle: opts.idle_timeout,
            total: opts.total_timeout,
        }
    }

    /// Time left before the nearest budget expires; `None` means expired
    /// already (including zero-configured budgets, which expire on first
    /// check without consuming anything).
    fn remaining(&self) -> Option<Duration> {
        let total_left = self.total.checked_sub(self.started.elapsed())?;
        let gap_budget = if self.first_seen { self.idle } else { self.first };
        let gap_left = gap_budget.checked_sub(self.last_read.elapsed())?;
        let left = total_left.min(gap_left);
        if left.is_zero() { None } else { Some(left) }
    }

    fn mark_read(&mut self) {
        self.first_seen = true;
        self.last_read = Instant::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentMode {
    Text,
    Thinking,
    Image,
    Video,
}

enum Flow {
    Continue,
    Done,
}

struct StreamState {
    opts: TranslateOptions,
    chunks: ChunkWriter,
    mode: ContentMode,
    /// An opening marker has been emitted and not yet closed.
    marker_open: bool,
    /// Set once the token state machine leaves thinking; later
    /// thinking-flagged frames never re-open it.
    thinking_closed: bool,
    last_video_progress: i64,
}

impl StreamState {
    fn new(model: String, opts: TranslateOptions) -> Self {
        Self {
            opts,
            chunks: ChunkWriter::new(model),
            mode: ContentMode::Text,
            marker_open: false,
            thinking_closed: false,
            last_video_progress: -1,
        }
    }

    async fn handle_line(&mut self, line: &str, tx: &mpsc::Sender<String>) -> Flow {
        let Some(frame) = Frame::parse(line) else {
            return Flow::Continue;
        };
        self.chunks.adopt(&frame);

        match frame.payload {
            FramePayload::Error(message) => {
                debug!(error = %message, "upstream signalled an in-stream error");
                let _ = tx.send(self.chunks.error(&message)).await;
                let _ = tx.send(DONE_LINE.to_string()).await;
                Flow::Done
            }
            FramePayload::Token(token) => self.handle_token(token, tx).await,
            FramePayload::VideoProgress(video) => {
                if let Some(url) = video.video_url {
                    return self
                        .finish_video(&url, video.thumbnail_url.as_deref(), tx)
                        .await;
                }
                if self.opts.show_thinking && video.progress > self.last_video_progress {
                    let mut content = String::new();
                    if !self.marker_open {
                        content.push_str(THINK_OPEN);
                        self.marker_open = true;
                    }
                    content.push_str(&format!("video generation {}%\n", video.progress));
                    if video.progress >= 100 && self.marker_open {
                        content.push_str(THINK_CLOSE);
                        self.marker_open = false;
                    }
                    let _ = tx.send(self.chunks.content(&content)).await;
                }
                self.last_video_progress = self.last_video_progress.max(video.progress);
                self.mode = ContentMode::Video;
                Flow::Continue
            }
            FramePayload::ImageProgress(image) => {
                if self.opts.show_thinking {
                    let mut content = String::new();
                    if !self.marker_open {
                        content.push_str(THINK_OPEN);
                        self.marker_open = true;
                    }
                    content.push_str(&format!(
                        "generating image {} at {}%\n",
                        image.image_index + 1,
                        image.progress
                    ));
                    let _ = tx.send(self.chunks.content(&content)).await;
                }
                self.mode = ContentMode::Image;
                Flow::Continue
            }
            FramePayload::ModelResponse(mr) => {
                if !mr.generated_image_urls.is_empty() {
                    let mut content = String::new();
                    if self.marker_open {
                        content.push_str(THINK_CLOSE);
                        self.marker_open = false;
                    }
                    for url in &mr.generated_image_urls {
                        content.push_str(&image_markdown(url));
                    }
                    let _ = tx.send(self.chunks.content_with_stop(&content)).await;
                    let _ = tx.send(DONE_LINE.to_string()).await;
                    return Flow::Done;
                }
                // A textual model response while thinking is still open means
                // the token stream carried only reasoning; surface the final
                // message inside the markers before closing them.
                if self.marker_open {
                    if !mr.message.is_empty() {
                        let line = format!("{}\n", mr.message);
                        let _ = tx.send(self.chunks.content(&line)).await;
                    }
                    let _ = tx.send(self.chunks.content(THINK_CLOSE)).await;
                    self.marker_open = false;
                    self.thinking_closed = true;
                    self.mode = ContentMode::Text;
                }
                Flow::Continue
            }
            FramePayload::Unrecognized => Flow::Continue,
        }
    }

    async fn handle_token(&mut self, token: TokenFrame, tx: &mpsc::Sender<String>) -> Flow {
        if self
            .opts
            .filtered_tags
            .iter()
            .any(|tag| !tag.is_empty() && token.token.contains(tag))
        {
            return Flow::Continue;
        }

        if token.is_thinking {
            if self.thinking_closed {
                return Flow::Continue;
            }
            self.mode = ContentMode::Thinking;
            if !self.opts.show_thinking {
                return Flow::Continue;
            }
            // Progress frames may have opened the marker already; the
            // marker state, not the mode, decides whether to open.
            let mut content = String::new();
            if !self.marker_open {
                content.push_str(THINK_OPEN);
                self.marker_open = true;
            }
            content.push_str(&token.token);
            for citation in &token.citations {
                content.push_str(&format!("\n[{}]({})", citation.title, citation.url));
            }
            let _ = tx.send(self.chunks.content(&content)).await;
            return Flow::Continue;
        }

        let mut content = String::new();
        if self.marker_open {
            content.push_str(THINK_CLOSE);
            self.marker_open = false;
            self.thinking_closed = true;
        }
        if self.mode == ContentMode::Thinking {
            self.thinking_closed = true;
        }
        self.mode = ContentMode::Text;
        content.push_str(&token.token);
        if !content.is_empty() {
            let _ = tx.send(self.chunks.content(&content)).await;
        }
        Flow::Continue
    }

    async fn finish_video(
        &mut self,
        url: &str,
        thumbnail: Option<&str>,
        tx: &mpsc::Sender<String>,
    ) -> Flow {
        if self.marker_open {
            let _ = tx.send(self.chunks.content(THINK_CLOSE)).await;
            self.marker_open = false;
        }
        let content = video_reference(url, thumbnail, self.opts.video_poster_preview);
        let _ = tx.send(self.chunks.content(&content)).await;
        let _ = tx.send(self.chunks.stop()).await;
        let _ = tx.send(DONE_LINE.to_string()).await;
        Flow::Done
    }

    /// Clean finish and timeout finish are deliberately identical.
    async fn finish(&mut self, tx: &mpsc::Sender<String>) {
        if self.marker_open {
            let _ = tx.send(self.chunks.content(THINK_CLOSE)).await;
            self.marker_open = false;
        }
        let _ = tx.send(self.chunks.stop()).await;
        let _ = tx.send(DONE_LINE.to_string()).await;
    }
}

/// Translate a raw body stream into chat-completion SSE lines.
///
/// The returned receiver yields complete `data: ...` lines including the
/// end-of-stream sentinel. Dropping it cancels translation and releases the
/// upstream body.
pub fn translate_stream(
    model: String,
    mut body: mpsc::Receiver<Bytes>,
    opts: TranslateOptions,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut budgets = Budgets::new(&opts);
        let mut state = StreamState::new(model, opts);
        let mut decoder = LineDecoder::new();

        loop {
            // A dropped receiver means the caller is gone; stop draining
            // the upstream body.
            if tx.is_closed() {
                return;
            }
            // Zero budgets must expire before the first read.
            let Some(budget) = budgets.remaining() else {
                state.finish(&tx).await;
                return;
            };
            let chunk = match tokio::time::timeout(budget, body.recv()).await {
                Err(_) => {
                    state.finish(&tx).await;
                    return;
                }
                Ok(None) => break,
                Ok(Some(chunk)) => chunk,
            };
            budgets.mark_read();
            for line in decoder.push_bytes(&chunk) {
                if let Flow::Done = state.handle_line(&line, &tx).await {
                    return;
                }
            }
        }

        if let Some(line) = decoder.finish()
            && let Flow::Done = state.handle_line(&line, &tx).await
        {
            return;
        }
        state.finish(&tx).await;
    });
    rx
}

/// Non-streaming translation: scan frames until one fully determines the
/// response, ignore the rest.
pub async fn collect(
    mut body: mpsc::Receiver<Bytes>,
    opts: &TranslateOptions,
) -> Result<String, TranslateError> {
    let mut budgets = Budgets::new(opts);
    let mut decoder = LineDecoder::new();

    loop {
        let Some(budget) = budgets.remaining() else {
            return Ok(String::new());
        };
        let chunk = match tokio::time::timeout(budget, body.recv()).await {
            Err(_) => return Ok(String::new()),
            Ok(None) => break,
            Ok(Some(chunk)) => chunk,
        };
        budgets.mark_read();
        for line in decoder.push_bytes(&chunk) {
            if let Some(result) = collect_line(&line, opts) {
                return result;
            }
        }
    }

    if let Some(line) = decoder.finish()
        && let Some(result) = collect_line(&line, opts)
    {
        return result;
    }
    Ok(String::new())
}

fn collect_line(line: &str, opts: &TranslateOptions) -> Option<Result<String, TranslateError>> {
    let frame = Frame::parse(line)?;
    match frame.payload {
        FramePayload::Error(message) => Some(Err(TranslateError::Upstream(message))),
        FramePayload::VideoProgress(video) => {
            let url = video.video_url?;
            Some(Ok(video_reference(
                &url,
                video.thumbnail_url.as_deref(),
                opts.video_poster_preview,
            )))
        }
        FramePayload::ModelResponse(mr) => {
            if !mr.generated_image_urls.is_empty() {
                let mut content = mr.message;
                if !content.is_empty() {
                    content.push('\n');
                }
                for url in &mr.generated_image_urls {
                    content.push_str(&image_markdown(url));
                }
                return Some(Ok(content));
            }
            if !mr.message.is_empty() {
                return Some(Ok(mr.message));
            }
            None
        }
        _ => None,
    }
}

fn image_markdown(url: &str) -> String {
    format!("![{}]({})\n", image_label(url), assets::proxy_path(url))
}

/// Second-to-last path segment names the generation; fall back to a
/// generic label.
fn image_label(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let mut parts = trimmed.rsplit('/');
    parts.next();
    parts.next().filter(|s| !s.is_empty()).unwrap_or("image")
}

fn video_reference(url: &str, thumbnail: Option<&str>, poster_preview: bool) -> String {
    let video_path = assets::proxy_path(url);
    let thumb_path = thumbnail.map(assets::proxy_path);

    if poster_preview {
        return match thumb_path {
            Some(thumb) => format!(
                "<a href=\"{video_path}\" target=\"_blank\" rel=\"noopener noreferrer\"><img src=\"{thumb}\" alt=\"video\" /></a>"
            ),
            None => format!(
                "<a href=\"{video_path}\" target=\"_blank\" rel=\"noopener noreferrer\">{video_path}</a>"
            ),
        };
    }
    match thumb_path {
        Some(thumb) => format!("<video controls src=\"{video_path}\" poster=\"{thumb}\"></video>"),
        None => format!("<video controls src=\"{video_path}\"></video>"),
    }
}

struct ChunkWriter {
    id: String,
    created: i64,
    model: String,
    fingerprint: String,
    role_sent: bool,
}

impl ChunkWriter {
    fn new(model: String) -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("chatcmpl-{}", &hex[..24]),
            created: OffsetDateTime::now_utc().unix_timestamp(),
            model,
            fingerprint: String::new(),
            role_sent: false,
        }
    }

    fn adopt(&mut self, frame: &Frame) {
        if let Some(response_id) = &frame.response_id {
            self.id = response_id.clone();
        }
        if let Some(model_hash) = &frame.model_hash
            && self.fingerprint.is_empty()
        {
            self.fingerprint = model_hash.clone();
        }
    }

    fn delta(&mut self, content: &str) -> Delta {
        let role = if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some("assistant")
        };
        Delta {
            role,
            content: Some(content.to_string()),
        }
    }

    fn content(&mut self, content: &str) -> String {
        let delta = self.delta(content);
        ChatCompletionChunk::new(&self.id, self.created, &self.model, &self.fingerprint, delta)
            .sse_line()
    }

    fn content_with_stop(&mut self, content: &str) -> String {
        let delta = self.delta(content);
        ChatCompletionChunk::new(&self.id, self.created, &self.model, &self.fingerprint, delta)
            .with_finish("stop")
            .sse_line()
    }

    fn stop(&mut self) -> String {
        ChatCompletionChunk::new(
            &self.id,
            self.created,
            &self.model,
            &self.fingerprint,
            Delta::default(),
        )
        .with_finish("stop")
        .sse_line()
    }

    fn error(&mut self, message: &str) -> String {
        let delta = self.delta(message);
        ChatCompletionChunk::new(&self.id, self.created, &self.model, &self.fingerprint, delta)
            .with_finish("error")
            .sse_line()
    }
}
