use std::time::Duration;

use bytes::Bytes;
use grokgate_upstream::{TranslateOptions, collect, translate_stream};
use serde_json::Value;
use tokio::sync::mpsc;

fn opts() -> TranslateOptions {
    TranslateOptions {
        show_thinking: false,
        filtered_tags: Vec::new(),
        video_poster_preview: false,
        first_frame_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(5),
        total_timeout: Duration::from_secs(30),
    }
}

fn token_line(token: &str, thinking: bool) -> String {
    format!(
        r#"{{"result":{{"response":{{"token":{},"isThinking":{thinking}}}}}}}"#,
        serde_json::to_string(token).unwrap()
    )
}

async fn run(lines: &[String], opts: TranslateOptions) -> Vec<String> {
    let (tx, rx) = mpsc::channel(32);
    for line in lines {
        tx.send(Bytes::from(format!("{line}\n"))).await.unwrap();
    }
    drop(tx);
    let mut out_rx = translate_stream("grok-4".to_string(), rx, opts);
    let mut out = Vec::new();
    while let Some(line) = out_rx.recv().await {
        out.push(line);
    }
    out
}

fn chunk_json(line: &str) -> Option<Value> {
    let payload = line.strip_prefix("data: ")?.trim();
    if payload == "[DONE]" {
        return None;
    }
    serde_json::from_str(payload).ok()
}

fn content_of(line: &str) -> Option<String> {
    chunk_json(line)?
        .pointer("/choices/0/delta/content")?
        .as_str()
        .map(str::to_string)
}

fn finish_of(line: &str) -> Option<String> {
    chunk_json(line)?
        .pointer("/choices/0/finish_reason")?
        .as_str()
        .map(str::to_string)
}

fn joined_content(lines: &[String]) -> String {
    lines.iter().filter_map(|l| content_of(l)).collect()
}

#[tokio::test]
async fn two_text_frames_make_exactly_three_chunks_plus_sentinel() {
    let lines = vec![token_line("Hello ", false), token_line("world", false)];
    let out = run(&lines, opts()).await;

    assert_eq!(out.len(), 4);
    assert_eq!(content_of(&out[0]).as_deref(), Some("Hello "));
    assert_eq!(content_of(&out[1]).as_deref(), Some("world"));
    assert_eq!(finish_of(&out[2]).as_deref(), Some("stop"));
    assert_eq!(out[3], "data: [DONE]\n\n");

    let all = joined_content(&out);
    assert!(!all.contains("<think>"));
    assert!(!all.contains("</think>"));

    // Role rides on the first content chunk only.
    let first = chunk_json(&out[0]).unwrap();
    assert_eq!(
        first.pointer("/choices/0/delta/role").and_then(Value::as_str),
        Some("assistant")
    );
    assert!(chunk_json(&out[1])
        .unwrap()
        .pointer("/choices/0/delta/role")
        .is_none());
}

#[tokio::test]
async fn thinking_markers_open_and_close_exactly_once() {
    let lines = vec![
        token_line("plan: ", true),
        token_line("check the docs. ", true),
        token_line("Answer.", false),
    ];
    let mut options = opts();
    options.show_thinking = true;
    let out = run(&lines, options).await;

    let all = joined_content(&out);
    assert_eq!(all.matches("<think>").count(), 1);
    assert_eq!(all.matches("</think>").count(), 1);
    let open = all.find("<think>").unwrap();
    let close = all.find("</think>").unwrap();
    let thinking = &all[open + "<think>".len()..close];
    assert!(thinking.contains("plan: check the docs. "));
    assert!(all[close..].contains("Answer."));
}

#[tokio::test]
async fn hidden_thinking_leaves_no_trace() {
    let lines = vec![
        token_line("plan: ", true),
        token_line("check the docs. ", true),
        token_line("Answer.", false),
    ];
    let out = run(&lines, opts()).await;

    let all = joined_content(&out);
    assert_eq!(all, "Answer.");
}

#[tokio::test]
async fn thinking_never_reopens_after_closing() {
    let lines = vec![
        token_line("first thought", true),
        token_line("visible", false),
        token_line("late thought", true),
        token_line(" end", false),
    ];
    let mut options = opts();
    options.show_thinking = true;
    let out = run(&lines, options).await;

    let all = joined_content(&out);
    assert_eq!(all.matches("<think>").count(), 1);
    assert_eq!(all.matches("</think>").count(), 1);
    assert!(!all.contains("late thought"));
    assert!(all.contains("visible end"));
}

#[tokio::test]
async fn image_progress_between_thinking_tokens_keeps_one_marker_pair() {
    let lines = vec![
        token_line("planning ", true),
        r#"{"result":{"response":{"streamingImageGenerationResponse":{"imageIndex":0,"progress":40}}}}"#
            .to_string(),
        token_line("still planning ", true),
        token_line("done", false),
    ];
    let mut options = opts();
    options.show_thinking = true;
    let out = run(&lines, options).await;

    let all = joined_content(&out);
    assert_eq!(all.matches("<think>").count(), 1);
    assert_eq!(all.matches("</think>").count(), 1);
    assert!(all.contains("generating image 1 at 40%"));
    assert!(all.ends_with("done"));
}

#[tokio::test]
async fn citations_expand_inside_visible_thinking() {
    let line = r#"{"result":{"response":{"token":"sources","isThinking":true,"webSearchResults":{"results":[{"title":"Example","url":"https://example.com/a"},{"url":"https://example.com/b"}]}}}}"#;
    let mut options = opts();
    options.show_thinking = true;
    let out = run(&[line.to_string()], options).await;

    let all = joined_content(&out);
    assert!(all.contains("[Example](https://example.com/a)"));
    assert!(all.contains("[https://example.com/b](https://example.com/b)"));
}

#[tokio::test]
async fn filtered_tokens_are_dropped() {
    let lines = vec![
        token_line("keep me", false),
        token_line("drop <xai:tool> me", false),
    ];
    let mut options = opts();
    options.filtered_tags = vec!["<xai:tool>".to_string()];
    let out = run(&lines, options).await;

    let all = joined_content(&out);
    assert_eq!(all, "keep me");
}

#[tokio::test]
async fn zero_first_frame_timeout_consumes_nothing() {
    let (tx, rx) = mpsc::channel(4);
    tx.send(Bytes::from(format!("{}\n", token_line("never seen", false))))
        .await
        .unwrap();

    let mut options = opts();
    options.first_frame_timeout = Duration::ZERO;
    let mut out_rx = translate_stream("grok-4".to_string(), rx, options);
    let mut out = Vec::new();
    while let Some(line) = out_rx.recv().await {
        out.push(line);
    }

    assert_eq!(out.len(), 2);
    assert_eq!(finish_of(&out[0]).as_deref(), Some("stop"));
    assert!(content_of(&out[0]).is_none());
    assert_eq!(out[1], "data: [DONE]\n\n");
    // The pre-loaded frame was never read.
    drop(tx);
}

#[tokio::test]
async fn idle_timeout_resolves_as_graceful_stop() {
    let (tx, rx) = mpsc::channel(4);
    tx.send(Bytes::from(format!("{}\n", token_line("partial", false))))
        .await
        .unwrap();

    let mut options = opts();
    options.idle_timeout = Duration::from_millis(50);
    let mut out_rx = translate_stream("grok-4".to_string(), rx, options);
    let mut out = Vec::new();
    while let Some(line) = out_rx.recv().await {
        out.push(line);
    }
    // Sender stays open the whole time; only the idle budget ends the stream.
    drop(tx);

    assert_eq!(content_of(&out[0]).as_deref(), Some("partial"));
    assert_eq!(finish_of(&out[out.len() - 2]).as_deref(), Some("stop"));
    assert_eq!(out.last().map(String::as_str), Some("data: [DONE]\n\n"));
}

#[tokio::test]
async fn total_budget_ends_a_stream_that_keeps_producing() {
    let (tx, rx) = mpsc::channel(4);
    let feeder = tokio::spawn(async move {
        loop {
            let line = format!("{}\n", token_line("tick ", false));
            if tx.send(Bytes::from(line)).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    // Frames arrive well inside the idle budget; only the total budget
    // can end this stream.
    let mut options = opts();
    options.total_timeout = Duration::from_millis(100);
    let mut out_rx = translate_stream("grok-4".to_string(), rx, options);
    let mut out = Vec::new();
    while let Some(line) = out_rx.recv().await {
        out.push(line);
    }
    feeder.abort();

    assert!(joined_content(&out).contains("tick"));
    assert_eq!(finish_of(&out[out.len() - 2]).as_deref(), Some("stop"));
    assert_eq!(out.last().map(String::as_str), Some("data: [DONE]\n\n"));
}

#[tokio::test]
async fn explicit_error_frame_aborts_with_error_chunk() {
    let lines = vec![
        token_line("so far", false),
        r#"{"error":{"message":"quota exceeded"}}"#.to_string(),
        token_line("never", false),
    ];
    let out = run(&lines, opts()).await;

    let error_chunk = &out[1];
    assert_eq!(finish_of(error_chunk).as_deref(), Some("error"));
    assert_eq!(content_of(error_chunk).as_deref(), Some("quota exceeded"));
    assert_eq!(out[2], "data: [DONE]\n\n");
    assert_eq!(out.len(), 3);
}

#[tokio::test]
async fn terminal_image_frame_rewrites_urls_and_stops() {
    let lines = vec![
        r#"{"result":{"response":{"modelResponse":{"message":"","generatedImageUrls":[]}}}}"#
            .to_string(),
        r#"{"result":{"response":{"modelResponse":{"message":"","generatedImageUrls":["https://assets.example.com/gen/abc123/image.jpg"]}}}}"#
            .to_string(),
    ];
    let out = run(&lines, opts()).await;

    let terminal = out
        .iter()
        .find(|l| finish_of(l).as_deref() == Some("stop"))
        .expect("terminal chunk");
    let content = content_of(terminal).unwrap();
    assert!(content.starts_with("![abc123](/v1/assets/u_"));
    assert!(!content.contains("assets.example.com"));
    assert_eq!(out.last().map(String::as_str), Some("data: [DONE]\n\n"));
}

#[tokio::test]
async fn video_progress_then_terminal_url() {
    let lines = vec![
        r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":25}}}}"#
            .to_string(),
        r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":50}}}}"#
            .to_string(),
        r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":100,"videoUrl":"https://assets.example.com/v/final.mp4","thumbnailImageUrl":"https://assets.example.com/v/thumb.jpg"}}}}"#
            .to_string(),
    ];
    let mut options = opts();
    options.show_thinking = true;
    let out = run(&lines, options).await;

    let all = joined_content(&out);
    assert!(all.contains("video generation 25%"));
    assert!(all.contains("video generation 50%"));
    assert!(all.contains("<video controls src=\"/v1/assets/u_"));
    assert!(all.contains("poster=\"/v1/assets/u_"));
    assert_eq!(finish_of(&out[out.len() - 2]).as_deref(), Some("stop"));
    assert_eq!(out.last().map(String::as_str), Some("data: [DONE]\n\n"));
}

#[tokio::test]
async fn repeated_video_progress_is_deduplicated() {
    let lines = vec![
        r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":25}}}}"#
            .to_string(),
        r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":25}}}}"#
            .to_string(),
    ];
    let mut options = opts();
    options.show_thinking = true;
    let out = run(&lines, options).await;

    let all = joined_content(&out);
    assert_eq!(all.matches("video generation 25%").count(), 1);
}

#[tokio::test]
async fn poster_preview_emits_clickable_anchor() {
    let lines = vec![
        r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":100,"videoUrl":"https://assets.example.com/v/final.mp4","thumbnailImageUrl":"https://assets.example.com/v/thumb.jpg"}}}}"#
            .to_string(),
    ];
    let mut options = opts();
    options.video_poster_preview = true;
    let out = run(&lines, options).await;

    let all = joined_content(&out);
    assert!(all.starts_with("<a href=\"/v1/assets/u_"));
    assert!(all.contains("<img src=\"/v1/assets/u_"));
    assert!(!all.contains("<video"));
}

async fn run_collect(lines: &[String], opts: &TranslateOptions) -> String {
    let (tx, rx) = mpsc::channel(32);
    for line in lines {
        tx.send(Bytes::from(format!("{line}\n"))).await.unwrap();
    }
    drop(tx);
    collect(rx, opts).await.expect("collect should succeed")
}

#[tokio::test]
async fn collect_skips_empty_image_frames_and_stops_at_first_terminal() {
    let lines = vec![
        r#"{"result":{"response":{"modelResponse":{"message":"","generatedImageUrls":[]}}}}"#
            .to_string(),
        r#"{"result":{"response":{"modelResponse":{"message":"","generatedImageUrls":["https://assets.example.com/gen/a1/a.png"]}}}}"#
            .to_string(),
        r#"{"result":{"response":{"modelResponse":{"message":"","generatedImageUrls":["https://assets.example.com/gen/b2/b.png"]}}}}"#
            .to_string(),
    ];
    let content = run_collect(&lines, &opts()).await;

    // The codec token base64-encodes the URL, so match on the label.
    assert_eq!(content.matches("![").count(), 1);
    assert!(content.contains("![a1]"));
    assert!(!content.contains("![b2]"));
}

#[tokio::test]
async fn collect_resolves_on_first_textual_model_response() {
    let lines = vec![
        token_line("streamed ", false),
        r#"{"result":{"response":{"modelResponse":{"message":"full answer","generatedImageUrls":[]}}}}"#
            .to_string(),
        r#"{"result":{"response":{"modelResponse":{"message":"ignored","generatedImageUrls":[]}}}}"#
            .to_string(),
    ];
    let content = run_collect(&lines, &opts()).await;
    assert_eq!(content, "full answer");
}

#[tokio::test]
async fn collect_surfaces_explicit_error() {
    let (tx, rx) = mpsc::channel(4);
    tx.send(Bytes::from(
        "{\"error\":{\"message\":\"session invalid\"}}\n".to_string(),
    ))
    .await
    .unwrap();
    drop(tx);

    let err = collect(rx, &opts()).await.unwrap_err();
    assert!(err.to_string().contains("session invalid"));
}
