//! Upstream NDJSON frame decoding.
//!
//! The upstream wraps every event as `{"result":{"response":{...}}}` with a
//! loosely-typed payload. Decoding maps each line onto one tagged variant;
//! anything unrecognized falls through without aborting the stream.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub response_id: Option<String>,
    pub model_hash: Option<String>,
    pub payload: FramePayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Token(TokenFrame),
    ModelResponse(ModelResponseFrame),
    VideoProgress(VideoFrame),
    ImageProgress(ImageProgressFrame),
    Error(String),
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenFrame {
    pub token: String,
    pub is_thinking: bool,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponseFrame {
    pub message: String,
    pub generated_image_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub progress: i64,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageProgressFrame {
    pub image_index: i64,
    pub progress: i64,
}

impl Frame {
    /// Decode one NDJSON line. Returns `None` only when the line is not
    /// valid JSON at all; valid JSON with an unknown shape decodes to
    /// `FramePayload::Unrecognized`.
    pub fn parse(line: &str) -> Option<Frame> {
        let value: Value = serde_json::from_str(line).ok()?;

        if let Some(message) = explicit_error(&value) {
            return Some(Frame {
                response_id: None,
                model_hash: None,
                payload: FramePayload::Error(message),
            });
        }

        let response = value.pointer("/result/response").unwrap_or(&Value::Null);

        let response_id = response
            .get("responseId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let model_hash = response
            .pointer("/llmInfo/modelHash")
            .or_else(|| response.pointer("/modelResponse/metadata/llm_info/modelHash"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let payload = decode_payload(response);
        Some(Frame {
            response_id,
            model_hash,
            payload,
        })
    }
}

fn explicit_error(value: &Value) -> Option<String> {
    let error = value
        .get("error")
        .or_else(|| value.pointer("/result/response/error"))?;
    match error {
        Value::String(message) => Some(message.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream error")
                .to_string(),
        ),
        _ => Some("upstream error".to_string()),
    }
}

fn decode_payload(response: &Value) -> FramePayload {
    if let Some(video) = response.get("streamingVideoGenerationResponse") {
        return FramePayload::VideoProgress(VideoFrame {
            progress: video.get("progress").and_then(Value::as_i64).unwrap_or(0),
            video_url: non_empty_str(video.get("videoUrl")),
            thumbnail_url: non_empty_str(video.get("thumbnailImageUrl")),
        });
    }

    if let Some(image) = response.get("streamingImageGenerationResponse") {
        return FramePayload::ImageProgress(ImageProgressFrame {
            image_index: image.get("imageIndex").and_then(Value::as_i64).unwrap_or(0),
            progress: image.get("progress").and_then(Value::as_i64).unwrap_or(0),
        });
    }

    if let Some(model_response) = response.get("modelResponse") {
        let generated_image_urls = model_response
            .get("generatedImageUrls")
            .and_then(Value::as_array)
            .map(|urls| {
                urls.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        return FramePayload::ModelResponse(ModelResponseFrame {
            message: model_response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            generated_image_urls,
        });
    }

    if let Some(token) = response.get("token").and_then(Value::as_str) {
        let citations = response
            .get("webSearchResults")
            .and_then(|results| results.get("results"))
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|result| {
                        let url = result.get("url").and_then(Value::as_str)?;
                        let title = result
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or(url);
                        Some(Citation {
                            title: title.to_string(),
                            url: url.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        return FramePayload::Token(TokenFrame {
            token: token.to_string(),
            is_thinking: response
                .get("isThinking")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            citations,
        });
    }

    FramePayload::Unrecognized
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
