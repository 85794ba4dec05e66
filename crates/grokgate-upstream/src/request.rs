//! Upstream conversation payload construction.

use grokgate_protocol::chat::{ChatMessage, MessageContent, VideoOptions};
use serde_json::{Value, json};

/// Everything the payload builder needs to know about the resolved model.
#[derive(Debug, Clone)]
pub struct PayloadSpec<'a> {
    pub upstream_model: &'a str,
    pub model_mode: &'a str,
    pub video: Option<&'a VideoOptions>,
}

/// Flatten the caller's message list into one upstream prompt.
///
/// Every message except the last user message keeps a `role: ` prefix;
/// messages collapse to their text parts and are joined by blank lines.
pub fn flatten_messages(messages: &[ChatMessage]) -> String {
    let extracted: Vec<(String, String)> = messages
        .iter()
        .filter_map(|msg| {
            let text = message_text(&msg.content);
            if text.trim().is_empty() {
                return None;
            }
            Some((msg.role.clone(), text))
        })
        .collect();

    let last_user = extracted
        .iter()
        .rposition(|(role, _)| role == "user");

    extracted
        .iter()
        .enumerate()
        .map(|(i, (role, text))| {
            if Some(i) == last_user {
                text.clone()
            } else {
                let role = if role.is_empty() { "user" } else { role };
                format!("{role}: {text}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn message_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter(|part| part.kind == "text")
            .filter_map(|part| part.text.as_deref())
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Build the provider-specific conversation body.
pub fn build_payload(message: &str, spec: &PayloadSpec<'_>) -> Value {
    let mut payload = json!({
        "temporary": true,
        "modelName": spec.upstream_model,
        "modelMode": spec.model_mode,
        "message": message,
        "fileAttachments": [],
        "imageAttachments": [],
        "disableSearch": false,
        "enableImageGeneration": true,
        "returnImageBytes": false,
        "enableImageStreaming": true,
        "imageGenerationCount": 2,
        "forceConcise": false,
        "toolOverrides": {},
        "enableSideBySide": true,
        "sendFinalMetadata": true,
        "isReasoning": false,
        "disableTextFollowUps": false,
        "responseMetadata": {
            "modelConfigOverride": {"modelMap": {}},
            "requestModelDetails": {"modelId": spec.upstream_model}
        },
    });

    if let Some(video) = spec.video {
        payload["toolOverrides"] = json!({"videoGen": true});
        payload["responseMetadata"]["modelConfigOverride"]["modelMap"] = json!({
            "videoGenModelConfig": {
                "aspectRatio": video.aspect_ratio.as_deref().unwrap_or("3:2"),
                "videoLength": video.duration_secs.unwrap_or(6),
                "videoResolution": video.resolution.as_deref().unwrap_or("SD"),
            }
        });
        if let Some(preset) = video.style_preset.as_deref() {
            let mode_flag = match preset {
                "fun" => "--mode=extremely-crazy",
                "spicy" => "--mode=extremely-spicy-or-crazy",
                _ => "--mode=normal",
            };
            payload["message"] = Value::String(format!("{message} {mode_flag}"));
        }
    }

    payload
}
