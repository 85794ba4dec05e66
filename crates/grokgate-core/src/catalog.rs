//! Served model catalog.
//!
//! Each caller-facing id maps onto an upstream model name and mode. Heavy
//! entries require an elevated credential with elevated quota; video
//! entries switch the payload builder into video generation.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: &'static str,
    pub upstream_model: &'static str,
    pub model_mode: &'static str,
    pub heavy: bool,
    pub video: bool,
}

const MODELS: &[ModelSpec] = &[
    ModelSpec {
        id: "grok-3",
        upstream_model: "grok-3",
        model_mode: "MODEL_MODE_AUTO",
        heavy: false,
        video: false,
    },
    ModelSpec {
        id: "grok-3-fast",
        upstream_model: "grok-3",
        model_mode: "MODEL_MODE_FAST",
        heavy: false,
        video: false,
    },
    ModelSpec {
        id: "grok-4",
        upstream_model: "grok-4",
        model_mode: "MODEL_MODE_AUTO",
        heavy: false,
        video: false,
    },
    ModelSpec {
        id: "grok-4-mini",
        upstream_model: "grok-4-mini-thinking-tahoe",
        model_mode: "MODEL_MODE_GROK_4_MINI_THINKING",
        heavy: false,
        video: false,
    },
    ModelSpec {
        id: "grok-4-fast",
        upstream_model: "grok-4",
        model_mode: "MODEL_MODE_FAST",
        heavy: false,
        video: false,
    },
    ModelSpec {
        id: "grok-4-heavy",
        upstream_model: "grok-4",
        model_mode: "MODEL_MODE_HEAVY",
        heavy: true,
        video: false,
    },
    ModelSpec {
        id: "grok-4.1",
        upstream_model: "grok-4-1-thinking-1129",
        model_mode: "MODEL_MODE_AUTO",
        heavy: false,
        video: false,
    },
    ModelSpec {
        id: "grok-4.1-thinking",
        upstream_model: "grok-4-1-thinking-1129",
        model_mode: "MODEL_MODE_GROK_4_1_THINKING",
        heavy: false,
        video: false,
    },
    ModelSpec {
        id: "grok-imagine-1.0",
        upstream_model: "grok-3",
        model_mode: "MODEL_MODE_FAST",
        heavy: false,
        video: false,
    },
    ModelSpec {
        id: "grok-imagine-1.0-video",
        upstream_model: "grok-3",
        model_mode: "MODEL_MODE_FAST",
        heavy: false,
        video: true,
    },
];

pub fn all() -> &'static [ModelSpec] {
    MODELS
}

pub fn get(id: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|spec| spec.id == id)
}
