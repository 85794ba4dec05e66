pub mod assets;
mod client;
mod headers;
mod request;
mod translate;
mod usage;

pub use client::{
    ConversationClient, ConversationRequest, UpstreamCallError, UpstreamConfig, UpstreamStream,
    WreqConversationClient,
};
pub use headers::{CHAT_ENDPOINT, RATE_LIMITS_ENDPOINT};
pub use request::{build_payload, flatten_messages, PayloadSpec};
pub use translate::{collect, translate_stream, TranslateError, TranslateOptions};
pub use usage::WreqQuotaProbe;
