use clap::Parser;

use grokgate_common::SettingsPatch;

/// Every flag is optional; unset flags fall back to environment variables
/// and then to the built-in defaults.
#[derive(Parser)]
#[command(name = "grokgate")]
pub(crate) struct Cli {
    #[arg(long, env = "GROKGATE_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "GROKGATE_PORT")]
    pub(crate) port: Option<u16>,
    /// Database DSN for the credential store, e.g. sqlite://grokgate.db.
    #[arg(long, env = "GROKGATE_DSN")]
    pub(crate) dsn: Option<String>,
    /// Outbound proxy for upstream egress.
    #[arg(long, env = "GROKGATE_PROXY")]
    pub(crate) proxy: Option<String>,

    #[arg(long, env = "GROKGATE_MAX_RETRY")]
    pub(crate) max_retry: Option<u32>,
    #[arg(long, env = "GROKGATE_RETRY_STATUS_CODES", value_delimiter = ',')]
    pub(crate) retry_status_codes: Option<Vec<u16>>,
    #[arg(long, env = "GROKGATE_FATAL_STATUS_CODES", value_delimiter = ',')]
    pub(crate) fatal_status_codes: Option<Vec<u16>>,
    #[arg(long, env = "GROKGATE_FAIL_THRESHOLD")]
    pub(crate) fail_threshold: Option<u32>,
    #[arg(long, env = "GROKGATE_COOLDOWN_SECS")]
    pub(crate) cooldown_secs: Option<u64>,
    #[arg(long, env = "GROKGATE_REFRESH_INTERVAL_SECS")]
    pub(crate) refresh_interval_secs: Option<u64>,
    #[arg(long, env = "GROKGATE_REFRESH_CONCURRENCY")]
    pub(crate) refresh_concurrency: Option<usize>,
    #[arg(long, env = "GROKGATE_RELOAD_INTERVAL_SECS")]
    pub(crate) reload_interval_secs: Option<u64>,
    #[arg(long, env = "GROKGATE_SAVE_DELAY_MS")]
    pub(crate) save_delay_ms: Option<u64>,

    #[arg(long, env = "GROKGATE_STREAM_FIRST_RESPONSE_TIMEOUT_SECS")]
    pub(crate) stream_first_response_timeout_secs: Option<u64>,
    #[arg(long, env = "GROKGATE_STREAM_CHUNK_TIMEOUT_SECS")]
    pub(crate) stream_chunk_timeout_secs: Option<u64>,
    #[arg(long, env = "GROKGATE_STREAM_TOTAL_TIMEOUT_SECS")]
    pub(crate) stream_total_timeout_secs: Option<u64>,

    #[arg(long, env = "GROKGATE_SHOW_THINKING")]
    pub(crate) show_thinking: Option<bool>,
    #[arg(long, env = "GROKGATE_FILTERED_TAGS", value_delimiter = ',')]
    pub(crate) filtered_tags: Option<Vec<String>>,
    #[arg(long, env = "GROKGATE_VIDEO_POSTER_PREVIEW")]
    pub(crate) video_poster_preview: Option<bool>,

    /// Extra cf_clearance cookie appended to upstream requests.
    #[arg(long, env = "GROKGATE_CF_CLEARANCE")]
    pub(crate) cf_clearance: Option<String>,
}

impl Cli {
    pub(crate) fn into_patch(self) -> SettingsPatch {
        SettingsPatch {
            host: self.host,
            port: self.port,
            dsn: self.dsn,
            proxy: self.proxy,
            max_retry: self.max_retry,
            retry_status_codes: self.retry_status_codes,
            fatal_status_codes: self.fatal_status_codes,
            fail_threshold: self.fail_threshold,
            cooldown_secs: self.cooldown_secs,
            refresh_interval_secs: self.refresh_interval_secs,
            refresh_concurrency: self.refresh_concurrency,
            reload_interval_secs: self.reload_interval_secs,
            save_delay_ms: self.save_delay_ms,
            stream_first_response_timeout_secs: self.stream_first_response_timeout_secs,
            stream_chunk_timeout_secs: self.stream_chunk_timeout_secs,
            stream_total_timeout_secs: self.stream_total_timeout_secs,
            show_thinking: self.show_thinking,
            filtered_tags: self.filtered_tags,
            video_poster_preview: self.video_poster_preview,
            cf_clearance: self.cf_clearance,
        }
    }
}
