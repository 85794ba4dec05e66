use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("missing required setting: {0}")]
    MissingField(&'static str),
}

/// Final, merged runtime settings used by the running process.
///
/// Merge order: CLI > ENV > defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Database DSN for the credential store.
    pub dsn: String,
    /// Optional outbound proxy for upstream egress.
    pub proxy: Option<String>,

    /// Retries after the first attempt; `max_retry + 1` attempts total.
    pub max_retry: u32,
    /// Statuses that rotate to the next credential.
    pub retry_status_codes: Vec<u16>,
    /// Statuses that mark the credential permanently expired. Empty by
    /// default; the upstream signals revocation ambiguously today.
    pub fatal_status_codes: Vec<u16>,
    /// Consecutive transient failures before a credential is disabled.
    pub fail_threshold: u32,
    /// Fixed cooldown applied after each transient failure.
    pub cooldown_secs: u64,
    /// Interval between background quota refresh sweeps.
    pub refresh_interval_secs: u64,
    /// Concurrency cap for the refresh sweep's usage probes.
    pub refresh_concurrency: usize,
    /// Interval between pool reloads from the shared store.
    pub reload_interval_secs: u64,
    /// Debounce window for persisting credential mutations.
    pub save_delay_ms: u64,

    pub stream_first_response_timeout_secs: u64,
    pub stream_chunk_timeout_secs: u64,
    pub stream_total_timeout_secs: u64,

    /// Surface upstream "thinking" content wrapped in markers.
    pub show_thinking: bool,
    /// Token frames containing any of these substrings are dropped.
    pub filtered_tags: Vec<String>,
    /// Emit video results as a clickable poster preview instead of a raw
    /// embeddable video tag.
    pub video_poster_preview: bool,

    /// Extra cookie appended to upstream requests when set.
    pub cf_clearance: Option<String>,
}

/// Optional layer used for merging settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub proxy: Option<String>,
    pub max_retry: Option<u32>,
    pub retry_status_codes: Option<Vec<u16>>,
    pub fatal_status_codes: Option<Vec<u16>>,
    pub fail_threshold: Option<u32>,
    pub cooldown_secs: Option<u64>,
    pub refresh_interval_secs: Option<u64>,
    pub refresh_concurrency: Option<usize>,
    pub reload_interval_secs: Option<u64>,
    pub save_delay_ms: Option<u64>,
    pub stream_first_response_timeout_secs: Option<u64>,
    pub stream_chunk_timeout_secs: Option<u64>,
    pub stream_total_timeout_secs: Option<u64>,
    pub show_thinking: Option<bool>,
    pub filtered_tags: Option<Vec<String>>,
    pub video_poster_preview: Option<bool>,
    pub cf_clearance: Option<String>,
}

impl SettingsPatch {
    pub fn overlay(&mut self, other: SettingsPatch) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(host);
        take!(port);
        take!(dsn);
        take!(proxy);
        take!(max_retry);
        take!(retry_status_codes);
        take!(fatal_status_codes);
        take!(fail_threshold);
        take!(cooldown_secs);
        take!(refresh_interval_secs);
        take!(refresh_concurrency);
        take!(reload_interval_secs);
        take!(save_delay_ms);
        take!(stream_first_response_timeout_secs);
        take!(stream_chunk_timeout_secs);
        take!(stream_total_timeout_secs);
        take!(show_thinking);
        take!(filtered_tags);
        take!(video_poster_preview);
        take!(cf_clearance);
    }

    pub fn into_settings(self) -> Result<Settings, SettingsError> {
        Ok(Settings {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8686),
            dsn: self.dsn.ok_or(SettingsError::MissingField("dsn"))?,
            proxy: self.proxy,
            max_retry: self.max_retry.unwrap_or(1),
            retry_status_codes: self.retry_status_codes.unwrap_or_else(|| vec![401, 429, 403]),
            fatal_status_codes: self.fatal_status_codes.unwrap_or_default(),
            fail_threshold: self.fail_threshold.unwrap_or(5),
            cooldown_secs: self.cooldown_secs.unwrap_or(300),
            refresh_interval_secs: self.refresh_interval_secs.unwrap_or(8 * 3600),
            refresh_concurrency: self.refresh_concurrency.unwrap_or(5),
            reload_interval_secs: self.reload_interval_secs.unwrap_or(30),
            save_delay_ms: self.save_delay_ms.unwrap_or(500),
            stream_first_response_timeout_secs: self
                .stream_first_response_timeout_secs
                .unwrap_or(30),
            stream_chunk_timeout_secs: self.stream_chunk_timeout_secs.unwrap_or(60),
            stream_total_timeout_secs: self.stream_total_timeout_secs.unwrap_or(600),
            show_thinking: self.show_thinking.unwrap_or(false),
            filtered_tags: self.filtered_tags.unwrap_or_default(),
            video_poster_preview: self.video_poster_preview.unwrap_or(false),
            cf_clearance: self.cf_clearance,
        })
    }
}

impl From<Settings> for SettingsPatch {
    fn from(value: Settings) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            dsn: Some(value.dsn),
            proxy: value.proxy,
            max_retry: Some(value.max_retry),
            retry_status_codes: Some(value.retry_status_codes),
            fatal_status_codes: Some(value.fatal_status_codes),
            fail_threshold: Some(value.fail_threshold),
            cooldown_secs: Some(value.cooldown_secs),
            refresh_interval_secs: Some(value.refresh_interval_secs),
            refresh_concurrency: Some(value.refresh_concurrency),
            reload_interval_secs: Some(value.reload_interval_secs),
            save_delay_ms: Some(value.save_delay_ms),
            stream_first_response_timeout_secs: Some(value.stream_first_response_timeout_secs),
            stream_chunk_timeout_secs: Some(value.stream_chunk_timeout_secs),
            stream_total_timeout_secs: Some(value.stream_total_timeout_secs),
            show_thinking: Some(value.show_thinking),
            filtered_tags: Some(value.filtered_tags),
            video_poster_preview: Some(value.video_poster_preview),
            cf_clearance: value.cf_clearance,
        }
    }
}
