use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Quota value meaning "not yet probed".
pub const QUOTA_UNKNOWN: i64 = -1;

/// Tier of a credential; heavy models require `Elevated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolClass {
    Basic,
    Elevated,
}

/// One borrowed upstream session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque secret; unique identity within the pool.
    pub value: String,
    pub pool_class: PoolClass,
    /// `-1` unknown, `0` exhausted, `>0` known remaining calls.
    pub remaining_quota: i64,
    /// Gates heavy-model usage independently; meaningful for `Elevated`.
    pub elevated_quota: i64,
    pub fail_count: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub cooldown_until: Option<OffsetDateTime>,
    pub disabled: bool,
    pub expired: bool,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub use_count: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_used_at: Option<OffsetDateTime>,
}

impl Credential {
    pub fn new(value: impl Into<String>, pool_class: PoolClass) -> Self {
        Self {
            value: value.into(),
            pool_class,
            remaining_quota: QUOTA_UNKNOWN,
            elevated_quota: QUOTA_UNKNOWN,
            fail_count: 0,
            cooldown_until: None,
            disabled: false,
            expired: false,
            note: String::new(),
            tags: Vec::new(),
            use_count: 0,
            last_used_at: None,
        }
    }

    /// Derived status, never stored. Precedence:
    /// expired > disabled > cooling > active.
    pub fn status(&self, now: OffsetDateTime) -> CredentialStatus {
        if self.expired {
            return CredentialStatus::Expired;
        }
        if self.disabled {
            return CredentialStatus::Disabled;
        }
        if let Some(until) = self.cooldown_until
            && now < until
        {
            return CredentialStatus::Cooling;
        }
        CredentialStatus::Active
    }

    /// Whether this credential may serve a request of the given weight.
    /// Unknown quota (`-1`) counts as usable until proven otherwise.
    pub fn eligible_for(&self, heavy: bool, now: OffsetDateTime) -> bool {
        if self.status(now) != CredentialStatus::Active {
            return false;
        }
        if heavy {
            self.pool_class == PoolClass::Elevated && self.elevated_quota != 0
        } else {
            self.remaining_quota != 0
        }
    }

    /// Quota relevant to the given request weight.
    pub fn relevant_quota(&self, heavy: bool) -> i64 {
        if heavy { self.elevated_quota } else { self.remaining_quota }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Expired,
    Disabled,
    Cooling,
    Active,
}
