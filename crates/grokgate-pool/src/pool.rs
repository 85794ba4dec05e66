use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::credential::{Credential, CredentialStatus, QUOTA_UNKNOWN};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Consecutive transient failures before a credential is disabled.
    pub fail_threshold: u32,
    /// Fixed cooldown applied after each transient failure. Policy knob;
    /// a fail_count-scaled curve would slot in here.
    pub cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            fail_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    TransientFailure(u16),
    FatalFailure(u16),
    QuotaUpdate { remaining: i64, elevated: Option<i64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error("no eligible credential")]
    NoEligibleCredential,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub cooling: usize,
    pub disabled: usize,
    pub expired: usize,
    pub in_flight: usize,
}

#[derive(Debug, Clone)]
struct Slot {
    credential: Credential,
    /// Held true for the lifetime of an outstanding `Lease`. Prevents
    /// concurrent double-spend of a known quota. Shared with the lease so
    /// the mark clears even when the attempt future is dropped mid-call.
    in_flight: Arc<AtomicBool>,
}

/// Exclusive hold on a selected credential for one upstream attempt.
///
/// The in-flight exclusion lasts exactly as long as the lease: dropping it,
/// whether an outcome was reported or the attempt was cancelled, returns
/// the credential to rotation.
#[derive(Debug)]
pub struct Lease {
    credential: Credential,
    mark: Arc<AtomicBool>,
}

impl Lease {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn value(&self) -> &str {
        &self.credential.value
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.mark.store(false, AtomicOrdering::Release);
    }
}

/// In-memory view over the credential store.
///
/// The whole map sits behind one RwLock; select and report take the write
/// guard only for the brief mutation, so per-credential updates are never
/// torn between concurrent readers and writers.
pub struct CredentialPool {
    slots: RwLock<HashMap<String, Slot>>,
    config: PoolConfig,
    /// Mutations are echoed here for debounced persistence.
    persist: Option<mpsc::Sender<Credential>>,
}

impl CredentialPool {
    pub fn new(config: PoolConfig, persist: Option<mpsc::Sender<Credential>>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            config,
            persist,
        }
    }

    pub async fn insert(&self, credential: Credential) {
        let mut slots = self.slots.write().await;
        slots.insert(
            credential.value.clone(),
            Slot {
                credential,
                in_flight: Arc::new(AtomicBool::new(false)),
            },
        );
    }

    pub async fn remove(&self, value: &str) -> bool {
        self.slots.write().await.remove(value).is_some()
    }

    /// Replace pool contents from a fresh store snapshot. Credentials that
    /// are still present keep their in-flight mark (the same shared flag, so
    /// outstanding leases stay attached); last-write-wins against concurrent
    /// instances is accepted.
    pub async fn replace_all(&self, credentials: Vec<Credential>) {
        let mut slots = self.slots.write().await;
        let mut next = HashMap::with_capacity(credentials.len());
        for credential in credentials {
            let in_flight = slots
                .get(&credential.value)
                .map(|slot| slot.in_flight.clone())
                .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
            next.insert(credential.value.clone(), Slot { credential, in_flight });
        }
        *slots = next;
    }

    /// Pick an eligible credential for a request of the given weight and
    /// lease it. Prefers the least-recently-used candidate, ties broken by
    /// highest known quota (unknown ranks highest).
    pub async fn select(&self, heavy: bool) -> Result<Lease, SelectError> {
        let now = OffsetDateTime::now_utc();
        let mut slots = self.slots.write().await;

        let chosen = slots
            .values_mut()
            .filter(|slot| {
                !slot.in_flight.load(AtomicOrdering::Acquire)
                    && slot.credential.eligible_for(heavy, now)
            })
            .min_by(|a, b| candidate_order(&a.credential, &b.credential, heavy));

        let Some(slot) = chosen else {
            return Err(SelectError::NoEligibleCredential);
        };
        slot.in_flight.store(true, AtomicOrdering::Release);
        debug!(heavy, credential = %redact(&slot.credential.value), "credential selected");
        Ok(Lease {
            credential: slot.credential.clone(),
            mark: slot.in_flight.clone(),
        })
    }

    /// Apply an attempt outcome. The in-flight exclusion is owned by the
    /// lease, not by the report; quota updates come from probes and do not
    /// belong to an attempt at all.
    pub async fn report(&self, value: &str, outcome: Outcome) {
        let now = OffsetDateTime::now_utc();
        let snapshot = {
            let mut slots = self.slots.write().await;
            let Some(slot) = slots.get_mut(value) else {
                warn!(credential = %redact(value), "report for unknown credential");
                return;
            };
            let credential = &mut slot.credential;
            match outcome {
                Outcome::Success => {
                    credential.fail_count = 0;
                    credential.use_count += 1;
                    credential.last_used_at = Some(now);
                }
                Outcome::TransientFailure(status) => {
                    credential.fail_count += 1;
                    if credential.fail_count >= self.config.fail_threshold {
                        credential.disabled = true;
                        warn!(
                            credential = %redact(value),
                            status,
                            fail_count = credential.fail_count,
                            "credential disabled after repeated failures"
                        );
                    } else {
                        credential.cooldown_until = Some(now + self.config.cooldown);
                    }
                }
                Outcome::FatalFailure(status) => {
                    credential.expired = true;
                    warn!(credential = %redact(value), status, "credential expired");
                }
                Outcome::QuotaUpdate { remaining, elevated } => {
                    credential.remaining_quota = remaining;
                    if let Some(elevated) = elevated {
                        credential.elevated_quota = elevated;
                    }
                }
            }
            credential.clone()
        };

        if let Some(persist) = &self.persist
            && persist.try_send(snapshot).is_err()
        {
            warn!(credential = %redact(value), "persist queue full, dropping update");
        }
    }

    pub async fn get(&self, value: &str) -> Option<Credential> {
        self.slots
            .read()
            .await
            .get(value)
            .map(|slot| slot.credential.clone())
    }

    /// Snapshot of every credential, for refresh sweeps and listings.
    pub async fn all(&self) -> Vec<Credential> {
        self.slots
            .read()
            .await
            .values()
            .map(|slot| slot.credential.clone())
            .collect()
    }

    pub async fn stats(&self) -> PoolStats {
        let now = OffsetDateTime::now_utc();
        let slots = self.slots.read().await;
        let mut stats = PoolStats {
            total: slots.len(),
            ..PoolStats::default()
        };
        for slot in slots.values() {
            if slot.in_flight.load(AtomicOrdering::Acquire) {
                stats.in_flight += 1;
            }
            match slot.credential.status(now) {
                CredentialStatus::Active => stats.active += 1,
                CredentialStatus::Cooling => stats.cooling += 1,
                CredentialStatus::Disabled => stats.disabled += 1,
                CredentialStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }
}

/// Least-recently-used first (never-used ranks earliest), then highest
/// relevant quota, then value for determinism.
fn candidate_order(a: &Credential, b: &Credential, heavy: bool) -> Ordering {
    let used = match (a.last_used_at, b.last_used_at) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    };
    used.then_with(|| quota_rank(b, heavy).cmp(&quota_rank(a, heavy)))
        .then_with(|| a.value.cmp(&b.value))
}

fn quota_rank(credential: &Credential, heavy: bool) -> i64 {
    let quota = credential.relevant_quota(heavy);
    if quota == QUOTA_UNKNOWN { i64::MAX } else { quota }
}

fn redact(value: &str) -> String {
    let head: String = value.chars().take(8).collect();
    format!("{head}...")
}
