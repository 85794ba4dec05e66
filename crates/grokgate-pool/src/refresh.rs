use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{self as tokio_time, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::pool::{CredentialPool, Outcome};
use crate::store::CredentialStore;

/// Authoritative quota reading from an upstream usage probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaReading {
    pub remaining: i64,
    /// Heavy-model quota; probed only for elevated credentials.
    pub elevated: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("usage probe failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait QuotaProbe: Send + Sync {
    async fn probe(&self, credential: &Credential) -> Result<QuotaReading, ProbeError>;
}

/// Probe every non-expired, non-disabled credential with bounded
/// concurrency and apply the readings as quota updates.
pub async fn refresh_all(
    pool: &Arc<CredentialPool>,
    probe: &Arc<dyn QuotaProbe>,
    concurrency: usize,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::new();

    for credential in pool.all().await {
        if credential.expired || credential.disabled {
            continue;
        }
        let semaphore = semaphore.clone();
        let pool = pool.clone();
        let probe = probe.clone();
        tasks.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return;
            };
            match probe.probe(&credential).await {
                Ok(reading) => {
                    debug!(
                        remaining = reading.remaining,
                        elevated = ?reading.elevated,
                        "quota refreshed"
                    );
                    pool.report(
                        &credential.value,
                        Outcome::QuotaUpdate {
                            remaining: reading.remaining,
                            elevated: reading.elevated,
                        },
                    )
                    .await;
                }
                Err(err) => warn!(error = %err, "quota probe failed"),
            }
        }));
    }

    let count = tasks.len();
    for task in tasks {
        let _ = task.await;
    }
    info!(probed = count, "quota refresh sweep finished");
}

pub fn spawn_refresh_task(
    pool: Arc<CredentialPool>,
    probe: Arc<dyn QuotaProbe>,
    interval: Duration,
    concurrency: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio_time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so bootstrap does not
        // double-probe a freshly loaded pool.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            refresh_all(&pool, &probe, concurrency).await;
        }
    })
}

/// Periodically reload pool state from the shared store. No cross-instance
/// lock; last-write-wins is the accepted tradeoff.
pub fn spawn_reload_task(
    pool: Arc<CredentialPool>,
    store: Arc<dyn CredentialStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio_time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.load_all().await {
                Ok(credentials) => {
                    debug!(count = credentials.len(), "pool reloaded from store");
                    pool.replace_all(credentials).await;
                }
                Err(err) => warn!(error = %err, "pool reload failed"),
            }
        }
    })
}
