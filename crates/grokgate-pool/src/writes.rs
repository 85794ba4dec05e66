use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self as tokio_time, MissedTickBehavior};
use tracing::warn;

use crate::credential::Credential;
use crate::store::CredentialStore;

const QUEUE_CAPACITY: usize = 1024;

/// Debounced writer between the in-memory pool and the credential store.
///
/// Rapid successive updates to the same credential collapse to one upsert
/// per flush window (last write wins). Pending writes are flushed on the
/// interval and once more at shutdown, so in-memory state may run briefly
/// ahead of durable state.
pub struct WriteBuffer {
    tx: mpsc::Sender<Credential>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl WriteBuffer {
    pub fn spawn(store: Arc<dyn CredentialStore>, flush_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(writer(store, rx, flush_interval, stopped));
        Self { tx, stop, handle }
    }

    pub fn sender(&self) -> mpsc::Sender<Credential> {
        self.tx.clone()
    }

    /// Flush whatever is pending and stop the writer. The pool and the
    /// background tasks keep sender clones, so shutdown is an explicit
    /// signal rather than a wait for every sender to drop.
    pub async fn shutdown(self) {
        let Self { tx, stop, handle } = self;
        drop(tx);
        let _ = stop.send(());
        if let Err(err) = handle.await {
            warn!(error = %err, "write buffer task failed during shutdown");
        }
    }
}

async fn writer(
    store: Arc<dyn CredentialStore>,
    mut rx: mpsc::Receiver<Credential>,
    flush_interval: Duration,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut pending: HashMap<String, Credential> = HashMap::new();
    // A zero interval would panic; clamp to an immediate-ish tick.
    let mut ticker = tokio_time::interval(flush_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(credential) => {
                    pending.insert(credential.value.clone(), credential);
                }
                None => break,
            },
            _ = ticker.tick() => flush(store.as_ref(), &mut pending).await,
            _ = &mut stopped => break,
        }
    }

    // Updates that raced the stop signal still make the final flush.
    while let Ok(credential) = rx.try_recv() {
        pending.insert(credential.value.clone(), credential);
    }
    flush(store.as_ref(), &mut pending).await;
}

async fn flush(store: &dyn CredentialStore, pending: &mut HashMap<String, Credential>) {
    for (_, credential) in pending.drain() {
        if let Err(err) = store.upsert(&credential).await {
            warn!(error = %err, "credential upsert failed");
        }
    }
}
