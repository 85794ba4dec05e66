use async_trait::async_trait;

use crate::credential::Credential;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Durable source of truth for credentials.
///
/// The pool reads a snapshot at bootstrap and on the reload interval;
/// mutations flow back through the debounced write buffer. Concurrent
/// instances write last-wins.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load_all(&self) -> StoreResult<Vec<Credential>>;
    async fn upsert(&self, credential: &Credential) -> StoreResult<()>;
    async fn delete(&self, value: &str) -> StoreResult<()>;
}
